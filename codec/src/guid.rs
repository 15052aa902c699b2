//! 128-bit entity identifiers.
//!
//! An [`EntityGuid`] is two 64-bit words. The high word carries the
//! identity-class tag and routing metadata; the low word carries the
//! monotonic counter (and, for map-scoped classes, the server id).
//!
//! High word layout:
//!
//! | bits    | field                                   |
//! |---------|-----------------------------------------|
//! | 58..64  | identity-class tag                      |
//! | 42..55  | realm id                                |
//! | 29..42  | map id                                  |
//! | 6..29   | entry                                   |
//! | 0..6    | sub-type                                |
//!
//! Low word layout: server id at 40..64, counter at 0..40.
//!
//! [`IdentityClass::Transport`] is the exception: its 20-bit counter lives in
//! bits 38..58 of the high word and the low word is zero.

use std::fmt;
use std::str::FromStr;

use bitstream::{BitReader, BitResult, BitWriter};

const TAG_SHIFT: u32 = 58;
const REALM_SHIFT: u32 = 42;
const REALM_BITS: u32 = 13;
const MAP_SHIFT: u32 = 29;
const MAP_BITS: u32 = 13;
const ENTRY_SHIFT: u32 = 6;
const ENTRY_BITS: u32 = 23;
const SUB_TYPE_BITS: u32 = 6;
const SERVER_ID_SHIFT: u32 = 40;
const SERVER_ID_BITS: u32 = 24;

const fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// How much routing metadata an identity class carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuidScope {
    /// Tag and counter only.
    Global,
    /// Tag, realm and counter.
    RealmSpecific,
    /// Tag, realm, map, entry, sub-type, server id and counter.
    MapSpecific,
    /// Tag and a 20-bit counter in the high word.
    Transport,
}

/// Which 64-bit word holds a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuidWord {
    High,
    Low,
}

/// Where an identity class stores its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterLayout {
    pub word: GuidWord,
    pub shift: u32,
    pub bits: u32,
}

impl CounterLayout {
    const DEFAULT: Self = Self {
        word: GuidWord::Low,
        shift: 0,
        bits: 40,
    };

    const TRANSPORT: Self = Self {
        word: GuidWord::High,
        shift: 38,
        bits: 20,
    };

    /// Largest counter the layout can hold.
    #[must_use]
    pub const fn max(self) -> u64 {
        low_mask(self.bits)
    }
}

/// The identity-class tag stored in the top 6 bits of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum IdentityClass {
    Null = 0,
    Uniq = 1,
    Player = 2,
    Item = 3,
    WorldTransaction = 4,
    StaticDoor = 5,
    Transport = 6,
    Conversation = 7,
    Creature = 8,
    Vehicle = 9,
    Pet = 10,
    GameObject = 11,
    DynamicObject = 12,
    AreaTrigger = 13,
    Corpse = 14,
    LootObject = 15,
    SceneObject = 16,
    Scenario = 17,
    ChatChannel = 26,
    Party = 27,
    Guild = 28,
    Account = 29,
    Mail = 35,
    Housing = 40,
}

impl IdentityClass {
    /// Every defined class, in tag order.
    pub const ALL: [Self; 24] = [
        Self::Null,
        Self::Uniq,
        Self::Player,
        Self::Item,
        Self::WorldTransaction,
        Self::StaticDoor,
        Self::Transport,
        Self::Conversation,
        Self::Creature,
        Self::Vehicle,
        Self::Pet,
        Self::GameObject,
        Self::DynamicObject,
        Self::AreaTrigger,
        Self::Corpse,
        Self::LootObject,
        Self::SceneObject,
        Self::Scenario,
        Self::ChatChannel,
        Self::Party,
        Self::Guild,
        Self::Account,
        Self::Mail,
        Self::Housing,
    ];

    /// Returns the 6-bit tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Looks up a class by tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|class| class.tag() == tag)
    }

    /// Returns how much routing metadata the class carries.
    #[must_use]
    pub const fn scope(self) -> GuidScope {
        match self {
            Self::Null | Self::Uniq | Self::Account => GuidScope::Global,
            Self::Player
            | Self::Item
            | Self::WorldTransaction
            | Self::ChatChannel
            | Self::Party
            | Self::Guild
            | Self::Mail
            | Self::Housing => GuidScope::RealmSpecific,
            Self::Transport => GuidScope::Transport,
            Self::StaticDoor
            | Self::Conversation
            | Self::Creature
            | Self::Vehicle
            | Self::Pet
            | Self::GameObject
            | Self::DynamicObject
            | Self::AreaTrigger
            | Self::Corpse
            | Self::LootObject
            | Self::SceneObject
            | Self::Scenario => GuidScope::MapSpecific,
        }
    }

    /// Returns where the class stores its counter.
    #[must_use]
    pub const fn counter_layout(self) -> CounterLayout {
        match self {
            Self::Transport => CounterLayout::TRANSPORT,
            _ => CounterLayout::DEFAULT,
        }
    }

    /// Largest counter value the class can hold.
    #[must_use]
    pub const fn max_counter(self) -> u64 {
        self.counter_layout().max()
    }
}

/// A 128-bit entity identifier.
///
/// Ordered by the high word, then the low word. The all-zero value is
/// [`EntityGuid::EMPTY`] and sorts before every other identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityGuid {
    high: u64,
    low: u64,
}

impl EntityGuid {
    /// The null identifier.
    pub const EMPTY: Self = Self { high: 0, low: 0 };

    /// Creates an identifier from its raw words.
    #[must_use]
    pub const fn from_raw(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Creates a global identifier (tag and counter only).
    #[must_use]
    pub fn global(class: IdentityClass, counter: u64) -> Self {
        debug_assert_eq!(class.scope(), GuidScope::Global, "{class:?} is not global");
        Self::with_counter(class, 0, 0, counter)
    }

    /// Creates a realm-scoped identifier.
    #[must_use]
    pub fn realm_specific(class: IdentityClass, realm: u16, counter: u64) -> Self {
        debug_assert_eq!(
            class.scope(),
            GuidScope::RealmSpecific,
            "{class:?} is not realm-scoped"
        );
        Self::with_counter(class, realm_bits(realm), 0, counter)
    }

    /// Creates a map-scoped identifier.
    #[must_use]
    pub fn map_specific(
        class: IdentityClass,
        realm: u16,
        map: u16,
        entry: u32,
        counter: u64,
    ) -> Self {
        debug_assert_eq!(
            class.scope(),
            GuidScope::MapSpecific,
            "{class:?} is not map-scoped"
        );
        debug_assert!(u64::from(map) <= low_mask(MAP_BITS), "map {map} too wide");
        debug_assert!(u64::from(entry) <= low_mask(ENTRY_BITS), "entry {entry} too wide");
        let routing = realm_bits(realm)
            | ((u64::from(map) & low_mask(MAP_BITS)) << MAP_SHIFT)
            | ((u64::from(entry) & low_mask(ENTRY_BITS)) << ENTRY_SHIFT);
        Self::with_counter(class, routing, 0, counter)
    }

    /// Creates a transport identifier with a 20-bit counter.
    #[must_use]
    pub fn transport(counter: u32) -> Self {
        Self::with_counter(IdentityClass::Transport, 0, 0, u64::from(counter))
    }

    /// Sets the map-scoped sub-type.
    #[must_use]
    pub const fn with_sub_type(mut self, sub_type: u8) -> Self {
        self.high = (self.high & !low_mask(SUB_TYPE_BITS))
            | (sub_type as u64 & low_mask(SUB_TYPE_BITS));
        self
    }

    /// Sets the map-scoped server id.
    #[must_use]
    pub const fn with_server_id(mut self, server_id: u32) -> Self {
        let mask = low_mask(SERVER_ID_BITS) << SERVER_ID_SHIFT;
        self.low =
            (self.low & !mask) | ((server_id as u64 & low_mask(SERVER_ID_BITS)) << SERVER_ID_SHIFT);
        self
    }

    fn with_counter(class: IdentityClass, routing: u64, low: u64, counter: u64) -> Self {
        let layout = class.counter_layout();
        debug_assert!(
            counter <= layout.max(),
            "counter {counter} exceeds {} bits for {class:?}",
            layout.bits
        );
        let counter = (counter & layout.max()) << layout.shift;
        let tag = u64::from(class.tag()) << TAG_SHIFT;
        match layout.word {
            GuidWord::High => Self::from_raw(tag | routing | counter, low),
            GuidWord::Low => Self::from_raw(tag | routing, low | counter),
        }
    }

    /// Returns the high word.
    #[must_use]
    pub const fn high(self) -> u64 {
        self.high
    }

    /// Returns the low word.
    #[must_use]
    pub const fn low(self) -> u64 {
        self.low
    }

    /// Returns `true` for the null identifier.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.high == 0 && self.low == 0
    }

    /// Returns the raw 6-bit class tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        (self.high >> TAG_SHIFT) as u8
    }

    /// Returns the identity class, if the tag is known.
    #[must_use]
    pub fn class(self) -> Option<IdentityClass> {
        IdentityClass::from_tag(self.tag())
    }

    /// Returns the realm id.
    #[must_use]
    pub const fn realm_id(self) -> u16 {
        ((self.high >> REALM_SHIFT) & low_mask(REALM_BITS)) as u16
    }

    /// Returns the map id.
    #[must_use]
    pub const fn map_id(self) -> u16 {
        ((self.high >> MAP_SHIFT) & low_mask(MAP_BITS)) as u16
    }

    /// Returns the entry.
    #[must_use]
    pub const fn entry(self) -> u32 {
        ((self.high >> ENTRY_SHIFT) & low_mask(ENTRY_BITS)) as u32
    }

    /// Returns the sub-type.
    #[must_use]
    pub const fn sub_type(self) -> u8 {
        (self.high & low_mask(SUB_TYPE_BITS)) as u8
    }

    /// Returns the server id.
    #[must_use]
    pub const fn server_id(self) -> u32 {
        ((self.low >> SERVER_ID_SHIFT) & low_mask(SERVER_ID_BITS)) as u32
    }

    /// Returns the counter, read with the class's counter layout.
    ///
    /// Unknown tags use the default 40-bit low-word layout.
    #[must_use]
    pub fn counter(self) -> u64 {
        let layout = self
            .class()
            .map_or(CounterLayout::DEFAULT, IdentityClass::counter_layout);
        let word = match layout.word {
            GuidWord::High => self.high,
            GuidWord::Low => self.low,
        };
        (word >> layout.shift) & layout.max()
    }

    /// Writes the packed form: a presence byte per word, then every non-zero
    /// byte (low word first, least significant byte first).
    pub fn write_packed(self, writer: &mut BitWriter) -> BitResult<()> {
        writer.align_to_byte();
        let low = self.low.to_le_bytes();
        let high = self.high.to_le_bytes();
        writer.write_u8_aligned(presence(&low))?;
        writer.write_u8_aligned(presence(&high))?;
        for byte in low.iter().chain(high.iter()).filter(|byte| **byte != 0) {
            writer.write_u8_aligned(*byte)?;
        }
        Ok(())
    }

    /// Reads the packed form written by [`write_packed`](Self::write_packed).
    pub fn read_packed(reader: &mut BitReader<'_>) -> BitResult<Self> {
        reader.align_to_byte()?;
        let low_mask = reader.read_u8_aligned()?;
        let high_mask = reader.read_u8_aligned()?;
        let low = read_word(reader, low_mask)?;
        let high = read_word(reader, high_mask)?;
        Ok(Self::from_raw(high, low))
    }

    /// Number of bytes in the packed form.
    #[must_use]
    pub fn packed_len(self) -> usize {
        let nonzero = self
            .low
            .to_le_bytes()
            .iter()
            .chain(self.high.to_le_bytes().iter())
            .filter(|byte| **byte != 0)
            .count();
        2 + nonzero
    }
}

fn realm_bits(realm: u16) -> u64 {
    debug_assert!(u64::from(realm) <= low_mask(REALM_BITS), "realm {realm} too wide");
    (u64::from(realm) & low_mask(REALM_BITS)) << REALM_SHIFT
}

fn presence(bytes: &[u8; 8]) -> u8 {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte != 0)
        .fold(0u8, |mask, (i, _)| mask | (1 << i))
}

fn read_word(reader: &mut BitReader<'_>, mask: u8) -> BitResult<u64> {
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        if mask & (1 << i) != 0 {
            *byte = reader.read_u8_aligned()?;
        }
    }
    Ok(u64::from_le_bytes(bytes))
}

impl fmt::Display for EntityGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}{:016X}", self.high, self.low)
    }
}

/// Error returned when parsing an identifier from hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseGuidError {
    /// Expected 32 hex digits.
    InvalidLength { len: usize },
    /// A character was not a hex digit.
    InvalidDigit,
}

impl fmt::Display for ParseGuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { len } => write!(f, "expected 32 hex digits, found {len}"),
            Self::InvalidDigit => write!(f, "invalid hex digit in identifier"),
        }
    }
}

impl std::error::Error for ParseGuidError {}

impl FromStr for EntityGuid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 32 {
            return Err(ParseGuidError::InvalidLength { len: digits.len() });
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseGuidError::InvalidDigit);
        }
        let high = u64::from_str_radix(&digits[..16], 16)
            .map_err(|_| ParseGuidError::InvalidDigit)?;
        let low = u64::from_str_radix(&digits[16..], 16)
            .map_err(|_| ParseGuidError::InvalidDigit)?;
        Ok(Self::from_raw(high, low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sorts_first() {
        let player = EntityGuid::realm_specific(IdentityClass::Player, 1, 1);
        assert!(EntityGuid::EMPTY < player);
        assert!(EntityGuid::EMPTY < EntityGuid::from_raw(0, 1));
        assert!(EntityGuid::EMPTY.is_empty());
        assert_eq!(EntityGuid::default(), EntityGuid::EMPTY);
    }

    #[test]
    fn ordering_is_high_then_low() {
        let a = EntityGuid::from_raw(1, u64::MAX);
        let b = EntityGuid::from_raw(2, 0);
        assert!(a < b);
        assert!(EntityGuid::from_raw(2, 0) < EntityGuid::from_raw(2, 1));
    }

    #[test]
    fn map_specific_fields_roundtrip() {
        let guid = EntityGuid::map_specific(IdentityClass::Creature, 1234, 571, 31_146, 99)
            .with_sub_type(3)
            .with_server_id(0x00AB_CDEF);
        assert_eq!(guid.class(), Some(IdentityClass::Creature));
        assert_eq!(guid.realm_id(), 1234);
        assert_eq!(guid.map_id(), 571);
        assert_eq!(guid.entry(), 31_146);
        assert_eq!(guid.sub_type(), 3);
        assert_eq!(guid.server_id(), 0x00AB_CDEF);
        assert_eq!(guid.counter(), 99);
    }

    #[test]
    fn tag_occupies_top_six_bits() {
        let guid = EntityGuid::global(IdentityClass::Uniq, 0);
        assert_eq!(guid.high(), 1u64 << 58);
        assert_eq!(guid.tag(), 1);
    }

    #[test]
    fn transport_counter_lives_in_high_word() {
        let guid = EntityGuid::transport(0xF_FFFF);
        assert_eq!(guid.low(), 0);
        assert_eq!(guid.high(), (6u64 << 58) | (0xF_FFFFu64 << 38));
        assert_eq!(guid.counter(), 0xF_FFFF);
        assert_eq!(IdentityClass::Transport.max_counter(), (1 << 20) - 1);
    }

    #[test]
    fn counter_widths_per_class() {
        for class in IdentityClass::ALL {
            let expected = if class == IdentityClass::Transport { 20 } else { 40 };
            assert_eq!(class.counter_layout().bits, expected, "{class:?}");
            assert_eq!(IdentityClass::from_tag(class.tag()), Some(class));
        }
        assert_eq!(IdentityClass::from_tag(63), None);
    }

    #[test]
    fn max_counter_fits() {
        let guid = EntityGuid::realm_specific(IdentityClass::Item, 8191, (1 << 40) - 1);
        assert_eq!(guid.counter(), IdentityClass::Item.max_counter());
        assert_eq!(guid.realm_id(), 8191);
    }

    #[test]
    fn hex_roundtrip() {
        let guid = EntityGuid::realm_specific(IdentityClass::Player, 7, 42);
        let text = guid.to_string();
        assert_eq!(text.len(), 34);
        assert_eq!(text.parse::<EntityGuid>().unwrap(), guid);
        assert_eq!(
            "abc".parse::<EntityGuid>(),
            Err(ParseGuidError::InvalidLength { len: 3 })
        );
        assert_eq!(
            "0xZZ000000000000000000000000000000".parse::<EntityGuid>(),
            Err(ParseGuidError::InvalidDigit)
        );
    }

    #[test]
    fn packed_form_skips_zero_bytes() {
        let mut writer = BitWriter::new();
        EntityGuid::EMPTY.write_packed(&mut writer).unwrap();
        let guid = EntityGuid::realm_specific(IdentityClass::Player, 1, 0x0102);
        guid.write_packed(&mut writer).unwrap();
        let bytes = writer.finish();
        assert_eq!(EntityGuid::EMPTY.packed_len(), 2);
        assert_eq!(bytes.len(), 2 + guid.packed_len());

        let mut reader = BitReader::new(&bytes);
        assert_eq!(EntityGuid::read_packed(&mut reader).unwrap(), EntityGuid::EMPTY);
        assert_eq!(EntityGuid::read_packed(&mut reader).unwrap(), guid);
        assert!(reader.is_empty());
    }

    #[test]
    fn packed_truncated_fails() {
        let mut reader = BitReader::new(&[0xFF, 0x00, 0x01]);
        assert!(EntityGuid::read_packed(&mut reader).is_err());
    }
}
