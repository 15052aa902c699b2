//! Demo player schema for the reference simulation.
//!
//! A player record exercises every field shape: scalars, a nested position
//! and stat block, a per-slot equipment array, dynamic auras and inventory,
//! an optional housing plot and a server-only field.

use std::sync::Arc;

use codec::{EntityGuid, Holder, IdentityClass};
use schema::{FieldCodec, FieldDef, HolderSchema, SchemaResult, Visibility};

pub const POS_SCALE: u32 = 100;
pub const POS_MIN: i64 = -100_000;
pub const POS_MAX: i64 = 100_000;

pub const MAX_LEVEL: u64 = 80;
pub const MAX_STACK: u64 = 200;
pub const EQUIPMENT_SLOTS: u16 = 19;
pub const AURA_LEN_BITS: u8 = 6;
pub const INVENTORY_LEN_BITS: u8 = 8;
pub const NAME_LEN: u32 = 24;

pub const DEMO_REALM: u16 = 1;

const OWNER_AND_PARTY: Visibility = Visibility::OWNER.union(Visibility::PARTY_MEMBER);

/// World position, quantized to centimeters.
pub fn position_schema() -> SchemaResult<Arc<HolderSchema>> {
    let axis = FieldCodec::fixed_point(POS_MIN, POS_MAX, POS_SCALE);
    HolderSchema::builder("position")
        .field(FieldDef::scalar("x", 0, axis))
        .field(FieldDef::scalar("y", 1, axis))
        .field(FieldDef::scalar("z", 2, axis))
        .build()
        .map(Arc::new)
}

pub fn stats_schema() -> SchemaResult<Arc<HolderSchema>> {
    HolderSchema::builder("stats")
        .field(FieldDef::scalar("strength", 0, FieldCodec::uint(10)))
        .field(FieldDef::scalar("agility", 1, FieldCodec::uint(10)))
        .field(FieldDef::scalar("stamina", 2, FieldCodec::uint(10)))
        .field(FieldDef::scalar("intellect", 3, FieldCodec::uint(10)))
        .build()
        .map(Arc::new)
}

/// One inventory stack.
pub fn item_schema() -> SchemaResult<Arc<HolderSchema>> {
    HolderSchema::builder("item")
        .field(FieldDef::scalar("guid", 0, FieldCodec::guid()))
        .field(FieldDef::scalar("entry", 1, FieldCodec::uint(20)))
        .field(FieldDef::scalar("count", 2, FieldCodec::uint(8)))
        .field(FieldDef::scalar("durability", 3, FieldCodec::uint(7)))
        .build()
        .map(Arc::new)
}

pub fn plot_schema() -> SchemaResult<Arc<HolderSchema>> {
    HolderSchema::builder("housing_plot")
        .field(FieldDef::scalar("plot_id", 0, FieldCodec::uint(16)))
        .field(FieldDef::scalar("rent_paid", 1, FieldCodec::bool()))
        .field(FieldDef::dynamic("decor", 2, FieldCodec::uint(20)).len_bits(6))
        .build()
        .map(Arc::new)
}

/// The replicated player record.
pub fn player_schema() -> SchemaResult<Arc<HolderSchema>> {
    HolderSchema::builder("player")
        .field(FieldDef::scalar("guid", 0, FieldCodec::guid()))
        .field(FieldDef::scalar("name", 1, FieldCodec::string(NAME_LEN)))
        .field(FieldDef::scalar("level", 2, FieldCodec::uint(7)))
        .field(FieldDef::scalar("health", 3, FieldCodec::uint(20)))
        .field(FieldDef::scalar("max_health", 4, FieldCodec::uint(20)))
        .field(FieldDef::nested("position", 5, position_schema()?).block_bit(0))
        .field(
            FieldDef::nested("stats", 6, stats_schema()?)
                .block_bit(0)
                .visibility(OWNER_AND_PARTY),
        )
        .field(FieldDef::scalar("power", 7, FieldCodec::uint(16)).visibility(OWNER_AND_PARTY))
        .field(FieldDef::scalar("gold", 8, FieldCodec::var_uint()).visibility(Visibility::OWNER))
        .field(
            FieldDef::array("equipment", 9, FieldCodec::uint(20), EQUIPMENT_SLOTS).per_slot(),
        )
        .field(FieldDef::dynamic("auras", 28, FieldCodec::uint(16)).len_bits(AURA_LEN_BITS))
        .field(
            FieldDef::dynamic("inventory", 29, item_schema()?)
                .len_bits(INVENTORY_LEN_BITS)
                .visibility(Visibility::OWNER),
        )
        .field(FieldDef::scalar("party", 30, FieldCodec::guid()).visibility(OWNER_AND_PARTY))
        .field(
            FieldDef::optional("housing", 31, plot_schema()?)
                .block_bit(1)
                .visibility(OWNER_AND_PARTY),
        )
        .field(FieldDef::scalar("server_flags", 32, FieldCodec::uint(8)).visibility(Visibility::NONE))
        .field(FieldDef::scalar("guild", 33, FieldCodec::guid()).block_bit(1))
        .build()
        .map(Arc::new)
}

/// Identifier of the demo player with the given counter.
#[must_use]
pub fn player_guid(counter: u64) -> EntityGuid {
    EntityGuid::realm_specific(IdentityClass::Player, DEMO_REALM, counter)
}

/// Identifier of an item stack.
#[must_use]
pub fn item_guid(counter: u64) -> EntityGuid {
    EntityGuid::realm_specific(IdentityClass::Item, DEMO_REALM, counter)
}

/// Initial values for a freshly spawned player.
#[derive(Debug, Clone)]
pub struct PlayerSeed {
    pub guid: EntityGuid,
    pub name: String,
    pub level: u64,
    pub position_q: [i64; 3],
}

impl PlayerSeed {
    /// Builds the player holder. Every written field starts out marked.
    #[must_use]
    pub fn spawn(&self, schema: &Arc<HolderSchema>) -> Holder {
        let mut player = Holder::new(Arc::clone(schema));
        let max_health = 100 + self.level * 25;
        {
            let mut root = player.modify();
            root.set("guid", self.guid);
            root.set("name", self.name.as_str());
            root.set("level", self.level);
            root.set("health", max_health);
            root.set("max_health", max_health);
        }
        if let Some(mut position) = player.modify().nested("position") {
            for (axis, value) in ["x", "y", "z"].into_iter().zip(self.position_q) {
                position.set(axis, value);
            }
        }
        if let Some(mut stats) = player.modify().nested("stats") {
            for stat in ["strength", "agility", "stamina", "intellect"] {
                stats.set(stat, 10 + self.level);
            }
        }
        player
    }
}
