//! Per-field visibility tags.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A set of observer relationship tags.
///
/// Fields carry the set of tags allowed to see them; observers are granted a
/// set of tags per entity. A field is visible to an observer iff the two sets
/// intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Visibility(u8);

impl Visibility {
    /// No tags. A field tagged `NONE` is server-only and never replicated.
    pub const NONE: Self = Self(0);
    /// The entity's owner.
    pub const OWNER: Self = Self(1 << 0);
    /// Members of the owner's party.
    pub const PARTY_MEMBER: Self = Self(1 << 1);
    /// Anyone who can observe the entity.
    pub const ANY_OBSERVER: Self = Self(1 << 2);
    /// Observers holding a special permission (GM tools, inspectors).
    pub const SPECIAL_PERMISSION: Self = Self(1 << 3);
    /// Every tag.
    pub const ALL: Self = Self(0x0F);

    /// Creates a tag set from raw bits, dropping unknown bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if no tag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every tag in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the two sets share at least one tag.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the intersection of both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for Visibility {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Visibility {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for Visibility {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Visibility, &str); 4] = [
            (Visibility::OWNER, "owner"),
            (Visibility::PARTY_MEMBER, "party"),
            (Visibility::ANY_OBSERVER, "any"),
            (Visibility::SPECIAL_PERMISSION, "special"),
        ];
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (tag, name) in NAMES {
            if self.contains(tag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_intersects_nothing() {
        assert!(!Visibility::NONE.intersects(Visibility::ALL));
        assert!(!Visibility::ALL.intersects(Visibility::NONE));
    }

    #[test]
    fn owner_grant_sees_owner_fields_only() {
        let granted = Visibility::OWNER;
        assert!(Visibility::OWNER.intersects(granted));
        assert!((Visibility::OWNER | Visibility::PARTY_MEMBER).intersects(granted));
        assert!(!Visibility::ANY_OBSERVER.intersects(granted));
    }

    #[test]
    fn union_and_contains() {
        let set = Visibility::OWNER | Visibility::SPECIAL_PERMISSION;
        assert!(set.contains(Visibility::OWNER));
        assert!(!set.contains(Visibility::PARTY_MEMBER));
        assert!(Visibility::ALL.contains(set));
        assert_eq!(set & Visibility::OWNER, Visibility::OWNER);
    }

    #[test]
    fn truncate_drops_unknown_bits() {
        assert_eq!(Visibility::from_bits_truncate(0xFF), Visibility::ALL);
    }

    #[test]
    fn display_lists_tags() {
        assert_eq!(Visibility::NONE.to_string(), "none");
        assert_eq!(
            (Visibility::OWNER | Visibility::ANY_OBSERVER).to_string(),
            "owner|any"
        );
    }
}
