//! Visibility filtering of change masks.

use schema::{HolderSchema, Visibility};

use crate::holder::{Element, FieldRef, Holder};
use crate::mask::ChangeMask;

/// Builds the mask of every bit an observer with `granted` may receive.
///
/// A field is visible when its tag set intersects `granted`; fields tagged
/// [`Visibility::NONE`] are never visible.
#[must_use]
pub fn visibility_mask(schema: &HolderSchema, granted: Visibility) -> ChangeMask {
    let mut mask = ChangeMask::new(schema.bit_count());
    for field in schema.fields() {
        if field.visibility.intersects(granted) {
            for offset in 0..field.bit_span() {
                mask.set(field.bit + offset);
            }
        }
    }
    mask
}

/// Returns the holder's change mask filtered to what `granted` may see.
#[must_use]
pub fn visible_changes(holder: &Holder, granted: Visibility) -> ChangeMask {
    holder
        .mask()
        .and(&visibility_mask(holder.schema(), granted))
}

/// Returns `true` if a diff for `granted` would carry anything.
///
/// Nested holders are inspected so that a struct field dirtied only by
/// hidden inner fields does not count. A dynamic field whose length moved
/// always counts, since the diff carries the new length.
#[must_use]
pub fn has_visible_changes(holder: &Holder, granted: Visibility) -> bool {
    let schema = holder.schema();
    holder.changes().any(|bit| {
        let Some(owner) = schema.lookup_bit(bit) else {
            return false;
        };
        let Some(field) = schema.field(owner.field) else {
            return false;
        };
        if !field.visibility.intersects(granted) {
            return false;
        }
        match holder.field(owner.field) {
            Some(FieldRef::Struct(nested)) => has_visible_changes(nested, granted),
            Some(FieldRef::Optional(optional)) => match optional.get() {
                Some(Element::Struct(nested)) if !optional.is_constructed() => {
                    has_visible_changes(nested, granted)
                }
                _ => true,
            },
            Some(FieldRef::Dynamic(dynamic)) => {
                if dynamic.is_resized() {
                    return true;
                }
                let mut flagged = dynamic.flagged().peekable();
                if flagged.peek().is_none() {
                    return true;
                }
                flagged.any(|index| {
                    dynamic.replaced().test(index)
                        || match dynamic.get(index) {
                            Some(Element::Struct(nested)) => has_visible_changes(nested, granted),
                            _ => true,
                        }
                })
            }
            _ => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use schema::{FieldCodec, FieldDef};

    use super::*;

    fn inner() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("inner")
                .field(FieldDef::scalar("public", 0, FieldCodec::uint(8)))
                .field(
                    FieldDef::scalar("secret", 1, FieldCodec::uint(8))
                        .visibility(Visibility::OWNER),
                )
                .build()
                .unwrap(),
        )
    }

    fn outer() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("outer")
                .field(FieldDef::scalar("hp", 0, FieldCodec::uint(8)))
                .field(
                    FieldDef::scalar("gold", 1, FieldCodec::uint(8))
                        .visibility(Visibility::OWNER | Visibility::PARTY_MEMBER),
                )
                .field(FieldDef::nested("inner", 2, inner()))
                .field(
                    FieldDef::scalar("server", 3, FieldCodec::uint(8))
                        .visibility(Visibility::NONE),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn mask_includes_intersecting_fields() {
        let schema = outer();
        let any: Vec<_> = visibility_mask(&schema, Visibility::ANY_OBSERVER)
            .iter()
            .collect();
        assert_eq!(any, vec![0, 2]);
        let party: Vec<_> = visibility_mask(&schema, Visibility::PARTY_MEMBER)
            .iter()
            .collect();
        assert_eq!(party, vec![1]);
        let all: Vec<_> = visibility_mask(&schema, Visibility::ALL).iter().collect();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn hidden_nested_change_is_not_visible() {
        let mut holder = Holder::new(outer());
        holder
            .modify()
            .nested("inner")
            .unwrap()
            .set("secret", 1u64);
        assert!(holder.has_changes());
        assert!(!has_visible_changes(&holder, Visibility::ANY_OBSERVER));
        // The parent field must be visible too before the nested mask matters.
        assert!(!has_visible_changes(&holder, Visibility::OWNER));
        assert!(has_visible_changes(
            &holder,
            Visibility::OWNER | Visibility::ANY_OBSERVER
        ));
    }

    fn bag() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("bag")
                .field(FieldDef::dynamic("items", 0, inner()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn shrink_with_hidden_element_change_is_visible() {
        let mut holder = Holder::new(bag());
        {
            let mut items = holder.modify().dynamic("items").unwrap();
            items.push_default();
            items.push_default();
        }
        holder.clear_changes();

        {
            let mut items = holder.modify().dynamic("items").unwrap();
            assert!(items.remove(1).is_some());
            items.element(0).unwrap().set("secret", 3u64);
        }
        assert!(has_visible_changes(&holder, Visibility::ANY_OBSERVER));
    }

    #[test]
    fn hidden_element_change_without_resize_stays_hidden() {
        let mut holder = Holder::new(bag());
        holder.modify().dynamic("items").unwrap().push_default();
        holder.clear_changes();

        holder
            .modify()
            .dynamic("items")
            .unwrap()
            .element(0)
            .unwrap()
            .set("secret", 3u64);
        assert!(!has_visible_changes(&holder, Visibility::ANY_OBSERVER));
        assert!(has_visible_changes(
            &holder,
            Visibility::OWNER | Visibility::ANY_OBSERVER
        ));
    }

    #[test]
    fn server_only_change_is_never_visible() {
        let mut holder = Holder::new(outer());
        holder.set("server", 4u64);
        assert!(!has_visible_changes(&holder, Visibility::ALL));
        assert!(visible_changes(&holder, Visibility::ALL).is_empty());
    }
}
