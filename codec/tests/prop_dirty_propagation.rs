use std::sync::Arc;

use codec::{FieldValue, Holder};
use proptest::prelude::*;
use schema::{FieldCodec, FieldDef, HolderSchema};

/// A chain of `depth` holders, each with a `value` field and (except the
/// deepest) a nested `child` at bit 1 coalesced into block bit 0.
fn chain(depth: usize) -> Arc<HolderSchema> {
    let mut builder = HolderSchema::builder(format!("level{depth}"))
        .field(FieldDef::scalar("value", 0, FieldCodec::uint(16)));
    if depth > 1 {
        builder = builder.field(FieldDef::nested("child", 1, chain(depth - 1)).block_bit(0));
    }
    Arc::new(builder.build().unwrap())
}

fn set_leaf(holder: &mut Holder, depth: usize, value: u16) -> bool {
    let mut handle = holder.modify();
    for _ in 1..depth {
        handle = handle.nested("child").unwrap();
    }
    handle.set("value", value)
}

fn levels(holder: &Holder) -> Vec<&Holder> {
    let mut out = vec![holder];
    while let Some(child) = out.last().copied().and_then(|h| h.nested("child")) {
        out.push(child);
    }
    out
}

proptest! {
    #[test]
    fn changing_write_marks_leaf_and_every_ancestor(depth in 1usize..6, value in 1u16..) {
        let mut holder = Holder::new(chain(depth));
        prop_assert!(set_leaf(&mut holder, depth, value));

        let levels = levels(&holder);
        prop_assert_eq!(levels.len(), depth);
        for (index, level) in levels.iter().enumerate() {
            let bits: Vec<u32> = level.changes().collect();
            if index + 1 == depth {
                prop_assert_eq!(bits, vec![0]);
                prop_assert_eq!(level.get("value"), Some(&FieldValue::UInt(u64::from(value))));
            } else {
                prop_assert_eq!(bits, vec![1]);
                prop_assert!(level.mask().test_block(0));
            }
        }
    }

    #[test]
    fn equal_write_marks_nothing(depth in 1usize..6, value in any::<u16>()) {
        let mut holder = Holder::new(chain(depth));
        set_leaf(&mut holder, depth, value);
        holder.clear_changes();

        prop_assert!(!set_leaf(&mut holder, depth, value));
        for level in levels(&holder) {
            prop_assert!(!level.has_changes());
            prop_assert!(!level.mask().test_block(0));
        }
    }

    #[test]
    fn clear_is_transitive(depth in 1usize..6, writes in prop::collection::vec(any::<u16>(), 1..8)) {
        let mut holder = Holder::new(chain(depth));
        for value in writes {
            set_leaf(&mut holder, depth, value);
        }
        holder.mark_all();
        holder.clear_changes();
        for level in levels(&holder) {
            prop_assert_eq!(level.changes().count(), 0);
        }
    }
}
