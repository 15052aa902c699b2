use std::sync::Arc;

use bitstream::BitWriter;
use codec::{apply_diff, encode_diff, CodecLimits, FieldValue, Holder};
use schema::{FieldCodec, FieldDef, HolderSchema, Visibility};

fn profile_schema() -> Arc<HolderSchema> {
    Arc::new(
        HolderSchema::builder("profile")
            .field(FieldDef::scalar("level", 0, FieldCodec::uint(32)))
            .field(FieldDef::scalar("favorite_color", 1, FieldCodec::string(32)))
            .field(FieldDef::dynamic("tags", 2, FieldCodec::uint(32)).block_bit(0))
            .build()
            .unwrap(),
    )
}

fn starting_state() -> Holder {
    let mut holder = Holder::new(profile_schema());
    holder.set("level", 1u32);
    holder.set("favorite_color", "red");
    holder.clear_changes();
    holder
}

fn tag_values(holder: &Holder) -> Vec<u64> {
    holder
        .dynamic("tags")
        .unwrap()
        .iter()
        .filter_map(|element| element.as_value().and_then(FieldValue::as_u64))
        .collect()
}

fn mutate(holder: &mut Holder) {
    holder.set("level", 5u32);
    let mut tags = holder.modify().dynamic("tags").unwrap();
    tags.push(7u32);
    tags.push(9u32);
    tags.remove(0);
}

#[test]
fn mutation_marks_expected_bits() {
    let mut holder = starting_state();
    mutate(&mut holder);

    assert_eq!(holder.get("level"), Some(&FieldValue::UInt(5)));
    assert!(holder.mask().test(0));
    assert_eq!(
        holder.get("favorite_color"),
        Some(&FieldValue::Str("red".to_owned()))
    );
    assert!(!holder.mask().test(1));
    assert!(holder.mask().test(2));
    assert!(holder.mask().test_block(0));

    assert_eq!(tag_values(&holder), vec![9]);
    let tags = holder.dynamic("tags").unwrap();
    assert!(tags.changed().test(0));
    assert_eq!(tags.flagged().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn diff_carries_level_and_tags_only() {
    let mut holder = starting_state();
    mutate(&mut holder);
    let bytes = encode_diff(&holder, Visibility::ANY_OBSERVER).unwrap();

    let mut expected = BitWriter::new();
    expected
        .write_bits(u64::from(Visibility::ANY_OBSERVER.bits()), 4)
        .unwrap();
    expected.write_bit(true);
    expected.write_bits(0b101, 32).unwrap();
    expected.write_bits(5, 32).unwrap();
    expected.write_bits(1, 32).unwrap();
    expected.write_bits(0b1, 32).unwrap();
    expected.write_bits(9, 32).unwrap();
    assert_eq!(bytes, expected.finish());
}

#[test]
fn replica_converges_from_diff() {
    let mut holder = starting_state();
    let mut replica = starting_state();
    mutate(&mut holder);

    let bytes = encode_diff(&holder, Visibility::ANY_OBSERVER).unwrap();
    assert!(apply_diff(&mut replica, &bytes, &CodecLimits::for_testing()).unwrap());

    assert_eq!(replica, holder);
    assert_eq!(tag_values(&replica), vec![9]);
    assert!(!replica.mask().test(1));
}

#[test]
fn clear_after_tick_resets_everything() {
    let mut holder = starting_state();
    mutate(&mut holder);
    holder.clear_changes();
    assert!(!holder.has_changes());
    assert_eq!(holder.changes().count(), 0);
    assert!(!holder.mask().test_block(0));
    assert!(holder.dynamic("tags").unwrap().changed().is_empty());
}
