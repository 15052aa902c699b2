#![no_main]

use std::sync::Arc;

use codec::{apply_baseline, apply_diff, encode_baseline, CodecLimits, Holder};
use libfuzzer_sys::fuzz_target;
use schema::{FieldCodec, FieldDef, HolderSchema, Visibility};

fn fuzz_schema() -> Arc<HolderSchema> {
    let leaf = Arc::new(
        HolderSchema::builder("leaf")
            .field(FieldDef::scalar("a", 0, FieldCodec::uint(5)))
            .field(FieldDef::scalar("b", 1, FieldCodec::var_sint()))
            .build()
            .unwrap(),
    );
    Arc::new(
        HolderSchema::builder("root")
            .field(FieldDef::scalar("flag", 0, FieldCodec::bool()))
            .field(FieldDef::scalar("pos", 1, FieldCodec::fixed_point(-500, 500, 10)))
            .field(FieldDef::scalar("name", 2, FieldCodec::string(16)))
            .field(FieldDef::scalar("owner", 3, FieldCodec::guid()).visibility(Visibility::OWNER))
            .field(FieldDef::nested("leaf", 4, Arc::clone(&leaf)))
            .field(FieldDef::array("slots", 5, FieldCodec::uint(3), 4).per_slot())
            .field(FieldDef::dynamic("tags", 9, FieldCodec::uint(8)).len_bits(5))
            .field(FieldDef::dynamic("leaves", 10, Arc::clone(&leaf)).len_bits(4))
            .field(FieldDef::optional("pet", 11, leaf))
            .field(FieldDef::optional("title", 12, FieldCodec::string(8)).block_bit(0))
            .build()
            .unwrap(),
    )
}

fuzz_target!(|data: &[u8]| {
    let schema = fuzz_schema();
    let limits = CodecLimits::for_testing();

    // First byte splits the input into a baseline and a diff stream.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());
    let (baseline, diff) = rest.split_at(split);

    let mut holder = Holder::new(Arc::clone(&schema));
    if apply_baseline(&mut holder, baseline, &limits).is_err() {
        holder = Holder::new(Arc::clone(&schema));
    }
    let _ = apply_diff(&mut holder, diff, &limits);

    // Whatever was accepted must re-encode and read back to the same values.
    let bytes = encode_baseline(&holder, Visibility::ALL).unwrap();
    let mut replica = Holder::new(schema);
    apply_baseline(&mut replica, &bytes, &limits).unwrap();
    assert_eq!(replica, holder);
});
