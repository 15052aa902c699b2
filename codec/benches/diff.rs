use std::sync::Arc;

use codec::{encode_baseline, encode_diff_with_scratch, CodecScratch, Holder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use schema::{FieldCodec, FieldDef, HolderSchema, Visibility};

fn unit_schema() -> Arc<HolderSchema> {
    let item = Arc::new(
        HolderSchema::builder("item")
            .field(FieldDef::scalar("id", 0, FieldCodec::guid()))
            .field(FieldDef::scalar("count", 1, FieldCodec::uint(16)))
            .build()
            .expect("item schema"),
    );
    let mut builder = HolderSchema::builder("unit");
    for index in 0..48u32 {
        let visibility = if index % 4 == 0 {
            Visibility::OWNER
        } else {
            Visibility::ANY_OBSERVER
        };
        builder = builder.field(
            FieldDef::scalar(format!("f{index}"), index, FieldCodec::uint(16))
                .visibility(visibility),
        );
    }
    builder = builder.field(FieldDef::dynamic("items", 48, item).len_bits(10));
    Arc::new(builder.build().expect("unit schema"))
}

fn populated(schema: &Arc<HolderSchema>) -> Holder {
    let mut holder = Holder::new(Arc::clone(schema));
    {
        let mut items = holder.modify().dynamic("items").expect("items");
        for _ in 0..64 {
            items.push_default();
        }
    }
    holder.clear_changes();
    holder
}

fn bench_diff(c: &mut Criterion) {
    let schema = unit_schema();
    let mut group = c.benchmark_group("encode_diff");
    for dirty in [1usize, 8, 48] {
        let mut holder = populated(&schema);
        for index in 0..dirty {
            holder.set(&format!("f{index}"), 7u64);
        }
        if let Some(mut item) = holder
            .modify()
            .dynamic("items")
            .and_then(|items| items.element(3))
        {
            item.set("count", 9u64);
        }
        let mut scratch = CodecScratch::new();
        group.bench_with_input(BenchmarkId::from_parameter(dirty), &holder, |b, holder| {
            b.iter(|| {
                encode_diff_with_scratch(black_box(holder), Visibility::ANY_OBSERVER, &mut scratch)
                    .expect("diff")
            });
        });
    }
    group.finish();
}

fn bench_baseline(c: &mut Criterion) {
    let schema = unit_schema();
    let holder = populated(&schema);
    c.bench_function("encode_baseline", |b| {
        b.iter(|| encode_baseline(black_box(&holder), Visibility::ALL).expect("baseline"));
    });
}

criterion_group!(benches, bench_diff, bench_baseline);
criterion_main!(benches);
