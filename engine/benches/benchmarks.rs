//! Performance benchmarks for checklist-engine

use checklist_engine::{
    detect, merge, FieldSelections, InputKind, ResponseRecord, ResponseSet, ResponseValue,
    ServerSnapshot, Side, TemplateItem, TemplateSnapshot, VersionMarker,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn create_test_template(items: i64) -> TemplateSnapshot {
    let items = (0..items)
        .map(|id| {
            let kind = match id % 3 {
                0 => InputKind::Boolean,
                1 => InputKind::Number,
                _ => InputKind::Text,
            };
            TemplateItem::new(id, format!("Item {}", id), kind).at(id as u32)
        })
        .collect();
    TemplateSnapshot::new(1, "Benchmark", VersionMarker::from_millis(1), items)
}

fn filled(template: &TemplateSnapshot, salt: i64) -> ResponseSet {
    let records = template
        .items
        .iter()
        .map(|item| {
            let value = match item.input_kind {
                InputKind::Boolean => ResponseValue::Boolean((item.id + salt) % 2 == 0),
                InputKind::Number => ResponseValue::Number((item.id * salt) as f64),
                InputKind::Text => ResponseValue::Text(format!("note {}", item.id % (salt + 1))),
            };
            ResponseRecord::completed(item.id, value)
        })
        .collect();
    ResponseSet::new(template.id, template.version, records)
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    for size in [10, 100, 1000].iter() {
        let template = create_test_template(*size);
        let set = filled(&template, 1);

        group.bench_with_input(BenchmarkId::new("validate_for_submit", size), size, |b, _| {
            b.iter(|| black_box(&set).validate_for_submit(black_box(&template)))
        });
    }

    group.finish();
}

fn bench_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflicts");

    for size in [10, 100, 1000].iter() {
        let template = create_test_template(*size);
        let local = filled(&template, 1);
        let server = ServerSnapshot::new(filled(&template, 2), VersionMarker::from_millis(10));

        group.bench_with_input(BenchmarkId::new("detect", size), size, |b, _| {
            b.iter(|| detect(VersionMarker::from_millis(5), black_box(&local), black_box(&server)))
        });

        let divergent = local.diff(&server.responses);
        let selections: FieldSelections = divergent
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, if i % 2 == 0 { Side::Local } else { Side::Server }))
            .collect();

        group.bench_with_input(BenchmarkId::new("merge", size), size, |b, _| {
            b.iter(|| {
                merge(
                    black_box(&local),
                    black_box(&server.responses),
                    &divergent,
                    &selections,
                )
            })
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let template = create_test_template(200);
    let set = filled(&template, 3);
    let json = serde_json::to_string(&set).unwrap();

    group.bench_function("responses_to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&set)))
    });

    group.bench_function("responses_from_json", |b| {
        b.iter(|| serde_json::from_str::<ResponseSet>(black_box(&json)))
    });

    group.finish();
}

criterion_group!(benches, bench_validation, bench_conflicts, bench_serialization);
criterion_main!(benches);
