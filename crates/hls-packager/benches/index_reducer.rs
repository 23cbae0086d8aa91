use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hls_packager::{IndexReducer, PackagerConfig, Segment};

fn benchmark_index_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Index Reduction");

    let config = Arc::new(
        PackagerConfig::builder()
            .segment_file_name_prefix("seg")
            .segment_file_extension("m4s")
            .build(),
    );

    for count in [100u64, 1_000, 10_000] {
        let segments: Vec<Segment> = (0..count)
            .map(|n| Segment::media(n, 2.0 + (n % 5) as f64 * 0.25, Vec::new()))
            .collect();

        group.bench_with_input(BenchmarkId::new("accept+finish", count), &segments, |b, segments| {
            b.iter(|| {
                let mut reducer = IndexReducer::new(Arc::clone(&config));
                for segment in segments {
                    reducer.accept(black_box(segment));
                }
                black_box(reducer.finish().unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_index_reduction);
criterion_main!(benches);
