use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use flatbridge::executor::DuckDbExecutor;
use flatbridge::{BatchIngestor, ExecutorBackend, IngestOptions};

fn build_source(rows: usize) -> String {
    let mut out = String::from("code,band_name\n");
    for i in 0..rows {
        out.push_str(&format!("{},Band {}\n", i, i));
    }
    out
}

fn bench_batch_ingest(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch_ingest");
    group.sample_size(10);
    let source = build_source(5_000);

    for batch_size in [100, 1_000, 5_000] {
        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter_with_setup(
                    || DuckDbExecutor::in_memory().unwrap(),
                    |executor| {
                        let source = source.as_bytes();
                        async move {
                            executor
                                .execute_statement(
                                    "CREATE TABLE bands (code VARCHAR, band_name VARCHAR)",
                                )
                                .await
                                .unwrap();
                            let options = IngestOptions {
                                batch_size,
                                ..Default::default()
                            };
                            let result = BatchIngestor::new(&executor, options)
                                .ingest("bands", black_box(source))
                                .await
                                .unwrap();
                            black_box(result)
                        }
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_batch_ingest);
criterion_main!(benches);
