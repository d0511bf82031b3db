use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use epochflow_core::buffer::DataBuffer;
use epochflow_core::config::EngineConfig;
use epochflow_core::id::BufferId;
use epochflow_core::types::{Column, RowBatch, Scalar};
use epochflow_exec::{Connector, DatasetOp, ExecutionTree, ShutdownSignal};
use epochflow_operators::{FilterRows, Kernel, MapOp, RangeSource, RenameColumns, RepeatOp, SourceOp};

fn make_batch(rows: usize) -> RowBatch {
    let mut ids = Vec::with_capacity(rows);
    let mut labels = Vec::with_capacity(rows);
    for i in 0..rows {
        ids.push(Scalar::I64(i as i64));
        labels.push(Scalar::Str(format!("row-{i}")));
    }
    RowBatch::new(vec![Column::new("id", ids), Column::new("label", labels)])
}

fn bench_filter_kernel(c: &mut Criterion) {
    let batch = make_batch(1024);
    let filter = FilterRows::parse("id >= 512").unwrap();
    c.bench_function("filter_kernel", |b| {
        b.iter(|| {
            let _ = filter.compute(batch.clone()).unwrap();
        })
    });
}

fn bench_connector(c: &mut Criterion) {
    let conn = Connector::new(1, 1, 64, ShutdownSignal::new()).unwrap();
    let batch = make_batch(8);
    c.bench_function("connector_push_pop", |b| {
        b.iter(|| {
            for i in 0..32 {
                conn.push(0, DataBuffer::data(BufferId::new(i), batch.clone()))
                    .unwrap();
            }
            for _ in 0..32 {
                let _ = conn.pop(0).unwrap();
            }
        })
    });
}

fn repeat_tree() -> ExecutionTree {
    let source: Arc<dyn DatasetOp> = Arc::new(SourceOp::new(RangeSource::new(4096, 256).unwrap()));
    let rename: Arc<dyn DatasetOp> = Arc::new(
        MapOp::new(RenameColumns::parse("id AS key").unwrap(), 2).unwrap(),
    );
    let repeat: Arc<dyn DatasetOp> = Arc::new(RepeatOp::builder(3).build().unwrap());

    let mut tree = ExecutionTree::new(EngineConfig::default()).unwrap();
    for op in [&source, &rename, &repeat] {
        tree.associate(Arc::clone(op)).unwrap();
    }
    tree.add_child(&*rename, &*source).unwrap();
    tree.add_child(&*repeat, &*rename).unwrap();
    tree.assign_root(&*repeat).unwrap();
    tree
}

fn bench_repeat_pipeline(c: &mut Criterion) {
    c.bench_function("source_map_repeat", |b| {
        b.iter(|| {
            let manifest = repeat_tree().run_to_end().unwrap();
            assert_eq!(manifest.rows, 3 * 4096);
        })
    });
}

criterion_group!(
    pipelines,
    bench_filter_kernel,
    bench_connector,
    bench_repeat_pipeline
);
criterion_main!(pipelines);
