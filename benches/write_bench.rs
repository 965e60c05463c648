// Write performance benchmarks for pagetree

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagetree::{AttributeDescriptor, Options, Record, Writer};
use std::hint::black_box;
use tempfile::TempDir;

fn options() -> Options {
    Options::new().page_size(4096).sync_on_finish(false)
}

fn benchmark_atom_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("atom_write");

    for size in [1000u64, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let keys: Vec<String> = (0..size).map(|i| format!("key{:013}", i)).collect();
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let path = temp_dir.path().join("bench.idx");
                let attr = AttributeDescriptor::atom(16, size);
                let mut writer = Writer::create_with_options(&path, attr, options()).unwrap();

                for key in &keys {
                    writer.put(&Record::atom(key.as_bytes())).unwrap();
                }

                black_box(writer.finish().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_block_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_write");

    // 8 + 24 tiles the page, 8 + 32 does not
    for value_size in [24usize, 32].iter() {
        let size = 10_000u64;
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(value_size), value_size, |b, &value_size| {
            let value = vec![b'v'; value_size];
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let path = temp_dir.path().join("bench.idx");
                let attr = AttributeDescriptor::block(8, value_size, size);
                let mut writer = Writer::create_with_options(&path, attr, options()).unwrap();

                for i in 0..size {
                    writer.put(&Record::block(&i.to_be_bytes(), &value)).unwrap();
                }

                black_box(writer.finish().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_blob_value_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob_value_sizes");

    for value_size in [10, 100, 1000, 10000].iter() {
        let count = 1000u64;
        group.throughput(Throughput::Bytes((*value_size as u64) * count));
        group.bench_with_input(BenchmarkId::from_parameter(value_size), value_size, |b, &value_size| {
            let value = vec![b'x'; value_size];
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let path = temp_dir.path().join("bench.idx");
                let attr = AttributeDescriptor::blob(8, count);
                let mut writer = Writer::create_with_options(&path, attr, options()).unwrap();

                for i in 0..count {
                    writer.put(&Record::blob(&i.to_be_bytes(), &value)).unwrap();
                }

                black_box(writer.finish().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_atom_write, benchmark_block_write, benchmark_blob_value_sizes);
criterion_main!(benches);
