//! Throughput of whole-tree hashing on a medium fixture.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use labseal_digest::TreeHasher;

fn bench_hash_tree(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("create temp tree");
    let file_size = 64 * 1024;
    let file_count = 64u8;
    for i in 0..file_count {
        let sub = dir.path().join(format!("run-{}", i % 4));
        std::fs::create_dir_all(&sub).expect("create subdir");
        std::fs::write(sub.join(format!("part-{i:02}.bin")), vec![i; file_size])
            .expect("write fixture file");
    }

    let hasher = TreeHasher::new();
    let mut group = c.benchmark_group("tree");
    group.throughput(Throughput::Bytes(u64::from(file_count) * file_size as u64));
    group.bench_function("hash_64_files_64kib", |b| {
        b.iter(|| hasher.hash_tree(dir.path()).expect("hash fixture tree"));
    });
    group.finish();
}

criterion_group!(benches, bench_hash_tree);
criterion_main!(benches);
