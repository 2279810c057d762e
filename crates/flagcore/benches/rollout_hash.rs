use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flagcore::hash::hash_int;

fn bench_hash_int(c: &mut Criterion) {
    c.bench_function("hash_int", |b| {
        b.iter(|| hash_int(black_box("company.acme-corp-0001")));
    });
}

criterion_group!(benches, bench_hash_int);
criterion_main!(benches);
