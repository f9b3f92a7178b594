use criterion::{Criterion, black_box, criterion_group, criterion_main};
use recipelens_core::{ReducedVector, VectorIndex, VectorIndexBuilder};

fn generate_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..dim).map(|_| fastrand::f32()).collect())
        .collect()
}

fn flat_index(vectors: &[Vec<f32>], dim: usize) -> VectorIndex {
    let mut builder = VectorIndexBuilder::new(dim);
    for vector in vectors {
        builder.add(vector.clone()).expect("add");
    }
    builder.finish_flat().expect("finish flat")
}

#[cfg(feature = "hnsw")]
fn hnsw_index(vectors: &[Vec<f32>], dim: usize) -> VectorIndex {
    let mut builder = VectorIndexBuilder::new(dim);
    for vector in vectors {
        builder.add(vector.clone()).expect("add");
    }
    builder.finish_hnsw().expect("finish hnsw")
}

fn bench_catalog(c: &mut Criterion, count: usize) {
    // typical reduced dimension after PCA
    let dim = 64;
    let vectors = generate_vectors(count, dim);
    let query = ReducedVector::new(generate_vectors(1, dim).remove(0));

    let flat = flat_index(&vectors, dim);

    let mut group = c.benchmark_group(format!("search_{}k", count / 1000));

    group.bench_function("flat", |b| {
        b.iter(|| flat.search(black_box(&query), black_box(25)).expect("search"));
    });

    #[cfg(feature = "hnsw")]
    {
        let hnsw = hnsw_index(&vectors, dim);
        group.bench_function("hnsw", |b| {
            b.iter(|| hnsw.search(black_box(&query), black_box(25)).expect("search"));
        });
    }

    group.finish();
}

fn bench_search_10k(c: &mut Criterion) {
    bench_catalog(c, 10_000);
}

fn bench_search_100k(c: &mut Criterion) {
    bench_catalog(c, 100_000);
}

criterion_group!(benches, bench_search_10k, bench_search_100k);
criterion_main!(benches);
