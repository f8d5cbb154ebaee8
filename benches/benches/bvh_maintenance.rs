// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_bvh::{Aabb3D, Bvh, Optimizer, OptimizerConfig, QueryScratch, U32Payload, codec};

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f64(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) / ((1u64 << 53) as f64)
    }
}

fn gen_random_boxes(count: usize, extent: f64, max_half: f64, seed: u64) -> Vec<Aabb3D<f64>> {
    let mut rng = Rng::new(seed);
    (0..count)
        .map(|_| {
            let x = rng.next_f64() * extent;
            let y = rng.next_f64() * extent;
            let z = rng.next_f64() * extent;
            let h = 0.1 + rng.next_f64() * max_half;
            Aabb3D::from_center(x, y, z, h)
        })
        .collect()
}

fn gen_sorted_line(count: usize) -> Vec<Aabb3D<f64>> {
    (0..count)
        .map(|i| Aabb3D::from_center(i as f64 * 2.0, 0.0, 0.0, 0.5))
        .collect()
}

fn build(boxes: &[Aabb3D<f64>]) -> Bvh<f64, u32> {
    let mut bvh = Bvh::new();
    for (i, b) in boxes.iter().copied().enumerate() {
        let _ = bvh.insert(b, i as u32);
    }
    bvh
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &n in &[1_000usize, 10_000] {
        let boxes = gen_random_boxes(n, 1000.0, 5.0, 7);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("random_n{}", n), |b| {
            b.iter(|| black_box(build(&boxes)));
        });
    }
    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    for &n in &[1_000usize, 4_000] {
        let line = gen_sorted_line(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("converge_sorted_line_n{}", n), |b| {
            b.iter_batched(
                || build(&line),
                |mut bvh| black_box(bvh.optimize(usize::MAX)),
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("step_256_sorted_line_n{}", n), |b| {
            b.iter_batched(
                || {
                    let opt = Optimizer::new(OptimizerConfig::default().with_nodes_per_step(256));
                    (build(&line), opt)
                },
                |(mut bvh, mut opt)| black_box(opt.step(&mut bvh)),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_sphere_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("sphere_query");
    let n = 10_000;
    let boxes = gen_random_boxes(n, 1000.0, 5.0, 11);
    let fresh = build(&boxes);
    let mut optimized = build(&boxes);
    optimized.optimize(usize::MAX);
    let mut rng = Rng::new(3);
    let centers: Vec<[f64; 3]> = (0..256)
        .map(|_| [rng.next_f64() * 1000.0, rng.next_f64() * 1000.0, rng.next_f64() * 1000.0])
        .collect();

    for (name, bvh) in [("inserted", &fresh), ("optimized", &optimized)] {
        let mut scratch = QueryScratch::new();
        let mut out = vec![0_u32; n];
        group.throughput(Throughput::Elements(centers.len() as u64));
        group.bench_function(format!("r50_{}_n{}", name, n), |b| {
            b.iter(|| {
                let mut total = 0;
                for [x, y, z] in &centers {
                    total += bvh.query_sphere(*x, *y, *z, 50.0, &mut scratch, &mut out, 0);
                }
                black_box(total)
            });
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let n = 10_000;
    let mut bvh = build(&gen_random_boxes(n, 1000.0, 5.0, 5));
    bvh.optimize(usize::MAX);
    let mut bytes = Vec::new();
    let _ = codec::encode(&bvh, &U32Payload, &mut bytes);
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function(format!("encode_n{}", n), |b| {
        let mut out = Vec::with_capacity(bytes.len());
        b.iter(|| {
            out.clear();
            black_box(codec::encode(&bvh, &U32Payload, &mut out))
        });
    });
    group.bench_function(format!("decode_n{}", n), |b| {
        b.iter(|| black_box(codec::decode::<f64, u32, _>(&bytes, &U32Payload)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_optimize,
    bench_sphere_query,
    bench_codec,
);
criterion_main!(benches);
