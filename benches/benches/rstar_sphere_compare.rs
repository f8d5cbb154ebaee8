// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_bvh::{Aabb3D, Bvh, QueryScratch};

use rstar::RTree;
use rstar::primitives::Rectangle;

fn gen_grid_boxes(n: usize, cell: f64) -> Vec<Aabb3D<f64>> {
    let mut out = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let (x0, y0, z0) = (x as f64 * cell, y as f64 * cell, z as f64 * cell);
                out.push(Aabb3D::new(x0, y0, z0, x0 + cell * 0.8, y0 + cell * 0.8, z0 + cell * 0.8));
            }
        }
    }
    out
}

fn to_rstar_boxes(v: &[Aabb3D<f64>]) -> Vec<Rectangle<[f64; 3]>> {
    v.iter()
        .map(|b| Rectangle::from_corners([b.min_x, b.min_y, b.min_z], [b.max_x, b.max_y, b.max_z]))
        .collect()
}

fn bench_sphere_external_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("sphere_external_compare_f64");
    for &n in &[16usize, 32] {
        let boxes = gen_grid_boxes(n, 10.0);
        let center = [n as f64 * 5.0; 3];
        let radius = n as f64 * 2.0;
        group.throughput(Throughput::Elements((n * n * n) as u64));

        group.bench_function(format!("understory_build_optimize_query_n{}", n), |b| {
            b.iter_batched(
                || boxes.clone(),
                |boxes| {
                    let mut bvh: Bvh<f64, u32> = Bvh::new();
                    for (i, b) in boxes.into_iter().enumerate() {
                        let _ = bvh.insert(b, i as u32);
                    }
                    bvh.optimize(usize::MAX);
                    let mut scratch = QueryScratch::new();
                    let mut out = vec![0_u32; n * n * n];
                    let [x, y, z] = center;
                    let hits = bvh.query_sphere(x, y, z, radius, &mut scratch, &mut out, 0);
                    black_box(hits);
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("rstar_build_query_bulk_n{}", n), |b| {
            b.iter_batched(
                || to_rstar_boxes(&boxes),
                |rectangles| {
                    let tree = RTree::bulk_load(rectangles);
                    let hits: usize = tree.locate_within_distance(center, radius * radius).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sphere_external_compare);
criterion_main!(benches);
