// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A crowd of boxes drifting apart, with the optimizer repairing the tree a slice per frame.
//!
//! Run with `RUST_LOG=debug` to see pass summaries, `RUST_LOG=trace` for every rotation.

use log::info;
use understory_bvh::{
    Aabb3D, Bvh, Frustum, FrustumCollector, Optimizer, OptimizerConfig, QueryScratch, VisibleSet,
    codec,
};

fn main() {
    env_logger::init();

    let mut bvh: Bvh<f32, u32> = Bvh::new();
    let mut ids = Vec::new();
    // Start packed on a line so insertion builds a poor tree.
    for i in 0..256_u32 {
        let x = i as f32;
        ids.push(bvh.insert(Aabb3D::from_center(x, 0.0, 0.0, 0.4), i));
    }
    println!("initial cost: {:.1}", bvh.total_cost());

    let mut opt = Optimizer::new(OptimizerConfig::default().with_nodes_per_step(128));
    let mut scratch = QueryScratch::new();
    let mut near = [0_u32; 64];
    for frame in 0..30 {
        // Spread the crowd out over y and z.
        for (i, id) in ids.iter().enumerate() {
            let Some(b) = bvh.bounds(*id) else { continue };
            let [x, y, z] = b.center();
            let drift = ((i % 7) as f32 - 3.0) * 0.5;
            bvh.resize(*id, Aabb3D::from_center(x, y + drift, z - drift, 0.4));
        }
        // Resizes keep the pass in progress valid; no reset needed.
        let rotations = opt.step(&mut bvh);
        let n = bvh.query_sphere(128.0, 0.0, 0.0, 8.0, &mut scratch, &mut near, 0);
        info!(
            "frame {frame}: {rotations} rotations ({} passes so far), {n} objects near the center",
            opt.passes()
        );
    }

    // Finish the job once the crowd settles.
    while !opt.is_finished() {
        opt.step(&mut bvh);
    }
    println!(
        "settled cost: {:.1} after {} passes ({} rotations)",
        bvh.total_cost(),
        opt.passes(),
        opt.total_rotations()
    );

    let camera = Frustum::orthographic(&Aabb3D::new(0.0, -10.0, -10.0, 64.0, 10.0, 10.0));
    let mut visible = VisibleSet::with_capacity(ids.len());
    bvh.visit(
        &mut FrustumCollector::new(&camera, &mut visible, |p: &u32| Some(*p as usize)),
        &mut scratch,
    );
    println!("visible from the camera: {}", visible.len());

    let mut bytes = Vec::new();
    match codec::encode(&bvh, &codec::U32Payload, &mut bytes) {
        Ok(written) => println!("encoded into {written} bytes"),
        Err(err) => eprintln!("encode failed: {err}"),
    }
}
