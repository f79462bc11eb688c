//! Runs the add kernel on the CPU. See the wgpu runner for the equivalent GPU
//! code, which can cross-check its results against this reference.

use std::time::Instant;

use add_shader::{WIDTH, cpu};
use anyhow::Context;

/// Adds `offsets` into a zeroed accumulator `rounds` times, printing each step.
fn accumulate(offsets: &[i32], rounds: u32) -> anyhow::Result<Vec<i32>> {
    let mut accumulator = vec![0; offsets.len()];
    for round in 1..=rounds {
        cpu::dispatch(&mut accumulator, offsets)
            .with_context(|| format!("dispatch {round} failed"))?;
        println!("after dispatch {round}: {accumulator:?}");
    }
    Ok(accumulator)
}

fn main() -> anyhow::Result<()> {
    let offsets = (1..=WIDTH as i32).collect::<Vec<_>>();

    let start = Instant::now();
    accumulate(&offsets, 2)?;
    let took = start.elapsed();
    println!("Took: {took:?}");
    Ok(())
}
