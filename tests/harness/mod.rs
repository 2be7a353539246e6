#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hdoom_dma::PhysMemory;
use hdoom_driver::{Device, DeviceConfig, DeviceRegistry, Hardware, Surface};
use hdoom_sim::{SimConfig, SimDevice};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A registry with simulated devices attached on demand.
pub struct Bench {
    pub registry: DeviceRegistry,
    pub sims: Vec<Arc<SimDevice>>,
}

impl Bench {
    pub fn new() -> Self {
        init_tracing();
        Self {
            registry: DeviceRegistry::new(),
            sims: Vec::new(),
        }
    }

    /// Attaches a fresh device backed by `frames` pages of memory.
    pub fn attach(&mut self, frames: usize) -> Result<Arc<Device>> {
        let memory = Arc::new(PhysMemory::new(frames));
        let sim = SimDevice::new(memory.clone(), SimConfig::default())
            .context("starting device model")?;
        let device = self.registry.attach(
            Hardware {
                mmio: sim.clone(),
                irq: sim.clone(),
                memory,
            },
            DeviceConfig::from_env()?,
        )?;
        self.sims.push(sim);
        Ok(device)
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

#[derive(Debug, Default)]
pub struct SurfaceDiff {
    pub mismatched_pixels: u64,
    pub total_pixels: u64,
    /// `(x, y, actual, expected)` of the first mismatch.
    pub first: Option<(usize, usize, u8, u8)>,
}

pub fn compare_pixels(actual: &[u8], expected: &[u8], width: usize) -> SurfaceDiff {
    let mut diff = SurfaceDiff {
        total_pixels: expected.len() as u64,
        ..SurfaceDiff::default()
    };
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            diff.mismatched_pixels += 1;
            diff.first.get_or_insert((i % width, i / width, a, e));
        }
    }
    diff
}

pub fn read_pixels(surface: &Arc<Surface>) -> Result<Vec<u8>> {
    let mut pixels = Vec::new();
    surface
        .reader()
        .read_to_end(&mut pixels)
        .context("reading surface back")?;
    Ok(pixels)
}

/// Reads `surface` back and fails with a description of the first difference.
pub fn expect_pixels(surface: &Arc<Surface>, expected: &[u8]) -> Result<()> {
    let actual = read_pixels(surface)?;
    if actual.len() != expected.len() {
        bail!("read {} bytes, expected {}", actual.len(), expected.len());
    }
    let diff = compare_pixels(&actual, expected, surface.width() as usize);
    if let Some((x, y, a, e)) = diff.first {
        bail!(
            "{}/{} pixels differ, first at ({x}, {y}): {a:#04x} != {e:#04x}",
            diff.mismatched_pixels,
            diff.total_pixels
        );
    }
    Ok(())
}
