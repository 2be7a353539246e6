#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdoom_dma::PhysMemory;
use hdoom_driver::{Device, DeviceConfig, DeviceRegistry, Hardware, Surface};
use hdoom_sim::{SimConfig, SimDevice};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One simulated device attached through a private registry.
pub struct Rig {
    pub memory: Arc<PhysMemory>,
    pub sim: Arc<SimDevice>,
    pub registry: DeviceRegistry,
    pub device: Arc<Device>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Self {
        init_tracing();
        let memory = Arc::new(PhysMemory::new(4096));
        let sim = SimDevice::new(
            memory.clone(),
            SimConfig {
                trace: true,
                ..SimConfig::default()
            },
        )
        .unwrap();
        let registry = DeviceRegistry::new();
        let device = registry.attach(hardware(&memory, &sim), config).unwrap();
        Self {
            memory,
            sim,
            registry,
            device,
        }
    }

    pub fn surface(&self, width: u32, height: u32) -> Arc<Surface> {
        self.device.create_surface(width, height).unwrap()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

pub fn hardware(memory: &Arc<PhysMemory>, sim: &Arc<SimDevice>) -> Hardware {
    Hardware {
        mmio: sim.clone(),
        irq: sim.clone(),
        memory: memory.clone(),
    }
}

/// Full readback through the file-like reader.
pub fn pixels(surface: &Arc<Surface>) -> Vec<u8> {
    let mut out = Vec::new();
    surface.reader().read_to_end(&mut out).unwrap();
    out
}

pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
