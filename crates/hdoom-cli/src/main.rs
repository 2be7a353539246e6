use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use clap::Parser;
use hdoom_dma::PhysMemory;
use hdoom_driver::{
    CopyRect, DeviceConfig, DeviceRegistry, FillRect, Hardware, Resource, Surface, UserSlice,
};
use hdoom_sim::{SimConfig, SimDevice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sub-commands per request; the length field of a batch is 16 bits wide.
const MAX_BATCH: usize = 0xffff;

#[derive(Parser, Debug)]
#[command(
    name = "hdoom-stress",
    about = "Fill two surfaces pixel by pixel, copy random rectangles between them and verify the result against a host model."
)]
struct Args {
    /// Surface width in pixels (multiple of 64)
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Surface height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Number of random copies
    #[arg(long, default_value_t = 1000)]
    reps: usize,

    /// Copies per request
    #[arg(long, default_value_t = 1)]
    copies_per_batch: usize,

    /// RNG seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Physical memory available to the device, in 4 KiB frames
    #[arg(long, default_value_t = 4096)]
    frames: usize,
}

/// Host-side mirror of one surface.
struct Model {
    width: usize,
    pixels: Vec<u8>,
}

impl Model {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    fn copy_from(&mut self, src: &Model, r: &CopyRect) {
        for dy in 0..usize::from(r.height) {
            let s = (usize::from(r.src_y) + dy) * src.width + usize::from(r.src_x);
            let d = (usize::from(r.dst_y) + dy) * self.width + usize::from(r.dst_x);
            let w = usize::from(r.width);
            self.pixels[d..d + w].copy_from_slice(&src.pixels[s..s + w]);
        }
    }
}

/// Submits `items` in as many requests as it takes for every one of them to be accepted.
fn submit_all<T: Copy>(
    items: &[T],
    mut submit: impl FnMut(UserSlice<'_, T>) -> hdoom_driver::Result<usize>,
) -> anyhow::Result<usize> {
    let mut done = 0;
    let mut requests = 0;
    while done < items.len() {
        let end = (done + MAX_BATCH).min(items.len());
        let accepted = submit(UserSlice::new(&items[done..end]))?;
        if accepted == 0 {
            bail!("device accepted none of {} sub-commands", end - done);
        }
        done += accepted;
        requests += 1;
    }
    Ok(requests)
}

fn fill_random(surface: &Surface, model: &mut Model, rng: &mut StdRng) -> anyhow::Result<()> {
    let width = surface.width() as u16;
    let height = surface.height() as u16;
    let rects: Vec<FillRect> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| FillRect {
            x,
            y,
            width: 1,
            height: 1,
            color: rng.gen(),
        })
        .collect();
    for r in &rects {
        model.pixels[usize::from(r.y) * model.width + usize::from(r.x)] = r.color;
    }
    let requests = submit_all(&rects, |batch| surface.fill_rects(batch))
        .context("filling surface")?;
    tracing::debug!(rects = rects.len(), requests, "surface filled");
    Ok(())
}

fn random_copy(rng: &mut StdRng, width: u16, height: u16) -> CopyRect {
    let w = rng.gen_range(1..=width);
    let h = rng.gen_range(1..=height);
    CopyRect {
        dst_x: rng.gen_range(0..=width - w),
        dst_y: rng.gen_range(0..=height - h),
        src_x: rng.gen_range(0..=width - w),
        src_y: rng.gen_range(0..=height - h),
        width: w,
        height: h,
    }
}

fn verify(name: &str, surface: &Arc<Surface>, model: &Model) -> anyhow::Result<()> {
    let mut actual = Vec::with_capacity(model.pixels.len());
    surface
        .reader()
        .read_to_end(&mut actual)
        .with_context(|| format!("reading back {name}"))?;
    ensure!(
        actual.len() == model.pixels.len(),
        "{name}: read {} bytes, expected {}",
        actual.len(),
        model.pixels.len()
    );
    let mismatches: Vec<usize> = actual
        .iter()
        .zip(&model.pixels)
        .enumerate()
        .filter(|(_, (a, e))| a != e)
        .map(|(i, _)| i)
        .collect();
    if let Some(&first) = mismatches.first() {
        bail!(
            "{name}: {} mismatched pixels, first at ({}, {}): got {:#04x}, expected {:#04x}",
            mismatches.len(),
            first % model.width,
            first / model.width,
            actual[first],
            model.pixels[first]
        );
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<()> {
    ensure!(
        args.copies_per_batch > 0,
        "--copies-per-batch must be positive"
    );
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    tracing::info!(
        seed,
        width = args.width,
        height = args.height,
        reps = args.reps,
        "starting"
    );

    let config = DeviceConfig::from_env().context("reading device configuration")?;
    let memory = Arc::new(PhysMemory::new(args.frames));
    let sim = SimDevice::new(memory.clone(), SimConfig::default())
        .context("starting device model")?;
    let registry = DeviceRegistry::new();
    let device = registry
        .attach(
            Hardware {
                mmio: sim.clone(),
                irq: sim.clone(),
                memory,
            },
            config,
        )
        .context("attaching device")?;

    let started = Instant::now();
    {
        let dst = device
            .create_surface(args.width, args.height)
            .context("creating first surface")?;
        let src = device
            .create_surface(args.width, args.height)
            .context("creating second surface")?;
        let mut dst_model = Model::new(args.width, args.height);
        let mut src_model = Model::new(args.width, args.height);
        fill_random(&dst, &mut dst_model, &mut rng)?;
        fill_random(&src, &mut src_model, &mut rng)?;

        let src_handle = Resource::from(Arc::clone(&src));
        let (w, h) = (args.width as u16, args.height as u16);
        let mut remaining = args.reps;
        while remaining > 0 {
            let n = remaining.min(args.copies_per_batch);
            let copies: Vec<CopyRect> = (0..n).map(|_| random_copy(&mut rng, w, h)).collect();
            for c in &copies {
                dst_model.copy_from(&src_model, c);
            }
            submit_all(&copies, |batch| dst.copy_rects(&src_handle, batch))
                .context("copying rectangles")?;
            remaining -= n;
        }

        verify("first surface", &dst, &dst_model)?;
        verify("second surface", &src, &src_model)?;
        let stats = device.stats()?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            words = stats.words_sent,
            epoch = stats.interlock_epoch,
            hazards = sim.stats().hazards,
            "verified"
        );
        ensure!(
            device.anomalies() == 0,
            "device reported {} unexpected interrupts",
            device.anomalies()
        );
    }
    registry.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    run(&args)?;
    println!("ok");
    Ok(())
}
