use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hdoom_dma::{DmaPool, PhysMemory};
use hdoom_protocol::regs::{mmio, RESET_ALL};
use hdoom_protocol::{
    Enable, FeErrorCode, Intr, IrqLine, IrqReturn, Mmio, COLORMAP_SIZE, PAGE_SIZE,
};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::queue::{CommandQueue, Signals};
use crate::sync::{BatchGuard, BatchLock, Completion, RefCount};

/// What the host platform hands the driver for one accelerator.
#[derive(Clone)]
pub struct Hardware {
    pub mmio: Arc<dyn Mmio>,
    pub irq: Arc<dyn IrqLine>,
    /// DMA-coherent memory the device can reach.
    pub memory: Arc<PhysMemory>,
}

/// Snapshot of submission counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceStats {
    pub words_sent: u64,
    pub interlock_epoch: u64,
    pub cached_free_slots: u32,
    pub anomalies: u64,
    pub references: usize,
}

/// One attached accelerator.
///
/// Every resource created on the device holds a reference; detaching waits until the last one
/// is released, so no page can be freed while the device might still touch it.
pub struct Device {
    minor: u32,
    mmio: Arc<dyn Mmio>,
    irq: Arc<dyn IrqLine>,
    config: DeviceConfig,
    pub(crate) page_pool: DmaPool,
    pub(crate) map_pool: DmaPool,
    signals: Arc<Signals>,
    queue: BatchLock<CommandQueue>,
    refs: RefCount,
    released: Completion,
    detached: AtomicBool,
    anomalies: AtomicU64,
}

impl Device {
    pub(crate) fn attach(minor: u32, hw: Hardware, config: DeviceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let page_pool = DmaPool::new("hdoom-pages", hw.memory.clone(), PAGE_SIZE)?;
        let map_pool = DmaPool::new("hdoom-maps", hw.memory.clone(), COLORMAP_SIZE)?;
        let signals = Arc::new(Signals::new(config.stall_warning));
        let queue = CommandQueue::new(hw.mmio.clone(), signals.clone(), config.ping_interval);

        let device = Arc::new(Self {
            minor,
            mmio: hw.mmio,
            irq: hw.irq,
            config,
            page_pool,
            map_pool,
            signals,
            queue: BatchLock::new(queue),
            refs: RefCount::new(1),
            released: Completion::new("teardown"),
            detached: AtomicBool::new(false),
            anomalies: AtomicU64::new(0),
        });
        device.turn_on();

        let weak = Arc::downgrade(&device);
        device.irq.request_irq(Box::new(move || {
            weak.upgrade()
                .map_or(IrqReturn::None, |device| device.handle_interrupt())
        }));
        tracing::debug!(minor, "device attached");
        Ok(device)
    }

    /// Refuses new work, drops the attach reference, waits for every resource to go away, then
    /// stops the device.
    pub(crate) fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.put();
        self.released.wait(self.config.stall_warning);
        self.turn_off();
        self.irq.free_irq();
        tracing::debug!(minor = self.minor, "device detached");
    }

    fn turn_on(&self) {
        if !self.config.microcode.is_empty() {
            self.mmio.write(mmio::FE_CODE_ADDR, 0);
            for &word in &self.config.microcode {
                self.mmio.write(mmio::FE_CODE_WINDOW, word);
            }
        }
        self.mmio.write(mmio::RESET, RESET_ALL);
        self.mmio.write(mmio::INTR, Intr::all().bits());
        self.mmio.write(mmio::INTR_ENABLE, Intr::PONG_SYNC.bits());
        self.mmio.write(mmio::ENABLE, Enable::running().bits());
    }

    fn turn_off(&self) {
        self.mmio.write(mmio::ENABLE, 0);
        self.mmio.write(mmio::INTR_ENABLE, 0);
        // Flush the posted writes.
        self.mmio.read(mmio::ENABLE);
    }

    /// Interrupt handler. Acknowledges everything pending in one go, then wakes whoever waits
    /// on the acknowledged markers.
    pub fn handle_interrupt(&self) -> IrqReturn {
        let raw = self.mmio.read(mmio::INTR);
        if raw == 0 {
            return IrqReturn::None;
        }
        self.mmio.write(mmio::INTR, raw);
        let pending = Intr::from_bits_retain(raw);

        if pending.contains(Intr::PONG_ASYNC) {
            // Only armed while a submitter waits for FIFO space.
            self.mmio.write(mmio::INTR_ENABLE, Intr::PONG_SYNC.bits());
            self.signals.progress.complete();
        }
        if pending.contains(Intr::PONG_SYNC) {
            self.signals.drained.complete();
        }

        let unexpected = pending.difference(Intr::acks());
        if !unexpected.is_empty() {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
            let code = self.mmio.read(mmio::FE_ERROR_CODE);
            let cmd = self.mmio.read(mmio::FE_ERROR_CMD);
            tracing::error!(
                minor = self.minor,
                intr = ?unexpected,
                fe_error = ?FeErrorCode::from_u32(code),
                fe_error_cmd = cmd,
                "unexpected device interrupt"
            );
        }
        IrqReturn::Handled
    }

    pub(crate) fn lock_queue(&self) -> Result<BatchGuard<'_, CommandQueue>> {
        self.ensure_attached()?;
        self.queue.lock_interruptible()
    }

    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(Error::NoDevice(self.minor));
        }
        Ok(())
    }

    /// Whether detach has started. A detached device accepts no new resources or requests;
    /// resources that already exist can still be released.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Waits until everything submitted so far has retired.
    pub fn drain(&self) -> Result<()> {
        self.lock_queue()?.drain();
        Ok(())
    }

    /// Makes every thread currently blocked on the device lock fail with
    /// [`Error::Interrupted`](crate::Error::Interrupted).
    pub fn interrupt_waiters(&self) {
        self.queue.interrupt_waiters();
    }

    /// Takes a reference for a new resource. Fails once the count has reached zero.
    pub(crate) fn get(&self) -> Result<()> {
        self.ensure_attached()?;
        if self.refs.try_get() {
            Ok(())
        } else {
            Err(Error::NoDevice(self.minor))
        }
    }

    pub(crate) fn put(&self) {
        self.refs.put(|| self.released.complete());
    }

    /// Frees `storage` once the device can no longer be using it, then drops the reference the
    /// owning resource held.
    pub(crate) fn release_synced<B>(&self, storage: B) {
        let mut queue = self.queue.lock();
        queue.drain();
        drop(storage);
        drop(queue);
        self.put();
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Result<DeviceStats> {
        let queue = self.lock_queue()?;
        Ok(DeviceStats {
            words_sent: queue.sent(),
            interlock_epoch: queue.epoch(),
            cached_free_slots: queue.free_slots(),
            anomalies: self.anomalies(),
            references: self.refs.count(),
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("minor", &self.minor)
            .field("references", &self.refs.count())
            .finish_non_exhaustive()
    }
}
