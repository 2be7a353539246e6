//! Software model of the HardDoom device.
//!
//! [`SimDevice`] exposes the register file through [`Mmio`] and raises its interrupt line
//! through [`IrqLine`]. A worker thread drains the command FIFO into the draw engine, which
//! reads and writes guest memory through a shared [`DmaBus`].

mod engine;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use hdoom_dma::DmaBus;
use hdoom_protocol::regs::{mmio, RESET_ALL};
use hdoom_protocol::{
    Cmd, CmdDecodeError, Enable, FeErrorCode, Intr, IrqHandler, IrqLine, IrqReturn, Mmio,
    FIFO_SIZE,
};

pub use engine::SimStats;
use engine::{Engine, Fault, Signal};

#[derive(Clone, Debug)]
pub struct SimConfig {
    /// FIFO depth reported through `FIFO_FREE`.
    pub fifo_size: u32,
    /// Record every word written to `FIFO_SEND`.
    pub trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fifo_size: FIFO_SIZE,
            trace: false,
        }
    }
}

#[derive(Default)]
struct Regs {
    enable: u32,
    intr: u32,
    intr_enable: u32,
    fence_last: u32,
    fence_wait: u32,
    fe_code_addr: u32,
    fe_error_code: u32,
    fe_error_cmd: u32,
}

struct State {
    regs: Regs,
    fifo: VecDeque<u32>,
    microcode: Vec<u32>,
    engine: Engine,
    trace: Option<Vec<u32>>,
    stalled: bool,
    shutdown: bool,
    irq_connected: bool,
    /// Set after the handler declined an interrupt; cleared by the next `request_irq`.
    irq_masked: bool,
}

impl State {
    fn raise(&mut self, bits: Intr) {
        self.regs.intr |= bits.bits();
    }

    fn irq_pending(&self) -> bool {
        self.irq_connected && !self.irq_masked && self.regs.intr & self.regs.intr_enable != 0
    }

    fn runnable(&self) -> bool {
        let enable = Enable::from_bits_truncate(self.regs.enable);
        !self.stalled && enable.contains(Enable::FIFO | Enable::FE) && !self.fifo.is_empty()
    }

    fn frontend_error(&mut self, code: FeErrorCode, word: u32) {
        tracing::warn!(?code, word, "front end stopped");
        self.regs.fe_error_code = code as u32;
        self.regs.fe_error_cmd = word;
        self.regs.enable &= !Enable::FE.bits();
        self.raise(Intr::FE_ERROR);
    }

    fn step(&mut self, mem: &dyn DmaBus) {
        let Some(word) = self.fifo.pop_front() else {
            return;
        };
        let cmd = match Cmd::decode(word) {
            Ok(cmd) => cmd,
            Err(err) => {
                let code = match err {
                    CmdDecodeError::ReservedType(_) => FeErrorCode::ReservedType,
                    CmdDecodeError::ReservedBits { .. } => FeErrorCode::ReservedBits,
                };
                self.frontend_error(code, word);
                return;
            }
        };
        match self.engine.execute(cmd, mem) {
            Ok(None) => {}
            Ok(Some(Signal::PingSync)) => self.raise(Intr::PONG_SYNC),
            Ok(Some(Signal::PingAsync)) => self.raise(Intr::PONG_ASYNC),
            Ok(Some(Signal::Fence(v))) => {
                self.regs.fence_last = v;
                if v == self.regs.fence_wait {
                    self.raise(Intr::FENCE);
                }
            }
            Err(Fault::Intr(bits)) => {
                self.engine.stats.faults += 1;
                tracing::warn!(?bits, ?cmd, "command faulted");
                self.raise(bits);
            }
            Err(Fault::Frontend(code)) => {
                self.engine.stats.faults += 1;
                self.frontend_error(code, word);
            }
        }
    }

    fn reset(&mut self) {
        self.fifo.clear();
        self.engine.reset();
        self.regs.fe_error_code = 0;
        self.regs.fe_error_cmd = 0;
    }
}

struct Shared {
    mem: Arc<dyn DmaBus>,
    fifo_size: u32,
    state: Mutex<State>,
    wake: Condvar,
    irq: Mutex<Option<IrqHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn run(&self) {
        let mut st = lock(&self.state);
        loop {
            if st.shutdown {
                return;
            }
            if st.irq_pending() {
                drop(st);
                let ret = lock(&self.irq).as_ref().map(|handler| handler());
                st = lock(&self.state);
                if ret == Some(IrqReturn::None) && st.irq_pending() {
                    tracing::warn!(intr = st.regs.intr, "interrupt not handled, masking line");
                    st.irq_masked = true;
                }
                continue;
            }
            if st.runnable() {
                st.step(self.mem.as_ref());
                // Give register accesses a chance between commands.
                drop(st);
                st = lock(&self.state);
                continue;
            }
            st = self
                .wake
                .wait(st)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// The device model. Dropping the last handle stops the worker.
pub struct SimDevice {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimDevice {
    pub fn new(mem: Arc<dyn DmaBus>, config: SimConfig) -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            mem,
            fifo_size: config.fifo_size,
            state: Mutex::new(State {
                regs: Regs::default(),
                fifo: VecDeque::with_capacity(config.fifo_size as usize),
                microcode: Vec::new(),
                engine: Engine::new(),
                trace: config.trace.then(Vec::new),
                stalled: false,
                shutdown: false,
                irq_connected: false,
                irq_masked: false,
            }),
            wake: Condvar::new(),
            irq: Mutex::new(None),
        });
        let worker = thread::Builder::new().name("hdoom-sim".into()).spawn({
            let shared = Arc::clone(&shared);
            move || shared.run()
        })?;
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }

    /// While stalled the FIFO fills but nothing executes.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
        self.shared.wake.notify_all();
    }

    pub fn fifo_len(&self) -> usize {
        self.state().fifo.len()
    }

    pub fn stats(&self) -> SimStats {
        self.state().engine.stats
    }

    /// Words uploaded through `FE_CODE_WINDOW`.
    pub fn microcode(&self) -> Vec<u32> {
        self.state().microcode.clone()
    }

    /// Takes the decoded command trace recorded so far. Undecodable words are skipped.
    pub fn take_trace(&self) -> Vec<Cmd> {
        let mut st = self.state();
        let Some(trace) = st.trace.as_mut() else {
            return Vec::new();
        };
        std::mem::take(trace)
            .into_iter()
            .filter_map(|word| Cmd::decode(word).ok())
            .collect()
    }

    fn send(&self, st: &mut State, word: u32) {
        if st.fifo.len() >= self.shared.fifo_size as usize {
            tracing::warn!(word, "write to full FIFO dropped");
            st.raise(Intr::FIFO_OVERFLOW);
            return;
        }
        if let Some(trace) = st.trace.as_mut() {
            trace.push(word);
        }
        st.fifo.push_back(word);
    }
}

impl Mmio for SimDevice {
    fn read(&self, reg: u32) -> u32 {
        let st = self.state();
        match reg {
            mmio::ENABLE => st.regs.enable,
            mmio::STATUS => u32::from(!st.fifo.is_empty()),
            mmio::INTR => st.regs.intr,
            mmio::INTR_ENABLE => st.regs.intr_enable,
            mmio::FENCE_LAST => st.regs.fence_last,
            mmio::FENCE_WAIT => st.regs.fence_wait,
            mmio::FE_CODE_ADDR => st.regs.fe_code_addr,
            mmio::FE_CODE_WINDOW => st
                .microcode
                .get(st.regs.fe_code_addr as usize)
                .copied()
                .unwrap_or(0),
            mmio::FE_ERROR_CODE => st.regs.fe_error_code,
            mmio::FE_ERROR_CMD => st.regs.fe_error_cmd,
            mmio::FIFO_FREE => self.shared.fifo_size - st.fifo.len() as u32,
            _ => {
                tracing::debug!(reg, "read of unknown register");
                0
            }
        }
    }

    fn write(&self, reg: u32, value: u32) {
        let mut st = self.state();
        match reg {
            mmio::ENABLE => st.regs.enable = value & Enable::all().bits(),
            mmio::RESET => {
                if value & RESET_ALL != 0 {
                    st.reset();
                }
            }
            mmio::INTR => st.regs.intr &= !value,
            mmio::INTR_ENABLE => st.regs.intr_enable = value & Intr::all().bits(),
            mmio::FENCE_LAST => st.regs.fence_last = value,
            mmio::FENCE_WAIT => st.regs.fence_wait = value,
            mmio::FE_CODE_ADDR => st.regs.fe_code_addr = value,
            mmio::FE_CODE_WINDOW => {
                let idx = st.regs.fe_code_addr as usize;
                if st.microcode.len() <= idx {
                    st.microcode.resize(idx + 1, 0);
                }
                st.microcode[idx] = value;
                st.regs.fe_code_addr += 1;
            }
            mmio::FIFO_SEND => self.send(&mut st, value),
            _ => tracing::debug!(reg, value, "write to unknown register"),
        }
        drop(st);
        self.shared.wake.notify_all();
    }
}

impl IrqLine for SimDevice {
    fn request_irq(&self, handler: IrqHandler) {
        *lock(&self.shared.irq) = Some(handler);
        {
            let mut st = self.state();
            st.irq_connected = true;
            st.irq_masked = false;
        }
        self.shared.wake.notify_all();
    }

    fn free_irq(&self) {
        self.state().irq_connected = false;
        *lock(&self.shared.irq) = None;
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.state().shutdown = true;
        self.shared.wake.notify_all();
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        // The last handle can go away inside the interrupt handler.
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state();
        f.debug_struct("SimDevice")
            .field("enable", &format_args!("{:#x}", st.regs.enable))
            .field("intr", &format_args!("{:#x}", st.regs.intr))
            .field("fifo", &st.fifo.len())
            .field("stalled", &st.stalled)
            .finish()
    }
}
