//! Command submission with credit-based flow control.
//!
//! The number of free FIFO slots is cached and only re-read from `FIFO_FREE` once the cache runs
//! dry. Every `ping_interval` commands a `PING_ASYNC` marker is slipped in, so a full FIFO always
//! contains a marker whose retirement raises `PONG_ASYNC` and wakes a blocked submitter.

use std::sync::Arc;
use std::time::Duration;

use hdoom_protocol::regs::mmio;
use hdoom_protocol::{Cmd, Intr, Mmio, FIFO_SIZE};

use crate::sync::Completion;

/// Completion signals shared between submitters and the interrupt handler.
pub(crate) struct Signals {
    /// Fired on `PONG_SYNC`: everything queued before the matching `PING_SYNC` has retired.
    pub(crate) drained: Completion,
    /// Fired on `PONG_ASYNC`: the FIFO has made progress.
    pub(crate) progress: Completion,
    pub(crate) stall_warning: Duration,
}

impl Signals {
    pub(crate) fn new(stall_warning: Duration) -> Self {
        Self {
            drained: Completion::new("drain"),
            progress: Completion::new("fifo-progress"),
            stall_warning,
        }
    }
}

/// Submission state. Only ever touched with the device lock held.
pub(crate) struct CommandQueue {
    mmio: Arc<dyn Mmio>,
    signals: Arc<Signals>,
    free_slots: u32,
    since_ping: u32,
    ping_interval: u32,
    epoch: u64,
    sent: u64,
}

impl CommandQueue {
    pub(crate) fn new(mmio: Arc<dyn Mmio>, signals: Arc<Signals>, ping_interval: u32) -> Self {
        Self {
            mmio,
            signals,
            free_slots: 0,
            since_ping: 0,
            ping_interval,
            epoch: 1,
            sent: 0,
        }
    }

    /// Queues one command, preceded by a `PING_ASYNC` every `ping_interval` commands.
    pub(crate) fn emit(&mut self, cmd: Cmd) {
        self.since_ping = (self.since_ping + 1) % self.ping_interval;
        if self.since_ping == 0 {
            self.send(Cmd::PingAsync);
        }
        self.send(cmd);
    }

    fn send(&mut self, cmd: Cmd) {
        if self.free_slots == 0 {
            self.free_slots = self.read_free();
        }
        while self.free_slots == 0 {
            // Drop a stale PONG_ASYNC so the next one reflects progress made from here on.
            self.mmio.write(mmio::INTR, Intr::PONG_ASYNC.bits());
            self.free_slots = self.read_free();
            if self.free_slots > 0 {
                break;
            }
            self.signals.progress.reinit();
            self.mmio.write(mmio::INTR_ENABLE, Intr::acks().bits());
            self.signals.progress.wait(self.signals.stall_warning);
            self.free_slots = self.read_free();
        }
        self.free_slots -= 1;
        self.mmio.write(mmio::FIFO_SEND, cmd.encode());
        self.sent += 1;
    }

    fn read_free(&self) -> u32 {
        self.mmio.read(mmio::FIFO_FREE).min(FIFO_SIZE)
    }

    /// Blocks until every command queued so far has retired.
    pub(crate) fn drain(&mut self) {
        self.signals.drained.reinit();
        self.emit(Cmd::PingSync);
        self.signals.drained.wait(self.signals.stall_warning);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn advance_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn free_slots(&self) -> u32 {
        self.free_slots
    }

    /// Words written to the FIFO, markers included.
    pub(crate) fn sent(&self) -> u64 {
        self.sent
    }
}
