//! Write-to-read ordering between surfaces.
//!
//! The device runs its units as a pipeline, so a copy may start reading its source before an
//! earlier batch has finished writing it. Each surface remembers the interlock epoch of its last
//! write batch. Reading a surface stamped with the current epoch needs an `INTERLOCK` first;
//! emitting one starts a new epoch, which clears the hazard for every surface at once.

use hdoom_protocol::Cmd;

use crate::queue::CommandQueue;
use crate::resource::Surface;

/// Emits a barrier if `src` may still have writes in flight.
pub(crate) fn order_read(queue: &mut CommandQueue, src: &Surface) {
    if src.stamp() == queue.epoch() {
        queue.emit(Cmd::Interlock);
        queue.advance_epoch();
    }
}

/// Records that the batch just queued wrote `dst`.
pub(crate) fn record_write(queue: &CommandQueue, dst: &Surface) {
    dst.set_stamp(queue.epoch());
}
