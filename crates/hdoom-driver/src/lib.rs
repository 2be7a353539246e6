//! Command-queue driver and resource manager for the HardDoom rasterizer.
//!
//! Callers create [`Surface`]s, [`Texture`]s, [`Flat`]s and [`ColorMaps`] on a [`Device`] and
//! submit drawing batches against surfaces. Batches are translated into 32-bit command words and
//! pushed into the device FIFO under a per-device lock; the device reports progress through
//! `PONG_SYNC`/`PONG_ASYNC` interrupts, which drive both FIFO flow control and full drains.
//!
//! Releasing a resource or reading a surface back always drains the device first, so host code
//! never observes or frees memory the device may still be working on.
#![forbid(unsafe_code)]

mod abi;
mod config;
mod device;
mod draw;
mod error;
mod interlock;
mod queue;
mod readback;
mod registry;
mod request;
mod resource;
mod sync;
mod user;

pub use abi::{Column, ColumnParams, CopyRect, FillRect, Line, Span, SpanParams};
pub use config::{ConfigError, DeviceConfig, PING_INTERVAL_ENV, STALL_WARN_ENV};
pub use device::{Device, DeviceStats, Hardware};
pub use error::{to_retval, Error, Result};
pub use readback::SurfaceReader;
pub use registry::{DeviceRegistry, MAX_DEVICES};
pub use request::{DeviceRequest, SurfaceRequest};
pub use resource::{ColorMaps, DeviceResource, Flat, Resource, ResourceKind, Surface, Texture};
pub use user::{Fault, UserSlice};

pub use hdoom_protocol::DrawParams;
