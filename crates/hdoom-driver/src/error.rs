use hdoom_dma::DmaError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::user::Fault;

pub const EIO: i32 = 5;
pub const EFAULT: i32 = 14;
pub const ENOMEM: i32 = 12;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const EBUSY: i32 = 16;
pub const EOVERFLOW: i32 = 75;
/// Restart-the-call code used when a wait is interrupted.
pub const ERESTARTSYS: i32 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bad geometry, misaligned size, index out of range, wrong handle.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A size or count above a hard device limit.
    #[error("{0} exceeds the device limit")]
    Overflow(&'static str),
    #[error("fault while reading caller memory")]
    Fault,
    /// Lock acquisition was interrupted; nothing was changed and the call can be retried.
    #[error("interrupted while waiting for the device")]
    Interrupted,
    #[error("out of DMA memory")]
    OutOfMemory,
    #[error("all device slots are in use")]
    NoDeviceSlot,
    #[error("no device attached at slot {0}")]
    NoDevice(u32),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dma(DmaError),
}

impl Error {
    /// Negative errno, as returned from the request entry points.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::InvalidArgument(_) | Error::Config(_) => EINVAL,
            Error::Overflow(_) => EOVERFLOW,
            Error::Fault => EFAULT,
            Error::Interrupted => ERESTARTSYS,
            Error::OutOfMemory => ENOMEM,
            Error::NoDeviceSlot => EBUSY,
            Error::NoDevice(_) => ENODEV,
            Error::Dma(_) => EIO,
        };
        -code
    }
}

impl From<DmaError> for Error {
    fn from(err: DmaError) -> Self {
        match err {
            DmaError::OutOfMemory => Error::OutOfMemory,
            other => Error::Dma(other),
        }
    }
}

impl From<Fault> for Error {
    fn from(_: Fault) -> Self {
        Error::Fault
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err {
            Error::Interrupted => ErrorKind::Interrupted,
            Error::InvalidArgument(_) | Error::Overflow(_) | Error::Config(_) => {
                ErrorKind::InvalidInput
            }
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::NoDevice(_) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Folds a request result into the single integer a control call returns.
pub fn to_retval(result: Result<usize>) -> i64 {
    match result {
        Ok(n) => n as i64,
        Err(err) => i64::from(err.errno()),
    }
}
