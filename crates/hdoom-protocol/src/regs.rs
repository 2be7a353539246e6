//! MMIO register offsets and bit layouts.

use bitflags::bitflags;

pub mod mmio {
    pub const ENABLE: u32 = 0x000;
    pub const STATUS: u32 = 0x004;
    pub const RESET: u32 = 0x004;
    /// Pending interrupts; write 1 to clear.
    pub const INTR: u32 = 0x008;
    pub const INTR_ENABLE: u32 = 0x00c;
    pub const FENCE_LAST: u32 = 0x010;
    pub const FENCE_WAIT: u32 = 0x014;
    pub const FE_CODE_ADDR: u32 = 0x020;
    pub const FE_CODE_WINDOW: u32 = 0x024;
    pub const FE_ERROR_CODE: u32 = 0x028;
    pub const FE_ERROR_CMD: u32 = 0x02c;
    pub const FIFO_SEND: u32 = 0x030;
    pub const FIFO_FREE: u32 = 0x030;
}

bitflags! {
    /// `ENABLE` register: command fetch plus one bit per pipeline unit.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Enable: u32 {
        const FETCH_CMD = 0x001;
        const FIFO = 0x002;
        const FE = 0x004;
        const XY = 0x008;
        const TEX = 0x010;
        const FLAT = 0x020;
        const FUZZ = 0x040;
        const OG = 0x080;
        const SW = 0x100;
        const SR = 0x200;
    }
}

impl Enable {
    /// Everything the driver turns on: all units, fetch left off (commands come in via MMIO).
    pub const fn running() -> Self {
        Self::all().difference(Self::FETCH_CMD)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Intr: u32 {
        const FENCE = 0x001;
        const PONG_SYNC = 0x002;
        const PONG_ASYNC = 0x004;
        const FE_ERROR = 0x008;
        const FIFO_OVERFLOW = 0x010;
        const SURF_DST_OVERFLOW = 0x020;
        const SURF_SRC_OVERFLOW = 0x040;
        const PAGE_FAULT_SURF_DST = 0x080;
        const PAGE_FAULT_SURF_SRC = 0x100;
        const PAGE_FAULT_TEXTURE = 0x200;
    }
}

impl Intr {
    /// Bits the driver expects during normal operation.
    pub const fn acks() -> Self {
        Self::PONG_SYNC.union(Self::PONG_ASYNC)
    }
}

/// Resets every unit and clears the FIFO.
pub const RESET_ALL: u32 = 0x0fff_fffe;

/// Front-end error codes reported through `FE_ERROR_CODE`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeErrorCode {
    ReservedType = 0,
    ReservedBits = 1,
    SurfWidthZero = 2,
    SurfWidthOverflow = 3,
    SurfHeightOverflow = 4,
    TextureSizeOverflow = 5,
}

impl FeErrorCode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::ReservedType),
            1 => Some(Self::ReservedBits),
            2 => Some(Self::SurfWidthZero),
            3 => Some(Self::SurfWidthOverflow),
            4 => Some(Self::SurfHeightOverflow),
            5 => Some(Self::TextureSizeOverflow),
            _ => None,
        }
    }
}
