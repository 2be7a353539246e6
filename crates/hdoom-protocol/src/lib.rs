//! Register map and command-word encoding for the HardDoom rasterizer.
//!
//! The device is driven through a handful of 32-bit MMIO registers and a 512-entry command
//! FIFO. Everything that crosses that boundary lives here so the driver and the software model
//! agree on the wire format bit for bit.
#![forbid(unsafe_code)]

pub mod cmd;
pub mod regs;

pub use cmd::{Cmd, CmdDecodeError, CmdType, DrawParams};
pub use regs::{Enable, FeErrorCode, Intr};

pub const PCI_VENDOR_ID: u16 = 0x0666;
pub const PCI_DEVICE_ID: u16 = 0x1993;

/// Size of one page of device-visible memory.
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SHIFT: u32 = 12;

/// Page-table entry bits.
pub const PTE_VALID: u32 = 0x0000_0001;
pub const PTE_PHYS_MASK: u32 = 0xffff_f000;

/// Depth of the command FIFO, in words.
pub const FIFO_SIZE: u32 = 0x200;

/// Surfaces, textures and page tables are laid out in 64-byte blocks.
pub const BLOCK_SIZE: usize = 0x40;
pub const COLORMAP_SIZE: usize = 0x100;
pub const FLAT_SIZE: usize = 0x1000;
/// Flats are always 64x64 texels.
pub const FLAT_DIM: u32 = 64;

pub const SURFACE_MAX_DIM: u32 = 2048;
pub const TEXTURE_MAX_SIZE: u32 = 1 << 22;
pub const TEXTURE_MAX_HEIGHT: u32 = 1023;
pub const COLORMAP_MAX_COUNT: u32 = 256;

/// Mask of the bits a fixed-point column coordinate may use.
pub const TEX_COORD_MASK: u32 = 0x03ff_ffff;
/// Mask applied to flat (span) coordinates before upload.
pub const FLAT_COORD_MASK: u32 = 0x003f_ffff;
pub const TEX_OFFSET_MASK: u32 = 0x003f_ffff;

/// The single memory-mapped load/store primitive of the device.
///
/// Implementations must be callable from any thread; the driver serialises command
/// submission itself but the interrupt handler may run concurrently with a submitter.
pub trait Mmio: Send + Sync {
    fn read(&self, reg: u32) -> u32;
    fn write(&self, reg: u32, value: u32);
}

/// Result of one interrupt handler invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The device had nothing pending.
    None,
    Handled,
}

pub type IrqHandler = Box<dyn Fn() -> IrqReturn + Send + Sync>;

/// Interrupt line of the device.
pub trait IrqLine: Send + Sync {
    /// Installs `handler`. It is invoked whenever `INTR & INTR_ENABLE` is non-zero.
    fn request_irq(&self, handler: IrqHandler);
    /// Removes the handler. Returns only once no invocation is in flight.
    fn free_irq(&self);
}
