//! 32-bit command words: a 6-bit type in the top bits, 26 bits of parameters below.

use bitflags::bitflags;
use thiserror::Error;

pub const CMD_TYPE_SHIFT: u32 = 26;
pub const CMD_PARAM_MASK: u32 = (1 << CMD_TYPE_SHIFT) - 1;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmdType {
    SurfDstPt = 0x20,
    SurfSrcPt = 0x21,
    TexturePt = 0x22,
    FlatAddr = 0x23,
    ColormapAddr = 0x24,
    TranslationAddr = 0x25,
    SurfDims = 0x26,
    TextureDims = 0x27,
    FillColor = 0x28,
    DrawParams = 0x29,
    XyA = 0x2a,
    XyB = 0x2b,
    UStart = 0x2c,
    VStart = 0x2d,
    UStep = 0x2e,
    VStep = 0x2f,
    CopyRect = 0x30,
    FillRect = 0x31,
    DrawLine = 0x32,
    DrawBackground = 0x33,
    DrawColumn = 0x34,
    DrawSpan = 0x35,
    Fence = 0x3c,
    PingSync = 0x3d,
    PingAsync = 0x3e,
    Interlock = 0x3f,
}

impl CmdType {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x20 => Some(Self::SurfDstPt),
            0x21 => Some(Self::SurfSrcPt),
            0x22 => Some(Self::TexturePt),
            0x23 => Some(Self::FlatAddr),
            0x24 => Some(Self::ColormapAddr),
            0x25 => Some(Self::TranslationAddr),
            0x26 => Some(Self::SurfDims),
            0x27 => Some(Self::TextureDims),
            0x28 => Some(Self::FillColor),
            0x29 => Some(Self::DrawParams),
            0x2a => Some(Self::XyA),
            0x2b => Some(Self::XyB),
            0x2c => Some(Self::UStart),
            0x2d => Some(Self::VStart),
            0x2e => Some(Self::UStep),
            0x2f => Some(Self::VStep),
            0x30 => Some(Self::CopyRect),
            0x31 => Some(Self::FillRect),
            0x32 => Some(Self::DrawLine),
            0x33 => Some(Self::DrawBackground),
            0x34 => Some(Self::DrawColumn),
            0x35 => Some(Self::DrawSpan),
            0x3c => Some(Self::Fence),
            0x3d => Some(Self::PingSync),
            0x3e => Some(Self::PingAsync),
            0x3f => Some(Self::Interlock),
            _ => None,
        }
    }

    /// Parameter bits that may be non-zero for this type.
    pub const fn param_mask(self) -> u32 {
        match self {
            Self::SurfDstPt | Self::SurfSrcPt | Self::TexturePt => CMD_PARAM_MASK,
            Self::FlatAddr => 0x000f_ffff,
            Self::ColormapAddr | Self::TranslationAddr => 0x00ff_ffff,
            Self::SurfDims => 0x000f_ff3f,
            Self::TextureDims => 0x03ff_f3ff,
            Self::FillColor => 0xff,
            Self::DrawParams => DrawParams::all().bits(),
            Self::XyA | Self::XyB => 0x007f_f7ff,
            Self::UStart | Self::VStart | Self::UStep | Self::VStep => CMD_PARAM_MASK,
            Self::CopyRect | Self::FillRect => 0x00ff_ffff,
            Self::DrawColumn => 0x003f_ffff,
            Self::Fence => CMD_PARAM_MASK,
            Self::DrawLine
            | Self::DrawBackground
            | Self::DrawSpan
            | Self::PingSync
            | Self::PingAsync
            | Self::Interlock => 0,
        }
    }
}

bitflags! {
    /// Parameters of `DRAW_PARAMS`, consumed by column and span drawing.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DrawParams: u32 {
        const FUZZ = 0x1;
        const TRANSLATE = 0x2;
        const COLORMAP = 0x4;
    }
}

/// One decoded command word.
///
/// Addresses are full physical addresses; encoding shifts them down by their required
/// alignment and decoding shifts them back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmd {
    SurfDstPt { addr: u32 },
    SurfSrcPt { addr: u32 },
    TexturePt { addr: u32 },
    FlatAddr { addr: u32 },
    ColormapAddr { addr: u32 },
    TranslationAddr { addr: u32 },
    SurfDims { width: u32, height: u32 },
    TextureDims { size: u32, height: u32 },
    FillColor(u8),
    DrawParams(DrawParams),
    XyA { x: u32, y: u32 },
    XyB { x: u32, y: u32 },
    UStart(u32),
    VStart(u32),
    UStep(u32),
    VStep(u32),
    CopyRect { width: u32, height: u32 },
    FillRect { width: u32, height: u32 },
    DrawLine,
    DrawBackground,
    DrawColumn { offset: u32 },
    DrawSpan,
    Fence(u32),
    PingSync,
    PingAsync,
    Interlock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CmdDecodeError {
    #[error("unknown command type {0:#04x}")]
    ReservedType(u32),
    #[error("reserved bits set in {ty:?} command {word:#010x}")]
    ReservedBits { ty: CmdType, word: u32 },
}

impl Cmd {
    pub fn ty(&self) -> CmdType {
        match self {
            Cmd::SurfDstPt { .. } => CmdType::SurfDstPt,
            Cmd::SurfSrcPt { .. } => CmdType::SurfSrcPt,
            Cmd::TexturePt { .. } => CmdType::TexturePt,
            Cmd::FlatAddr { .. } => CmdType::FlatAddr,
            Cmd::ColormapAddr { .. } => CmdType::ColormapAddr,
            Cmd::TranslationAddr { .. } => CmdType::TranslationAddr,
            Cmd::SurfDims { .. } => CmdType::SurfDims,
            Cmd::TextureDims { .. } => CmdType::TextureDims,
            Cmd::FillColor(_) => CmdType::FillColor,
            Cmd::DrawParams(_) => CmdType::DrawParams,
            Cmd::XyA { .. } => CmdType::XyA,
            Cmd::XyB { .. } => CmdType::XyB,
            Cmd::UStart(_) => CmdType::UStart,
            Cmd::VStart(_) => CmdType::VStart,
            Cmd::UStep(_) => CmdType::UStep,
            Cmd::VStep(_) => CmdType::VStep,
            Cmd::CopyRect { .. } => CmdType::CopyRect,
            Cmd::FillRect { .. } => CmdType::FillRect,
            Cmd::DrawLine => CmdType::DrawLine,
            Cmd::DrawBackground => CmdType::DrawBackground,
            Cmd::DrawColumn { .. } => CmdType::DrawColumn,
            Cmd::DrawSpan => CmdType::DrawSpan,
            Cmd::Fence(_) => CmdType::Fence,
            Cmd::PingSync => CmdType::PingSync,
            Cmd::PingAsync => CmdType::PingAsync,
            Cmd::Interlock => CmdType::Interlock,
        }
    }

    /// Packs the command into its wire form. Parameters wider than their field are truncated.
    pub fn encode(self) -> u32 {
        let params = match self {
            Cmd::SurfDstPt { addr } | Cmd::SurfSrcPt { addr } | Cmd::TexturePt { addr } => {
                addr >> 6
            }
            Cmd::FlatAddr { addr } => addr >> 12,
            Cmd::ColormapAddr { addr } | Cmd::TranslationAddr { addr } => addr >> 8,
            Cmd::SurfDims { width, height } => (width >> 6) | (height << 8),
            Cmd::TextureDims { size, height } => (size.wrapping_sub(1) >> 8) << 12 | height,
            Cmd::FillColor(color) => u32::from(color),
            Cmd::DrawParams(flags) => flags.bits(),
            Cmd::XyA { x, y } | Cmd::XyB { x, y } => (y & 0x7ff) << 12 | (x & 0x7ff),
            Cmd::UStart(v) | Cmd::VStart(v) | Cmd::UStep(v) | Cmd::VStep(v) => v,
            Cmd::CopyRect { width, height } | Cmd::FillRect { width, height } => {
                (height & 0xfff) << 12 | (width & 0xfff)
            }
            Cmd::DrawColumn { offset } => offset,
            Cmd::Fence(v) => v,
            Cmd::DrawLine
            | Cmd::DrawBackground
            | Cmd::DrawSpan
            | Cmd::PingSync
            | Cmd::PingAsync
            | Cmd::Interlock => 0,
        };
        let ty = self.ty();
        (ty as u32) << CMD_TYPE_SHIFT | (params & ty.param_mask())
    }

    pub fn decode(word: u32) -> Result<Self, CmdDecodeError> {
        let raw_ty = word >> CMD_TYPE_SHIFT;
        let ty = CmdType::from_u32(raw_ty).ok_or(CmdDecodeError::ReservedType(raw_ty))?;
        let p = word & CMD_PARAM_MASK;
        if p & !ty.param_mask() != 0 {
            return Err(CmdDecodeError::ReservedBits { ty, word });
        }
        Ok(match ty {
            CmdType::SurfDstPt => Cmd::SurfDstPt { addr: p << 6 },
            CmdType::SurfSrcPt => Cmd::SurfSrcPt { addr: p << 6 },
            CmdType::TexturePt => Cmd::TexturePt { addr: p << 6 },
            CmdType::FlatAddr => Cmd::FlatAddr { addr: p << 12 },
            CmdType::ColormapAddr => Cmd::ColormapAddr { addr: p << 8 },
            CmdType::TranslationAddr => Cmd::TranslationAddr { addr: p << 8 },
            CmdType::SurfDims => Cmd::SurfDims {
                width: (p & 0x3f) << 6,
                height: (p & 0xfff00) >> 8,
            },
            CmdType::TextureDims => Cmd::TextureDims {
                size: ((p >> 12 & 0x3fff) + 1) << 8,
                height: p & 0x3ff,
            },
            CmdType::FillColor => Cmd::FillColor(p as u8),
            CmdType::DrawParams => Cmd::DrawParams(DrawParams::from_bits_truncate(p)),
            CmdType::XyA => Cmd::XyA {
                x: p & 0x7ff,
                y: p >> 12 & 0x7ff,
            },
            CmdType::XyB => Cmd::XyB {
                x: p & 0x7ff,
                y: p >> 12 & 0x7ff,
            },
            CmdType::UStart => Cmd::UStart(p),
            CmdType::VStart => Cmd::VStart(p),
            CmdType::UStep => Cmd::UStep(p),
            CmdType::VStep => Cmd::VStep(p),
            CmdType::CopyRect => Cmd::CopyRect {
                width: p & 0xfff,
                height: p >> 12 & 0xfff,
            },
            CmdType::FillRect => Cmd::FillRect {
                width: p & 0xfff,
                height: p >> 12 & 0xfff,
            },
            CmdType::DrawLine => Cmd::DrawLine,
            CmdType::DrawBackground => Cmd::DrawBackground,
            CmdType::DrawColumn => Cmd::DrawColumn { offset: p },
            CmdType::DrawSpan => Cmd::DrawSpan,
            CmdType::Fence => Cmd::Fence(p),
            CmdType::PingSync => Cmd::PingSync,
            CmdType::PingAsync => Cmd::PingAsync,
            CmdType::Interlock => Cmd::Interlock,
        })
    }
}

impl From<Cmd> for u32 {
    fn from(cmd: Cmd) -> u32 {
        cmd.encode()
    }
}
