use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::Result;
use crate::resource::{DeviceResource, Surface};

impl Surface {
    /// Copies rendered pixels starting at byte `pos` into `buf`, after waiting for every queued
    /// command to retire. Returns the number of bytes copied; 0 once `pos` is past the end.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut queue = self.device().lock_queue()?;
        queue.drain();
        let len = self.byte_len() as u64;
        if pos >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - pos) as usize);
        self.buffer.read(pos as usize, &mut buf[..n])?;
        Ok(n)
    }

    /// Sequential reader over the surface contents.
    pub fn reader(self: &Arc<Self>) -> SurfaceReader {
        SurfaceReader {
            surface: Arc::clone(self),
            pos: 0,
        }
    }
}

/// Cursor over a surface, in the manner of an open file.
#[derive(Debug)]
pub struct SurfaceReader {
    surface: Arc<Surface>,
    pos: u64,
}

impl SurfaceReader {
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for SurfaceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.surface.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SurfaceReader {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match to {
            SeekFrom::Start(pos) => {
                self.pos = pos;
                return Ok(pos);
            }
            SeekFrom::End(delta) => (self.surface.byte_len() as u64, delta),
            SeekFrom::Current(delta) => (self.pos, delta),
        };
        let pos = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of surface")
        })?;
        self.pos = pos;
        Ok(pos)
    }
}
