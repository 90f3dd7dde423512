use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicU32;

use crate::error::{Result, ShmError};

/// Size of the padded header at the start of the region.
pub const HEADER_SIZE: usize = 64;

/// BGRA.
pub const BYTES_PER_PIXEL: usize = 4;

pub const DEFAULT_MAX_WIDTH: u32 = 3840;
pub const DEFAULT_MAX_HEIGHT: u32 = 2160;

/// Header as it sits in shared memory.
///
/// `reader_seq` is reserved; nothing reads or writes it.
#[repr(C)]
pub(crate) struct RawHeader {
    pub(crate) writer_seq: AtomicU32,
    pub(crate) reader_seq: AtomicU32,
    pub(crate) width: AtomicU32,
    pub(crate) height: AtomicU32,
    pub(crate) active_buffer: AtomicU32,
    _reserved: [u32; 11],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// Maximum frame dimensions; fixes the size of both pixel buffers.
///
/// Both sides must agree on the layout. The host passes it to the remote as
/// `--max-frame-size=<W>x<H>`, which is this type's `Display` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    max_width: u32,
    max_height: u32,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

impl FrameLayout {
    pub fn new(max_width: u32, max_height: u32) -> Result<Self> {
        let layout = Self {
            max_width,
            max_height,
        };
        if max_width == 0 || max_height == 0 || layout.checked_region_size().is_none() {
            return Err(ShmError::InvalidLayout(layout.to_string()));
        }
        Ok(layout)
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    /// Bytes in one pixel buffer.
    pub fn buffer_size(&self) -> usize {
        self.max_width as usize * self.max_height as usize * BYTES_PER_PIXEL
    }

    /// Total region size: header plus two buffers.
    pub fn region_size(&self) -> usize {
        HEADER_SIZE + 2 * self.buffer_size()
    }

    /// Offset of buffer `index` (0 or 1) from the start of the region.
    pub fn buffer_offset(&self, index: u32) -> usize {
        HEADER_SIZE + index as usize * self.buffer_size()
    }

    /// Whether a frame of `width × height` fits this layout.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width > 0 && height > 0 && width <= self.max_width && height <= self.max_height
    }

    fn checked_region_size(&self) -> Option<usize> {
        (self.max_width as usize)
            .checked_mul(self.max_height as usize)?
            .checked_mul(BYTES_PER_PIXEL)?
            .checked_mul(2)?
            .checked_add(HEADER_SIZE)
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.max_width, self.max_height)
    }
}

impl FromStr for FrameLayout {
    type Err = ShmError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ShmError::InvalidLayout(s.to_string());
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let w = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let h = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_field_offsets() {
        assert_eq!(std::mem::offset_of!(RawHeader, writer_seq), 0);
        assert_eq!(std::mem::offset_of!(RawHeader, reader_seq), 4);
        assert_eq!(std::mem::offset_of!(RawHeader, width), 8);
        assert_eq!(std::mem::offset_of!(RawHeader, height), 12);
        assert_eq!(std::mem::offset_of!(RawHeader, active_buffer), 16);
    }

    #[test]
    fn default_region_size() {
        let layout = FrameLayout::default();
        assert_eq!(layout.buffer_size(), 3840 * 2160 * 4);
        assert_eq!(layout.region_size(), 64 + 2 * 3840 * 2160 * 4);
        assert_eq!(layout.buffer_offset(1), 64 + 3840 * 2160 * 4);
    }

    #[test]
    fn parses_display_form() {
        let layout: FrameLayout = "256x128".parse().unwrap();
        assert_eq!((layout.max_width(), layout.max_height()), (256, 128));
        assert_eq!(layout.to_string(), "256x128");
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!("0x10".parse::<FrameLayout>().is_err());
        assert!("10".parse::<FrameLayout>().is_err());
        assert!("axb".parse::<FrameLayout>().is_err());
        assert!(FrameLayout::new(10, 0).is_err());
    }

    #[test]
    fn fits_checks_both_bounds() {
        let layout = FrameLayout::new(64, 32).unwrap();
        assert!(layout.fits(64, 32));
        assert!(!layout.fits(65, 32));
        assert!(!layout.fits(64, 0));
    }
}
