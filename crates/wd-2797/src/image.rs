//! Flat sector-dump disk images.
//!
//! 3B1 floppies are raw LBA-ordered dumps: nothing but sector payloads,
//! no headers, no per-track metadata. Real discs are 512 bytes/sector
//! and 10 sectors/track, but any shape that divides the file evenly
//! into whole tracks will load.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Random-access byte store backing a disk image.
///
/// The controller needs exactly four capabilities from its image:
/// length, read-at, write-at, flush. Files and in-memory buffers both
/// qualify; tests use the latter.
pub trait SectorStore {
    /// Total image length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Fill `buf` from the image starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` to the image starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Push buffered writes down to the underlying store.
    fn flush(&mut self) -> io::Result<()>;
}

impl SectorStore for File {
    fn len(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

impl SectorStore for Vec<u8> {
    fn len(&mut self) -> io::Result<u64> {
        Ok(Vec::len(self) as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset past end of image"))?;
        match start.checked_add(buf.len()) {
            Some(end) if end <= Vec::len(self) => {
                buf.copy_from_slice(&self[start..end]);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of image",
            )),
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset past end of image"))?;
        match start.checked_add(buf.len()) {
            Some(end) if end <= Vec::len(self) => {
                self[start..end].copy_from_slice(buf);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "write past end of image",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Shape of a loaded image. All-zero while no image is attached.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub sector_size: u32,
    pub sectors_per_track: u32,
    pub heads: u32,
    pub tracks: u32,
}

impl DiskGeometry {
    /// Derive geometry from an image size. The size must divide exactly
    /// into at least one whole track.
    pub fn from_image_size(
        size: u64,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
    ) -> Result<Self, ImageError> {
        let track_bytes =
            u64::from(sector_size) * u64::from(sectors_per_track) * u64::from(heads);
        if track_bytes == 0 || size == 0 || size % track_bytes != 0 {
            return Err(ImageError::BadGeometry {
                size,
                sector_size,
                sectors_per_track,
                heads,
            });
        }
        Ok(Self {
            sector_size,
            sectors_per_track,
            heads,
            tracks: (size / track_bytes) as u32,
        })
    }

    /// Byte offset of a sector: LBA = (C * heads + H) * spt + S - 1.
    #[must_use]
    pub fn sector_offset(&self, track: u32, head: u32, sector: u32) -> u64 {
        let lba = (u64::from(track) * u64::from(self.heads) + u64::from(head))
            * u64::from(self.sectors_per_track)
            + u64::from(sector);
        lba.saturating_sub(1) * u64::from(self.sector_size)
    }
}

/// Reasons an image can fail to attach.
#[derive(Debug)]
pub enum ImageError {
    /// The file size does not divide into whole tracks of the given shape.
    BadGeometry {
        size: u64,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
    },
    /// The underlying store could not be sized.
    Io(io::Error),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadGeometry {
                size,
                sector_size,
                sectors_per_track,
                heads,
            } => write!(
                f,
                "image size {size} does not divide into whole tracks of \
                 {sector_size}x{sectors_per_track}x{heads} bytes",
            ),
            Self::Io(e) => write!(f, "image store error: {e}"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadGeometry { .. } => None,
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_unaligned_size() {
        // 40 tracks and a bit.
        let err = DiskGeometry::from_image_size(40 * 10 * 512 + 7, 512, 10, 1);
        assert!(err.is_err());
    }

    #[test]
    fn reject_empty_image() {
        assert!(DiskGeometry::from_image_size(0, 512, 10, 1).is_err());
    }

    #[test]
    fn derive_track_count() {
        let geom = DiskGeometry::from_image_size(40 * 2 * 10 * 512, 512, 10, 2).expect("valid");
        assert_eq!(geom.tracks, 40);
    }

    #[test]
    fn sector_offset_layout() {
        let geom = DiskGeometry::from_image_size(80 * 2 * 10 * 512, 512, 10, 2).expect("valid");
        // First sector of the image.
        assert_eq!(geom.sector_offset(0, 0, 1), 0);
        // Second sector of the same track.
        assert_eq!(geom.sector_offset(0, 0, 2), 512);
        // Head 1 starts one track of sectors in.
        assert_eq!(geom.sector_offset(0, 1, 1), 10 * 512);
        // Cylinder 1 starts after both heads of cylinder 0.
        assert_eq!(geom.sector_offset(1, 0, 1), 2 * 10 * 512);
    }

    #[test]
    fn vec_store_round_trip() {
        let mut store = vec![0u8; 1024];
        store.write_at(512, &[0xAA, 0xBB]).expect("in range");
        let mut buf = [0u8; 2];
        store.read_at(512, &mut buf).expect("in range");
        assert_eq!(buf, [0xAA, 0xBB]);
    }

    #[test]
    fn vec_store_rejects_out_of_range() {
        let mut store = vec![0u8; 16];
        let mut buf = [0u8; 8];
        assert!(store.read_at(12, &mut buf).is_err());
        assert!(store.write_at(12, &buf).is_err());
    }
}
