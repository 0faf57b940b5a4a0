//! Sparse output format wrappers (spec §4.6 "Sparse/stream-optimized
//! wrappers"). Not part of the builder's core contract — these consume
//! `RegionIsHole` and `Size` from an already-`prebuild`-ed
//! [`crate::builder::ImageBuilder`] to emit a compact file instead of a
//! fully-written raw image.

use std::io::{self, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use vorteil_core::error::{Result, VorteilError};

use crate::binaryio::BinaryWriter;
use crate::vmdk::SECTOR_SIZE;

pub const GRAIN_SECTORS: u64 = 128; // 64 KiB grains, matching the reader (spec glossary).
const GTES_PER_GT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    VmdkSparse,
    VmdkStreamOptimized,
}

/// Wraps `inner` for the requested `format`. `region_is_hole` must
/// match the builder's predicate exactly (spec: "must be monotonic and
/// consistent with what `build` actually writes").
pub fn wrap_output<W, F>(
    format: OutputFormat,
    inner: W,
    total_size: u64,
    region_is_hole: F,
) -> Result<BinaryWriter>
where
    W: Write + Seek + 'static,
    F: FnMut(u64, u64) -> bool + 'static,
{
    match format {
        OutputFormat::Raw => Ok(BinaryWriter::seekable(inner)),
        OutputFormat::VmdkSparse => {
            let sparse = VmdkSparseWriter::new(inner, total_size, region_is_hole)?;
            Ok(BinaryWriter::forward_only(sparse))
        }
        OutputFormat::VmdkStreamOptimized => Err(VorteilError::UnsupportedFormat(
            "VMDK stream-optimized output is not implemented".into(),
        )),
    }
}

/// Writes a VMDK version-1 sparse extent. The grain layout (which
/// grains are holes, and the physical sector of every non-hole grain)
/// is fixed entirely up front from `region_is_hole`, since that
/// predicate is valid as soon as `prebuild` has run — by the time any
/// image bytes arrive, every grain's destination is already decided.
pub struct VmdkSparseWriter<W> {
    inner: W,
    grain_bytes: u64,
    /// Physical sector for each grain, or 0 for a hole.
    grain_physical_sector: Vec<u64>,
    logical_position: u64,
}

impl<W: Write + Seek> VmdkSparseWriter<W> {
    pub fn new<F>(mut inner: W, total_size: u64, mut region_is_hole: F) -> Result<Self>
    where
        F: FnMut(u64, u64) -> bool,
    {
        let grain_bytes = GRAIN_SECTORS * SECTOR_SIZE;
        let num_grains = total_size.div_ceil(grain_bytes);
        let num_gts = num_grains.div_ceil(GTES_PER_GT);

        let header_sectors = 1u64;
        let gd_sectors = num_gts.div_ceil(SECTOR_SIZE / 4);
        let gt_sectors = num_gts * (GTES_PER_GT * 4).div_ceil(SECTOR_SIZE);

        let gd_start = header_sectors;
        let gt_start = gd_start + gd_sectors;
        let mut next_data_sector = gt_start + gt_sectors;

        let mut grain_physical_sector = vec![0u64; num_grains as usize];
        for grain in 0..num_grains {
            let offset = grain * grain_bytes;
            let size = grain_bytes.min(total_size - offset);
            if !region_is_hole(offset, size) {
                grain_physical_sector[grain as usize] = next_data_sector;
                next_data_sector += GRAIN_SECTORS;
            }
        }

        let mut header = [0u8; 512];
        LittleEndian::write_u32(&mut header[0..4], crate::vmdk::VMDK_MAGIC);
        LittleEndian::write_u32(&mut header[4..8], 1); // version
        LittleEndian::write_u64(&mut header[16..24], total_size / SECTOR_SIZE);
        LittleEndian::write_u64(&mut header[24..32], GRAIN_SECTORS);
        LittleEndian::write_u32(&mut header[48..52], GTES_PER_GT as u32);
        LittleEndian::write_u64(&mut header[56..64], gd_start);
        inner.seek(SeekFrom::Start(0))?;
        inner.write_all(&header)?;

        let mut gt_table_sectors = Vec::with_capacity(num_gts as usize);
        let gt_sectors_per_table = (GTES_PER_GT * 4).div_ceil(SECTOR_SIZE);
        for i in 0..num_gts {
            gt_table_sectors.push(gt_start + i * gt_sectors_per_table);
        }

        let mut gd_buf = vec![0u8; (gd_sectors * SECTOR_SIZE) as usize];
        for (i, &sector) in gt_table_sectors.iter().enumerate() {
            LittleEndian::write_u32(&mut gd_buf[i * 4..i * 4 + 4], sector as u32);
        }
        inner.seek(SeekFrom::Start(gd_start * SECTOR_SIZE))?;
        inner.write_all(&gd_buf)?;

        let mut gt_buf = vec![0u8; (gt_sectors * SECTOR_SIZE) as usize];
        for (grain, &sector) in grain_physical_sector.iter().enumerate() {
            LittleEndian::write_u32(&mut gt_buf[grain * 4..grain * 4 + 4], sector as u32);
        }
        inner.seek(SeekFrom::Start(gt_start * SECTOR_SIZE))?;
        inner.write_all(&gt_buf)?;

        Ok(Self { inner, grain_bytes, grain_physical_sector, logical_position: 0 })
    }
}

impl<W: Write + Seek> Write for VmdkSparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut consumed = 0usize;
        while consumed < buf.len() {
            let pos = self.logical_position;
            let grain_index = (pos / self.grain_bytes) as usize;
            let grain_offset = pos % self.grain_bytes;
            let take = ((self.grain_bytes - grain_offset) as usize).min(buf.len() - consumed);

            let physical_sector = self.grain_physical_sector.get(grain_index).copied().unwrap_or(0);
            if physical_sector != 0 {
                let phys_offset = physical_sector * SECTOR_SIZE + grain_offset;
                self.inner.seek(SeekFrom::Start(phys_offset))?;
                self.inner.write_all(&buf[consumed..consumed + take])?;
            }
            consumed += take;
            self.logical_position += take as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn hole_grains_are_never_written_to_disk() {
        let grain_bytes = GRAIN_SECTORS * SECTOR_SIZE;
        let total_size = grain_bytes * 4;
        let cursor = Cursor::new(Vec::new());
        let mut writer = VmdkSparseWriter::new(cursor, total_size, |offset, _| offset == grain_bytes).unwrap();

        for i in 0..4u64 {
            let chunk = if i == 1 { vec![0u8; grain_bytes as usize] } else { vec![(i + 1) as u8; grain_bytes as usize] };
            writer.write_all(&chunk).unwrap();
        }

        assert_eq!(writer.grain_physical_sector[1], 0);
        assert_ne!(writer.grain_physical_sector[0], 0);
        assert_ne!(writer.grain_physical_sector[2], 0);
    }

    #[test]
    fn raw_format_passes_through() {
        let cursor = Cursor::new(Vec::new());
        let mut writer = wrap_output(OutputFormat::Raw, cursor, 1024, |_, _| false).unwrap();
        writer.write_all(b"hello").unwrap();
        assert_eq!(writer.position(), 5);
    }
}
