//! VMDK sparse-extent layer (spec §4.2). Read-only: translates virtual
//! LBAs to on-disk grain offsets via the grain directory/tables for
//! version 1 ("sparse"). Version 3 ("stream-optimized") is recognized
//! but reads are refused per spec Non-goals.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use vorteil_core::error::{Result, VorteilError};

pub const VMDK_MAGIC: u32 = 0x564D444B; // "KDMV" little-endian on disk
pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone)]
pub struct VmdkHeader {
    pub version: u32,
    pub capacity: u64,
    pub grain_size: u64,
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
    pub num_gtes_per_gt: u32,
    pub gd_offset: u64,
}

impl VmdkHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 512 {
            return Err(VorteilError::BadImage("VMDK header truncated".into()));
        }
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != VMDK_MAGIC {
            return Err(VorteilError::BadImage(format!("bad VMDK magic: {magic:#x}")));
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        let capacity = LittleEndian::read_u64(&buf[16..24]);
        let grain_size = LittleEndian::read_u64(&buf[24..32]);
        let descriptor_offset = LittleEndian::read_u64(&buf[32..40]);
        let descriptor_size = LittleEndian::read_u64(&buf[40..48]);
        let num_gtes_per_gt = LittleEndian::read_u32(&buf[48..52]);
        let gd_offset = LittleEndian::read_u64(&buf[56..64]);
        Ok(Self {
            version,
            capacity,
            grain_size,
            descriptor_offset,
            descriptor_size,
            num_gtes_per_gt,
            gd_offset,
        })
    }

    pub fn is_magic(buf: &[u8]) -> bool {
        buf.len() >= 4 && LittleEndian::read_u32(&buf[0..4]) == VMDK_MAGIC
    }
}

/// A random-access reader over a VMDK version-1 ("sparse") image,
/// presenting a flat virtual byte stream of length `capacity * 512`.
#[derive(Debug)]
pub struct VmdkSparseReader<R> {
    inner: R,
    header: VmdkHeader,
    /// Flattened grain table: physical sector for each grain index, or 0
    /// for a hole.
    grains: Vec<u64>,
    position: u64,
}

impl<R: Read + Seek> VmdkSparseReader<R> {
    pub fn open(mut inner: R) -> Result<Self> {
        let mut header_buf = [0u8; 512];
        inner.seek(SeekFrom::Start(0))?;
        inner.read_exact(&mut header_buf)?;
        let header = VmdkHeader::parse(&header_buf)?;
        match header.version {
            1 => {}
            3 => return Err(VorteilError::UnsupportedFormat("VMDK stream-optimized (version 3) reads are not supported".into())),
            other => return Err(VorteilError::UnsupportedFormat(format!("unsupported VMDK version: {other}"))),
        }

        let grain_bytes = header.grain_size * SECTOR_SIZE;
        let total_grains = header.capacity.div_ceil(header.grain_size) as usize;
        let gtes_per_gt = header.num_gtes_per_gt as usize;
        let num_gts = total_grains.div_ceil(gtes_per_gt.max(1));

        inner.seek(SeekFrom::Start(header.gd_offset * SECTOR_SIZE))?;
        let mut gd_buf = vec![0u8; num_gts * 4];
        inner.read_exact(&mut gd_buf)?;
        let gt_offsets: Vec<u32> = gd_buf.chunks_exact(4).map(LittleEndian::read_u32).collect();

        let mut grains = Vec::with_capacity(total_grains);
        for gt_sector in gt_offsets {
            if gt_sector == 0 {
                grains.extend(std::iter::repeat(0u64).take(gtes_per_gt));
                continue;
            }
            inner.seek(SeekFrom::Start(gt_sector as u64 * SECTOR_SIZE))?;
            let mut gt_buf = vec![0u8; gtes_per_gt * 4];
            inner.read_exact(&mut gt_buf)?;
            grains.extend(gt_buf.chunks_exact(4).map(|c| LittleEndian::read_u32(c) as u64));
        }
        grains.truncate(total_grains);
        let _ = grain_bytes;

        Ok(Self { inner, header, grains, position: 0 })
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.header.capacity * SECTOR_SIZE
    }

    fn grain_bytes(&self) -> u64 {
        self.header.grain_size * SECTOR_SIZE
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.capacity_bytes() {
            return Err(VorteilError::RegionOutOfBounds { offset, offset_plus_len: offset });
        }
        self.position = offset;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let grain_bytes = self.grain_bytes();
        let mut done = 0usize;
        while done < buf.len() {
            let virt = self.position;
            let grain_index = (virt / grain_bytes) as usize;
            let remainder = virt % grain_bytes;
            let take = ((grain_bytes - remainder) as usize).min(buf.len() - done);

            let physical_sector = self.grains.get(grain_index).copied().unwrap_or(0);
            if physical_sector == 0 {
                buf[done..done + take].fill(0);
            } else {
                let phys_offset = physical_sector * SECTOR_SIZE + remainder;
                self.inner.seek(SeekFrom::Start(phys_offset))?;
                self.inner.read_exact(&mut buf[done..done + take])?;
            }
            done += take;
            self.position += take as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn build_test_vmdk(grain_sectors: u64, grains: &[Option<&[u8]>]) -> Vec<u8> {
        // Single grain table covering all grains; one-level grain directory.
        let num_grains = grains.len() as u64;
        let capacity = num_grains * grain_sectors;
        let gt_sector: u64 = 10;
        let gd_sector: u64 = 9;
        let mut data_sector = gt_sector + (grains.len() as u64 * 4).div_ceil(512).max(1);

        let mut gt_entries = vec![0u32; grains.len()];
        let mut data_blocks: Vec<(u64, Vec<u8>)> = Vec::new();
        for (i, g) in grains.iter().enumerate() {
            if let Some(content) = g {
                gt_entries[i] = data_sector as u32;
                let mut block = vec![0u8; (grain_sectors * 512) as usize];
                block[..content.len()].copy_from_slice(content);
                data_blocks.push((data_sector, block));
                data_sector += grain_sectors;
            }
        }

        let total_size = (data_sector * 512) as usize;
        let mut disk = vec![0u8; total_size.max(512 * 64)];

        LittleEndian::write_u32(&mut disk[0..4], VMDK_MAGIC);
        LittleEndian::write_u32(&mut disk[4..8], 1); // version
        LittleEndian::write_u64(&mut disk[16..24], capacity);
        LittleEndian::write_u64(&mut disk[24..32], grain_sectors);
        LittleEndian::write_u32(&mut disk[48..52], 512); // num_gtes_per_gt
        LittleEndian::write_u64(&mut disk[56..64], gd_sector);

        let gd_off = (gd_sector * 512) as usize;
        LittleEndian::write_u32(&mut disk[gd_off..gd_off + 4], gt_sector as u32);

        let gt_off = (gt_sector * 512) as usize;
        for (i, e) in gt_entries.iter().enumerate() {
            LittleEndian::write_u32(&mut disk[gt_off + i * 4..gt_off + i * 4 + 4], *e);
        }

        for (sector, block) in data_blocks {
            let off = (sector * 512) as usize;
            (&mut disk[off..off + block.len()]).write_all(&block).unwrap();
        }

        disk
    }

    #[test]
    fn reads_grain_and_hole() {
        let disk = build_test_vmdk(128, &[Some(b"hello world"), None]);
        let mut reader = VmdkSparseReader::open(Cursor::new(disk)).unwrap();
        let mut buf = [0u8; 11];
        reader.seek_to(0).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello world");

        let grain_bytes = 128 * 512;
        reader.seek_to(grain_bytes).unwrap();
        let mut hole_buf = [1u8; 16];
        reader.read_exact(&mut hole_buf).unwrap();
        assert_eq!(hole_buf, [0u8; 16]);
    }

    #[test]
    fn rejects_stream_optimized_version() {
        let mut disk = build_test_vmdk(128, &[Some(b"x")]);
        LittleEndian::write_u32(&mut disk[4..8], 3);
        let err = VmdkSparseReader::open(Cursor::new(disk)).unwrap_err();
        assert!(matches!(err, VorteilError::UnsupportedFormat(_)));
    }
}
