//! On-disk ext2/3/4 structures as consumed by the reader (spec §3).
//! Parsed by hand with explicit offsets rather than `repr(C)` casts so
//! byte layout never depends on compiler struct-packing rules.

use byteorder::{ByteOrder, LittleEndian};
use vorteil_core::error::{Result, VorteilError};

use super::constants::*;

#[derive(Debug, Clone)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub blocks_count_hi: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub inode_size: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
}

impl Superblock {
    pub const ON_DISK_SIZE: usize = 1024;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 264 {
            return Err(VorteilError::BadImage("superblock truncated".into()));
        }
        let magic = LittleEndian::read_u16(&buf[0x38..0x3A]);
        if magic != EXT4_SUPER_MAGIC {
            return Err(VorteilError::BadImage(format!("bad ext superblock magic: {magic:#x}")));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[0x68..0x78]);
        let mut volume_name = [0u8; 16];
        volume_name.copy_from_slice(&buf[0x78..0x88]);

        let inode_size_raw = LittleEndian::read_u16(&buf[0x58..0x5A]);
        let rev_level = LittleEndian::read_u32(&buf[0x4C..0x50]);
        let inode_size = if rev_level == 0 { INODE_SIZE_DEFAULT as u16 } else { inode_size_raw };

        Ok(Self {
            inodes_count: LittleEndian::read_u32(&buf[0x00..0x04]),
            blocks_count_lo: LittleEndian::read_u32(&buf[0x04..0x08]),
            blocks_count_hi: LittleEndian::read_u32(&buf[0x150..0x154]),
            first_data_block: LittleEndian::read_u32(&buf[0x14..0x18]),
            log_block_size: LittleEndian::read_u32(&buf[0x18..0x1C]),
            blocks_per_group: LittleEndian::read_u32(&buf[0x20..0x24]),
            inodes_per_group: LittleEndian::read_u32(&buf[0x28..0x2C]),
            magic,
            inode_size,
            feature_compat: LittleEndian::read_u32(&buf[0x5C..0x60]),
            feature_incompat: LittleEndian::read_u32(&buf[0x60..0x64]),
            feature_ro_compat: LittleEndian::read_u32(&buf[0x64..0x68]),
            uuid,
            volume_name,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::ON_DISK_SIZE);
        LittleEndian::write_u32(&mut buf[0x00..0x04], self.inodes_count);
        LittleEndian::write_u32(&mut buf[0x04..0x08], self.blocks_count_lo);
        LittleEndian::write_u32(&mut buf[0x150..0x154], self.blocks_count_hi);
        LittleEndian::write_u32(&mut buf[0x14..0x18], self.first_data_block);
        LittleEndian::write_u32(&mut buf[0x18..0x1C], self.log_block_size);
        LittleEndian::write_u32(&mut buf[0x20..0x24], self.blocks_per_group);
        LittleEndian::write_u32(&mut buf[0x28..0x2C], self.inodes_per_group);
        LittleEndian::write_u16(&mut buf[0x38..0x3A], self.magic);
        LittleEndian::write_u32(&mut buf[0x4C..0x50], 1); // dynamic rev
        LittleEndian::write_u16(&mut buf[0x58..0x5A], self.inode_size);
        LittleEndian::write_u32(&mut buf[0x5C..0x60], self.feature_compat);
        LittleEndian::write_u32(&mut buf[0x60..0x64], self.feature_incompat);
        LittleEndian::write_u32(&mut buf[0x64..0x68], self.feature_ro_compat);
        buf[0x68..0x78].copy_from_slice(&self.uuid);
        buf[0x78..0x88].copy_from_slice(&self.volume_name);
    }

    pub fn block_size(&self) -> u32 {
        block_size_from_log(self.log_block_size)
    }

    pub fn blocks_count(&self) -> u64 {
        (self.blocks_count_lo as u64) | ((self.blocks_count_hi as u64) << 32)
    }

    pub fn num_groups(&self) -> u64 {
        self.blocks_count().div_ceil(self.blocks_per_group as u64)
    }

    /// Block holding the first group descriptor: the block after the
    /// superblock's own block (spec §3).
    pub fn group_desc_table_block(&self) -> u64 {
        if self.log_block_size == 0 {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    pub const ON_DISK_SIZE: usize = GROUP_DESC_SIZE as usize;

    pub fn parse(buf: &[u8]) -> Self {
        Self {
            block_bitmap: LittleEndian::read_u32(&buf[0..4]),
            inode_bitmap: LittleEndian::read_u32(&buf[4..8]),
            inode_table: LittleEndian::read_u32(&buf[8..12]),
            free_blocks_count: LittleEndian::read_u16(&buf[12..14]),
            free_inodes_count: LittleEndian::read_u16(&buf[14..16]),
            used_dirs_count: LittleEndian::read_u16(&buf[16..18]),
        }
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.block_bitmap);
        LittleEndian::write_u32(&mut buf[4..8], self.inode_bitmap);
        LittleEndian::write_u32(&mut buf[8..12], self.inode_table);
        LittleEndian::write_u16(&mut buf[12..14], self.free_blocks_count);
        LittleEndian::write_u16(&mut buf[14..16], self.free_inodes_count);
        LittleEndian::write_u16(&mut buf[16..18], self.used_dirs_count);
    }
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size_lo: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub sectors: u32,
    pub flags: u32,
    /// 12 direct pointers + single/double/triple indirect, or (for
    /// extents/fast-symlinks) the raw reinterpreted byte region.
    pub block: [u32; 15],
    pub generation: u32,
    pub file_acl: u32,
    pub size_high: u32,
}

impl Inode {
    pub const ON_DISK_SIZE: usize = 128;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ON_DISK_SIZE {
            return Err(VorteilError::BadImage("inode record truncated".into()));
        }
        let mut block = [0u32; 15];
        for i in 0..15 {
            block[i] = LittleEndian::read_u32(&buf[40 + i * 4..44 + i * 4]);
        }
        Ok(Self {
            mode: LittleEndian::read_u16(&buf[0..2]),
            uid: LittleEndian::read_u16(&buf[2..4]),
            size_lo: LittleEndian::read_u32(&buf[4..8]),
            atime: LittleEndian::read_u32(&buf[8..12]),
            ctime: LittleEndian::read_u32(&buf[12..16]),
            mtime: LittleEndian::read_u32(&buf[16..20]),
            dtime: LittleEndian::read_u32(&buf[20..24]),
            gid: LittleEndian::read_u16(&buf[24..26]),
            links_count: LittleEndian::read_u16(&buf[26..28]),
            sectors: LittleEndian::read_u32(&buf[28..32]),
            flags: LittleEndian::read_u32(&buf[32..36]),
            block,
            generation: LittleEndian::read_u32(&buf[100..104]),
            file_acl: LittleEndian::read_u32(&buf[104..108]),
            size_high: LittleEndian::read_u32(&buf[108..112]),
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::ON_DISK_SIZE);
        LittleEndian::write_u16(&mut buf[0..2], self.mode);
        LittleEndian::write_u16(&mut buf[2..4], self.uid);
        LittleEndian::write_u32(&mut buf[4..8], self.size_lo);
        LittleEndian::write_u32(&mut buf[8..12], self.atime);
        LittleEndian::write_u32(&mut buf[12..16], self.ctime);
        LittleEndian::write_u32(&mut buf[16..20], self.mtime);
        LittleEndian::write_u32(&mut buf[20..24], self.dtime);
        LittleEndian::write_u16(&mut buf[24..26], self.gid);
        LittleEndian::write_u16(&mut buf[26..28], self.links_count);
        LittleEndian::write_u32(&mut buf[28..32], self.sectors);
        LittleEndian::write_u32(&mut buf[32..36], self.flags);
        for i in 0..15 {
            LittleEndian::write_u32(&mut buf[40 + i * 4..44 + i * 4], self.block[i]);
        }
        LittleEndian::write_u32(&mut buf[100..104], self.generation);
        LittleEndian::write_u32(&mut buf[104..108], self.file_acl);
        LittleEndian::write_u32(&mut buf[108..112], self.size_high);
    }

    pub fn full_size(&self) -> u64 {
        (self.size_lo as u64) | ((self.size_high as u64) << 32)
    }

    pub fn file_type(&self) -> FileType {
        match self.mode & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::Other,
        }
    }

    pub fn permissions(&self) -> u16 {
        self.mode & 0o7777
    }

    /// Renders `"drwxrwxrwx"`-style permission string (spec §4.4).
    pub fn permissions_string(&self) -> String {
        let kind = match self.file_type() {
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            _ => '-',
        };
        let perm = self.permissions();
        let mut s = String::with_capacity(10);
        s.push(kind);
        for shift in [6, 3, 0] {
            let bits = (perm >> shift) & 0b111;
            s.push(if bits & 0b100 != 0 { 'r' } else { '-' });
            s.push(if bits & 0b010 != 0 { 'w' } else { '-' });
            s.push(if bits & 0b001 != 0 { 'x' } else { '-' });
        }
        s
    }

    pub fn uses_extents(&self) -> bool {
        self.flags & INODE_FLAG_EXTENTS != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone)]
pub struct ExtentHeader {
    pub magic: u16,
    pub entries: u16,
    pub max: u16,
    pub depth: u16,
    pub generation: u32,
}

impl ExtentHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let magic = LittleEndian::read_u16(&buf[0..2]);
        if magic != EXT4_EXTENT_MAGIC {
            return Err(VorteilError::BadImage(format!("bad extent header magic: {magic:#x}")));
        }
        Ok(Self {
            magic,
            entries: LittleEndian::read_u16(&buf[2..4]),
            max: LittleEndian::read_u16(&buf[4..6]),
            depth: LittleEndian::read_u16(&buf[6..8]),
            generation: LittleEndian::read_u32(&buf[8..12]),
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u16(&mut buf[0..2], self.magic);
        LittleEndian::write_u16(&mut buf[2..4], self.entries);
        LittleEndian::write_u16(&mut buf[4..6], self.max);
        LittleEndian::write_u16(&mut buf[6..8], self.depth);
        LittleEndian::write_u32(&mut buf[8..12], self.generation);
    }
}

/// Leaf entry (depth 0): a run of `len` contiguous physical blocks
/// starting at `lo|hi<<32` mapping to consecutive logical blocks from
/// `block` (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub block: u32,
    pub len: u16,
    pub hi: u16,
    pub lo: u32,
}

impl Extent {
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            block: LittleEndian::read_u32(&buf[0..4]),
            len: LittleEndian::read_u16(&buf[4..6]),
            hi: LittleEndian::read_u16(&buf[6..8]),
            lo: LittleEndian::read_u32(&buf[8..12]),
        }
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.block);
        LittleEndian::write_u16(&mut buf[4..6], self.len);
        LittleEndian::write_u16(&mut buf[6..8], self.hi);
        LittleEndian::write_u32(&mut buf[8..12], self.lo);
    }

    pub fn physical_start(&self) -> u64 {
        (self.lo as u64) | ((self.hi as u64) << 32)
    }
}

/// Internal node entry (depth > 0): points at a child extent-tree node.
#[derive(Debug, Clone, Copy)]
pub struct ExtentIdx {
    pub block: u32,
    pub leaf_lo: u32,
    pub leaf_hi: u16,
}

impl ExtentIdx {
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            block: LittleEndian::read_u32(&buf[0..4]),
            leaf_lo: LittleEndian::read_u32(&buf[4..8]),
            leaf_hi: LittleEndian::read_u16(&buf[8..10]),
        }
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.block);
        LittleEndian::write_u32(&mut buf[4..8], self.leaf_lo);
        LittleEndian::write_u16(&mut buf[8..10], self.leaf_hi);
    }

    pub fn child_block(&self) -> u64 {
        (self.leaf_lo as u64) | ((self.leaf_hi as u64) << 32)
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub inode: u32,
    pub record_length: u16,
    pub name_length: u8,
    pub file_type: u8,
    pub name: String,
}

impl DirEntry {
    /// Parses one directory record at the start of `buf`, returning the
    /// entry and the number of bytes consumed (`record_length`, which is
    /// authoritative for advancing — §4.4).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 8 {
            return Err(VorteilError::BadImage("directory record truncated".into()));
        }
        let inode = LittleEndian::read_u32(&buf[0..4]);
        let record_length = LittleEndian::read_u16(&buf[4..6]);
        let name_length = buf[6];
        let file_type = buf[7];
        let name_end = 8 + name_length as usize;
        let name = if name_end <= buf.len() {
            String::from_utf8_lossy(&buf[8..name_end]).to_string()
        } else {
            String::new()
        };
        let advance = if record_length == 0 { buf.len() } else { record_length as usize };
        Ok((Self { inode, record_length, name_length, file_type, name }, advance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_permissions_string_for_regular_file() {
        let mut inode = zero_inode();
        inode.mode = S_IFREG | 0o644;
        assert_eq!(inode.permissions_string(), "-rw-r--r--");
    }

    #[test]
    fn inode_permissions_string_for_directory() {
        let mut inode = zero_inode();
        inode.mode = S_IFDIR | 0o755;
        assert_eq!(inode.permissions_string(), "drwxr-xr-x");
    }

    #[test]
    fn inode_round_trips_through_bytes() {
        let mut inode = zero_inode();
        inode.mode = S_IFREG | 0o600;
        inode.size_lo = 12345;
        inode.block[0] = 99;
        let mut buf = [0u8; Inode::ON_DISK_SIZE];
        inode.serialize_into(&mut buf);
        let parsed = Inode::parse(&buf).unwrap();
        assert_eq!(parsed.size_lo, 12345);
        assert_eq!(parsed.block[0], 99);
    }

    fn zero_inode() -> Inode {
        Inode {
            mode: 0,
            uid: 0,
            size_lo: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            dtime: 0,
            gid: 0,
            links_count: 0,
            sectors: 0,
            flags: 0,
            block: [0; 15],
            generation: 0,
            file_acl: 0,
            size_high: 0,
        }
    }
}
