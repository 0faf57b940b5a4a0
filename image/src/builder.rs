//! Three-phase streaming image builder (spec §4.6, §9).
//!
//! `ImageBuilder::new` validates inputs and computes the minimum image
//! size; `prebuild(size)` fixes the final geometry and GPT bytes;
//! `build(writer)` streams the whole disk without ever seeking
//! backwards. Each phase is single-shot and depends on the one before.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use uuid::Uuid;
use vorteil_core::cancel::CancellationToken;
use vorteil_core::config::AppConfig;
use vorteil_core::error::{Result, VorteilError};
use vorteil_core::fscompiler::FsCompiler;
use vorteil_core::linuxargs::build_linux_args;

use crate::binaryio::BinaryWriter;
use crate::bootconfig::BootloaderConfig;
use crate::gpt::{
    self, build_entries_region, build_protective_mbr, GptEntry, GptHeader, ENTRIES_SECTORS,
    FIRST_USABLE_LBA, GPT_SIGNATURE, OS_PARTITION_NAME, ROOT_PARTITION_GUID, ROOT_PARTITION_NAME,
    ROOT_TYPE_GUID, SECTOR_SIZE,
};
use crate::kernel_bundle::{KernelBundle, KernelFileSpec};

const BASE_SECTORS: u64 = 3 + 2 * 32; // MBR + 2 headers + 2 entry arrays
/// Sectors reserved at the start of the OS partition for the
/// [`BootloaderConfig`] record, before the kernel payload begins.
/// Shared with [`crate::vdecompiler`], which must locate the payload
/// using the same constant the builder used to lay it out.
pub const OS_HEADER_SECTORS: u64 = 32;
const OS_TRAILER_SECTORS: u64 = 32; // reserved slack
const PRIMARY_HEADER_LBA: u64 = 1;
const PRIMARY_ENTRIES_LBA: u64 = 2;
const BACKUP_ENTRIES_SECTORS: u64 = ENTRIES_SECTORS;

fn sectors_for(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Geometry fixed once at `prebuild` time.
#[derive(Debug, Clone)]
struct Layout {
    total_sectors: u64,
    os_first_lba: u64,
    os_sectors: u64,
    os_last_lba: u64,
    root_first_lba: u64,
    root_last_lba: u64,
    backup_entries_lba: u64,
    backup_header_lba: u64,
    config_offset: u64, // relative to OS partition start
    config_len: u64,
    config_capacity: u64,
    kernel_payload_len: u64,
}

pub struct ImageBuilder<F: FsCompiler> {
    fs: F,
    config: AppConfig,
    seed: u64,
    disk_guid: [u8; 16],
    os_partition_guid: [u8; 16],
    bundle: KernelBundle,
    minimum_size: u64,
    layout: Option<Layout>,
    entries_region: Option<([u8; crate::gpt::ENTRIES_TABLE_BYTES], u32)>,
}

fn v4_guid_from_rng(rng: &mut StdRng) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    bytes
}

fn derive_kernel_tags(config: &AppConfig) -> HashSet<String> {
    let mut tags = HashSet::new();
    if config.vm.shell {
        tags.insert("shell".to_string());
    }
    if config.vm.ntp.is_some() {
        tags.insert("ntp".to_string());
    }
    if config.programs.iter().any(|p| !p.logs.is_empty()) {
        tags.insert("logs".to_string());
    }
    if config.programs.iter().any(|p| p.strace) {
        tags.insert("strace".to_string());
    }
    if config.network.iter().any(|n| n.tcpdump) {
        tags.insert("tcpdump".to_string());
    }
    tags
}

impl<F: FsCompiler> ImageBuilder<F> {
    /// Validates `config`, loads the kernel bundle filtered by the tags
    /// it implies, and precomputes the minimum image size. Returns the
    /// constructed builder; call [`Self::minimum_size`] to read the
    /// result (spec §4.6 step 1).
    pub fn new(
        seed: u64,
        kernel_files: &[KernelFileSpec],
        mut fs: F,
        mut config: AppConfig,
        token: &CancellationToken,
    ) -> Result<Self> {
        token.check()?;
        config.apply_defaults();
        config.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let disk_guid = v4_guid_from_rng(&mut rng);
        let os_partition_guid = v4_guid_from_rng(&mut rng);

        let tags = derive_kernel_tags(&config);
        let bundle = KernelBundle::build(kernel_files, &tags)?;

        if let Some(inodes) = config.system.inodes {
            fs.set_minimum_inodes(inodes);
        } else {
            fs.set_minimum_inodes_per_64mib(1024);
        }
        if config.vm.shell {
            fs.increase_minimum_inodes(2000);
        }
        if let Some(delta) = config.system.disk_size_delta {
            fs.increase_minimum_free_space(delta);
        }
        fs.commit(token)?;

        let root_minimum = fs.minimum_size()?;
        let config_bytes = config.to_json_bytes()?;
        let os_sectors = OS_HEADER_SECTORS
            + sectors_for(bundle.payload_size())
            + sectors_for(config_bytes.len() as u64)
            + OS_TRAILER_SECTORS;

        let minimum_size = BASE_SECTORS * SECTOR_SIZE + os_sectors * SECTOR_SIZE + root_minimum;

        Ok(Self {
            fs,
            config,
            seed,
            disk_guid,
            os_partition_guid,
            bundle,
            minimum_size,
            layout: None,
            entries_region: None,
        })
    }

    pub fn minimum_size(&self) -> u64 {
        self.minimum_size
    }

    /// Fixes the final on-disk layout for a chosen total `size` (spec
    /// §4.6 step 2).
    pub fn prebuild(&mut self, size: u64, token: &CancellationToken) -> Result<()> {
        token.check()?;
        if size % SECTOR_SIZE != 0 {
            return Err(VorteilError::UnalignedSize { size });
        }
        if size < self.minimum_size {
            return Err(VorteilError::SizeTooSmall { requested: size, minimum: self.minimum_size });
        }

        let total_sectors = size / SECTOR_SIZE;
        let os_first_lba = FIRST_USABLE_LBA;
        let config_bytes_len = self.config.to_json_bytes()?.len() as u64;
        let os_sectors = OS_HEADER_SECTORS
            + sectors_for(self.bundle.payload_size())
            + sectors_for(config_bytes_len)
            + OS_TRAILER_SECTORS;
        let os_last_lba = os_first_lba + os_sectors - 1;
        let root_first_lba = os_last_lba + 1;

        let backup_header_lba = total_sectors - 1;
        let backup_entries_lba = backup_header_lba - BACKUP_ENTRIES_SECTORS;
        let last_usable_lba = backup_entries_lba - 1;
        let root_last_lba = last_usable_lba;

        if root_last_lba < root_first_lba {
            return Err(VorteilError::SizeTooSmall { requested: size, minimum: self.minimum_size });
        }

        let config_offset = (OS_HEADER_SECTORS + sectors_for(self.bundle.payload_size())) * SECTOR_SIZE;
        let config_capacity = sectors_for(config_bytes_len) * SECTOR_SIZE;

        let root_size_bytes = (root_last_lba - root_first_lba + 1) * SECTOR_SIZE;
        self.fs.precompile(root_size_bytes, token)?;

        let mut os_entry = GptEntry::default();
        os_entry.type_guid = new_type_guid_for_os();
        os_entry.partition_guid = self.os_partition_guid;
        os_entry.first_lba = os_first_lba;
        os_entry.last_lba = os_last_lba;
        os_entry.set_name(OS_PARTITION_NAME);

        let mut root_entry = GptEntry::default();
        root_entry.type_guid = ROOT_TYPE_GUID;
        root_entry.partition_guid = ROOT_PARTITION_GUID;
        root_entry.first_lba = root_first_lba;
        root_entry.last_lba = root_last_lba;
        root_entry.set_name(ROOT_PARTITION_NAME);

        self.entries_region = Some(build_entries_region(&[os_entry, root_entry]));

        self.layout = Some(Layout {
            total_sectors,
            os_first_lba,
            os_sectors,
            os_last_lba,
            root_first_lba,
            root_last_lba,
            backup_entries_lba,
            backup_header_lba,
            config_offset,
            config_len: config_bytes_len,
            config_capacity,
            kernel_payload_len: self.bundle.payload_size(),
        });
        Ok(())
    }

    fn layout(&self) -> Result<&Layout> {
        self.layout.as_ref().ok_or_else(|| VorteilError::Other("prebuild must run before this call".into()))
    }

    fn primary_header(&self) -> Result<GptHeader> {
        let layout = self.layout()?;
        let (_, crc_parts) = self.entries_region.unwrap();
        Ok(GptHeader {
            signature: GPT_SIGNATURE,
            revision: [0, 0, 1, 0],
            header_size: 92,
            header_crc32: 0,
            current_lba: PRIMARY_HEADER_LBA,
            backup_lba: layout.backup_header_lba,
            first_usable_lba: FIRST_USABLE_LBA,
            last_usable_lba: layout.root_last_lba,
            disk_guid: self.disk_guid,
            start_lba_parts: PRIMARY_ENTRIES_LBA,
            num_parts: gpt::ENTRIES_PER_TABLE,
            size_part_entry: gpt::ENTRY_SIZE,
            crc_parts,
        })
    }

    fn backup_header(&self) -> Result<GptHeader> {
        let layout = self.layout()?;
        let (_, crc_parts) = self.entries_region.unwrap();
        Ok(GptHeader {
            signature: GPT_SIGNATURE,
            revision: [0, 0, 1, 0],
            header_size: 92,
            header_crc32: 0,
            current_lba: layout.backup_header_lba,
            backup_lba: PRIMARY_HEADER_LBA,
            first_usable_lba: FIRST_USABLE_LBA,
            last_usable_lba: layout.root_last_lba,
            disk_guid: self.disk_guid,
            start_lba_parts: layout.backup_entries_lba,
            num_parts: gpt::ENTRIES_PER_TABLE,
            size_part_entry: gpt::ENTRY_SIZE,
            crc_parts,
        })
    }

    /// Streams the whole image. Never seeks the writer backwards (spec
    /// §4.6 step 3, §9 "Forward-only streaming").
    pub fn build(&mut self, writer: &mut BinaryWriter, token: &CancellationToken) -> Result<()> {
        let layout = self.layout()?.clone();
        let (entries_bytes, _crc) = self.entries_region.ok_or_else(|| {
            VorteilError::Other("prebuild must run before build".into())
        })?;

        token.check()?;
        let mbr = build_protective_mbr(layout.total_sectors, None);
        writer.write_all(&mbr)?;

        token.check()?;
        let primary_header = self.primary_header()?;
        writer.seek_to(PRIMARY_HEADER_LBA * SECTOR_SIZE)?;
        writer.write_all(&primary_header.to_sector_bytes())?;

        writer.seek_to(PRIMARY_ENTRIES_LBA * SECTOR_SIZE)?;
        writer.write_all(&entries_bytes)?;

        token.check()?;
        self.write_os_partition(writer, &layout, token)?;

        token.check()?;
        writer.seek_to(layout.root_first_lba * SECTOR_SIZE)?;
        self.fs.compile(writer, token)?;

        token.check()?;
        writer.seek_to(layout.backup_entries_lba * SECTOR_SIZE)?;
        writer.write_all(&entries_bytes)?;

        let backup_header = self.backup_header()?;
        writer.seek_to(layout.backup_header_lba * SECTOR_SIZE)?;
        writer.write_all(&backup_header.to_sector_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn write_os_partition(&self, writer: &mut BinaryWriter, layout: &Layout, token: &CancellationToken) -> Result<()> {
        let os_start = layout.os_first_lba * SECTOR_SIZE;
        writer.seek_to(os_start)?;

        let part2_uuid_str = Uuid::from_bytes(gpt_guid_to_uuid_bytes(ROOT_PARTITION_GUID)).to_string();
        let linux_args = build_linux_args(&self.config.system.kernel_args, &part2_uuid_str, "/vorteil/vinitd")?;
        let boot_config = BootloaderConfig::new(
            linux_args,
            layout.config_offset,
            layout.config_len,
            layout.config_capacity,
        )?;
        writer.write_all(&boot_config.to_bytes())?;
        writer.seek_to(os_start + OS_HEADER_SECTORS * SECTOR_SIZE)?;

        token.check()?;
        writer.write_all(&self.bundle.payload)?;

        let config_bytes = self.config.to_json_bytes()?;
        writer.seek_to(os_start + layout.config_offset)?;
        writer.write_all(&config_bytes)?;

        writer.seek_to(os_start + layout.os_sectors * SECTOR_SIZE)?;
        let _ = layout.kernel_payload_len;
        Ok(())
    }

    /// Reports whether `[offset, offset+size)` (absolute, whole-image)
    /// is guaranteed to be all zero in the produced image (spec §4.6
    /// "RegionIsHole", §9 Open Question on the `(first - osFirstLBA)`
    /// correction).
    pub fn region_is_hole(&self, offset: u64, size: u64) -> Result<bool> {
        let layout = self.layout()?;
        let root_start = layout.root_first_lba * SECTOR_SIZE;
        let root_end = (layout.root_last_lba + 1) * SECTOR_SIZE;
        if offset >= root_start && offset + size <= root_end {
            let rel = offset - root_start;
            return Ok(self.fs.region_is_hole(rel, size));
        }

        let os_start = layout.os_first_lba * SECTOR_SIZE;
        let os_end = (layout.os_last_lba + 1) * SECTOR_SIZE;
        let slack_start = os_end - OS_TRAILER_SECTORS * SECTOR_SIZE;
        if offset >= os_start && offset + size <= os_end {
            // Partition-relative offset measured from osFirstLBA, per
            // the Open-Question correction in spec §9 (the source's
            // `(first - osLastLBA)` variant is a bug).
            let _partition_relative = offset - os_start;
            return Ok(offset >= slack_start && offset + size <= os_end);
        }

        Ok(false)
    }

    pub fn kernel_bundle(&self) -> &KernelBundle {
        &self.bundle
    }
}

fn gpt_guid_to_uuid_bytes(guid: [u8; 16]) -> [u8; 16] {
    // GPT GUIDs store the first three fields little-endian; convert to
    // the big-endian byte order `uuid::Uuid` expects for display.
    [
        guid[3], guid[2], guid[1], guid[0], guid[5], guid[4], guid[7], guid[6], guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15],
    ]
}

fn new_type_guid_for_os() -> [u8; 16] {
    // A fixed, recognizable type GUID for the Vorteil OS partition; not
    // specified precisely by spec beyond "freshly generated" — kept
    // stable here so repeated builds with the same seed produce
    // byte-identical images end to end (OS type GUID is not
    // content-sensitive the way the partition GUID is).
    [
        0x4F, 0x53, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;

    struct NullFs {
        committed: bool,
        size: u64,
    }

    impl FsCompiler for NullFs {
        fn mkdir(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn add_file(&mut self, _path: &Path, _contents: &[u8], _mode: u32) -> Result<()> {
            Ok(())
        }
        fn add_symlink(&mut self, _path: &Path, _target: &str) -> Result<()> {
            Ok(())
        }
        fn increase_minimum_free_space(&mut self, _bytes: u64) {}
        fn set_minimum_inodes(&mut self, _inodes: u64) {}
        fn set_minimum_inodes_per_64mib(&mut self, _inodes_per_64mib: u64) {}
        fn increase_minimum_inodes(&mut self, _extra: u64) {}
        fn commit(&mut self, _token: &CancellationToken) -> Result<()> {
            self.committed = true;
            Ok(())
        }
        fn minimum_size(&self) -> Result<u64> {
            Ok(self.size)
        }
        fn precompile(&mut self, size: u64, _token: &CancellationToken) -> Result<()> {
            self.size = size;
            Ok(())
        }
        fn compile(&mut self, writer: &mut dyn Write, _token: &CancellationToken) -> Result<()> {
            let zeros = vec![0u8; self.size as usize];
            writer.write_all(&zeros).map_err(VorteilError::Io)
        }
        fn region_is_hole(&self, _offset: u64, _size: u64) -> bool {
            true
        }
    }

    fn empty_builder() -> ImageBuilder<NullFs> {
        let token = CancellationToken::new();
        let fs = NullFs { committed: false, size: 1024 * 1024 };
        ImageBuilder::new(42, &[], fs, AppConfig::default(), &token).unwrap()
    }

    #[test]
    fn minimum_size_is_sector_aligned() {
        let builder = empty_builder();
        assert_eq!(builder.minimum_size() % SECTOR_SIZE, 0);
    }

    #[test]
    fn prebuild_rejects_unaligned_size() {
        let mut builder = empty_builder();
        let token = CancellationToken::new();
        let err = builder.prebuild(builder.minimum_size() + 1, &token).unwrap_err();
        assert!(matches!(err, VorteilError::UnalignedSize { .. }));
    }

    #[test]
    fn prebuild_rejects_too_small_size() {
        let mut builder = empty_builder();
        let token = CancellationToken::new();
        let min = builder.minimum_size();
        let err = builder.prebuild(min - SECTOR_SIZE, &token).unwrap_err();
        assert!(matches!(err, VorteilError::SizeTooSmall { .. }));
    }

    #[test]
    fn build_writes_exact_size_and_valid_gpt() {
        let mut builder = empty_builder();
        let token = CancellationToken::new();
        let size = builder.minimum_size();
        builder.prebuild(size, &token).unwrap();

        let shared_buf = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        {
            let cursor = ResizingCursor { buf: shared_buf.clone(), position: 0 };
            let mut writer = BinaryWriter::seekable(cursor);
            builder.build(&mut writer, &token).unwrap();
        }
        let buf = shared_buf.borrow().clone();
        assert_eq!(buf.len() as u64, size);

        let mut cursor = std::io::Cursor::new(&buf);
        cursor.seek(SeekFrom::Start(SECTOR_SIZE)).unwrap();
        let mut header_buf = [0u8; 512];
        cursor.read_exact(&mut header_buf).unwrap();
        let header = GptHeader::from_sector_bytes(&header_buf).unwrap();
        assert_eq!(header.signature, GPT_SIGNATURE);

        let entries = crate::gpt::parse_entries_region(&{
            cursor.seek(SeekFrom::Start(2 * SECTOR_SIZE)).unwrap();
            let mut entries_buf = vec![0u8; crate::gpt::ENTRIES_TABLE_BYTES];
            cursor.read_exact(&mut entries_buf).unwrap();
            entries_buf
        });
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name_string() == OS_PARTITION_NAME));
        assert!(entries.iter().any(|e| e.name_string() == ROOT_PARTITION_NAME));
    }

    /// `Cursor<&mut Vec<u8>>` doesn't grow past writes like a real file
    /// would when seeked past the end; this thin wrapper does, so tests
    /// can exercise `BinaryWriter::seekable` against an in-memory sink.
    /// The buffer is shared via `Rc<RefCell<_>>` (rather than borrowed)
    /// so the cursor satisfies `BinaryWriter::seekable`'s `'static` bound.
    struct ResizingCursor {
        buf: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
        position: u64,
    }

    impl Write for ResizingCursor {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            let mut buf = self.buf.borrow_mut();
            let pos = self.position as usize;
            let end = pos + data.len();
            if end > buf.len() {
                buf.resize(end, 0);
            }
            buf[pos..end].copy_from_slice(data);
            self.position = end as u64;
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ResizingCursor {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            let len = self.buf.borrow().len() as u64;
            let target = match pos {
                SeekFrom::Start(n) => n,
                SeekFrom::Current(n) => (self.position as i64 + n) as u64,
                SeekFrom::End(n) => (len as i64 + n) as u64,
            };
            if target > len {
                self.buf.borrow_mut().resize(target as usize, 0);
            }
            self.position = target;
            Ok(target)
        }
    }
}
