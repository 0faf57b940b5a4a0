//! GUID Partition Table reader/writer (spec §3, §4.3).

use byteorder::{ByteOrder, LittleEndian};
use vorteil_core::error::{Result, VorteilError};

pub const SECTOR_SIZE: u64 = 512;
pub const GPT_SIGNATURE: u64 = 0x5452415020494645; // "EFI PART"
pub const PRIMARY_HEADER_LBA: u64 = 1;
pub const FIRST_USABLE_LBA: u64 = 34; // 1 MBR + 1 header + 32 entry sectors
pub const ENTRIES_PER_TABLE: u32 = 128;
pub const ENTRY_SIZE: u32 = 128;
pub const ENTRIES_TABLE_BYTES: usize = (ENTRIES_PER_TABLE * ENTRY_SIZE) as usize;
pub const ENTRIES_SECTORS: u64 = ENTRIES_TABLE_BYTES as u64 / SECTOR_SIZE;

pub const OS_PARTITION_NAME: &str = "vorteil-os";
pub const ROOT_PARTITION_NAME: &str = "vorteil-root";

/// Linux x86-64 root partition type GUID, fixed per spec §3.
pub const ROOT_TYPE_GUID: [u8; 16] = [
    0xE3, 0xBC, 0x68, 0x4F, 0xCD, 0xE8, 0xB1, 0x4D, 0x96, 0xE7, 0xFB, 0xCA, 0xF9, 0x84, 0xB7, 0x09,
];

/// Fixed ROOT partition GUID so kernel args can reference
/// `root=PARTUUID=...` deterministically, per spec §3.
pub const ROOT_PARTITION_GUID: [u8; 16] = [
    0x7D, 0x44, 0x48, 0x40, 0x9D, 0xC0, 0x11, 0xD1, 0xB2, 0x45, 0x5F, 0xFD, 0xCE, 0x74, 0xFA, 0xD2,
];

#[derive(Debug, Clone)]
pub struct GptHeader {
    pub signature: u64,
    pub revision: [u8; 4],
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub start_lba_parts: u64,
    pub num_parts: u32,
    pub size_part_entry: u32,
    pub crc_parts: u32,
}

impl GptHeader {
    /// Serializes to a 512-byte sector with the header's own CRC computed
    /// over the 92-byte used header region with `header_crc32` zeroed,
    /// per spec §4.3.
    pub fn to_sector_bytes(&self) -> [u8; SECTOR_SIZE as usize] {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        self.write_used_fields(&mut sector, 0);
        let crc = crc32fast::hash(&sector[0..92]);
        LittleEndian::write_u32(&mut sector[16..20], crc);
        sector
    }

    fn write_used_fields(&self, buf: &mut [u8], crc_value: u32) {
        LittleEndian::write_u64(&mut buf[0..8], self.signature);
        buf[8..12].copy_from_slice(&self.revision);
        LittleEndian::write_u32(&mut buf[12..16], self.header_size);
        LittleEndian::write_u32(&mut buf[16..20], crc_value);
        // buf[20..24] reserved, must be zero.
        LittleEndian::write_u64(&mut buf[24..32], self.current_lba);
        LittleEndian::write_u64(&mut buf[32..40], self.backup_lba);
        LittleEndian::write_u64(&mut buf[40..48], self.first_usable_lba);
        LittleEndian::write_u64(&mut buf[48..56], self.last_usable_lba);
        buf[56..72].copy_from_slice(&self.disk_guid);
        LittleEndian::write_u64(&mut buf[72..80], self.start_lba_parts);
        LittleEndian::write_u32(&mut buf[80..84], self.num_parts);
        LittleEndian::write_u32(&mut buf[84..88], self.size_part_entry);
        LittleEndian::write_u32(&mut buf[88..92], self.crc_parts);
    }

    pub fn from_sector_bytes(sector: &[u8]) -> Result<Self> {
        if sector.len() < 92 {
            return Err(VorteilError::BadImage("GPT header sector too short".into()));
        }
        let signature = LittleEndian::read_u64(&sector[0..8]);
        if signature != GPT_SIGNATURE {
            return Err(VorteilError::BadImage(format!(
                "bad GPT signature: {signature:#x}"
            )));
        }
        let size_part_entry = LittleEndian::read_u32(&sector[84..88]);
        if size_part_entry != ENTRY_SIZE {
            return Err(VorteilError::BadImage(format!(
                "unexpected GPT entry size: {size_part_entry}"
            )));
        }
        let mut revision = [0u8; 4];
        revision.copy_from_slice(&sector[8..12]);
        let mut disk_guid = [0u8; 16];
        disk_guid.copy_from_slice(&sector[56..72]);
        Ok(GptHeader {
            signature,
            revision,
            header_size: LittleEndian::read_u32(&sector[12..16]),
            header_crc32: LittleEndian::read_u32(&sector[16..20]),
            current_lba: LittleEndian::read_u64(&sector[24..32]),
            backup_lba: LittleEndian::read_u64(&sector[32..40]),
            first_usable_lba: LittleEndian::read_u64(&sector[40..48]),
            last_usable_lba: LittleEndian::read_u64(&sector[48..56]),
            disk_guid,
            start_lba_parts: LittleEndian::read_u64(&sector[72..80]),
            num_parts: LittleEndian::read_u32(&sector[80..84]),
            size_part_entry,
            crc_parts: LittleEndian::read_u32(&sector[88..92]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GptEntry {
    pub type_guid: [u8; 16],
    pub partition_guid: [u8; 16],
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    /// UTF-16LE, NUL-padded, 36 code units (72 bytes).
    pub name: [u8; 72],
}

impl Default for GptEntry {
    fn default() -> Self {
        Self {
            type_guid: [0; 16],
            partition_guid: [0; 16],
            first_lba: 0,
            last_lba: 0,
            attributes: 0,
            name: [0; 72],
        }
    }
}

impl GptEntry {
    pub fn is_unused(&self) -> bool {
        self.type_guid == [0u8; 16]
    }

    pub fn name_string(&self) -> String {
        let units: Vec<u16> = self
            .name
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; 72];
        for (i, unit) in name.encode_utf16().enumerate() {
            if i * 2 + 1 >= self.name.len() {
                break;
            }
            self.name[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    pub fn byte_window(&self) -> (u64, u64) {
        let start = self.first_lba * SECTOR_SIZE;
        let len = (self.last_lba - self.first_lba + 1) * SECTOR_SIZE;
        (start, len)
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[0..16].copy_from_slice(&self.type_guid);
        buf[16..32].copy_from_slice(&self.partition_guid);
        LittleEndian::write_u64(&mut buf[32..40], self.first_lba);
        LittleEndian::write_u64(&mut buf[40..48], self.last_lba);
        LittleEndian::write_u64(&mut buf[48..56], self.attributes);
        buf[56..128].copy_from_slice(&self.name);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut type_guid = [0u8; 16];
        type_guid.copy_from_slice(&buf[0..16]);
        let mut partition_guid = [0u8; 16];
        partition_guid.copy_from_slice(&buf[16..32]);
        let mut name = [0u8; 72];
        name.copy_from_slice(&buf[56..128]);
        Self {
            type_guid,
            partition_guid,
            first_lba: LittleEndian::read_u64(&buf[32..40]),
            last_lba: LittleEndian::read_u64(&buf[40..48]),
            attributes: LittleEndian::read_u64(&buf[48..56]),
            name,
        }
    }
}

/// Generates the 128x128-byte entries region with exactly the given
/// entries written in order starting at index 0; everything past that is
/// zero. Returns the buffer and its CRC-32 (IEEE), matching spec §4.3:
/// "A single entries buffer is generated once during prebuild."
pub fn build_entries_region(entries: &[GptEntry]) -> ([u8; ENTRIES_TABLE_BYTES], u32) {
    let mut buf = [0u8; ENTRIES_TABLE_BYTES];
    for (i, e) in entries.iter().enumerate() {
        let off = i * ENTRY_SIZE as usize;
        buf[off..off + ENTRY_SIZE as usize].copy_from_slice(&e.to_bytes());
    }
    let crc = crc32fast::hash(&buf);
    (buf, crc)
}

pub fn parse_entries_region(buf: &[u8]) -> Vec<GptEntry> {
    buf.chunks_exact(ENTRY_SIZE as usize)
        .map(GptEntry::from_bytes)
        .filter(|e| !e.is_unused())
        .collect()
}

/// Finds an entry by its UTF-16LE name (spec §4.3 "Name lookup").
pub fn find_entry_by_name<'a>(entries: &'a [GptEntry], name: &str) -> Option<&'a GptEntry> {
    entries.iter().find(|e| e.name_string() == name)
}

/// Protective MBR bytes (spec §6): bootloader region left as supplied
/// blob (zeros here unless overridden), single 0xEE partition spanning
/// the disk minus one sector.
pub fn build_protective_mbr(total_sectors: u64, bootcode: Option<&[u8; 446]>) -> [u8; 512] {
    let mut mbr = [0u8; 512];
    if let Some(code) = bootcode {
        mbr[0..446].copy_from_slice(code);
    }
    let partition_offset = 446;
    mbr[partition_offset] = 0x7F; // status
    mbr[partition_offset + 1] = 0x00;
    mbr[partition_offset + 2] = 0x02;
    mbr[partition_offset + 3] = 0x00;
    mbr[partition_offset + 4] = 0xEE; // protective GPT type
    mbr[partition_offset + 5] = 0xFF;
    mbr[partition_offset + 6] = 0xFF;
    mbr[partition_offset + 7] = 0xFF;
    LittleEndian::write_u32(&mut mbr[partition_offset + 8..partition_offset + 12], 1);
    let total_sectors_field = (total_sectors.saturating_sub(1)).min(u32::MAX as u64) as u32;
    LittleEndian::write_u32(
        &mut mbr[partition_offset + 12..partition_offset + 16],
        total_sectors_field,
    );
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_name_round_trips_utf16le() {
        let mut e = GptEntry::default();
        e.set_name(OS_PARTITION_NAME);
        assert_eq!(e.name_string(), OS_PARTITION_NAME);
        // First 20 bytes literal per spec S2.
        let expected: [u8; 20] = [
            0x76, 0x00, 0x6F, 0x00, 0x72, 0x00, 0x74, 0x00, 0x65, 0x00, 0x69, 0x00, 0x6C, 0x00,
            0x2D, 0x00, 0x6F, 0x00, 0x73, 0x00,
        ];
        assert_eq!(&e.name[0..20], &expected);
    }

    #[test]
    fn header_crc_round_trips() {
        let header = GptHeader {
            signature: GPT_SIGNATURE,
            revision: [0, 0, 1, 0],
            header_size: 92,
            header_crc32: 0,
            current_lba: 1,
            backup_lba: 2000,
            first_usable_lba: FIRST_USABLE_LBA,
            last_usable_lba: 1967,
            disk_guid: [7; 16],
            start_lba_parts: 2,
            num_parts: ENTRIES_PER_TABLE,
            size_part_entry: ENTRY_SIZE,
            crc_parts: 0xDEADBEEF,
        };
        let bytes = header.to_sector_bytes();
        let parsed = GptHeader::from_sector_bytes(&bytes).unwrap();
        assert_eq!(parsed.current_lba, 1);
        assert_eq!(parsed.crc_parts, 0xDEADBEEF);
        let crc_field = parsed.header_crc32;
        let mut recompute_buf = bytes;
        LittleEndian::write_u32(&mut recompute_buf[16..20], 0);
        assert_eq!(crc32fast::hash(&recompute_buf[0..92]), crc_field);
    }

    #[test]
    fn entries_region_crc_matches_recompute() {
        let mut e = GptEntry::default();
        e.type_guid = ROOT_TYPE_GUID;
        e.partition_guid = ROOT_PARTITION_GUID;
        e.first_lba = 34;
        e.last_lba = 1000;
        e.set_name(ROOT_PARTITION_NAME);
        let (buf, crc) = build_entries_region(&[e]);
        assert_eq!(crc32fast::hash(&buf), crc);
        let parsed = parse_entries_region(&buf);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].partition_guid, ROOT_PARTITION_GUID);
    }

    #[test]
    fn mbr_has_signature_and_protective_type() {
        let mbr = build_protective_mbr(2048, None);
        assert_eq!(mbr[510], 0x55);
        assert_eq!(mbr[511], 0xAA);
        assert_eq!(mbr[446 + 4], 0xEE);
    }
}
