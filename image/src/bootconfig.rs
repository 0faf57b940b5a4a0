//! `BootloaderConfig` record stored at the start of the OS partition
//! (spec §3).

use byteorder::{ByteOrder, LittleEndian};
use vorteil_core::error::{Result, VorteilError};

pub const RECORD_SIZE: usize = 16 + 16 + 2 + 6 + 8 + 8 + 8 + 192 + 0x2000;
pub const LINUX_ARGS_CAPACITY: usize = 0x2000;
pub const CURRENT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct BootloaderConfig {
    pub version: String,
    pub linux_args: String,
    pub config_offset: u64,
    pub config_len: u64,
    pub config_capacity: u64,
}

impl BootloaderConfig {
    pub fn new(linux_args: String, config_offset: u64, config_len: u64, config_capacity: u64) -> Result<Self> {
        if linux_args.len() >= LINUX_ARGS_CAPACITY {
            return Err(VorteilError::InvalidInput(format!(
                "linux args too long: {} >= {}",
                linux_args.len(),
                LINUX_ARGS_CAPACITY
            )));
        }
        Ok(Self {
            version: CURRENT_VERSION.to_string(),
            linux_args,
            config_offset,
            config_len,
            config_capacity,
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let version_bytes = self.version.as_bytes();
        let take = version_bytes.len().min(16);
        buf[0..take].copy_from_slice(&version_bytes[0..take]);
        // buf[16..32] reserved.
        let args_bytes = self.linux_args.as_bytes();
        LittleEndian::write_u16(&mut buf[32..34], args_bytes.len() as u16);
        // buf[34..40] reserved.
        LittleEndian::write_u64(&mut buf[40..48], self.config_offset);
        LittleEndian::write_u64(&mut buf[48..56], self.config_len);
        LittleEndian::write_u64(&mut buf[56..64], self.config_capacity);
        // buf[64..256] reserved.
        let args_off = 256;
        buf[args_off..args_off + args_bytes.len()].copy_from_slice(args_bytes);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_SIZE {
            return Err(VorteilError::BadImage("boot config record truncated".into()));
        }
        let version_end = buf[0..16].iter().position(|&b| b == 0).unwrap_or(16);
        let version = String::from_utf8_lossy(&buf[0..version_end]).to_string();
        let args_len = LittleEndian::read_u16(&buf[32..34]) as usize;
        let config_offset = LittleEndian::read_u64(&buf[40..48]);
        let config_len = LittleEndian::read_u64(&buf[48..56]);
        let config_capacity = LittleEndian::read_u64(&buf[56..64]);
        let args_off = 256;
        let linux_args = String::from_utf8_lossy(&buf[args_off..args_off + args_len]).to_string();
        Ok(Self { version, linux_args, config_offset, config_len, config_capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fields() {
        let cfg = BootloaderConfig::new("rw console=tty0".into(), 4096, 128, 256).unwrap();
        let bytes = cfg.to_bytes();
        let parsed = BootloaderConfig::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, CURRENT_VERSION);
        assert_eq!(parsed.linux_args, "rw console=tty0");
        assert_eq!(parsed.config_offset, 4096);
        assert_eq!(parsed.config_len, 128);
        assert_eq!(parsed.config_capacity, 256);
    }

    #[test]
    fn rejects_oversized_args() {
        let huge = "a".repeat(LINUX_ARGS_CAPACITY);
        assert!(BootloaderConfig::new(huge, 0, 0, 0).is_err());
    }
}
