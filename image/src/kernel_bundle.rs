//! Kernel bundle reader/writer (spec §4.5, §6 "Kernel bundle on disk").
//!
//! On disk the OS partition carries a gzipped TAR archive whose first
//! entry, named `manifest`, is JSON describing every other entry's tags.
//! The builder pre-compiles this payload once (as part of `construct`)
//! so its size is fixed before the image's overall layout is computed;
//! the decoder decompresses the whole span and walks it as a sequence of
//! TAR records, recomputing byte offsets as it goes.

use std::collections::HashSet;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::{Builder as TarBuilder, Header};
use vorteil_core::error::{Result, VorteilError};

pub const MANIFEST_ENTRY_NAME: &str = "manifest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BundleManifest {
    pub files: Vec<ManifestEntry>,
}

/// A file available to be bundled, before tag filtering.
pub struct KernelFileSpec {
    pub name: String,
    pub contents: Vec<u8>,
    pub tags: Vec<String>,
}

/// Included if it has no tags, or if at least one of its tags is present
/// in `requested_tags` (spec §4.5 "Bundle payload filtering by tags").
fn is_included(tags: &[String], requested_tags: &HashSet<String>) -> bool {
    tags.is_empty() || tags.iter().any(|t| requested_tags.contains(t))
}

/// The pre-compiled, gzip-compressed kernel payload the builder embeds
/// verbatim into the OS partition.
pub struct KernelBundle {
    pub manifest: BundleManifest,
    pub payload: Vec<u8>,
}

impl KernelBundle {
    /// Filters `files` by `requested_tags`, writes the manifest entry
    /// first, then every included file in manifest order, all within a
    /// single gzip-compressed TAR stream.
    pub fn build(files: &[KernelFileSpec], requested_tags: &HashSet<String>) -> Result<Self> {
        let included: Vec<&KernelFileSpec> = files
            .iter()
            .filter(|f| is_included(&f.tags, requested_tags))
            .collect();

        let manifest = BundleManifest {
            files: included.iter().map(|f| ManifestEntry { name: f.name.clone(), tags: f.tags.clone() }).collect(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest)?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = TarBuilder::new(encoder);

        append_tar_entry(&mut tar, MANIFEST_ENTRY_NAME, &manifest_bytes)?;
        for f in &included {
            append_tar_entry(&mut tar, &f.name, &f.contents)?;
        }

        let encoder = tar.into_inner().map_err(VorteilError::Io)?;
        let payload = encoder.finish().map_err(VorteilError::Io)?;
        Ok(Self { manifest, payload })
    }

    pub fn payload_size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Tag names an engaged kernel feature (shell, ntp, logs, strace,
    /// tcpdump) implies the corresponding bundled files get tagged with
    /// (spec §4.6 "Kernel tag derivation"); filtering happens at `build`.
    pub fn manifest_file_names(&self) -> Vec<&str> {
        self.manifest.files.iter().map(|f| f.name.as_str()).collect()
    }
}

fn append_tar_entry<W: Write>(tar: &mut TarBuilder<W>, name: &str, contents: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(name).map_err(VorteilError::Io)?;
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append(&header, contents).map_err(VorteilError::Io)
}

/// One entry as seen by the decoder's raw TAR walk: offsets are
/// positions within the decompressed TAR stream, not the compressed
/// on-disk bytes (spec §4.5).
#[derive(Debug, Clone)]
pub struct KernelFileEntry {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    pub tags: Vec<String>,
}

pub struct KernelBundleReader {
    manifest: BundleManifest,
    entries: Vec<KernelFileEntry>,
    decompressed: Vec<u8>,
}

const TAR_HEADER_SIZE: u64 = 512;

impl KernelBundleReader {
    /// Decompresses `gzipped_tar` fully and indexes every entry after
    /// the manifest, recomputing offsets as
    /// `prev + 512 header + round_up(size, 512)`.
    pub fn open(gzipped_tar: &[u8]) -> Result<Self> {
        let mut decoder = GzDecoder::new(gzipped_tar);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        let mut entries = Vec::new();
        let mut manifest = BundleManifest::default();
        let mut offset = 0u64;
        let mut first = true;
        while (offset + TAR_HEADER_SIZE) as usize <= decompressed.len() {
            let header_bytes = &decompressed[offset as usize..(offset + TAR_HEADER_SIZE) as usize];
            if header_bytes.iter().all(|&b| b == 0) {
                break;
            }
            let (name, size) = parse_tar_header(header_bytes)?;
            let data_offset = offset + TAR_HEADER_SIZE;
            let data_end = (data_offset + size) as usize;
            if data_end > decompressed.len() {
                return Err(VorteilError::BadPackage("tar entry runs past end of bundle".into()));
            }

            if first {
                if name != MANIFEST_ENTRY_NAME {
                    return Err(VorteilError::BadPackage(format!(
                        "first kernel bundle entry must be '{MANIFEST_ENTRY_NAME}', found '{name}'"
                    )));
                }
                manifest = serde_json::from_slice(&decompressed[data_offset as usize..data_end])?;
                first = false;
            } else {
                let tags = manifest
                    .files
                    .iter()
                    .find(|f| f.name == name)
                    .map(|f| f.tags.clone())
                    .unwrap_or_default();
                entries.push(KernelFileEntry { name, size, offset: data_offset, tags });
            }

            offset = data_offset + round_up_512(size);
        }

        Ok(Self { manifest, entries, decompressed })
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    /// Returns entries in manifest order (spec §4.5 "Sizes computed with
    /// this filter must match the builder's layout").
    pub fn kernel_files(&self) -> &[KernelFileEntry] {
        &self.entries
    }

    pub fn read_file(&self, name: &str) -> Result<&[u8]> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| VorteilError::NotFound(name.to_string()))?;
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        Ok(&self.decompressed[start..end])
    }
}

fn round_up_512(size: u64) -> u64 {
    (size + 511) & !511
}

fn parse_tar_header(header: &[u8]) -> Result<(String, u64)> {
    let name_raw = &header[0..100];
    let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(100);
    let name = String::from_utf8_lossy(&name_raw[0..name_end]).to_string();

    let size_raw = &header[124..136];
    let size_str = std::str::from_utf8(size_raw)
        .map_err(|_| VorteilError::BadPackage("invalid tar size field".into()))?
        .trim_end_matches('\0')
        .trim();
    let size = u64::from_str_radix(size_str.trim(), 8)
        .map_err(|_| VorteilError::BadPackage(format!("invalid tar octal size: {size_str:?}")))?;
    Ok((name, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<KernelFileSpec> {
        vec![
            KernelFileSpec { name: "vinitd".into(), contents: b"binary-a".to_vec(), tags: vec![] },
            KernelFileSpec { name: "vshell".into(), contents: b"binary-b".to_vec(), tags: vec!["shell".into()] },
            KernelFileSpec { name: "vtcpdump".into(), contents: b"binary-c".to_vec(), tags: vec!["tcpdump".into()] },
        ]
    }

    #[test]
    fn untagged_file_always_included() {
        let bundle = KernelBundle::build(&specs(), &HashSet::new()).unwrap();
        let names = bundle.manifest_file_names();
        assert!(names.contains(&"vinitd"));
        assert!(!names.contains(&"vshell"));
    }

    #[test]
    fn tagged_file_included_when_tag_requested() {
        let mut tags = HashSet::new();
        tags.insert("shell".to_string());
        let bundle = KernelBundle::build(&specs(), &tags).unwrap();
        let names = bundle.manifest_file_names();
        assert!(names.contains(&"vinitd"));
        assert!(names.contains(&"vshell"));
        assert!(!names.contains(&"vtcpdump"));
    }

    #[test]
    fn round_trips_through_reader() {
        let mut tags = HashSet::new();
        tags.insert("shell".to_string());
        let bundle = KernelBundle::build(&specs(), &tags).unwrap();
        let reader = KernelBundleReader::open(&bundle.payload).unwrap();
        let files = reader.kernel_files();
        assert_eq!(files.len(), 2);
        assert_eq!(reader.read_file("vinitd").unwrap(), b"binary-a");
        assert_eq!(reader.read_file("vshell").unwrap(), b"binary-b");
    }
}
