//! Minimal single-block-group ext2 compiler: classic direct/single/double
//! indirect block pointers only, no journal, no extents (spec Non-goals
//! exclude a production file-system compiler; this exists to give
//! [`vorteil_image::builder::ImageBuilder`] a concrete ROOT file system
//! to compile against for round-trip testing).

use std::io::Write;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use vorteil_core::cancel::CancellationToken;
use vorteil_core::error::{Result, VorteilError};
use vorteil_core::fscompiler::FsCompiler;
use vorteil_image::ext::constants::*;
use vorteil_image::ext::structures::{GroupDesc, Inode, Superblock};

use crate::tree::{Node, Tree};

const BLOCK_SIZE: u32 = 1024;
const ROOT_DIR_INODE: u32 = ROOT_INODE;
const MAX_GROUP_UNITS: u64 = (BLOCK_SIZE as u64) * 8; // one bitmap block's worth of bits
const FT_REG: u8 = 1;
const FT_DIR: u8 = 2;
const FT_SYMLINK: u8 = 7;
const FIXED_VOLUME_UUID: [u8; 16] = [
    0x76, 0x6f, 0x72, 0x74, 0x65, 0x69, 0x6c, 0x2d, 0x72, 0x6f, 0x6f, 0x74, 0x2d, 0x66, 0x73, 0x00,
];

enum CommittedKind {
    Dir { data_blocks: Vec<Vec<u8>>, links_count: u16 },
    File { data_blocks: Vec<Vec<u8>>, size: u64, mode: u32 },
    SymlinkFast { target: String },
    SymlinkBlock { data_blocks: Vec<Vec<u8>>, size: u64 },
}

struct CommittedNode {
    inode_num: u32,
    kind: CommittedKind,
}

struct Committed {
    nodes: Vec<CommittedNode>,
    used_inode_count: u64,
    dir_count: u64,
    required_data_blocks: u64,
    content_bytes_hint: u64,
}

struct Compiled {
    total_blocks: u64,
    size: u64,
    blocks: Vec<u8>,
}

/// A minimal, single-block-group ext2 [`FsCompiler`].
pub struct Ext2Compiler {
    tree: Tree,
    min_inodes: Option<u64>,
    min_inodes_per_64mib: Option<u64>,
    extra_inodes: u64,
    extra_free_space: u64,
    committed: Option<Committed>,
    compiled: Option<Compiled>,
}

impl Default for Ext2Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Ext2Compiler {
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            min_inodes: None,
            min_inodes_per_64mib: None,
            extra_inodes: 0,
            extra_free_space: 0,
            committed: None,
            compiled: None,
        }
    }

    fn committed(&self) -> Result<&Committed> {
        self.committed
            .as_ref()
            .ok_or_else(|| VorteilError::Other("commit must run before this call".into()))
    }

    fn ptrs_per_block() -> u64 {
        (BLOCK_SIZE / 4) as u64
    }

    fn inode_budget(&self, disk_bytes_hint: u64) -> u64 {
        let base = if let Some(n) = self.min_inodes {
            n
        } else if let Some(per_64) = self.min_inodes_per_64mib {
            ((disk_bytes_hint as u128 * per_64 as u128) / (64 * 1024 * 1024)) as u64
        } else {
            (disk_bytes_hint / 16384).max(16)
        };
        base + self.extra_inodes
    }
}

impl FsCompiler for Ext2Compiler {
    fn mkdir(&mut self, path: &Path) -> Result<()> {
        self.tree.mkdir(path)
    }

    fn add_file(&mut self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        self.tree.add_file(path, contents, mode)
    }

    fn add_symlink(&mut self, path: &Path, target: &str) -> Result<()> {
        self.tree.add_symlink(path, target)
    }

    fn increase_minimum_free_space(&mut self, bytes: u64) {
        self.extra_free_space += bytes;
    }

    fn set_minimum_inodes(&mut self, inodes: u64) {
        self.min_inodes = Some(inodes);
    }

    fn set_minimum_inodes_per_64mib(&mut self, inodes_per_64mib: u64) {
        self.min_inodes_per_64mib = Some(inodes_per_64mib);
    }

    fn increase_minimum_inodes(&mut self, extra: u64) {
        self.extra_inodes += extra;
    }

    fn commit(&mut self, token: &CancellationToken) -> Result<()> {
        token.check()?;
        let mut nodes = Vec::new();
        let mut next_inode = 3u32;
        let (root_entries, root_links) =
            flatten_dir(&self.tree.root, ROOT_DIR_INODE, &mut next_inode, &mut nodes)?;
        nodes.push(CommittedNode {
            inode_num: ROOT_DIR_INODE,
            kind: CommittedKind::Dir {
                data_blocks: pack_directory_blocks(ROOT_DIR_INODE, ROOT_DIR_INODE, &root_entries)?,
                links_count: root_links,
            },
        });

        let ptrs_per_block = Self::ptrs_per_block();
        let mut required_data_blocks = 0u64;
        let mut content_bytes_hint = 0u64;
        let mut dir_count = 0u64;
        for node in &nodes {
            match &node.kind {
                CommittedKind::Dir { data_blocks, .. } => {
                    dir_count += 1;
                    required_data_blocks += total_blocks_for_file(data_blocks.len() as u64, ptrs_per_block)?;
                    content_bytes_hint += data_blocks.len() as u64 * BLOCK_SIZE as u64;
                }
                CommittedKind::File { data_blocks, size, .. } => {
                    required_data_blocks += total_blocks_for_file(data_blocks.len() as u64, ptrs_per_block)?;
                    content_bytes_hint += *size;
                }
                CommittedKind::SymlinkFast { .. } => {}
                CommittedKind::SymlinkBlock { data_blocks, size } => {
                    required_data_blocks += total_blocks_for_file(data_blocks.len() as u64, ptrs_per_block)?;
                    content_bytes_hint += *size;
                }
            }
        }

        let used_inode_count = next_inode as u64 - 1;
        self.committed = Some(Committed {
            nodes,
            used_inode_count,
            dir_count,
            required_data_blocks,
            content_bytes_hint,
        });
        Ok(())
    }

    fn minimum_size(&self) -> Result<u64> {
        let committed = self.committed()?;
        let inode_count = self.inode_budget(committed.content_bytes_hint).max(committed.used_inode_count + 1);
        let inode_table_blocks = (inode_count * INODE_SIZE_DEFAULT as u64).div_ceil(BLOCK_SIZE as u64);
        let metadata_blocks = 5 + inode_table_blocks; // boot + sb + gdt + block bitmap + inode bitmap + table
        let total = metadata_blocks + committed.required_data_blocks;
        Ok(total * BLOCK_SIZE as u64 + self.extra_free_space)
    }

    fn precompile(&mut self, size: u64, token: &CancellationToken) -> Result<()> {
        token.check()?;
        let block_size = BLOCK_SIZE as u64;
        let total_blocks = size / block_size;
        if total_blocks == 0 {
            return Err(VorteilError::SizeTooSmall { requested: size, minimum: block_size });
        }
        if total_blocks > MAX_GROUP_UNITS {
            return Err(VorteilError::UnsupportedFormat(
                "ext2 root file system exceeds single block group capacity; multi-group layout is not implemented".into(),
            ));
        }

        let committed_inode_count;
        let inode_table_blocks;
        let data_start_block;
        {
            let committed = self.committed()?;
            let inode_count = self.inode_budget(total_blocks * block_size).max(committed.used_inode_count + 1);
            if inode_count > MAX_GROUP_UNITS {
                return Err(VorteilError::UnsupportedFormat(
                    "requested inode count exceeds single block group capacity".into(),
                ));
            }
            committed_inode_count = inode_count;
            inode_table_blocks = (inode_count * INODE_SIZE_DEFAULT as u64).div_ceil(block_size);
            data_start_block = 5 + inode_table_blocks;
            let required = data_start_block + committed.required_data_blocks;
            if required > total_blocks {
                return Err(VorteilError::SizeTooSmall { requested: size, minimum: required * block_size });
            }
        }

        let mut blocks_buf = vec![0u8; (total_blocks * block_size) as usize];
        let ptrs_per_block = Self::ptrs_per_block();
        let mut next_block = data_start_block;
        let mut max_used_inode = 0u32;

        // Work on an owned copy of the committed node list so the allocation
        // pass can borrow `blocks_buf` mutably without also borrowing `self`.
        let committed_nodes = std::mem::replace(
            &mut self
                .committed
                .as_mut()
                .ok_or_else(|| VorteilError::Other("commit must run before precompile".into()))?
                .nodes,
            Vec::new(),
        );

        let mut inode_table = vec![0u8; (inode_table_blocks * block_size) as usize];
        for node in &committed_nodes {
            max_used_inode = max_used_inode.max(node.inode_num);
            let inode = match &node.kind {
                CommittedKind::Dir { data_blocks, links_count } => {
                    let start = next_block;
                    let block = allocate_and_emit(data_blocks, &mut next_block, &mut blocks_buf)?;
                    let sectors = (next_block - start) * (block_size / 512);
                    build_inode(S_IFDIR | 0o755, *links_count, (data_blocks.len() as u64) * block_size, block, sectors)
                }
                CommittedKind::File { data_blocks, size, mode } => {
                    let start = next_block;
                    let block = allocate_and_emit(data_blocks, &mut next_block, &mut blocks_buf)?;
                    let sectors = (next_block - start) * (block_size / 512);
                    build_inode(S_IFREG | (*mode as u16 & 0o7777), 1, *size, block, sectors)
                }
                CommittedKind::SymlinkFast { target } => {
                    let block = pack_fast_symlink(target);
                    build_inode(S_IFLNK | 0o777, 1, target.len() as u64, block, 0)
                }
                CommittedKind::SymlinkBlock { data_blocks, size } => {
                    let start = next_block;
                    let block = allocate_and_emit(data_blocks, &mut next_block, &mut blocks_buf)?;
                    let sectors = (next_block - start) * (block_size / 512);
                    build_inode(S_IFLNK | 0o777, 1, *size, block, sectors)
                }
            };
            write_inode(&mut inode_table, node.inode_num, committed_inode_count, &inode);
        }

        if let Some(committed) = self.committed.as_mut() {
            committed.nodes = committed_nodes;
        }

        let used_blocks = next_block;
        let free_blocks = total_blocks.saturating_sub(used_blocks);
        let dir_count = self.committed()?.dir_count;

        // Block bitmap: blocks [0, used_blocks) are in use (simplified: does
        // not apply the first_data_block offset convention, since nothing in
        // this crate's reader consults the bitmap for correctness).
        let mut block_bitmap = vec![0u8; block_size as usize];
        set_bits(&mut block_bitmap, 0, used_blocks.min(total_blocks));
        let mut inode_bitmap = vec![0u8; block_size as usize];
        set_bits(&mut inode_bitmap, 0, committed_inode_count.min(max_used_inode as u64));

        let superblock = Superblock {
            inodes_count: committed_inode_count as u32,
            blocks_count_lo: total_blocks as u32,
            blocks_count_hi: (total_blocks >> 32) as u32,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: total_blocks as u32,
            inodes_per_group: committed_inode_count as u32,
            magic: EXT4_SUPER_MAGIC,
            inode_size: INODE_SIZE_DEFAULT as u16,
            feature_compat: 0,
            feature_incompat: FEATURE_INCOMPAT_FILETYPE,
            feature_ro_compat: 0,
            uuid: FIXED_VOLUME_UUID,
            volume_name: *b"vorteil-root\0\0\0\0",
        };
        let mut sb_buf = [0u8; Superblock::ON_DISK_SIZE];
        superblock.serialize_into(&mut sb_buf);

        let group_desc = GroupDesc {
            block_bitmap: 3,
            inode_bitmap: 4,
            inode_table: 5,
            free_blocks_count: free_blocks.min(u16::MAX as u64) as u16,
            free_inodes_count: (committed_inode_count.saturating_sub(max_used_inode as u64)).min(u16::MAX as u64) as u16,
            used_dirs_count: dir_count.min(u16::MAX as u64) as u16,
        };
        let mut gd_buf = vec![0u8; block_size as usize];
        group_desc.serialize_into(&mut gd_buf[0..GroupDesc::ON_DISK_SIZE]);

        write_region(&mut blocks_buf, 1, block_size, &sb_buf);
        write_region(&mut blocks_buf, 2, block_size, &gd_buf);
        write_region(&mut blocks_buf, 3, block_size, &block_bitmap);
        write_region(&mut blocks_buf, 4, block_size, &inode_bitmap);
        write_region(&mut blocks_buf, 5, block_size, &inode_table);

        self.compiled = Some(Compiled { total_blocks, size, blocks: blocks_buf });
        Ok(())
    }

    fn compile(&mut self, writer: &mut dyn Write, token: &CancellationToken) -> Result<()> {
        token.check()?;
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| VorteilError::Other("precompile must run before compile".into()))?;
        writer.write_all(&compiled.blocks)?;
        let written = compiled.total_blocks * BLOCK_SIZE as u64;
        if compiled.size > written {
            let padding = vec![0u8; (compiled.size - written) as usize];
            writer.write_all(&padding)?;
        }
        Ok(())
    }

    fn region_is_hole(&self, _offset: u64, _size: u64) -> bool {
        // Conservative simplification: every byte is written by `compile`,
        // so no region may safely be reported as a hole.
        false
    }
}

fn flatten_dir(
    children: &std::collections::BTreeMap<String, Node>,
    self_inode: u32,
    next_inode: &mut u32,
    out: &mut Vec<CommittedNode>,
) -> Result<(Vec<(String, u32, u8)>, u16)> {
    let mut entries = Vec::new();
    let mut subdir_count: u16 = 0;
    for (name, node) in children {
        let inode = *next_inode;
        *next_inode += 1;
        match node {
            Node::Dir(sub) => {
                entries.push((name.clone(), inode, FT_DIR));
                subdir_count += 1;
                let (sub_entries, sub_links) = flatten_dir(sub, inode, next_inode, out)?;
                out.push(CommittedNode {
                    inode_num: inode,
                    kind: CommittedKind::Dir {
                        data_blocks: pack_directory_blocks(inode, self_inode, &sub_entries)?,
                        links_count: sub_links,
                    },
                });
            }
            Node::File { contents, mode } => {
                entries.push((name.clone(), inode, FT_REG));
                let data_blocks = chunk_into_blocks(contents);
                out.push(CommittedNode {
                    inode_num: inode,
                    kind: CommittedKind::File { data_blocks, size: contents.len() as u64, mode: *mode },
                });
            }
            Node::Symlink { target } => {
                entries.push((name.clone(), inode, FT_SYMLINK));
                let kind = if target.len() <= 60 {
                    CommittedKind::SymlinkFast { target: target.clone() }
                } else {
                    CommittedKind::SymlinkBlock {
                        data_blocks: chunk_into_blocks(target.as_bytes()),
                        size: target.len() as u64,
                    }
                };
                out.push(CommittedNode { inode_num: inode, kind });
            }
        }
    }
    Ok((entries, 2 + subdir_count))
}

fn chunk_into_blocks(contents: &[u8]) -> Vec<Vec<u8>> {
    if contents.is_empty() {
        return Vec::new();
    }
    contents
        .chunks(BLOCK_SIZE as usize)
        .map(|chunk| {
            let mut block = vec![0u8; BLOCK_SIZE as usize];
            block[..chunk.len()].copy_from_slice(chunk);
            block
        })
        .collect()
}

fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

/// Packs `.`/`..` plus `children` into ext2 directory blocks, extending
/// the final entry in each block to fill it exactly (spec §4.4's reader
/// relies on `record_length` alone to find the next entry).
fn pack_directory_blocks(self_inode: u32, parent_inode: u32, children: &[(String, u32, u8)]) -> Result<Vec<Vec<u8>>> {
    let block_size = BLOCK_SIZE as usize;
    let mut all = vec![(".".to_string(), self_inode, FT_DIR), ("..".to_string(), parent_inode, FT_DIR)];
    all.extend(children.iter().cloned());

    let mut groups: Vec<Vec<&(String, u32, u8)>> = vec![Vec::new()];
    let mut used = 0usize;
    for entry in &all {
        let ideal = round_up4(8 + entry.0.len());
        if ideal > block_size {
            return Err(VorteilError::InvalidInput(format!("directory entry name too long: {}", entry.0)));
        }
        if used + ideal > block_size {
            groups.push(Vec::new());
            used = 0;
        }
        groups.last_mut().unwrap().push(entry);
        used += ideal;
    }

    let mut blocks = Vec::with_capacity(groups.len());
    for group in groups {
        let mut block = vec![0u8; block_size];
        let mut offset = 0usize;
        for (i, (name, inode, file_type)) in group.iter().enumerate() {
            let ideal = round_up4(8 + name.len());
            let record_length = if i + 1 == group.len() { block_size - offset } else { ideal };
            LittleEndian::write_u32(&mut block[offset..offset + 4], *inode);
            LittleEndian::write_u16(&mut block[offset + 4..offset + 6], record_length as u16);
            block[offset + 6] = name.len() as u8;
            block[offset + 7] = *file_type;
            block[offset + 8..offset + 8 + name.len()].copy_from_slice(name.as_bytes());
            offset += record_length;
        }
        blocks.push(block);
    }
    Ok(blocks)
}

fn pack_fast_symlink(target: &str) -> [u32; 15] {
    let mut raw = [0u8; 60];
    raw[..target.len()].copy_from_slice(target.as_bytes());
    let mut block = [0u32; 15];
    for (i, slot) in block.iter_mut().enumerate() {
        *slot = LittleEndian::read_u32(&raw[i * 4..i * 4 + 4]);
    }
    block
}

fn total_blocks_for_file(data_blocks: u64, ptrs_per_block: u64) -> Result<u64> {
    if data_blocks <= 12 {
        return Ok(data_blocks);
    }
    let remaining = data_blocks - 12;
    if remaining <= ptrs_per_block {
        return Ok(data_blocks + 1);
    }
    let remaining2 = remaining - ptrs_per_block;
    let double_capacity = ptrs_per_block.saturating_mul(ptrs_per_block);
    if remaining2 <= double_capacity {
        let second_level_blocks = remaining2.div_ceil(ptrs_per_block);
        return Ok(data_blocks + 2 + second_level_blocks);
    }
    Err(VorteilError::UnsupportedFormat(
        "file exceeds double-indirect block capacity (triple-indirect is not supported)".into(),
    ))
}

fn write_region(blocks_buf: &mut [u8], block_num: u64, block_size: u64, data: &[u8]) {
    let start = (block_num * block_size) as usize;
    blocks_buf[start..start + data.len()].copy_from_slice(data);
}

/// Allocates physical blocks for `data_blocks` starting at `*next_block`,
/// using direct(12) + single-indirect + double-indirect pointers
/// (mirrors [`vorteil_image::ext::extents::resolve_classic_pointers`] in
/// reverse). Returns the inode's 15-word block-pointer array.
fn allocate_and_emit(data_blocks: &[Vec<u8>], next_block: &mut u64, blocks_buf: &mut [u8]) -> Result<[u32; 15]> {
    let block_size = BLOCK_SIZE as u64;
    let ptrs_per_block = Ext2Compiler::ptrs_per_block();
    let mut pointers = [0u32; 15];
    let total = data_blocks.len();
    let mut idx = 0usize;

    while idx < 12.min(total) {
        let bn = *next_block;
        *next_block += 1;
        write_region(blocks_buf, bn, block_size, &data_blocks[idx]);
        pointers[idx] = bn as u32;
        idx += 1;
    }
    if idx == total {
        return Ok(pointers);
    }

    let single_bn = *next_block;
    *next_block += 1;
    let mut single_ptrs = vec![0u8; block_size as usize];
    let take = (total - idx).min(ptrs_per_block as usize);
    for j in 0..take {
        let bn = *next_block;
        *next_block += 1;
        write_region(blocks_buf, bn, block_size, &data_blocks[idx]);
        LittleEndian::write_u32(&mut single_ptrs[j * 4..j * 4 + 4], bn as u32);
        idx += 1;
    }
    write_region(blocks_buf, single_bn, block_size, &single_ptrs);
    pointers[12] = single_bn as u32;
    if idx == total {
        return Ok(pointers);
    }

    let double_bn = *next_block;
    *next_block += 1;
    let mut double_ptrs = vec![0u8; block_size as usize];
    let mut dbl_idx = 0usize;
    while idx < total && dbl_idx < ptrs_per_block as usize {
        let inner_bn = *next_block;
        *next_block += 1;
        let mut inner_ptrs = vec![0u8; block_size as usize];
        let take2 = (total - idx).min(ptrs_per_block as usize);
        for j in 0..take2 {
            let bn = *next_block;
            *next_block += 1;
            write_region(blocks_buf, bn, block_size, &data_blocks[idx]);
            LittleEndian::write_u32(&mut inner_ptrs[j * 4..j * 4 + 4], bn as u32);
            idx += 1;
        }
        write_region(blocks_buf, inner_bn, block_size, &inner_ptrs);
        LittleEndian::write_u32(&mut double_ptrs[dbl_idx * 4..dbl_idx * 4 + 4], inner_bn as u32);
        dbl_idx += 1;
    }
    write_region(blocks_buf, double_bn, block_size, &double_ptrs);
    pointers[13] = double_bn as u32;

    if idx < total {
        return Err(VorteilError::UnsupportedFormat(
            "file exceeds double-indirect block capacity (triple-indirect is not supported)".into(),
        ));
    }
    Ok(pointers)
}

fn build_inode(mode: u16, links_count: u16, size: u64, block: [u32; 15], sectors: u64) -> Inode {
    Inode {
        mode,
        uid: 0,
        size_lo: size as u32,
        atime: 0,
        ctime: 0,
        mtime: 0,
        dtime: 0,
        gid: 0,
        links_count,
        sectors: sectors as u32,
        flags: 0,
        block,
        generation: 0,
        file_acl: 0,
        size_high: (size >> 32) as u32,
    }
}

fn write_inode(inode_table: &mut [u8], inode_num: u32, inode_count: u64, inode: &Inode) {
    if inode_num == 0 || inode_num as u64 > inode_count {
        return;
    }
    let index = (inode_num - 1) as usize;
    let offset = index * Inode::ON_DISK_SIZE;
    if offset + Inode::ON_DISK_SIZE <= inode_table.len() {
        inode.serialize_into(&mut inode_table[offset..offset + Inode::ON_DISK_SIZE]);
    }
}

fn set_bits(bitmap: &mut [u8], start: u64, count: u64) {
    for i in start..start + count {
        let byte = (i / 8) as usize;
        let bit = (i % 8) as u8;
        if byte < bitmap.len() {
            bitmap[byte] |= 1 << bit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use vorteil_core::cancel::CancellationToken;

    fn build_with<F: FnOnce(&mut Ext2Compiler)>(setup: F) -> (Ext2Compiler, u64) {
        let mut compiler = Ext2Compiler::new();
        setup(&mut compiler);
        let token = CancellationToken::new();
        compiler.commit(&token).unwrap();
        let size = compiler.minimum_size().unwrap();
        let aligned = size.div_ceil(512) * 512;
        compiler.precompile(aligned, &token).unwrap();
        (compiler, aligned)
    }

    #[test]
    fn empty_tree_compiles_to_exact_size() {
        let (mut compiler, size) = build_with(|_| {});
        let mut out = Vec::new();
        let token = CancellationToken::new();
        compiler.compile(&mut out, &token).unwrap();
        assert_eq!(out.len() as u64, size);
    }

    #[test]
    fn file_and_directory_round_trip_via_reader() {
        let (mut compiler, _) = build_with(|c| {
            c.mkdir(Path::new("/etc")).unwrap();
            c.add_file(Path::new("/etc/hostname"), b"vorteil\n", 0o644).unwrap();
            c.add_symlink(Path::new("/etc/alias"), "hostname").unwrap();
        });
        let mut out = Vec::new();
        let token = CancellationToken::new();
        compiler.compile(&mut out, &token).unwrap();

        let cursor = std::io::Cursor::new(out);
        let mut fs = vorteil_image::ext::ExtFilesystem::open(cursor, 0).unwrap();
        let hostname_inode = fs.resolve_path("/etc/hostname").unwrap();
        let data = fs.inode_reader(hostname_inode).map(|mut r| {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut r, &mut buf).unwrap();
            buf
        }).unwrap();
        assert_eq!(data, b"vorteil\n");

        let alias_inode = fs.resolve_path("/etc/alias").unwrap();
        let inode = fs.get_inode(alias_inode).unwrap();
        assert_eq!(fs.fast_symlink_target(&inode).unwrap(), "hostname");
    }

    #[test]
    fn precompile_rejects_undersized_partition() {
        let mut compiler = Ext2Compiler::new();
        compiler.add_file(Path::new("/big"), &vec![0u8; 1_000_000], 0o644).unwrap();
        let token = CancellationToken::new();
        compiler.commit(&token).unwrap();
        let err = compiler.precompile(BLOCK_SIZE as u64 * 4, &token).unwrap_err();
        assert!(matches!(err, VorteilError::SizeTooSmall { .. }));
    }
}
