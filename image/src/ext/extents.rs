//! Inode block-address resolution: the four data-placement variants from
//! spec §4.4 are a closed set, modeled here as one function per variant
//! dispatched once by [`super::reader::ExtFilesystem::block_addresses`].

use vorteil_core::error::{Result, VorteilError};

use super::structures::{Extent, ExtentHeader, ExtentIdx, Inode};

/// Reinterprets an inode's 60-byte block-pointer area as a packed
/// extent-tree node and recursively walks it into a dense, logical-block
/// indexed address array (spec §4.4 case 3).
pub fn resolve_extent_tree<F>(inode: &Inode, block_count: u64, mut read_block: F) -> Result<Vec<u64>>
where
    F: FnMut(u64) -> Result<Vec<u8>>,
{
    let mut addrs = vec![0u64; block_count as usize];
    let mut root_buf = [0u8; 60];
    for i in 0..15 {
        root_buf[i * 4..i * 4 + 4].copy_from_slice(&inode.block[i].to_le_bytes());
    }
    walk_extent_node(&root_buf, true, &mut read_block, &mut addrs)?;
    Ok(addrs)
}

fn walk_extent_node<F>(
    node: &[u8],
    is_root: bool,
    read_block: &mut F,
    out: &mut [u64],
) -> Result<()>
where
    F: FnMut(u64) -> Result<Vec<u8>>,
{
    let header = ExtentHeader::parse(node)?;
    let mut offset = 12usize;
    if header.depth == 0 {
        for (i, _) in (0..header.entries).enumerate() {
            let extent = Extent::parse(&node[offset..offset + 12]);
            offset += 12;
            if i == 0 && extent.block != 0 {
                return Err(VorteilError::BadImage(
                    "first extent in node has nonzero logical block".into(),
                ));
            }
            let start = extent.physical_start();
            for i in 0..extent.len as u64 {
                let logical = extent.block as u64 + i;
                if (logical as usize) < out.len() {
                    out[logical as usize] = start + i;
                }
            }
        }
    } else {
        for _ in 0..header.entries {
            let idx = ExtentIdx::parse(&node[offset..offset + 12]);
            offset += 12;
            if is_root && idx.block != 0 {
                return Err(VorteilError::BadImage(
                    "root extent index has nonzero logical block".into(),
                ));
            }
            let child = read_block(idx.child_block())?;
            walk_extent_node(&child, false, read_block, out)?;
        }
    }
    Ok(())
}

/// Classic direct + 1/2/3-indirect pointer expansion (spec §4.4 case 4).
pub fn resolve_classic_pointers<F>(
    inode: &Inode,
    block_count: u64,
    block_size: u32,
    mut read_block: F,
) -> Result<Vec<u64>>
where
    F: FnMut(u64) -> Result<Vec<u8>>,
{
    let mut addrs = Vec::with_capacity(block_count as usize);
    for i in 0..12.min(block_count as usize) {
        addrs.push(inode.block[i] as u64);
    }
    if addrs.len() as u64 >= block_count {
        addrs.truncate(block_count as usize);
        return Ok(addrs);
    }

    let ptrs_per_block = (block_size / 4) as u64;
    expand_indirect(inode.block[12] as u64, 0, ptrs_per_block, block_count, &mut read_block, &mut addrs)?;
    if addrs.len() as u64 >= block_count {
        addrs.truncate(block_count as usize);
        return Ok(addrs);
    }
    expand_indirect(inode.block[13] as u64, 1, ptrs_per_block, block_count, &mut read_block, &mut addrs)?;
    if addrs.len() as u64 >= block_count {
        addrs.truncate(block_count as usize);
        return Ok(addrs);
    }
    expand_indirect(inode.block[14] as u64, 2, ptrs_per_block, block_count, &mut read_block, &mut addrs)?;
    addrs.truncate(block_count as usize);
    Ok(addrs)
}

/// `depth` 0 = singly-indirect, 1 = doubly, 2 = triply (spec §4.4:
/// classic pointers are expanded "at depths 0/1/2").
fn expand_indirect<F>(
    block_num: u64,
    depth: u32,
    ptrs_per_block: u64,
    limit: u64,
    read_block: &mut F,
    out: &mut Vec<u64>,
) -> Result<()>
where
    F: FnMut(u64) -> Result<Vec<u8>>,
{
    if out.len() as u64 >= limit {
        return Ok(());
    }
    if block_num == 0 {
        let zeros_to_add = count_descendant_slots(depth, ptrs_per_block).min(limit - out.len() as u64);
        for _ in 0..zeros_to_add {
            out.push(0);
        }
        return Ok(());
    }
    let block = read_block(block_num)?;
    let pointers: Vec<u32> = block
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if depth == 0 {
        for &p in &pointers {
            if out.len() as u64 >= limit {
                break;
            }
            out.push(p as u64);
        }
    } else {
        for &p in &pointers {
            if out.len() as u64 >= limit {
                break;
            }
            expand_indirect(p as u64, depth - 1, ptrs_per_block, limit, read_block, out)?;
        }
    }
    Ok(())
}

fn count_descendant_slots(depth: u32, ptrs_per_block: u64) -> u64 {
    let mut slots = 1u64;
    for _ in 0..=depth {
        slots = slots.saturating_mul(ptrs_per_block);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::constants::S_IFREG;

    fn zero_inode() -> Inode {
        Inode {
            mode: S_IFREG,
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

    #[test]
    fn classic_direct_blocks_only() {
        let mut inode = zero_inode();
        inode.block[0] = 10;
        inode.block[1] = 11;
        let addrs = resolve_classic_pointers(&inode, 2, 1024, |_| unreachable!()).unwrap();
        assert_eq!(addrs, vec![10, 11]);
    }

    #[test]
    fn classic_hole_in_direct_block_is_zero() {
        let mut inode = zero_inode();
        inode.block[0] = 5;
        // block[1] stays 0 -> hole
        let addrs = resolve_classic_pointers(&inode, 2, 1024, |_| unreachable!()).unwrap();
        assert_eq!(addrs, vec![5, 0]);
    }

    #[test]
    fn classic_single_indirect_expands() {
        let mut inode = zero_inode();
        for i in 0..12 {
            inode.block[i] = 100 + i as u32;
        }
        inode.block[12] = 200; // single indirect block number
        let block_size = 16u32; // 4 pointers per block for a tiny test
        let mut indirect_block = vec![0u8; block_size as usize];
        indirect_block[0..4].copy_from_slice(&500u32.to_le_bytes());
        indirect_block[4..8].copy_from_slice(&501u32.to_le_bytes());
        let addrs = resolve_classic_pointers(&inode, 14, block_size, |num| {
            assert_eq!(num, 200);
            Ok(indirect_block.clone())
        })
        .unwrap();
        assert_eq!(addrs.len(), 14);
        assert_eq!(addrs[12], 500);
        assert_eq!(addrs[13], 501);
    }
}
