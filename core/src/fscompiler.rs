use std::io::Write;
use std::path::Path;

use crate::cancel::CancellationToken;
use crate::error::Result;

/// The pluggable file-system capability the image builder is built
/// against (spec §2, §9 "Dynamic dispatch over file-system compilers").
/// The builder never hard-codes a concrete file system; any compliant
/// implementation can back the ROOT partition.
///
/// Lifecycle: `Mkdir`/`AddFile`/`SetMinimumInodes*`/`IncreaseMinimum*`
/// accumulate intent, `commit` freezes it, `minimum_size` becomes valid
/// after `commit`, `precompile(size)` fixes the final on-disk layout for
/// a chosen total size, and `compile(writer)` streams it out. `compile`
/// must never seek the writer backwards.
pub trait FsCompiler {
    /// Create a directory (and any missing parents) at `path`.
    fn mkdir(&mut self, path: &Path) -> Result<()>;

    /// Add a regular file at `path` with the given contents and Unix
    /// permission bits.
    fn add_file(&mut self, path: &Path, contents: &[u8], mode: u32) -> Result<()>;

    /// Add a symlink at `path` pointing at `target`.
    fn add_symlink(&mut self, path: &Path, target: &str) -> Result<()>;

    /// Reserve at least `bytes` of additional free space beyond what the
    /// accumulated inputs require.
    fn increase_minimum_free_space(&mut self, bytes: u64);

    /// Fix the total inode budget explicitly (mutually exclusive in
    /// practice with `set_minimum_inodes_per_64mib`; last caller wins).
    fn set_minimum_inodes(&mut self, inodes: u64);

    /// Derive the inode budget from the eventual file-system size: at
    /// least `inodes_per_64mib` inodes for every 64 MiB.
    fn set_minimum_inodes_per_64mib(&mut self, inodes_per_64mib: u64);

    /// Reserve at least `extra` additional inodes beyond the budget
    /// implied by the inputs so far.
    fn increase_minimum_inodes(&mut self, extra: u64);

    /// Freeze accumulated inputs. Must be called before `minimum_size`.
    fn commit(&mut self, token: &CancellationToken) -> Result<()>;

    /// Minimum total byte size this file system can be compiled into,
    /// valid only after `commit`.
    fn minimum_size(&self) -> Result<u64>;

    /// Fix the on-disk layout for a total size of `size` bytes (must be
    /// `>= minimum_size()`). Valid only after `commit`.
    fn precompile(&mut self, size: u64, token: &CancellationToken) -> Result<()>;

    /// Stream the compiled file system to `writer`. Must be called after
    /// `precompile` and must never seek the writer backwards.
    fn compile(&mut self, writer: &mut dyn Write, token: &CancellationToken) -> Result<()>;

    /// Reports whether the partition-relative byte range
    /// `[offset, offset+size)` is guaranteed to be all zero in the
    /// output of `compile`. Valid only after `precompile`.
    fn region_is_hole(&self, offset: u64, size: u64) -> bool;
}
