//! `vorteil build` — walks a source tree into an [`Ext2Compiler`], loads
//! kernel files named by a manifest JSON, and drives [`ImageBuilder`]
//! end to end (spec §4.6).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use vorteil_core::cancel::CancellationToken;
use vorteil_core::config::AppConfig;
use vorteil_core::fscompiler::FsCompiler;
use vorteil_ext2fs::Ext2Compiler;
use vorteil_image::kernel_bundle::{BundleManifest, KernelFileSpec};
use vorteil_image::sparse::{wrap_output, OutputFormat, GRAIN_SECTORS};
use vorteil_image::gpt::SECTOR_SIZE;
use vorteil_image::ImageBuilder;

pub fn run(
    source: &Path,
    kernel_dir: &Path,
    config_path: &Path,
    seed: u64,
    size: Option<u64>,
    format: OutputFormat,
    output: &Path,
) -> Result<()> {
    let token = CancellationToken::new();

    let config_bytes = fs::read(config_path)
        .with_context(|| format!("reading config file {}", config_path.display()))?;
    let config = AppConfig::from_json_bytes(&config_bytes)?;

    let kernel_files = load_kernel_files(kernel_dir)?;

    let mut fs_compiler = Ext2Compiler::new();
    walk_into_compiler(source, Path::new("/"), &mut fs_compiler)
        .with_context(|| format!("walking source tree {}", source.display()))?;

    let mut builder = ImageBuilder::new(seed, &kernel_files, fs_compiler, config, &token)?;
    let size = size.unwrap_or_else(|| builder.minimum_size());
    builder.prebuild(size, &token)?;

    // `VmdkSparseWriter::new` only consults `region_is_hole` while laying
    // out its grain table, so the predicate is captured as an owned,
    // precomputed table rather than borrowing `builder` for `'static`.
    let grain_bytes = GRAIN_SECTORS * SECTOR_SIZE;
    let num_grains = size.div_ceil(grain_bytes) as usize;
    let holes: Vec<bool> = (0..num_grains)
        .map(|i| {
            let offset = i as u64 * grain_bytes;
            let len = grain_bytes.min(size - offset);
            builder.region_is_hole(offset, len).unwrap_or(false)
        })
        .collect();

    let file = fs::File::create(output)
        .with_context(|| format!("creating output image {}", output.display()))?;
    let mut writer = wrap_output(format, file, size, move |offset, _| {
        let index = (offset / grain_bytes) as usize;
        holes.get(index).copied().unwrap_or(false)
    })?;
    builder.build(&mut writer, &token)?;

    println!("wrote {} bytes to {}", size, output.display());
    Ok(())
}

/// Reads `kernel_dir/manifest.json` (a [`BundleManifest`]) and loads each
/// named file's contents from the same directory.
fn load_kernel_files(kernel_dir: &Path) -> Result<Vec<KernelFileSpec>> {
    let manifest_path = kernel_dir.join("manifest.json");
    let manifest_bytes = fs::read(&manifest_path)
        .with_context(|| format!("reading kernel manifest {}", manifest_path.display()))?;
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)
        .with_context(|| format!("parsing kernel manifest {}", manifest_path.display()))?;

    manifest
        .files
        .into_iter()
        .map(|entry| {
            let path = kernel_dir.join(&entry.name);
            let contents = fs::read(&path).with_context(|| format!("reading kernel file {}", path.display()))?;
            Ok(KernelFileSpec { name: entry.name, contents, tags: entry.tags })
        })
        .collect()
}

/// Recursively mirrors `host_dir` into `compiler` at `image_path`,
/// translating regular files, directories, and symlinks (spec §2
/// "FSCompiler capability").
fn walk_into_compiler(host_dir: &Path, image_path: &Path, compiler: &mut Ext2Compiler) -> Result<()> {
    if image_path != Path::new("/") {
        compiler.mkdir(image_path)?;
    }
    let mut entries: Vec<_> = fs::read_dir(host_dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        let child_image_path: PathBuf = if image_path == Path::new("/") {
            Path::new("/").join(entry.file_name())
        } else {
            image_path.join(entry.file_name())
        };

        if file_type.is_dir() {
            walk_into_compiler(&entry.path(), &child_image_path, compiler)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            compiler.add_symlink(&child_image_path, &target.to_string_lossy())?;
        } else {
            let contents = fs::read(entry.path())?;
            let mode = file_mode(&entry.metadata()?);
            compiler.add_file(&child_image_path, &contents, mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}
