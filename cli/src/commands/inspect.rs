//! Read-only image inspection commands (spec §6 "gpt"/"fs"/"ls"/"cat"/
//! "cp"/"md5"/"stat"/"tree"/"du").

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use vorteil_image::vdecompiler::{DirListEntry, ImageFormat};
use vorteil_image::VDecompiler;

fn open(image: &Path) -> Result<VDecompiler> {
    let file = File::open(image).with_context(|| format!("opening image {}", image.display()))?;
    Ok(VDecompiler::open(file)?)
}

pub fn image_format(image: &Path) -> Result<()> {
    let decompiler = open(image)?;
    let label = match decompiler.image_format() {
        ImageFormat::Raw => "raw",
        ImageFormat::Vmdk => "vmdk",
    };
    println!("{label}");
    Ok(())
}

pub fn gpt(image: &Path) -> Result<()> {
    let decompiler = open(image)?;
    for entry in decompiler.gpt_entries() {
        let (offset, len) = entry.byte_window();
        println!(
            "{:<14} lba {:>10}-{:<10} offset {:<14} size {}",
            entry.name_string(),
            entry.first_lba,
            entry.last_lba,
            offset,
            len
        );
    }
    Ok(())
}

pub fn fs(image: &Path) -> Result<()> {
    let mut decompiler = open(image)?;
    let root = decompiler.stat("/")?;
    let entries = decompiler.tree("/")?;
    println!("root permissions: {}", root.permissions_string());
    println!("total entries:    {}", entries.len());
    println!("bytes used:       {}", decompiler.du("/")?);
    Ok(())
}

fn print_entry(entry: &DirListEntry) {
    println!("{} {:>10} {}", entry.permissions, entry.size, entry.name);
}

pub fn ls(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    for entry in decompiler.ls(path)? {
        print_entry(&entry);
    }
    Ok(())
}

pub fn cat(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    let data = decompiler.cat(path)?;
    io::stdout().write_all(&data)?;
    Ok(())
}

pub fn cp(image: &Path, path: &str, dest: &Path) -> Result<()> {
    let mut decompiler = open(image)?;
    decompiler.cp(path, dest)?;
    Ok(())
}

pub fn md5(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    println!("{}", decompiler.md5(path)?);
    Ok(())
}

pub fn stat(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    let inode = decompiler.stat(path)?;
    println!("type:        {:?}", inode.file_type());
    println!("permissions: {}", inode.permissions_string());
    println!("size:        {}", inode.full_size());
    println!("links:       {}", inode.links_count);
    Ok(())
}

pub fn tree(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    for (rel, entry) in decompiler.tree(path)? {
        println!("{} {}", entry.permissions, rel.display());
    }
    Ok(())
}

pub fn du(image: &Path, path: &str) -> Result<()> {
    let mut decompiler = open(image)?;
    println!("{}", decompiler.du(path)?);
    Ok(())
}
