//! In-memory staging tree accumulated by `Mkdir`/`AddFile`/`AddSymlink`
//! before `Commit` freezes it for layout (spec §2 "FSCompiler capability").

use std::collections::BTreeMap;
use std::path::{Component, Path};

use vorteil_core::error::{Result, VorteilError};

pub enum Node {
    Dir(BTreeMap<String, Node>),
    File { contents: Vec<u8>, mode: u32 },
    Symlink { target: String },
}

impl Node {
    fn dir_mut(&mut self) -> Result<&mut BTreeMap<String, Node>> {
        match self {
            Node::Dir(children) => Ok(children),
            _ => Err(VorteilError::InvalidInput("path component is not a directory".into())),
        }
    }
}

fn components_of(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => out.push(s.to_string_lossy().to_string()),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(VorteilError::InvalidInput(format!(
                    "path must be absolute and normalized: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(out)
}

/// Root directory of the staging tree.
pub struct Tree {
    pub root: BTreeMap<String, Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self { root: BTreeMap::new() }
    }

    fn dir_for_parent<'a>(&'a mut self, components: &[String]) -> Result<&'a mut BTreeMap<String, Node>> {
        let mut current = &mut self.root;
        for name in components {
            current = current
                .entry(name.clone())
                .or_insert_with(|| Node::Dir(BTreeMap::new()))
                .dir_mut()?;
        }
        Ok(current)
    }

    pub fn mkdir(&mut self, path: &Path) -> Result<()> {
        let components = components_of(path)?;
        self.dir_for_parent(&components)?;
        Ok(())
    }

    pub fn add_file(&mut self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        let mut components = components_of(path)?;
        let name = components.pop().ok_or_else(|| VorteilError::InvalidInput("empty file path".into()))?;
        let parent = self.dir_for_parent(&components)?;
        parent.insert(name, Node::File { contents: contents.to_vec(), mode });
        Ok(())
    }

    pub fn add_symlink(&mut self, path: &Path, target: &str) -> Result<()> {
        let mut components = components_of(path)?;
        let name = components.pop().ok_or_else(|| VorteilError::InvalidInput("empty symlink path".into()))?;
        let parent = self.dir_for_parent(&components)?;
        parent.insert(name, Node::Symlink { target: target.to_string() });
        Ok(())
    }

    /// Counts every node (directories, files, symlinks) excluding the
    /// root, which gets its own fixed inode (2).
    pub fn node_count(&self) -> u64 {
        fn walk(children: &BTreeMap<String, Node>) -> u64 {
            let mut count = 0u64;
            for node in children.values() {
                count += 1;
                if let Node::Dir(sub) = node {
                    count += walk(sub);
                }
            }
            count
        }
        walk(&self.root)
    }
}
