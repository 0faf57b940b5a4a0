//! A minimal, single-block-group ext2 [`FsCompiler`](vorteil_core::fscompiler::FsCompiler)
//! implementation: classic direct/indirect block pointers, no journal,
//! no extents. Exists to give the image builder a concrete, working
//! ROOT file system to compile and round-trip against; a production
//! file-system compiler is out of scope (spec Non-goals).

mod compiler;
mod tree;

pub use compiler::Ext2Compiler;
