//! Image builder and decoder: GPT partitioning, VMDK sparse extents, the
//! ext2/3/4 reader, kernel bundle packaging, and the streaming image
//! builder (spec §2-§4).

pub mod binaryio;
pub mod bootconfig;
pub mod builder;
pub mod ext;
pub mod gpt;
pub mod kernel_bundle;
pub mod sparse;
pub mod vdecompiler;
pub mod vmdk;

pub use builder::ImageBuilder;
pub use vdecompiler::{DirListEntry, ImageFormat, VDecompiler};
