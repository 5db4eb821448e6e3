//! Archive files: the reader indexes and rebuilds a tree, the writer
//! serialises one.

pub mod reader;
pub mod writer;

pub use reader::{ArchiveReader, EntryInfo};
pub use writer::ArchiveWriter;
