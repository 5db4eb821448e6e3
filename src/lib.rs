//! Ardat - streaming file archiver with layered per-entry filters
//!
//! Packs a file or directory tree into one self-describing archive and
//! restores it later. Each file's content can be pushed through a stack of
//! filters on its way into the archive; the stack is recorded in the
//! entry's header so extraction can undo it.
//!
//! ## Archive layout
//!
//! ```text
//! ardat            signature
//! 4                metadata line count
//! version 0.1
//! origins linux
//! <entry header>   class/property lines, blank-line terminated
//! <entry content>  exactly `size` bytes
//! ...              further entries, breadth first from the root
//! ```
//!
//! ## Filters
//!
//! - **AES**: CBC (16-byte IV) or CTR (8-byte nonce), PKCS#7 padded, with
//!   a SHA-256 digest of the plaintext appended as a trailer
//! - **Hex**: renders bytes as lowercase hex digits
//!
//! ## Example
//!
//! ```no_run
//! use ardat::cli::{archive_encrypted, extract_encrypted};
//! use ardat::pipeline::AesKey;
//! use std::path::Path;
//!
//! let key = AesKey::new(&[0x01; 16]).unwrap();
//! archive_encrypted(Path::new("photos"), Path::new("photos.ardat"), &key).unwrap();
//! extract_encrypted(Path::new("photos.ardat"), Path::new("restore"), &key).unwrap();
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod fs;
pub mod header;
pub mod pipeline;
pub mod tree;
pub mod window;

pub use archive::{ArchiveReader, ArchiveWriter};
pub use error::{ArdatError, Result};
pub use header::{ArchiveMetadata, EntryHeader};
pub use tree::{Tree, TreeBuilder, TreeWriter};
