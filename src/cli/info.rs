use crate::archive::{ArchiveReader, EntryInfo};
use crate::error::Result;
use crate::header::Property;
use serde::Serialize;
use std::path::Path;

/// Machine-readable description of an archive
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveListing {
    pub file: String,
    pub metadata: Vec<Property>,
    pub entries: Vec<EntryListing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryListing {
    pub path: String,
    pub kind: &'static str,
    /// Filter tags, innermost first
    pub layers: Vec<String>,
    pub children: usize,
    pub size: u64,
    pub offset: u64,
}

impl EntryListing {
    fn from_entry(info: &EntryInfo) -> Self {
        Self {
            path: info.header.filepath.clone(),
            kind: if info.is_dir() { "directory" } else { "file" },
            layers: info
                .header
                .layers
                .iter()
                .skip(1)
                .map(|layer| layer.tag.clone())
                .collect(),
            children: info.header.children,
            size: info.header.size,
            offset: info.content_offset(),
        }
    }
}

/// Index an archive without touching entry content
pub fn list_entries(path: &Path) -> Result<ArchiveListing> {
    let reader = ArchiveReader::open(path)?;
    Ok(ArchiveListing {
        file: path.display().to_string(),
        metadata: reader.metadata().properties().to_vec(),
        entries: reader.entries().iter().map(EntryListing::from_entry).collect(),
    })
}

/// Listing as pretty-printed JSON
pub fn show_info_json(path: &Path) -> Result<String> {
    Ok(serde_json::to_string_pretty(&list_entries(path)?)?)
}

/// Display information about an archive
pub fn show_info(path: &Path) -> Result<String> {
    let listing = list_entries(path)?;
    let mut output = String::new();

    output.push_str("Ardat Archive Information\n");
    output.push_str("=========================\n\n");

    output.push_str(&format!("File: {}\n", listing.file));
    for property in &listing.metadata {
        output.push_str(&format!("{}: {}\n", capitalize(&property.key), property.value));
    }
    output.push('\n');

    let files = listing.entries.iter().filter(|e| e.kind == "file").count();
    let stored: u64 = listing.entries.iter().map(|e| e.size).sum();
    output.push_str("Contents:\n");
    output.push_str(&format!("  Entries: {}\n", listing.entries.len()));
    output.push_str(&format!("  Files: {}\n", files));
    output.push_str(&format!("  Directories: {}\n", listing.entries.len() - files));
    output.push_str(&format!("  Stored content: {}\n", format_size(stored)));
    output.push('\n');

    output.push_str("Entries:\n");
    for entry in &listing.entries {
        let layers = if entry.layers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.layers.join(" > "))
        };
        if entry.kind == "directory" {
            output.push_str(&format!("  {}/ ({} children)\n", entry.path, entry.children));
        } else {
            output.push_str(&format!("  {} {}{}\n", entry.path, format_size(entry.size), layers));
        }
    }

    Ok(output)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
