//! Textual headers
//!
//! An archive opens with a metadata block:
//!
//! ```text
//! ardat
//! <N>              total metadata lines, counting these two
//! version 0.1
//! origins linux
//! ```
//!
//! and each entry is preceded by a blank-line terminated header whose
//! layers run base first, each introduced by its `class` line:
//!
//! ```text
//! class FileEntity
//! create-time 1
//! modify-time 1
//! access-time 1
//! class AESEntity
//! strategy crypto.AESCBCStrategy
//! iv128 000102030405060708090a0b0c0d0e0f
//! class none
//! filepath root/file
//! children 0
//! size 0000000000000030
//!
//! ```

use crate::error::{ArdatError, Result};
use serde::Serialize;
use std::io::BufRead;

pub const SIGNATURE: &str = "ardat";
pub const FORMAT_VERSION: &str = "0.1";

/// Upper bound on one entry header, terminator included
pub const MAX_HEADER_LEN: usize = 5 * 1024;
/// Upper bound on one header line, newline included
pub const MAX_LINE_LEN: usize = 1024;

pub const CLASS: &str = "class";
pub const NONE_TAG: &str = "none";
pub const FILEPATH: &str = "filepath";
pub const CHILDREN: &str = "children";
pub const SIZE: &str = "size";
pub const CREATE_TIME: &str = "create-time";
pub const MODIFY_TIME: &str = "modify-time";
pub const ACCESS_TIME: &str = "access-time";
pub const STRATEGY: &str = "strategy";

/// Width of the hex `size` field
pub const SIZE_DIGITS: usize = 16;

/// A `key value` header line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split a line at its first space. Keys may not be empty.
    pub fn parse(line: &str) -> Result<Self> {
        match line.split_once(' ') {
            Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
            _ => Err(ArdatError::corrupted(format!(
                "malformed header line: {:?}",
                line
            ))),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.key, self.value)
    }
}

/// First value stored under `key`
pub fn find<'a>(properties: &'a [Property], key: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|p| p.key == key)
        .map(|p| p.value.as_str())
}

/// Like [`find`], but a missing key is corruption
pub fn require<'a>(properties: &'a [Property], key: &str) -> Result<&'a str> {
    find(properties, key)
        .ok_or_else(|| ArdatError::corrupted(format!("header property {} is missing", key)))
}

/// One `class <tag>` section of an entry header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderLayer {
    pub tag: String,
    pub properties: Vec<Property>,
}

impl HeaderLayer {
    pub fn new(tag: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            tag: tag.into(),
            properties,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        find(&self.properties, key)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        require(&self.properties, key)
            .map_err(|_| ArdatError::corrupted(format!("{} layer lacks {}", self.tag, key)))
    }
}

/// Parsed entry header. `layers` runs base first and never contains `none`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub layers: Vec<HeaderLayer>,
    pub filepath: String,
    pub children: usize,
    pub size: u64,
}

impl EntryHeader {
    /// Build a header from a flat property list in which `class` entries
    /// open each layer, as produced by the entity tree.
    pub fn from_properties(
        properties: &[Property],
        filepath: impl Into<String>,
        children: usize,
    ) -> Result<Self> {
        let mut layers: Vec<HeaderLayer> = Vec::new();
        for property in properties {
            if property.key == CLASS {
                layers.push(HeaderLayer::new(property.value.clone(), Vec::new()));
            } else {
                match layers.last_mut() {
                    Some(layer) => layer.properties.push(property.clone()),
                    None => {
                        return Err(ArdatError::usage(format!(
                            "property {} precedes any class line",
                            property.key
                        )))
                    }
                }
            }
        }
        Ok(Self {
            layers,
            filepath: filepath.into(),
            children,
            size: 0,
        })
    }

    /// Everything up to, but excluding, the `size` line
    pub fn prefix(&self) -> String {
        let mut out = String::new();
        for layer in &self.layers {
            out.push_str(&format!("{} {}\n", CLASS, layer.tag));
            for property in &layer.properties {
                out.push_str(&property.to_line());
            }
        }
        out.push_str(&format!("{} {}\n", CLASS, NONE_TAG));
        out.push_str(&format!("{} {}\n", FILEPATH, self.filepath));
        out.push_str(&format!("{} {}\n", CHILDREN, self.children));
        out
    }

    /// Full header text, blank terminator included
    pub fn serialize(&self) -> String {
        let mut out = self.prefix();
        out.push_str(&size_line(self.size));
        out.push('\n');
        out
    }

    /// Parse header text (with or without its blank terminator).
    ///
    /// Lines are read bottom up: properties pile up until a `class` line
    /// claims them, so every layer owns the lines beneath its tag.
    pub fn parse(text: &str) -> Result<Self> {
        let mut layers = Vec::new();
        let mut pending = Vec::new();

        for line in text.split('\n').rev() {
            if line.is_empty() {
                continue;
            }
            let property = Property::parse(line)?;
            if property.key == CLASS {
                if property.value.is_empty() {
                    return Err(ArdatError::corrupted("class line without a tag"));
                }
                pending.reverse();
                layers.push(HeaderLayer::new(property.value, std::mem::take(&mut pending)));
            } else {
                pending.push(property);
            }
        }
        if !pending.is_empty() {
            return Err(ArdatError::corrupted("header properties precede any class line"));
        }
        layers.reverse();

        let reserved = match layers.pop() {
            Some(layer) if layer.tag == NONE_TAG => layer,
            _ => return Err(ArdatError::corrupted("header does not end with class none")),
        };
        if layers.iter().any(|l| l.tag == NONE_TAG) {
            return Err(ArdatError::corrupted("class none appears more than once"));
        }

        let mut filepath = None;
        let mut children = None;
        let mut size = None;
        for property in reserved.properties {
            let slot = match property.key.as_str() {
                FILEPATH => &mut filepath,
                CHILDREN => &mut children,
                SIZE => &mut size,
                other => {
                    return Err(ArdatError::corrupted(format!(
                        "unexpected property {} after class none",
                        other
                    )))
                }
            };
            if slot.replace(property.value).is_some() {
                return Err(ArdatError::corrupted(format!(
                    "duplicate {} property",
                    property.key
                )));
            }
        }

        let filepath = filepath
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ArdatError::corrupted("header property filepath is missing"))?;
        let size = parse_size(
            &size.ok_or_else(|| ArdatError::corrupted("header property size is missing"))?,
        )?;
        let children = match children {
            Some(text) => text.parse::<usize>().map_err(|_| {
                ArdatError::corrupted(format!("children count {:?} is not a number", text))
            })?,
            None => 0,
        };

        Ok(Self {
            layers,
            filepath,
            children,
            size,
        })
    }

    /// Base layer tag (`DirectoryEntity` or `FileEntity`)
    pub fn base(&self) -> Option<&HeaderLayer> {
        self.layers.first()
    }
}

/// `size <16 hex digits>` line
pub fn size_line(size: u64) -> String {
    format!("{} {:016x}\n", SIZE, size)
}

/// Exactly sixteen lowercase hex digits
pub fn parse_size(text: &str) -> Result<u64> {
    let well_formed = text.len() == SIZE_DIGITS
        && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !well_formed {
        return Err(ArdatError::corrupted(format!("malformed size field {:?}", text)));
    }
    u64::from_str_radix(text, 16)
        .map_err(|_| ArdatError::corrupted(format!("malformed size field {:?}", text)))
}

/// Read one `\n`-terminated line of at most `max` bytes.
///
/// Returns the line without its newline plus the number of bytes consumed,
/// or `None` at a clean end of input.
pub fn read_line<R: BufRead>(reader: &mut R, max: usize) -> Result<Option<(String, usize)>> {
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(ArdatError::corrupted("archive ends inside a header line"));
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };
        if line.len() + chunk.len() > max {
            return Err(ArdatError::corrupted(format!(
                "header line exceeds {} bytes",
                max
            )));
        }
        line.extend_from_slice(chunk);
        let used = chunk.len();
        reader.consume(used);

        if done {
            let consumed = line.len();
            line.pop();
            let text = String::from_utf8(line)
                .map_err(|_| ArdatError::corrupted("header line is not valid UTF-8"))?;
            return Ok(Some((text, consumed)));
        }
    }
}

/// Read one entry header up to and including its blank terminator.
///
/// Returns `None` when the input ends exactly before a header, otherwise
/// the parsed header and its length on the wire.
pub fn read_entry_header<R: BufRead>(reader: &mut R) -> Result<Option<(EntryHeader, usize)>> {
    let mut text = String::new();
    let mut total = 0usize;
    loop {
        let budget = (MAX_HEADER_LEN - total).min(MAX_LINE_LEN);
        let (line, consumed) = match read_line(reader, budget)? {
            Some(read) => read,
            None if total == 0 => return Ok(None),
            None => return Err(ArdatError::corrupted("archive ends inside an entry header")),
        };
        total += consumed;
        if line.is_empty() {
            if total == 1 {
                return Err(ArdatError::corrupted("empty entry header"));
            }
            return Ok(Some((EntryHeader::parse(&text)?, total)));
        }
        if total >= MAX_HEADER_LEN {
            return Err(ArdatError::corrupted(format!(
                "entry header exceeds {} bytes",
                MAX_HEADER_LEN
            )));
        }
        text.push_str(&line);
        text.push('\n');
    }
}

/// Archive-level metadata block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMetadata {
    properties: Vec<Property>,
}

impl ArchiveMetadata {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
        }
    }

    /// Metadata describing archives written on this host
    pub fn for_host() -> Self {
        let mut metadata = Self::new();
        metadata.set("version", FORMAT_VERSION);
        metadata.set("origins", std::env::consts::OS);
        metadata
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        find(&self.properties, key)
    }

    /// Replace the value under `key`, appending it if absent
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(property) => property.value = value,
            None => self.properties.push(Property::new(key, value)),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    pub fn origins(&self) -> Option<&str> {
        self.get("origins")
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Total line count, as recorded in the second line
    pub fn line_count(&self) -> usize {
        self.properties.len() + 2
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{}\n{}\n", SIGNATURE, self.line_count());
        for property in &self.properties {
            out.push_str(&property.to_line());
        }
        out
    }

    /// Read the metadata block, returning it and its length in bytes
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<(Self, usize)> {
        let mut next = |what: &str| -> Result<(String, usize)> {
            read_line(reader, MAX_LINE_LEN)?
                .ok_or_else(|| ArdatError::corrupted(format!("archive ends before {}", what)))
        };

        let (signature, mut total) = next("its signature")?;
        if signature != SIGNATURE {
            return Err(ArdatError::corrupted(format!(
                "bad signature {:?}, expected {:?}",
                signature, SIGNATURE
            )));
        }

        let (count, consumed) = next("the metadata line count")?;
        total += consumed;
        let count: usize = count.trim().parse().map_err(|_| {
            ArdatError::corrupted(format!("metadata line count {:?} is not a number", count))
        })?;
        if count < 2 {
            return Err(ArdatError::corrupted(format!(
                "metadata line count {} is below 2",
                count
            )));
        }

        let mut metadata = Self::new();
        for _ in 2..count {
            let (line, consumed) = next("the end of the metadata")?;
            total += consumed;
            metadata.properties.push(Property::parse(&line)?);
        }
        Ok((metadata, total))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::read_from(&mut text.as_bytes()).map(|(metadata, _)| metadata)
    }
}

impl Default for ArchiveMetadata {
    fn default() -> Self {
        Self::for_host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> EntryHeader {
        EntryHeader {
            layers: vec![
                HeaderLayer::new(
                    "FileEntity",
                    vec![
                        Property::new(CREATE_TIME, "1"),
                        Property::new(MODIFY_TIME, "1"),
                        Property::new(ACCESS_TIME, "1"),
                    ],
                ),
                HeaderLayer::new(
                    "AESEntity",
                    vec![
                        Property::new(STRATEGY, "crypto.AESCBCStrategy"),
                        Property::new("iv128", "000102030405060708090a0b0c0d0e0f"),
                    ],
                ),
                HeaderLayer::new("PrettyEntity", vec![]),
            ],
            filepath: "root/file".into(),
            children: 0,
            size: 48,
        }
    }

    #[test]
    fn test_serialize_layout() {
        let text = sample().serialize();
        assert_eq!(
            text,
            "class FileEntity\ncreate-time 1\nmodify-time 1\naccess-time 1\n\
             class AESEntity\nstrategy crypto.AESCBCStrategy\n\
             iv128 000102030405060708090a0b0c0d0e0f\nclass PrettyEntity\n\
             class none\nfilepath root/file\nchildren 0\nsize 0000000000000030\n\n"
        );
    }

    #[test]
    fn test_parse_inverts_serialize() {
        let header = sample();
        assert_eq!(EntryHeader::parse(&header.serialize()).unwrap(), header);
    }

    #[test]
    fn test_carriage_return_survives_in_filepath() {
        let mut header = sample();
        header.filepath = "root/note\r".into();
        let parsed = EntryHeader::parse(&header.serialize()).unwrap();
        assert_eq!(parsed.filepath, "root/note\r");

        let wire = header.serialize();
        let mut reader = wire.as_bytes();
        let (read, _) = read_entry_header(&mut reader).unwrap().unwrap();
        assert_eq!(read.filepath, "root/note\r");
    }

    #[test]
    fn test_from_properties_groups_by_class() {
        let props = vec![
            Property::new(CLASS, "DirectoryEntity"),
            Property::new(MODIFY_TIME, "5"),
        ];
        let header = EntryHeader::from_properties(&props, "dir1", 2).unwrap();
        assert_eq!(header.layers.len(), 1);
        assert_eq!(header.layers[0].get(MODIFY_TIME), Some("5"));
        assert_eq!(header.children, 2);

        let orphan = vec![Property::new(MODIFY_TIME, "5")];
        assert!(EntryHeader::from_properties(&orphan, "x", 0).is_err());
    }

    #[test]
    fn test_missing_reserved_properties() {
        let no_size = "class FileEntity\nclass none\nfilepath f\nchildren 0\n";
        assert!(EntryHeader::parse(no_size).unwrap_err().is_corrupted());

        let no_path = "class FileEntity\nclass none\nchildren 0\nsize 0000000000000000\n";
        assert!(EntryHeader::parse(no_path).unwrap_err().is_corrupted());

        let no_none = "class FileEntity\nfilepath f\nsize 0000000000000000\n";
        assert!(EntryHeader::parse(no_none).unwrap_err().is_corrupted());
    }

    #[test]
    fn test_duplicate_and_stray_properties() {
        let dup = "class FileEntity\nclass none\nfilepath f\nfilepath g\nsize 0000000000000000\n";
        assert!(EntryHeader::parse(dup).unwrap_err().is_corrupted());

        let stray = "modify-time 1\nclass FileEntity\nclass none\nfilepath f\nsize 0000000000000000\n";
        assert!(EntryHeader::parse(stray).unwrap_err().is_corrupted());
    }

    #[test]
    fn test_size_field_format() {
        assert_eq!(parse_size("0000000000000007").unwrap(), 7);
        assert_eq!(parse_size("00000000000000ff").unwrap(), 255);
        assert!(parse_size("00000000000000FF").is_err());
        assert!(parse_size("7").is_err());
        assert!(parse_size("000000000000000g").is_err());
        assert_eq!(size_line(6), "size 0000000000000006\n");
    }

    #[test]
    fn test_read_entry_header_reports_length() {
        let text = sample().serialize();
        let mut input = Cursor::new(format!("{}payload", text).into_bytes());
        let (header, len) = read_entry_header(&mut input).unwrap().unwrap();
        assert_eq!(header, sample());
        assert_eq!(len, text.len());

        let mut empty = Cursor::new(Vec::new());
        assert!(read_entry_header(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_unterminated_header_is_corruption() {
        let mut input = Cursor::new(b"class FileEntity\nclass none\n".to_vec());
        assert!(read_entry_header(&mut input).unwrap_err().is_corrupted());
    }

    #[test]
    fn test_header_caps() {
        let long_line = format!("class FileEntity\nnote {}\n\n", "x".repeat(MAX_LINE_LEN));
        let mut input = Cursor::new(long_line.into_bytes());
        assert!(read_entry_header(&mut input).unwrap_err().is_corrupted());

        let mut many = String::from("class FileEntity\n");
        while many.len() <= MAX_HEADER_LEN {
            many.push_str(&format!("note {}\n", "y".repeat(100)));
        }
        many.push('\n');
        let mut input = Cursor::new(many.into_bytes());
        let err = read_entry_header(&mut input).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_metadata_round_trip_keeps_unknown_keys() {
        let text = "ardat\n5\nversion 0.1\norigins linux\nflavour vanilla\n";
        let metadata = ArchiveMetadata::parse(text).unwrap();
        assert_eq!(metadata.version(), Some("0.1"));
        assert_eq!(metadata.origins(), Some("linux"));
        assert_eq!(metadata.get("flavour"), Some("vanilla"));
        assert_eq!(metadata.serialize(), text);
    }

    #[test]
    fn test_metadata_for_host() {
        let metadata = ArchiveMetadata::for_host();
        assert_eq!(metadata.line_count(), 4);
        assert!(metadata
            .serialize()
            .starts_with("ardat\n4\nversion 0.1\norigins "));
    }

    #[test]
    fn test_metadata_failures() {
        let bad_signature = "notar\n4\nversion 0.1\norigins linux\n";
        assert!(ArchiveMetadata::parse(bad_signature).unwrap_err().is_corrupted());

        let bad_count = "ardat\nfour\nversion 0.1\norigins linux\n";
        assert!(ArchiveMetadata::parse(bad_count).unwrap_err().is_corrupted());

        let no_space = "ardat\n4\nversion0.1\norigins linux\n";
        assert!(ArchiveMetadata::parse(no_space).unwrap_err().is_corrupted());

        let short = "ardat\n6\nversion 0.1\n";
        assert!(ArchiveMetadata::parse(short).unwrap_err().is_corrupted());
    }

    #[test]
    fn test_metadata_reports_length() {
        let text = "ardat\n3\nversion 0.1\nrest of archive";
        let (metadata, len) = ArchiveMetadata::read_from(&mut text.as_bytes()).unwrap();
        assert_eq!(metadata.version(), Some("0.1"));
        assert_eq!(len, "ardat\n3\nversion 0.1\n".len());
    }
}
