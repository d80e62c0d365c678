//! Resource archives in three layouts.
//!
//! **Classic** follows the Macintosh resource fork:
//!
//! ```text
//! header    u32 data offset, u32 map offset, u32 data length, u32 map length,
//!           zero padded to 256 bytes
//! data      per resource: u32 length, bytes
//! map       16 byte header copy, u32 next map, u16 file ref, u16 attributes,
//!           u16 type list offset, u16 name list offset
//! types     u16 count - 1, per type: code, u16 count - 1, u16 reference list offset
//! refs      per resource: i16 id, u16 name offset (0xFFFF = none), u8 attributes,
//!           u24 data offset, u32 handle
//! names     pascal strings
//! ```
//!
//! **Extended** widens every offset, length and id to 64 bits and keeps
//! attributes:
//!
//! ```text
//! header    u64 version, u64 data offset, u64 map offset, u64 data length,
//!           u64 map length, zero padded to 256 bytes
//! data      per resource: u64 length, bytes
//! map       u64 group count, per group of (type code, attributes):
//!             code, u64 attribute count, (pstr key, pstr value)*,
//!             u64 resource count, (i64 id, u64 data offset, pstr name)*
//! ```
//!
//! **Rez** is DeRez-style text. Attributes are dropped from both classic and
//! rez output.

use crate::encoder::ByteWriter;
use crate::error::ArchiveError;
use crate::types::ByteOrder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Write as _};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

const HEADER_LENGTH: usize = 256;
const EXTENDED_VERSION: i64 = 1;
const CLASSIC_DATA_LIMIT: usize = 0x00FF_FFFF;
const REZ_BYTES_PER_LINE: usize = 16;
const NO_NAME: i64 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Extended,
    Classic,
    Rez,
}

impl Format {
    /// Classic and rez store ids as signed 16-bit values.
    pub fn supports_id(self, id: i64) -> bool {
        match self {
            Format::Extended => true,
            Format::Classic | Format::Rez => i16::try_from(id).is_ok(),
        }
    }

    pub fn keeps_attributes(self) -> bool {
        self == Format::Extended
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Extended => "extended",
            Format::Classic => "classic",
            Format::Rez => "rez",
        })
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "extended" => Ok(Format::Extended),
            "classic" => Ok(Format::Classic),
            "rez" => Ok(Format::Rez),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceEntry {
    pub type_code: String,
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceEntry {
    pub fn new(type_code: impl Into<String>, id: i64, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_code: type_code.into(),
            id,
            name: name.into(),
            data,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Collects encoded resources and lays them out in one of the formats.
#[derive(Debug, Clone, Default)]
pub struct ArchiveWriter {
    format: Format,
    entries: Vec<ResourceEntry>,
}

impl ArchiveWriter {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            entries: Vec::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    pub fn add(&mut self, entry: ResourceEntry) -> Result<(), ArchiveError> {
        if entry.type_code.len() != 4 {
            return Err(ArchiveError::InvalidTypeCode {
                code: entry.type_code,
            });
        }
        let duplicate = self.entries.iter().any(|existing| {
            existing.type_code == entry.type_code
                && existing.id == entry.id
                && existing.attributes == entry.attributes
        });
        if duplicate {
            return Err(ArchiveError::DuplicateEntry {
                type_code: entry.type_code,
                id: entry.id,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in output order: by type code, then id.
    fn sorted(&self) -> Vec<&ResourceEntry> {
        let mut entries: Vec<&ResourceEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            (&a.type_code, &a.attributes, a.id).cmp(&(&b.type_code, &b.attributes, b.id))
        });
        entries
    }

    /// Checks what the selected format can not represent.
    fn check(&self, entries: &[&ResourceEntry]) -> Result<(), ArchiveError> {
        for (index, entry) in entries.iter().enumerate() {
            if !self.format.supports_id(entry.id) {
                return Err(ArchiveError::IdOutOfRange {
                    type_code: entry.type_code.clone(),
                    id: entry.id,
                    format: self.format.to_string(),
                });
            }
            if entry.name.len() > usize::from(u8::MAX) {
                return Err(ArchiveError::NameTooLong {
                    name: entry.name.clone(),
                    limit: usize::from(u8::MAX),
                });
            }
            if self.format.keeps_attributes() {
                let long = entry
                    .attributes
                    .iter()
                    .flat_map(|(key, value)| [key, value])
                    .find(|text| text.len() > usize::from(u8::MAX));
                if let Some(text) = long {
                    return Err(ArchiveError::AttributeTooLong {
                        text: text.clone(),
                        limit: usize::from(u8::MAX),
                    });
                }
            } else {
                // Without attributes, entries that differed only by them collide.
                let collides = entries[..index]
                    .iter()
                    .any(|other| other.type_code == entry.type_code && other.id == entry.id);
                if collides {
                    return Err(ArchiveError::DuplicateEntry {
                        type_code: entry.type_code.clone(),
                        id: entry.id,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let entries = self.sorted();
        self.check(&entries)?;
        match self.format {
            Format::Extended => Ok(extended(&entries)),
            Format::Classic => classic(&entries),
            Format::Rez => Ok(rez(&entries).into_bytes()),
        }
    }

    /// Writes the archive to `path`, replacing it only once every byte has
    /// been written.
    pub fn write(&self, path: &Path) -> Result<(), ArchiveError> {
        let io_error = |error: &dyn Display| ArchiveError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        };
        let bytes = self.to_bytes()?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(directory).map_err(|e| io_error(&e))?;
        file.write_all(&bytes).map_err(|e| io_error(&e))?;
        file.flush().map_err(|e| io_error(&e))?;
        file.persist(path).map_err(|e| io_error(&e.error))?;
        log::info!(
            "wrote {} resources to {} ({} format, {} bytes)",
            self.entries.len(),
            path.display(),
            self.format,
            bytes.len()
        );
        Ok(())
    }
}

fn write_code(writer: &mut ByteWriter, code: &str) {
    let mut padded = [b' '; 4];
    for (slot, byte) in padded.iter_mut().zip(code.bytes()) {
        *slot = byte;
    }
    writer.write_bytes(&padded);
}

fn write_pstr(writer: &mut ByteWriter, text: &str) {
    let bytes = &text.as_bytes()[..text.len().min(usize::from(u8::MAX))];
    writer.write_u8(bytes.len() as u8);
    writer.write_bytes(bytes);
}

fn pad_header(writer: &mut ByteWriter) {
    let padding = HEADER_LENGTH.saturating_sub(writer.len());
    writer.write_bytes(&vec![0; padding]);
}

/// Groups sorted entries by type code and attributes.
fn groups<'a>(entries: &[&'a ResourceEntry], by_attributes: bool) -> Vec<Vec<&'a ResourceEntry>> {
    let mut groups: Vec<Vec<&ResourceEntry>> = Vec::new();
    for &entry in entries {
        let same = groups.last().and_then(|g| g.first()).is_some_and(|first| {
            first.type_code == entry.type_code && (!by_attributes || first.attributes == entry.attributes)
        });
        match groups.last_mut() {
            Some(group) if same => group.push(entry),
            _ => groups.push(vec![entry]),
        }
    }
    groups
}

fn extended(entries: &[&ResourceEntry]) -> Vec<u8> {
    let mut data = ByteWriter::new(ByteOrder::Big);
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(data.len());
        data.write_integer(entry.data.len() as i64, 8);
        data.write_bytes(&entry.data);
    }

    let mut map = ByteWriter::new(ByteOrder::Big);
    let groups = groups(entries, true);
    map.write_integer(groups.len() as i64, 8);
    let mut index = 0;
    for group in &groups {
        let first = group[0];
        write_code(&mut map, &first.type_code);
        map.write_integer(first.attributes.len() as i64, 8);
        for (key, value) in &first.attributes {
            write_pstr(&mut map, key);
            write_pstr(&mut map, value);
        }
        map.write_integer(group.len() as i64, 8);
        for entry in group {
            map.write_integer(entry.id, 8);
            map.write_integer(offsets[index] as i64, 8);
            write_pstr(&mut map, &entry.name);
            index += 1;
        }
    }

    let data = data.into_inner();
    let map = map.into_inner();
    let mut out = ByteWriter::new(ByteOrder::Big);
    out.write_integer(EXTENDED_VERSION, 8);
    out.write_integer(HEADER_LENGTH as i64, 8);
    out.write_integer((HEADER_LENGTH + data.len()) as i64, 8);
    out.write_integer(data.len() as i64, 8);
    out.write_integer(map.len() as i64, 8);
    pad_header(&mut out);
    out.write_bytes(&data);
    out.write_bytes(&map);
    out.into_inner()
}

fn classic(entries: &[&ResourceEntry]) -> Result<Vec<u8>, ArchiveError> {
    let too_large = || ArchiveError::DataTooLarge {
        format: Format::Classic.to_string(),
        limit: CLASSIC_DATA_LIMIT,
    };

    let mut data = ByteWriter::new(ByteOrder::Big);
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        if data.len() > CLASSIC_DATA_LIMIT {
            return Err(too_large());
        }
        offsets.push(data.len());
        let length = u32::try_from(entry.data.len()).map_err(|_| too_large())?;
        data.write_integer(i64::from(length), 4);
        data.write_bytes(&entry.data);
    }

    let groups = groups(entries, false);
    let type_list_length = 2 + 8 * groups.len();
    let reference_list_length = 12 * entries.len();

    let mut names = ByteWriter::new(ByteOrder::Big);
    let mut name_offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.name.is_empty() {
            name_offsets.push(NO_NAME);
        } else {
            // 0xFFFF marks a missing name, so the last usable offset is one below.
            if names.len() >= NO_NAME as usize {
                return Err(too_large());
            }
            name_offsets.push(names.len() as i64);
            write_pstr(&mut names, &entry.name);
        }
    }
    let names = names.into_inner();

    let map_header_length = 28;
    let name_list_offset = map_header_length + type_list_length + reference_list_length;
    let map_length = name_list_offset + names.len();
    if name_list_offset > usize::from(u16::MAX) {
        return Err(too_large());
    }
    let data = data.into_inner();
    let data_length = u32::try_from(data.len()).map_err(|_| too_large())?;

    let mut header = ByteWriter::new(ByteOrder::Big);
    header.write_integer(HEADER_LENGTH as i64, 4);
    header.write_integer((HEADER_LENGTH + data.len()) as i64, 4);
    header.write_integer(i64::from(data_length), 4);
    header.write_integer(map_length as i64, 4);
    let header = header.into_inner();

    let mut out = ByteWriter::new(ByteOrder::Big);
    out.write_bytes(&header);
    pad_header(&mut out);
    out.write_bytes(&data);

    // Resource map.
    out.write_bytes(&header);
    out.write_integer(0, 4);
    out.write_integer(0, 2);
    out.write_integer(0, 2);
    out.write_integer(map_header_length as i64, 2);
    out.write_integer(name_list_offset as i64, 2);

    // An empty type list stores a count of -1.
    out.write_integer(groups.len() as i64 - 1, 2);
    let mut reference_offset = type_list_length;
    for group in &groups {
        write_code(&mut out, &group[0].type_code);
        out.write_integer(group.len() as i64 - 1, 2);
        out.write_integer(reference_offset as i64, 2);
        reference_offset += 12 * group.len();
    }
    for (index, entry) in entries.iter().enumerate() {
        out.write_integer(entry.id, 2);
        out.write_integer(name_offsets[index], 2);
        out.write_u8(0);
        out.write_integer(offsets[index] as i64, 3);
        out.write_integer(0, 4);
    }
    out.write_bytes(&names);
    Ok(out.into_inner())
}

fn rez(entries: &[&ResourceEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = write!(out, "data '{}' ({}", entry.type_code, entry.id);
        if !entry.name.is_empty() {
            let escaped = entry.name.replace('\\', "\\\\").replace('"', "\\\"");
            let _ = write!(out, ", \"{escaped}\"");
        }
        out.push_str(") {\n");
        for line in entry.data.chunks(REZ_BYTES_PER_LINE) {
            let _ = writeln!(out, "\t$\"{}\"", crate::utils::hex_groups(line));
        }
        out.push_str("};\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sword() -> ResourceEntry {
        ResourceEntry::new("ITEM", 128, "Sword", vec![0x00, 0x80, 0x05, 0x53])
    }

    #[test]
    fn test_rez_text() {
        let mut writer = ArchiveWriter::new(Format::Rez);
        writer.add(sword()).unwrap();
        let text = String::from_utf8(writer.to_bytes().unwrap()).unwrap();
        assert_eq!(text, "data 'ITEM' (128, \"Sword\") {\n\t$\"0080 0553\"\n};\n\n");
    }

    #[test]
    fn test_classic_layout() {
        let mut writer = ArchiveWriter::new(Format::Classic);
        writer.add(sword()).unwrap();
        let bytes = writer.to_bytes().unwrap();

        // Header: data at 256, four bytes of payload plus its length.
        assert_eq!(&bytes[0..4], &[0, 0, 1, 0]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 8]);
        assert_eq!(&bytes[256..260], &[0, 0, 0, 4]);
        assert_eq!(&bytes[260..264], &[0x00, 0x80, 0x05, 0x53]);

        let map = 264;
        assert_eq!(&bytes[map..map + 16], &bytes[0..16]);
        // One type, one resource.
        assert_eq!(&bytes[map + 28..map + 30], &[0, 0]);
        assert_eq!(&bytes[map + 30..map + 34], b"ITEM");
        let reference = map + 28 + 10;
        assert_eq!(&bytes[reference..reference + 2], &[0, 128]);
        assert_eq!(&bytes[reference + 2..reference + 4], &[0, 0]);
        let names = reference + 12;
        assert_eq!(bytes[names], 5);
        assert_eq!(&bytes[names + 1..], b"Sword");
    }

    #[test]
    fn test_classic_rejects_wide_ids() {
        let mut writer = ArchiveWriter::new(Format::Classic);
        writer.add(ResourceEntry::new("ITEM", 40_000, "", Vec::new())).unwrap();
        assert!(matches!(
            writer.to_bytes(),
            Err(ArchiveError::IdOutOfRange { id: 40_000, .. })
        ));

        let mut writer = ArchiveWriter::new(Format::Extended);
        writer.add(ResourceEntry::new("ITEM", 40_000, "", Vec::new())).unwrap();
        assert!(writer.to_bytes().is_ok());
    }

    #[test]
    fn test_classic_rejects_unaddressable_names() {
        let mut writer = ArchiveWriter::new(Format::Classic);
        for id in 0..300 {
            writer
                .add(ResourceEntry::new("ITEM", id, "n".repeat(250), Vec::new()))
                .unwrap();
        }
        assert!(matches!(
            writer.to_bytes(),
            Err(ArchiveError::DataTooLarge { .. })
        ));

        // Names that fit below 0xFFFF still lay out.
        let mut writer = ArchiveWriter::new(Format::Classic);
        for id in 0..200 {
            writer
                .add(ResourceEntry::new("ITEM", id, "n".repeat(250), Vec::new()))
                .unwrap();
        }
        assert!(writer.to_bytes().is_ok());
    }

    #[test]
    fn test_extended_rejects_long_attributes() {
        let mut writer = ArchiveWriter::new(Format::Extended);
        writer
            .add(sword().with_attribute("container", "m".repeat(256)))
            .unwrap();
        assert!(matches!(
            writer.to_bytes(),
            Err(ArchiveError::AttributeTooLong { limit: 255, .. })
        ));

        let mut writer = ArchiveWriter::new(Format::Extended);
        writer
            .add(sword().with_attribute("k".repeat(300), "mods"))
            .unwrap();
        assert!(matches!(
            writer.to_bytes(),
            Err(ArchiveError::AttributeTooLong { .. })
        ));

        let mut writer = ArchiveWriter::new(Format::Extended);
        writer
            .add(sword().with_attribute("container", "m".repeat(255)))
            .unwrap();
        assert!(writer.to_bytes().is_ok());
    }

    #[test]
    fn test_extended_keeps_containers_apart() {
        let mut writer = ArchiveWriter::new(Format::Extended);
        writer.add(sword()).unwrap();
        writer.add(sword().with_attribute("container", "mods")).unwrap();
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(&bytes[0..8], &1u64.to_be_bytes());
        let map_offset = u64::from_be_bytes(bytes[16..24].try_into().unwrap()) as usize;
        // Two groups: plain ITEM and ITEM with a container attribute.
        assert_eq!(&bytes[map_offset..map_offset + 8], &2u64.to_be_bytes());

        let mut classic = ArchiveWriter::new(Format::Classic);
        classic.add(sword()).unwrap();
        classic.add(sword().with_attribute("container", "mods")).unwrap();
        assert!(matches!(
            classic.to_bytes(),
            Err(ArchiveError::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn test_duplicates_and_codes() {
        let mut writer = ArchiveWriter::new(Format::Extended);
        writer.add(sword()).unwrap();
        assert!(matches!(
            writer.add(sword()),
            Err(ArchiveError::DuplicateEntry { id: 128, .. })
        ));
        assert!(matches!(
            writer.add(ResourceEntry::new("LONGER", 1, "", Vec::new())),
            Err(ArchiveError::InvalidTypeCode { .. })
        ));
    }

    #[test]
    fn test_write_is_atomic() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.rsrc");
        let mut writer = ArchiveWriter::new(Format::Classic);
        writer.add(sword()).unwrap();
        writer.write(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), writer.to_bytes().unwrap());

        // A failing layout leaves the existing file alone.
        writer
            .add(ResourceEntry::new("ITEM", 70_000, "", Vec::new()))
            .unwrap();
        assert!(writer.write(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap().len(), 256 + 8 + 28 + 10 + 12 + 6);
    }

    #[test]
    fn test_write_to_missing_directory() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("missing").join("out.rsrc");
        let writer = ArchiveWriter::new(Format::Extended);
        assert!(matches!(writer.write(&path), Err(ArchiveError::Io { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("classic".parse::<Format>(), Ok(Format::Classic));
        assert!("fork".parse::<Format>().is_err());
        assert_eq!(Format::Rez.to_string(), "rez");
    }
}
