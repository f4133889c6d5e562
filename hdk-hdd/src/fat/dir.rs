//! Directory record parsing and long-name reconstruction.

use chrono::NaiveDate;
use enumflags2::BitFlags;

use super::structs::{
    ATTR_LONG_NAME, CaseFlag, DELETED_MARKER, DIR_RECORD_SIZE, FatAttribute, FatType, KANJI_E5_MARKER,
    LFN_CHARS_PER_FRAGMENT, LfnRecord, ShortDirRecord,
};
use crate::error::HddError;

/// A directory entry with its display name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Long name when a valid LFN sequence preceded the record, else the 8.3 name.
    pub name: String,
    pub short_name: String,
    pub record: ShortDirRecord,
    pub start_cluster: u32,
}

impl DirEntry {
    pub fn attributes(&self) -> BitFlags<FatAttribute> {
        self.record.attribute_flags()
    }

    pub fn is_dir(&self) -> bool {
        self.attributes().contains(FatAttribute::Directory)
    }

    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// Whether `name` refers to this entry, by long or short name, ignoring ASCII case.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.short_name.eq_ignore_ascii_case(name)
    }
}

/// Checksum of an 8.3 name as stored in each of its LFN fragments.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &c| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(c))
}

/// Render an 8.3 name for display: base, then `.ext` if the extension is
/// not blank, with NT lower-case flags applied.
pub fn short_display_name(raw: &[u8; 11], case: BitFlags<CaseFlag>) -> String {
    let mut name = *raw;
    if name[0] == KANJI_E5_MARKER {
        name[0] = DELETED_MARKER;
    }

    let render = |bytes: &[u8], lower: bool| -> String {
        let trimmed = match bytes.iter().rposition(|&b| b != b' ') {
            Some(end) => &bytes[..=end],
            None => &bytes[..0],
        };
        trimmed
            .iter()
            .map(|&b| {
                let c = b as char;
                if lower { c.to_ascii_lowercase() } else { c }
            })
            .collect()
    };

    let base = render(&name[..8], case.contains(CaseFlag::LowerBase));
    let ext = render(&name[8..], case.contains(CaseFlag::LowerExt));

    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

#[derive(Default)]
struct LongName {
    checksum: u8,
    fragments: Vec<(u8, [u16; LFN_CHARS_PER_FRAGMENT])>,
}

impl LongName {
    fn start(record: &LfnRecord) -> Self {
        Self {
            checksum: record.checksum,
            fragments: vec![(record.sequence(), record.chars())],
        }
    }

    fn push(&mut self, record: &LfnRecord) {
        self.fragments.push((record.sequence(), record.chars()));
    }

    /// Assemble the name if every fragment belongs to `short_checksum` and
    /// the sequence numbers run 1..=n.
    fn finish(mut self, short_checksum: u8) -> Option<String> {
        if self.checksum != short_checksum {
            return None;
        }

        self.fragments.sort_by_key(|(seq, _)| *seq);
        let contiguous = self
            .fragments
            .iter()
            .enumerate()
            .all(|(i, (seq, _))| usize::from(*seq) == i + 1);
        if !contiguous {
            return None;
        }

        let units: Vec<u16> = self
            .fragments
            .iter()
            .flat_map(|(_, chars)| chars.iter().copied())
            .take_while(|&c| c != 0x0000)
            .filter(|&c| c != 0xFFFF)
            .collect();

        Some(String::from_utf16_lossy(&units))
    }
}

/// Parse the records of one directory.
///
/// Scanning stops at the first record whose first byte is zero. Deleted
/// records and volume labels are skipped. A long name whose checksum does
/// not match the following short record is dropped in favour of the 8.3 name.
pub fn parse_directory(data: &[u8], fat_type: FatType) -> Result<Vec<DirEntry>, HddError> {
    let mut entries = Vec::new();
    let mut pending: Option<LongName> = None;

    for raw in data.chunks_exact(DIR_RECORD_SIZE) {
        match raw[0] {
            0x00 => break,
            DELETED_MARKER => {
                pending = None;
                continue;
            }
            _ => {}
        }

        if raw[0x0B] & 0x3F == ATTR_LONG_NAME {
            let lfn = LfnRecord::parse(raw)?;
            if lfn.is_last() {
                pending = Some(LongName::start(&lfn));
            } else if let Some(name) = pending.as_mut().filter(|n| n.checksum == lfn.checksum) {
                name.push(&lfn);
            } else {
                pending = None;
            }
            continue;
        }

        let record = ShortDirRecord::parse(raw)?;
        if record.attribute_flags().contains(FatAttribute::VolumeId) {
            pending = None;
            continue;
        }

        let short_name = short_display_name(&record.name, record.case_flags());
        let long_name = pending.take().and_then(|name| {
            let long = name.finish(lfn_checksum(&record.name));
            if long.is_none() {
                #[cfg(feature = "logging")]
                {
                    tracing::debug!(%short_name, "LFN checksum mismatch, using short name");
                }
            }
            long
        });

        entries.push(DirEntry {
            name: long_name.unwrap_or_else(|| short_name.clone()),
            short_name,
            start_cluster: record.start_cluster(fat_type),
            record,
        });
    }

    Ok(entries)
}

/// Convert a FAT date/time pair to Unix seconds, treating the stored local
/// time as UTC. A zero date means "not recorded" and yields 0, as does a
/// date or time with out-of-range fields.
pub fn fat_to_unix(time: u16, date: u16) -> i64 {
    if date == 0 {
        return 0;
    }

    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);

    let hours = u32::from(time >> 11);
    let minutes = u32::from((time >> 5) & 0x3F);
    let seconds = u32::from(time & 0x1F) * 2;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .map_or(0, |t| t.and_utc().timestamp())
}
