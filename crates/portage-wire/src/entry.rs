//! Directory entry records carried by stat and list responses.

use crate::error::WireError;
use crate::payload::{PayloadReader, PayloadWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    File = 0,
    Dir = 1,
    Symlink = 2,
    /// Device nodes, fifos and other non-regular files.
    Special = 3,
}

impl EntryKind {
    fn from_wire(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            0 => EntryKind::File,
            1 => EntryKind::Dir,
            2 => EntryKind::Symlink,
            3 => EntryKind::Special,
            _ => return Err(WireError::BadValue("entry kind")),
        })
    }
}

/// One directory entry as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Presentation name; falls back to `name` when the protocol has no
    /// separate display form.
    pub display_name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Unix permission bits, -1 when unknown.
    pub permissions: i32,
    /// Seconds since the epoch, 0 when unknown.
    pub mtime_secs: i64,
    pub owner: String,
    pub group: String,
    /// Target path for symlinks, empty otherwise.
    pub link_target: String,
    pub mimetype: String,
}

impl DirEntry {
    /// Minimal entry with defaults for the optional fields.
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind,
            size: 0,
            permissions: -1,
            mtime_secs: 0,
            owner: String::new(),
            group: String::new(),
            link_target: String::new(),
            mimetype: String::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Dot-file by Unix convention; "." and ".." also count.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    pub fn write_to(&self, w: &mut PayloadWriter) {
        w.put_str(&self.name);
        w.put_str(&self.display_name);
        w.put_u8(self.kind as u8);
        w.put_u64(self.size);
        w.put_i32(self.permissions);
        w.put_i64(self.mtime_secs);
        w.put_str(&self.owner);
        w.put_str(&self.group);
        w.put_str(&self.link_target);
        w.put_str(&self.mimetype);
    }

    pub fn read_from(r: &mut PayloadReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            name: r.get_str("entry name")?,
            display_name: r.get_str("entry display name")?,
            kind: EntryKind::from_wire(r.get_u8("entry kind")?)?,
            size: r.get_u64("entry size")?,
            permissions: r.get_i32("entry permissions")?,
            mtime_secs: r.get_i64("entry mtime")?,
            owner: r.get_str("entry owner")?,
            group: r.get_str("entry group")?,
            link_target: r.get_str("entry link target")?,
            mimetype: r.get_str("entry mimetype")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        self.write_to(&mut w);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        DirEntry::read_from(&mut PayloadReader::new(payload))
    }
}

/// Encode a `Msg::ListEntries` batch: count plus repeated entries.
pub fn encode_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.put_u32(entries.len() as u32);
    for e in entries {
        e.write_to(&mut w);
    }
    w.into_vec()
}

pub fn decode_entries(payload: &[u8]) -> Result<Vec<DirEntry>, WireError> {
    let mut r = PayloadReader::new(payload);
    let count = r.get_u32("entry count")?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(DirEntry::read_from(&mut r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let mut e = DirEntry::new("notes.txt", EntryKind::File);
        e.size = 1234;
        e.permissions = 0o644;
        e.mtime_secs = 1_700_000_000;
        e.owner = "alice".into();
        e.mimetype = "text/plain".into();
        assert_eq!(DirEntry::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn batch_roundtrip_preserves_order() {
        let entries = vec![
            DirEntry::new(".", EntryKind::Dir),
            DirEntry::new("..", EntryKind::Dir),
            DirEntry::new("x", EntryKind::File),
            DirEntry::new("y", EntryKind::Dir),
        ];
        let back = decode_entries(&encode_entries(&entries)).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn hidden_detection() {
        assert!(DirEntry::new(".profile", EntryKind::File).is_hidden());
        assert!(DirEntry::new(".", EntryKind::Dir).is_hidden());
        assert!(!DirEntry::new("visible", EntryKind::File).is_hidden());
    }

    #[test]
    fn symlink_to_dir_is_not_a_dir() {
        let mut e = DirEntry::new("link", EntryKind::Symlink);
        e.link_target = "/somewhere".into();
        assert!(e.is_symlink());
        assert!(!e.is_dir());
    }
}
