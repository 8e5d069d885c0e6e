use serde::Serialize;
use tar::{EntryType, Header};

/// One row of the per-layer file listing. Serializes as the fixed-arity
/// positional array `[name, type, isDeleted, size, mtime, mode, uid, gid]`
/// that docker-registry 0.6.5 shipped.
#[derive(Debug, Clone, Serialize)]
pub struct FileRow(
    pub String,
    pub String,
    pub bool,
    pub u64,
    pub u64,
    pub u32,
    pub u64,
    pub u64,
);

#[derive(Debug, Clone)]
struct RawEntry {
    name: String,
    type_byte: u8,
    size: u64,
    mtime: u64,
    mode: u32,
    uid: u64,
    gid: u64,
}

/// Accumulates tar headers during a layer upload and renders the listing.
#[derive(Debug, Default)]
pub struct TarFilesInfo {
    entries: Vec<RawEntry>,
}

impl TarFilesInfo {
    pub fn new() -> Self {
        TarFilesInfo::default()
    }

    /// `name` must be the fully resolved entry path (long-name extensions
    /// applied), not the raw 100-byte header field.
    pub fn append(&mut self, name: &str, header: &Header) {
        self.entries.push(RawEntry {
            name: name.to_string(),
            type_byte: header.entry_type().as_byte(),
            size: header.size().unwrap_or(0),
            mtime: header.mtime().unwrap_or(0),
            mode: header.mode().unwrap_or(0),
            uid: header.uid().unwrap_or(0),
            gid: header.gid().unwrap_or(0),
        });
    }

    pub fn rows(&self) -> Vec<FileRow> {
        let mut rows = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut filename = entry.name.clone();
            let mut is_deleted = false;
            if filename == "." {
                filename = "/".to_string();
            }
            if let Some(rest) = filename.strip_prefix("./") {
                filename = format!("/{rest}");
            }
            if let Some(rest) = filename.strip_prefix("/.wh.") {
                filename = format!("/{rest}");
                is_deleted = true;
            }
            if filename.starts_with("/.wh.") {
                // Redundant after the rewrite above, but docker-registry
                // 0.6.5 skipped such rows and clients parse the listing.
                continue;
            }

            rows.push(FileRow(
                filename,
                type_string(entry.type_byte),
                is_deleted,
                entry.size,
                entry.mtime,
                entry.mode,
                entry.uid,
                entry.gid,
            ));
        }
        rows
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.rows())
    }
}

fn type_string(type_byte: u8) -> String {
    let mapped = match EntryType::new(type_byte) {
        EntryType::Regular => "f",
        EntryType::Link => "l",
        EntryType::Symlink => "s",
        EntryType::Char => "c",
        EntryType::Block => "b",
        EntryType::Directory => "d",
        EntryType::Fifo => "i",
        EntryType::Continuous => "t",
        EntryType::GNULongName | EntryType::GNULongLink | EntryType::GNUSparse => {
            return (type_byte as char).to_string()
        }
        _ => "u",
    };
    mapped.to_string()
}
