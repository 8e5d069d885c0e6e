use std::io::{Read, Seek, SeekFrom};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::{Archive, Header};

use super::files::TarFilesInfo;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Order-independent content digest over a tar stream plus a JSON seed.
///
/// Every entry contributes a fresh SHA-256 of a canonical header string
/// (plus the entry body for non-empty entries); the archive digest hashes
/// the seed followed by the lexicographically sorted per-entry digests.
pub struct TarSum {
    seed: Vec<u8>,
    hashes: Vec<String>,
}

impl TarSum {
    pub fn new(seed: &[u8]) -> Self {
        TarSum {
            seed: seed.to_vec(),
            hashes: Vec::new(),
        }
    }

    pub fn append(&mut self, name: &str, link_name: &str, header: &Header, body: &mut dyn Read) {
        let header_str = canonical_header(name, link_name, header);
        let mut sha = Sha256::new();
        if header.size().unwrap_or(0) > 0 {
            sha.update(header_str.as_bytes());
            if std::io::copy(body, &mut sha).is_err() {
                // Body contribution is discarded when the read fails.
                sha = Sha256::new();
                sha.update(header_str.as_bytes());
            }
        } else {
            sha.update(header_str.as_bytes());
        }
        self.hashes.push(format!("{:x}", sha.finalize()));
    }

    pub fn compute(&mut self) -> String {
        self.hashes.sort();
        let mut sha = Sha256::new();
        sha.update(&self.seed);
        for hash in &self.hashes {
            sha.update(hash.as_bytes());
        }
        format!("tarsum+sha256{:x}", sha.finalize())
    }
}

fn canonical_header(name: &str, link_name: &str, header: &Header) -> String {
    let mut s = format!("name{name}");
    if header.entry_type().is_dir() && !s.ends_with('/') {
        s.push('/');
    }
    s.push_str(&format!("mode{}", header.mode().unwrap_or(0)));
    s.push_str(&format!("uid{}", header.uid().unwrap_or(0)));
    s.push_str(&format!("gid{}", header.gid().unwrap_or(0)));
    s.push_str(&format!("size{}", header.size().unwrap_or(0)));
    s.push_str(&format!("mtime{}", header.mtime().unwrap_or(0)));
    s.push_str(&format!(
        "typeflag{}",
        header.entry_type().as_byte() as char
    ));
    s.push_str(&format!("linkname{link_name}"));
    s.push_str(&format!(
        "uname{}",
        header.username().ok().flatten().unwrap_or("")
    ));
    s.push_str(&format!(
        "gname{}",
        header.groupname().ok().flatten().unwrap_or("")
    ));
    s.push_str(&format!(
        "devmajor{}",
        header.device_major().ok().flatten().unwrap_or(0)
    ));
    s.push_str(&format!(
        "devminor{}",
        header.device_minor().ok().flatten().unwrap_or(0)
    ));
    s
}

/// Accumulators fed by a single pass over an uploaded layer: the tarsum and
/// the files listing. A malformed archive sets `error` and leaves whatever
/// was accumulated unusable; the blob itself stays valid.
pub struct TarInfo {
    pub sum: TarSum,
    pub files: TarFilesInfo,
    pub error: Option<String>,
}

impl TarInfo {
    pub fn new(seed: &[u8]) -> Self {
        TarInfo {
            sum: TarSum::new(seed),
            files: TarFilesInfo::new(),
            error: None,
        }
    }

    /// Parses the just-written layer blob. Accepts a plain tar or a
    /// gzip-wrapped tar, detected by the two-byte magic.
    pub fn load<R: Read + Seek>(&mut self, mut blob: R) {
        if let Err(err) = blob.seek(SeekFrom::Start(0)) {
            self.error = Some(err.to_string());
            return;
        }
        let mut magic = [0u8; 2];
        let gzipped = matches!(blob.read_exact(&mut magic), Ok(())) && magic == GZIP_MAGIC;
        if let Err(err) = blob.seek(SeekFrom::Start(0)) {
            self.error = Some(err.to_string());
            return;
        }
        if gzipped {
            self.scan(Archive::new(GzDecoder::new(blob)));
        } else {
            self.scan(Archive::new(blob));
        }
    }

    fn scan<R: Read>(&mut self, mut archive: Archive<R>) {
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(err) => {
                self.error = Some(err.to_string());
                return;
            }
        };
        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("tar scan aborted, digest and listing disabled: {err}");
                    self.error = Some(err.to_string());
                    return;
                }
            };
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let link_name = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let header = entry.header().clone();
            self.sum.append(&name, &link_name, &header, &mut entry);
            self.files.append(&name, &header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;
    use std::io::Write;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_370_000_000);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn tarsum_of(blob: &[u8], seed: &[u8]) -> String {
        let mut info = TarInfo::new(seed);
        info.load(Cursor::new(blob.to_vec()));
        assert!(info.error.is_none(), "unexpected tar error: {:?}", info.error);
        info.sum.compute()
    }

    #[test]
    fn test_digest_format() {
        let blob = build_tar(&[("a.txt", b"hello")]);
        let digest = tarsum_of(&blob, b"{}");
        assert!(digest.starts_with("tarsum+sha256"));
        assert_eq!(digest.len(), "tarsum+sha256".len() + 64);
    }

    #[test]
    fn test_entry_order_does_not_matter() {
        let forward = build_tar(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let backward = build_tar(&[("b.txt", b"beta"), ("a.txt", b"alpha")]);
        assert_eq!(tarsum_of(&forward, b"{}"), tarsum_of(&backward, b"{}"));
    }

    #[test]
    fn test_body_change_changes_digest() {
        let one = build_tar(&[("a.txt", b"alpha")]);
        let two = build_tar(&[("a.txt", b"alphb")]);
        assert_ne!(tarsum_of(&one, b"{}"), tarsum_of(&two, b"{}"));
    }

    #[test]
    fn test_seed_changes_digest() {
        let blob = build_tar(&[("a.txt", b"alpha")]);
        assert_ne!(tarsum_of(&blob, b"{\"id\":\"x\"}"), tarsum_of(&blob, b"{\"id\":\"y\"}"));
    }

    #[test]
    fn test_header_change_changes_digest() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o600);
        header.set_mtime(1_370_000_000);
        builder.append_data(&mut header, "a.txt", &b"alpha"[..]).unwrap();
        let changed_mode = builder.into_inner().unwrap();

        let baseline = build_tar(&[("a.txt", b"alpha")]);
        assert_ne!(tarsum_of(&baseline, b"{}"), tarsum_of(&changed_mode, b"{}"));
    }

    #[test]
    fn test_gzip_wrapping_is_transparent() {
        let blob = build_tar(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        assert_eq!(tarsum_of(&blob, b"{}"), tarsum_of(&gzip(&blob), b"{}"));
    }

    #[test]
    fn test_empty_entries_hash_header_only() {
        // Two archives whose only difference is an extra zero-size entry
        // must differ; the same empty entry twice must not.
        let with_empty = build_tar(&[("a.txt", b"alpha"), ("empty", b"")]);
        let without = build_tar(&[("a.txt", b"alpha")]);
        assert_ne!(tarsum_of(&with_empty, b"{}"), tarsum_of(&without, b"{}"));
        let with_empty_again = build_tar(&[("empty", b""), ("a.txt", b"alpha")]);
        assert_eq!(tarsum_of(&with_empty, b"{}"), tarsum_of(&with_empty_again, b"{}"));
    }

    #[test]
    fn test_malformed_archive_sets_error() {
        let mut info = TarInfo::new(b"{}");
        info.load(Cursor::new(vec![1u8; 700]));
        assert!(info.error.is_some());
    }

    #[test]
    fn test_files_listing_is_populated() {
        let blob = build_tar(&[("etc/hosts", b"127.0.0.1")]);
        let mut info = TarInfo::new(b"{}");
        info.load(Cursor::new(blob));
        let rows = info.files.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "etc/hosts");
        assert_eq!(rows[0].3, 9);
    }
}
