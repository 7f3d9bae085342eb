//! Deterministic bundle encoding.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! "PRMBNDL1"
//! u32 manifest_len | manifest (canonical JSON)
//! u32 file_count
//! per file, sorted by path:
//!   u32 path_len | path (UTF-8) | u64 content_len | content
//! ```
//!
//! Identical manifest and file contents always produce identical bytes, and
//! therefore an identical content hash, regardless of input file order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::{Artifact, AssetManifest, BundleError, ExportedFile};

const MAGIC: &[u8; 8] = b"PRMBNDL1";

/// Lowercase hex SHA-256 of the given bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Package a manifest and exported files into an artifact.
pub fn package(manifest: &AssetManifest, files: &[ExportedFile]) -> Result<Artifact, BundleError> {
    let sorted = sort_files(files)?;
    let bytes = encode_sorted(manifest, &sorted)?;
    let hash = content_hash(&bytes);
    let files = sorted.into_iter().cloned().collect();
    Ok(Artifact::from_parts(hash, manifest.clone(), files, bytes))
}

/// Decode bundle bytes back into the manifest and files.
pub fn decode_bundle(bytes: &[u8]) -> Result<(AssetManifest, Vec<ExportedFile>), BundleError> {
    let mut reader = Reader::new(bytes);

    if reader.take(MAGIC.len(), "magic")? != MAGIC {
        return Err(BundleError::BadMagic);
    }

    let manifest_len = reader.u32("manifest length")? as usize;
    let manifest_bytes = reader.take(manifest_len, "manifest")?;
    let manifest: AssetManifest = serde_json::from_slice(manifest_bytes)
        .map_err(|e| BundleError::InvalidManifest(e.to_string()))?;

    let count = reader.u32("file count")?;
    let mut files: Vec<ExportedFile> = Vec::new();
    for _ in 0..count {
        let path_len = reader.u32("path length")? as usize;
        let path = std::str::from_utf8(reader.take(path_len, "path")?)
            .map_err(|_| BundleError::InvalidPath("<non-utf8>".to_string()))?
            .to_string();
        validate_path(&path)?;
        if files.iter().any(|f| f.path == path) {
            return Err(BundleError::DuplicatePath(path));
        }

        let content_len = reader.u64("content length")?;
        let content_len = usize::try_from(content_len)
            .map_err(|_| BundleError::TooLarge(path.clone()))?;
        let contents = reader.take(content_len, "file contents")?.to_vec();
        files.push(ExportedFile { path, contents });
    }

    if !reader.is_empty() {
        return Err(BundleError::TrailingBytes);
    }

    Ok((manifest, files))
}

/// Decode fetched bytes into an artifact, hashing what was actually received.
pub(crate) fn artifact_from_bytes(bytes: Vec<u8>) -> Result<Artifact, BundleError> {
    let (manifest, files) = decode_bundle(&bytes)?;
    let hash = content_hash(&bytes);
    Ok(Artifact::from_parts(hash, manifest, files, bytes))
}

fn sort_files(files: &[ExportedFile]) -> Result<Vec<&ExportedFile>, BundleError> {
    let mut by_path: BTreeMap<&str, &ExportedFile> = BTreeMap::new();
    for file in files {
        validate_path(&file.path)?;
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(BundleError::DuplicatePath(file.path.clone()));
        }
    }
    Ok(by_path.into_values().collect())
}

fn encode_sorted(manifest: &AssetManifest, files: &[&ExportedFile]) -> Result<Vec<u8>, BundleError> {
    let manifest_json = canonical_json(manifest)?;

    let payload: usize = files.iter().map(|f| f.path.len() + f.contents.len() + 12).sum();
    let mut out = Vec::with_capacity(MAGIC.len() + 8 + manifest_json.len() + payload);

    out.extend_from_slice(MAGIC);
    write_u32(&mut out, manifest_json.len(), "manifest")?;
    out.extend_from_slice(manifest_json.as_bytes());
    write_u32(&mut out, files.len(), "file count")?;

    for file in files {
        write_u32(&mut out, file.path.len(), &file.path)?;
        out.extend_from_slice(file.path.as_bytes());
        out.extend_from_slice(&(file.contents.len() as u64).to_be_bytes());
        out.extend_from_slice(&file.contents);
    }

    Ok(out)
}

/// Compact JSON with object keys sorted.
///
/// Goes through `serde_json::Value`, whose map is a `BTreeMap` as long as the
/// `preserve_order` feature stays off.
fn canonical_json<T: serde::Serialize>(value: &T) -> Result<String, BundleError> {
    serde_json::to_value(value)
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|e| BundleError::InvalidManifest(e.to_string()))
}

fn write_u32(out: &mut Vec<u8>, value: usize, what: &str) -> Result<(), BundleError> {
    let value = u32::try_from(value).map_err(|_| BundleError::TooLarge(what.to_string()))?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Bundle paths are relative and may not escape the bundle root.
fn validate_path(path: &str) -> Result<(), BundleError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| segment.is_empty() || segment == "..");
    if invalid {
        return Err(BundleError::InvalidPath(path.to_string()));
    }
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], BundleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(BundleError::Truncated(what))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, BundleError> {
        let raw = self.take(4, what)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, BundleError> {
        let raw = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_be_bytes(buf))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
