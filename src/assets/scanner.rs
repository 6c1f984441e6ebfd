// Cache directory scanner
// Rebuilds the list of downloaded payloads from file names alone
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Encode an asset id into a file stem. Bytes outside `[A-Za-z0-9_-]` become `%XX`.
pub fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Inverse of `encode_id`. None for stems that no id could have produced.
pub fn decode_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => {
                out.push(bytes[i]);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok().filter(|id| !id.is_empty())
}

/// Scanner for payload files in the cache directory
pub struct CacheScanner;

impl CacheScanner {
    /// Top-level files with `extension`, skipping hidden (in-progress) files.
    /// Returns `(asset_id, path)` pairs in file name order.
    pub fn scan<P: AsRef<Path>>(
        directory: P,
        extension: &str,
    ) -> Result<Vec<(String, PathBuf)>, anyhow::Error> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let matches_ext = path
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            if !matches_ext {
                continue;
            }

            let id = path
                .file_stem()
                .and_then(|stem| decode_id(&stem.to_string_lossy()));
            if let Some(id) = id {
                found.push((id, path.to_path_buf()));
            }
        }

        Ok(found)
    }
}
