//! Zip extraction for downloaded CI artifacts.

use anyhow::{bail, Result};
use std::io::Read;

/// Maximum decompressed bytes read from a single entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Read the entry named `entry_name` out of a zip archive held in memory.
///
/// Returns `Ok(None)` when the archive is readable but has no such entry.
/// Entry names are compared with `/` separators; a leading `./` or `/` in
/// the archive is ignored.
pub fn extract_entry(archive: &[u8], entry_name: &str) -> Result<Option<Vec<u8>>> {
    extract_entry_bounded(archive, entry_name, MAX_ENTRY_BYTES)
}

fn extract_entry_bounded(archive: &[u8], entry_name: &str, max_bytes: u64) -> Result<Option<Vec<u8>>> {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive))?;
    let wanted = normalize(entry_name);

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() || normalize(entry.name()) != wanted {
            continue;
        }

        let mut out = Vec::new();
        entry.take(max_bytes + 1).read_to_end(&mut out)?;
        if out.len() as u64 > max_bytes {
            bail!(
                "zip entry {} exceeds size limit ({} bytes)",
                entry_name,
                max_bytes
            );
        }
        return Ok(Some(out));
    }

    Ok(None)
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}
