//! Archive extraction confined to a destination root.

use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use zip::ZipArchive;

use crate::error::{ManagerError, Result};

/// Lexically resolves `path` below an implicit root. `None` when it escapes.
fn confine(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn unsafe_entry(path: &Path, why: &str) -> ManagerError {
    ManagerError::Extraction(format!("refusing entry {}: {}", path.display(), why))
}

/// Unpacks a gzipped tarball into `dest`, keeping directory layout and mode bits.
///
/// Entries with `..` segments, absolute paths, links pointing outside
/// `dest`, or paths that resolve outside it through earlier links abort
/// the extraction.
pub fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut written = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ManagerError::Extraction(format!("failed to read tar archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| ManagerError::Extraction(format!("failed to read tar entry: {}", e)))?;
        let raw = entry
            .path()
            .map_err(|e| ManagerError::Extraction(format!("invalid entry path: {}", e)))?
            .into_owned();

        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(unsafe_entry(&raw, "parent-directory segment"));
        }
        let relative = confine(&raw).ok_or_else(|| unsafe_entry(&raw, "absolute path"))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if matches!(kind, EntryType::Symlink | EntryType::Link) {
            let target = entry
                .link_name()
                .map_err(|e| ManagerError::Extraction(format!("invalid link target: {}", e)))?
                .ok_or_else(|| unsafe_entry(&raw, "link without target"))?
                .into_owned();
            let base = if kind == EntryType::Symlink {
                relative.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                PathBuf::new()
            };
            if target.is_absolute() || confine(&base.join(&target)).is_none() {
                return Err(unsafe_entry(&raw, "link escapes destination"));
            }
        }

        // unpack_in resolves the on-disk parent, so chained links cannot escape.
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| ManagerError::Extraction(format!("failed to unpack {}: {}", raw.display(), e)))?;
        if !unpacked {
            return Err(unsafe_entry(&raw, "path escapes destination"));
        }
        written.push(dest.join(&relative));
    }

    tracing::debug!(dest = %dest.display(), entries = written.len(), "Extracted tarball");
    Ok(written)
}

/// Copies a single named member out of a zip archive into `dest_file`.
pub fn extract_zip_member(bytes: &[u8], member: &str, dest_file: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ManagerError::Extraction(format!("failed to read zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ManagerError::Extraction(format!("failed to read zip entry: {}", e)))?;
        let name = file
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| unsafe_entry(Path::new(file.name()), "path escapes archive root"))?;

        if name == Path::new(member) {
            let mut out = fs::File::create(dest_file)?;
            io::copy(&mut file, &mut out)?;
            return Ok(());
        }
    }

    Err(ManagerError::Extraction(format!(
        "archive has no member named {}",
        member
    )))
}
