//! Zip archiving for directory shares.
//!
//! A shared directory is never split or served directly: its tree is
//! archived into a single zip stream first, and the archive is what gets
//! chunked or sent over the wire. The share key carries a `.zip` suffix.

use std::io::{Read, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::error::{Result, ShareError};

/// Archive the tree rooted at `src` into a zip file at `dest`.
///
/// Entry names are relative to `src` with forward slashes, so the archive
/// unpacks to the same layout on any platform.
pub fn zip_dir(src: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut buf = Vec::new();
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            ShareError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;
        let path = entry.path();
        let relative = match path.strip_prefix(src) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .map_err(zip_error)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name.as_str(), options).map_err(zip_error)?;
            let mut f = std::fs::File::open(path)?;
            buf.clear();
            f.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }

    writer.finish().map_err(zip_error)?;
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> ShareError {
    ShareError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}
