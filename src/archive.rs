use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::error::{DebridError, DebridResult};

const COMPRESSION_LEVEL: i32 = 6;

/// Bundles `paths` into a zip at `output`, one entry per file named by its basename.
///
/// Paths that have disappeared since download are skipped. On any failure
/// the partially written archive is deleted.
pub fn pack(paths: &[PathBuf], output: &Path) -> DebridResult<PathBuf> {
    match write_archive(paths, output) {
        Ok(count) => {
            debug!("packed {} file(s) into {}", count, output.display());
            Ok(output.to_path_buf())
        }
        Err(e) => {
            if output.exists() {
                let _ = fs::remove_file(output);
            }
            Err(DebridError::Pack {
                path: output.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

fn write_archive(paths: &[PathBuf], output: &Path) -> zip::result::ZipResult<usize> {
    let file = File::create(output)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .large_file(true);

    let mut count = 0;
    for path in paths {
        if !path.exists() {
            warn!("skipping {}: no longer exists", path.display());
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        zip.start_file(name, options)?;
        let mut src = File::open(path)?;
        io::copy(&mut src, &mut zip)?;
        count += 1;
    }

    zip.finish()?;
    Ok(count)
}
