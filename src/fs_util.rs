use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::LandsatError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpacks a `.tar` (optionally gzip-compressed) into `target_dir`.
///
/// Returns the number of entries written. Entries that would land outside
/// `target_dir` abort the extraction.
pub fn extract_tar(archive_path: &Path, target_dir: &Path) -> Result<usize, LandsatError> {
    let mut file = fs::File::open(archive_path).map_err(|err| {
        LandsatError::Extraction(format!("open archive {}: {err}", archive_path.display()))
    })?;
    let compressed = is_gzip(&mut file)
        .map_err(|err| LandsatError::Extraction(format!("read archive header: {err}")))?;
    fs::create_dir_all(target_dir).map_err(|err| LandsatError::Filesystem(err.to_string()))?;

    let reader = BufReader::new(file);
    if compressed {
        unpack(Archive::new(GzDecoder::new(reader)), target_dir)
    } else {
        unpack(Archive::new(reader), target_dir)
    }
}

fn unpack<R: Read>(mut archive: Archive<R>, target_dir: &Path) -> Result<usize, LandsatError> {
    let entries = archive
        .entries()
        .map_err(|err| LandsatError::Extraction(err.to_string()))?;
    let mut count = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|err| LandsatError::Extraction(err.to_string()))?;
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| LandsatError::Extraction(err.to_string()))?;
        if !unpacked {
            return Err(LandsatError::Extraction(
                "archive entry path traversal detected".to_string(),
            ));
        }
        count += 1;
    }
    if count == 0 {
        return Err(LandsatError::Extraction("archive is empty".to_string()));
    }
    Ok(count)
}

fn is_gzip(file: &mut fs::File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}
