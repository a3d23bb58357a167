//! Reading a raw export from disk.

use std::borrow::Cow;
use std::path::Path;

use tracing::{info, warn};

use crate::errors::ParserError;
use crate::model::ExtractedFile;
use crate::registry::parse_quality_file;

/// Files above this size are logged as large inputs.
pub const LARGE_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Verifies the input exists, decodes it and runs the registered parsers over it.
pub fn extract_file(path: &Path) -> Result<ExtractedFile, ParserError> {
    if !path.exists() {
        return Err(ParserError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let io_err = |source| ParserError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_err)?.len();
    info!(path = %path.display(), bytes = size, "input file found");
    if size > LARGE_FILE_BYTES {
        info!(bytes = size, "large input, the whole file is held in memory while parsing");
    }

    let bytes = std::fs::read(path).map_err(io_err)?;
    let content = decode_contents(&bytes);
    if matches!(content, Cow::Owned(_)) {
        warn!(path = %path.display(), "input is not valid UTF-8, decoded as Latin-1");
    }

    let extracted = parse_quality_file(&content)?;
    info!(
        format = extracted.metadata.format,
        rows = extracted.rows_read,
        duplicates = extracted.duplicates_dropped,
        ignored_columns = extracted.metadata.ignored_columns.len(),
        "input parsed"
    );
    Ok(extracted)
}

/// Returns the contents as UTF-8, falling back to Latin-1 which older CONAGUA exports use.
pub fn decode_contents(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&byte| byte as char).collect()),
    }
}
