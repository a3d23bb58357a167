pub mod errors;
pub mod extract;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{ParserAttempt, ParserError};
pub use extract::{decode_contents, extract_file, LARGE_FILE_BYTES};
pub use model::{Column, ExtractedFile, FileMetadata, RawRecord};
pub use registry::{parse_quality_file, parse_with_parsers, QualityParser};

#[cfg(test)]
mod tests;
