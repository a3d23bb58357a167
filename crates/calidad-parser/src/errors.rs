use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ParserAttempt {
    pub parser: &'static str,
    pub message: String,
}

impl ParserAttempt {
    pub fn new(parser: &'static str, message: impl Into<String>) -> Self {
        Self {
            parser,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParserAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parser, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{parser} format mismatch: {reason}")]
    FormatMismatch {
        parser: &'static str,
        reason: String,
    },

    #[error("{parser} header is missing required columns: {}", columns.join(", "))]
    MissingColumns {
        parser: &'static str,
        columns: Vec<&'static str>,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} file did not contain any data rows")]
    EmptyData { parser: &'static str },

    #[error("input file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no parser recognized this file; attempts: {attempts:?}")]
    NoMatchingParser { attempts: Vec<ParserAttempt> },
}
