use std::collections::HashSet;

use csv::StringRecord;

use crate::errors::ParserError;
use crate::model::{Column, ExtractedFile, FileMetadata, RawRecord};
use crate::registry::QualityParser;

use super::schema::{clean_value, resolve_column};

/// Minimum number of recognized header cells before a delimiter is accepted.
const MIN_RECOGNIZED_COLUMNS: usize = 3;

/// Comma-delimited CONAGUA export (the open-data portal default).
pub struct ConaguaCsvParser;

/// Semicolon-delimited export with decimal commas, as written by spreadsheet tools in es-MX.
pub struct ConaguaSemicolonParser;

impl QualityParser for ConaguaCsvParser {
    fn name(&self) -> &'static str {
        "CONAGUA_CSV"
    }

    fn parse(&self, content: &str) -> Result<ExtractedFile, ParserError> {
        parse_delimited(self.name(), content, b',', false)
    }
}

impl QualityParser for ConaguaSemicolonParser {
    fn name(&self) -> &'static str {
        "CONAGUA_SEMICOLON"
    }

    fn parse(&self, content: &str) -> Result<ExtractedFile, ParserError> {
        parse_delimited(self.name(), content, b';', true)
    }
}

fn parse_delimited(
    parser: &'static str,
    content: &str,
    delimiter: u8,
    decimal_comma: bool,
) -> Result<ExtractedFile, ParserError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut records = reader.records();

    let header = records
        .next()
        .ok_or(ParserError::FormatMismatch {
            parser,
            reason: "file is empty".to_string(),
        })?
        .map_err(|err| ParserError::Csv {
            parser,
            source: err,
        })?;

    let (roles, ignored_columns) = classify_header(&header);
    let recognized = roles.iter().filter(|role| role.is_some()).count();
    if recognized < MIN_RECOGNIZED_COLUMNS {
        return Err(ParserError::FormatMismatch {
            parser,
            reason: format!(
                "only {recognized} recognized columns with delimiter '{}'",
                delimiter as char
            ),
        });
    }

    let missing: Vec<&'static str> = Column::REQUIRED
        .iter()
        .filter(|required| !roles.contains(&Some(**required)))
        .map(|column| column.canonical_name())
        .collect();
    if !missing.is_empty() {
        return Err(ParserError::MissingColumns {
            parser,
            columns: missing,
        });
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::new();
    let mut rows_read = 0usize;
    let mut duplicates_dropped = 0usize;

    for (row_idx, record) in records.enumerate() {
        let record = record.map_err(|err| ParserError::Csv {
            parser,
            source: err,
        })?;
        if is_blank(&record) {
            continue;
        }
        rows_read += 1;

        let line = record
            .position()
            .map(|pos| pos.line())
            .unwrap_or(row_idx as u64 + 2);
        if !seen.insert(row_hash(&record)) {
            duplicates_dropped += 1;
            continue;
        }
        parsed.push(build_record(line, &record, &roles, decimal_comma));
    }

    if rows_read == 0 {
        return Err(ParserError::EmptyData { parser });
    }

    Ok(ExtractedFile {
        metadata: FileMetadata {
            format: parser,
            delimiter: delimiter as char,
            source_columns: header.iter().map(|cell| cell.trim().to_string()).collect(),
            ignored_columns,
        },
        records: parsed,
        rows_read,
        duplicates_dropped,
    })
}

fn classify_header(header: &StringRecord) -> (Vec<Option<Column>>, Vec<String>) {
    let mut roles = Vec::with_capacity(header.len());
    let mut ignored = Vec::new();
    for cell in header.iter() {
        match resolve_column(cell) {
            // First occurrence wins when an export repeats a column.
            Some(column) if !roles.contains(&Some(column)) => roles.push(Some(column)),
            _ => {
                roles.push(None);
                ignored.push(cell.trim().to_string());
            }
        }
    }
    (roles, ignored)
}

fn build_record(
    line: u64,
    record: &StringRecord,
    roles: &[Option<Column>],
    decimal_comma: bool,
) -> RawRecord {
    let mut raw = RawRecord::new(line);
    for (idx, role) in roles.iter().enumerate() {
        let Some(column) = role else {
            continue;
        };
        let value = record
            .get(idx)
            .and_then(|cell| clean_value(cell, *column, decimal_comma));
        raw.set(*column, value);
    }
    raw
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

/// Content hash over every source cell, ignored columns included.
fn row_hash(record: &StringRecord) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for cell in record.iter() {
        hasher.update(cell.trim().as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize()
}
