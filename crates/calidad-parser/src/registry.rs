use crate::errors::{ParserAttempt, ParserError};
use crate::formats::{ConaguaCsvParser, ConaguaSemicolonParser};
use crate::model::ExtractedFile;

pub trait QualityParser {
    fn name(&self) -> &'static str;
    fn parse(&self, content: &str) -> Result<ExtractedFile, ParserError>;
}

pub fn parse_quality_file(content: &str) -> Result<ExtractedFile, ParserError> {
    let csv = ConaguaCsvParser;
    let semicolon = ConaguaSemicolonParser;
    let parsers: [&dyn QualityParser; 2] = [&csv, &semicolon];
    parse_with_parsers(content, &parsers)
}

pub fn parse_with_parsers(
    content: &str,
    parsers: &[&dyn QualityParser],
) -> Result<ExtractedFile, ParserError> {
    let mut attempts = Vec::new();

    for parser in parsers {
        match parser.parse(content) {
            Ok(parsed) => return Ok(parsed),
            Err(ParserError::FormatMismatch { reason, .. }) => {
                attempts.push(ParserAttempt::new(parser.name(), reason));
            }
            Err(err) => return Err(err),
        }
    }

    Err(ParserError::NoMatchingParser { attempts })
}
