use std::fs;
use std::path::PathBuf;

use crate::errors::ParserError;
use crate::extract::{decode_contents, extract_file};
use crate::formats::ConaguaCsvParser;
use crate::model::Column;
use crate::parse_quality_file;
use crate::registry::{parse_with_parsers, QualityParser};

fn fixture_path(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(path)
}

fn fixture(path: &str) -> String {
    let full_path = fixture_path(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

#[test]
fn parses_conagua_csv_export() {
    let content = fixture("calidad_agua_sample.csv");
    let parsed = parse_quality_file(&content).expect("CONAGUA CSV parse failed");

    assert_eq!(parsed.metadata.format, "CONAGUA_CSV");
    assert_eq!(parsed.metadata.delimiter, ',');
    assert_eq!(parsed.metadata.ignored_columns, vec!["COLI_FEC".to_string()]);
    assert_eq!(parsed.rows_read, 6);
    assert_eq!(parsed.duplicates_dropped, 1);
    assert_eq!(parsed.records.len(), 5);

    let first = &parsed.records[0];
    assert_eq!(first.line, 2);
    assert_eq!(first.get(Column::SiteKey), Some("OCLSP3827M1"));
    assert_eq!(first.get(Column::BasinAuthority), Some("LERMA SANTIAGO PACIFICO"));
    assert_eq!(first.get(Column::Bod), Some("2.0"));
    assert_eq!(first.get(Column::Contaminants), None);

    let polluted = &parsed.records[1];
    assert_eq!(polluted.get(Column::Contaminants), Some("DBO,DQO,SST,CF"));
    assert_eq!(polluted.get(Column::TrafficLight), Some("ROJO"));
}

#[test]
fn absent_markers_are_none() {
    let content = fixture("calidad_agua_sample.csv");
    let parsed = parse_quality_file(&content).expect("CONAGUA CSV parse failed");

    let laguna = parsed
        .records
        .iter()
        .find(|record| record.get(Column::SiteKey) == Some("OCPEN5001M1"))
        .expect("missing laguna record");
    assert_eq!(laguna.get(Column::Bod), None);
    assert_eq!(laguna.get(Column::BodLabel), None);
    assert_eq!(laguna.get(Column::Cod), Some("12.0"));

    // Non-numeric cells are kept verbatim for the transformer to judge.
    let candelaria = parsed
        .records
        .iter()
        .find(|record| record.get(Column::SiteKey) == Some("OCPEN5002M1"))
        .expect("missing candelaria record");
    assert_eq!(candelaria.get(Column::Bod), Some("<3"));
    assert_eq!(candelaria.get(Column::Cod), Some("ND"));
}

#[test]
fn falls_back_to_semicolon_export() {
    let content = fixture("calidad_agua_semicolon.csv");
    let parsed = parse_quality_file(&content).expect("semicolon parse failed");

    assert_eq!(parsed.metadata.format, "CONAGUA_SEMICOLON");
    assert_eq!(parsed.records.len(), 2);
    let first = &parsed.records[0];
    assert_eq!(first.get(Column::Bod), Some("2.5"));
    assert_eq!(first.get(Column::Longitude), Some("-110.31"));
    assert_eq!(first.get(Column::State), Some("BAJA CALIFORNIA SUR"));
}

#[test]
fn missing_required_column_is_reported() {
    let content = fixture("calidad_agua_missing_dqo.csv");
    let err = parse_quality_file(&content).expect_err("missing DQO should fail");

    match err {
        ParserError::MissingColumns { columns, .. } => {
            assert_eq!(columns, vec!["dqo_mg_l"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn header_without_rows_is_empty_data() {
    let content = fixture("calidad_agua_header_only.csv");
    let err = parse_quality_file(&content).expect_err("header-only file should fail");
    assert!(matches!(err, ParserError::EmptyData { .. }));
}

#[test]
fn unrelated_file_matches_no_parser() {
    let err = parse_quality_file("fecha,temperatura\n2024-01-01,21.5\n")
        .expect_err("unrelated CSV should not parse");

    match err {
        ParserError::NoMatchingParser { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].parser, "CONAGUA_CSV");
            assert_eq!(attempts[1].parser, "CONAGUA_SEMICOLON");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn single_parser_rejects_semicolon_file() {
    let content = fixture("calidad_agua_semicolon.csv");
    let parser = ConaguaCsvParser;
    let parsers: [&dyn QualityParser; 1] = [&parser];
    let err = parse_with_parsers(&content, &parsers).expect_err("comma parser should not match");
    assert!(matches!(err, ParserError::NoMatchingParser { .. }));
}

#[test]
fn extract_reports_missing_file() {
    let err = extract_file(&fixture_path("does_not_exist.csv")).expect_err("missing file");
    assert!(matches!(err, ParserError::NotFound { .. }));
}

#[test]
fn extract_reads_fixture_from_disk() {
    let extracted = extract_file(&fixture_path("calidad_agua_sample.csv")).expect("extract");
    assert_eq!(extracted.records.len(), 5);
}

#[test]
fn latin1_contents_are_decoded() {
    let bytes = b"ESTADO\nM\xc9XICO\n";
    assert_eq!(decode_contents(bytes), "ESTADO\nMÉXICO\n");
}

#[test]
fn rows_differing_in_ignored_columns_are_kept() {
    let content = "\
CLAVE SITIO,PERIODO,DBO_mg/L,DQO_mg/L,SST_mg/L,COLI_FEC
S1,2024,2.0,10.0,5.0,10
S1,2024,2.0,10.0,5.0,24000
S1,2024,2.0,10.0,5.0,24000
";
    let parsed = parse_quality_file(content).expect("parse");

    assert_eq!(parsed.rows_read, 3);
    assert_eq!(parsed.duplicates_dropped, 1);
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.records[1].line, 3);
}
