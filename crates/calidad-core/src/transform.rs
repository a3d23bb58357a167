//! Derives quality indices and the traffic-light classification from raw measurements.
//!
//! Each parameter is scored on the CONAGUA band scale (1 = Excelente .. 5 =
//! Fuertemente contaminada). The overall index is the mean of the three
//! parameter indices rounded to two decimals, so it always lies in `[1, 5]`.
//! The traffic light buckets the overall index with the configured thresholds.

use std::collections::HashMap;

use calidad_parser::{Column, RawRecord};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{OutOfRangePolicy, PolicyConfig};
use crate::types::{Parameter, QualityBand, TrafficLight, WaterQualityRecord};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("missing {0}")]
    MissingIdentity(Column),

    #[error("missing {0} measurement")]
    MissingMeasurement(Parameter),

    #[error("{parameter} value '{value}' is not numeric")]
    NonNumericMeasurement { parameter: Parameter, value: String },

    #[error("{parameter} value {value} is outside [0, {max}] mg/L")]
    OutOfRange {
        parameter: Parameter,
        value: f64,
        max: f64,
    },

    #[error("{column} value '{value}' is not a valid coordinate")]
    InvalidCoordinate { column: Column, value: String },

    #[error("{column} is {len} characters, longer than the {max} the table allows")]
    FieldTooLong {
        column: Column,
        len: usize,
        max: usize,
    },
}

/// Character widths of the `VARCHAR` columns in `water_data.calidad_agua_clean`.
/// Kept in step with `migrations/0001_calidad_agua_clean.sql`.
pub const BOUNDED_TEXT_COLUMNS: [(Column, usize); 6] = [
    (Column::SiteKey, 50),
    (Column::State, 100),
    (Column::Municipality, 150),
    (Column::SiteType, 50),
    (Column::Subtype, 50),
    (Column::Period, 20),
];

/// A raw row that was excluded from the load.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub line: u64,
    pub site_key: Option<String>,
    pub period: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct TransformOutcome {
    pub records: Vec<WaterQualityRecord>,
    pub rejected: Vec<Rejection>,
    /// Rows replaced by a later row with the same site and period.
    pub superseded: usize,
}

pub fn classify(parameter: Parameter, value: f64) -> QualityBand {
    let [excellent, good, acceptable, polluted] = parameter.band_limits();
    if value <= excellent {
        QualityBand::Excellent
    } else if value <= good {
        QualityBand::Good
    } else if value <= acceptable {
        QualityBand::Acceptable
    } else if value <= polluted {
        QualityBand::Polluted
    } else {
        QualityBand::HeavilyPolluted
    }
}

pub fn overall_index(indices: [i16; 3]) -> f64 {
    let sum: i16 = indices.iter().sum();
    let mean = f64::from(sum) / indices.len() as f64;
    (mean * 100.0).round() / 100.0
}

pub fn traffic_light(overall: f64, policy: &PolicyConfig) -> TrafficLight {
    if overall <= policy.green_max {
        TrafficLight::Green
    } else if overall <= policy.yellow_max {
        TrafficLight::Yellow
    } else {
        TrafficLight::Red
    }
}

fn measurement_limit(parameter: Parameter, policy: &PolicyConfig) -> f64 {
    match parameter {
        Parameter::Bod => policy.bod_max_mg_l,
        Parameter::Cod => policy.cod_max_mg_l,
        Parameter::Tss => policy.tss_max_mg_l,
    }
}

fn measurement_column(parameter: Parameter) -> Column {
    match parameter {
        Parameter::Bod => Column::Bod,
        Parameter::Cod => Column::Cod,
        Parameter::Tss => Column::Tss,
    }
}

/// Parses a concentration. Values reported below a detection limit (`<3`)
/// are taken at the limit.
pub fn parse_measurement(
    parameter: Parameter,
    raw: Option<&str>,
    policy: &PolicyConfig,
) -> Result<f64, RejectReason> {
    let text = raw.ok_or(RejectReason::MissingMeasurement(parameter))?;
    let numeric = text.trim_start_matches(&['<', '>'][..]).trim();
    let value: f64 = numeric
        .parse()
        .ok()
        .filter(|value: &f64| value.is_finite())
        .ok_or_else(|| RejectReason::NonNumericMeasurement {
            parameter,
            value: text.to_string(),
        })?;

    let max = measurement_limit(parameter, policy);
    if (0.0..=max).contains(&value) {
        return Ok(value);
    }
    match policy.out_of_range {
        OutOfRangePolicy::Clamp => {
            let clamped = value.clamp(0.0, max);
            debug!(%parameter, value, clamped, "clamped out-of-range measurement");
            Ok(clamped)
        }
        OutOfRangePolicy::Reject => Err(RejectReason::OutOfRange {
            parameter,
            value,
            max,
        }),
    }
}

fn parse_coordinate(
    record: &RawRecord,
    column: Column,
    bound: f64,
) -> Result<Option<f64>, RejectReason> {
    let Some(text) = record.get(column) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() <= bound => Ok(Some(value)),
        _ => Err(RejectReason::InvalidCoordinate {
            column,
            value: text.to_string(),
        }),
    }
}

fn required_text(record: &RawRecord, column: Column) -> Result<String, RejectReason> {
    record
        .get(column)
        .map(str::to_string)
        .ok_or(RejectReason::MissingIdentity(column))
}

fn check_text_widths(record: &RawRecord) -> Result<(), RejectReason> {
    for (column, max) in BOUNDED_TEXT_COLUMNS {
        if let Some(text) = record.get(column) {
            let len = text.chars().count();
            if len > max {
                return Err(RejectReason::FieldTooLong { column, len, max });
            }
        }
    }
    Ok(())
}

fn optional_text(record: &RawRecord, column: Column) -> Option<String> {
    record.get(column).map(str::to_string)
}

/// Codes of parameters in a polluted band, followed by any extra codes the
/// source listed. Upper-cased and deduplicated; `None` when empty.
pub fn merge_contaminants(bands: &[(Parameter, QualityBand)], reported: Option<&str>) -> Option<String> {
    let mut codes: Vec<String> = bands
        .iter()
        .filter(|(_, band)| band.is_polluted())
        .map(|(parameter, _)| parameter.code().to_string())
        .collect();

    if let Some(reported) = reported {
        for token in reported.split(&[',', ';', '|'][..]) {
            let code = token.trim().to_uppercase();
            if !code.is_empty() && !codes.contains(&code) {
                codes.push(code);
            }
        }
    }

    if codes.is_empty() {
        None
    } else {
        Some(codes.join(","))
    }
}

pub fn transform_record(
    record: &RawRecord,
    policy: &PolicyConfig,
) -> Result<WaterQualityRecord, RejectReason> {
    let site_key = required_text(record, Column::SiteKey)?;
    let period = required_text(record, Column::Period)?;
    check_text_widths(record)?;

    let mut values = [0.0f64; 3];
    let mut bands = [(Parameter::Bod, QualityBand::Excellent); 3];
    for (slot, parameter) in Parameter::ALL.into_iter().enumerate() {
        let value = parse_measurement(parameter, record.get(measurement_column(parameter)), policy)?;
        values[slot] = value;
        bands[slot] = (parameter, classify(parameter, value));
    }

    let longitude = parse_coordinate(record, Column::Longitude, 180.0)?;
    let latitude = parse_coordinate(record, Column::Latitude, 90.0)?;

    let indices = bands.map(|(_, band)| band.index());
    let overall = overall_index(indices);
    let contaminants = merge_contaminants(&bands, record.get(Column::Contaminants));

    Ok(WaterQualityRecord {
        site_key,
        site_name: optional_text(record, Column::SiteName),
        basin_authority: optional_text(record, Column::BasinAuthority),
        state: optional_text(record, Column::State),
        municipality: optional_text(record, Column::Municipality),
        basin: optional_text(record, Column::Basin),
        water_body: optional_text(record, Column::WaterBody),
        site_type: optional_text(record, Column::SiteType),
        subtype: optional_text(record, Column::Subtype),
        longitude,
        latitude,
        period,
        bod_mg_l: values[0],
        bod_label: bands[0].1.label().to_string(),
        cod_mg_l: values[1],
        cod_label: bands[1].1.label().to_string(),
        tss_mg_l: values[2],
        tss_label: bands[2].1.label().to_string(),
        bod_index: indices[0],
        cod_index: indices[1],
        tss_index: indices[2],
        overall_index: overall,
        traffic_light: traffic_light(overall, policy),
        contaminants,
        source_line: record.line,
    })
}

pub fn transform_batch(records: &[RawRecord], policy: &PolicyConfig) -> TransformOutcome {
    let mut transformed = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        match transform_record(record, policy) {
            Ok(row) => transformed.push(row),
            Err(reason) => rejected.push(Rejection {
                line: record.line,
                site_key: optional_text(record, Column::SiteKey),
                period: optional_text(record, Column::Period),
                reason: reason.to_string(),
            }),
        }
    }

    let before = transformed.len();
    let records = collapse_identities(transformed);
    TransformOutcome {
        superseded: before - records.len(),
        records,
        rejected,
    }
}

/// Keeps one row per (site, period): the last occurrence wins but takes the
/// position of the first, so output order follows the input.
pub fn collapse_identities(records: Vec<WaterQualityRecord>) -> Vec<WaterQualityRecord> {
    let mut positions: HashMap<(String, String), usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<WaterQualityRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.site_key.clone(), record.period.clone());
        match positions.get(&key) {
            Some(&idx) => unique[idx] = record,
            None => {
                positions.insert(key, unique.len());
                unique.push(record);
            }
        }
    }

    unique
}
