//! Extract, transform and load orchestration for one input file.

use std::future::Future;
use std::path::{Path, PathBuf};

use calidad_parser::extract_file;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{EtlConfig, RetryConfig};
use crate::db;
use crate::error::Result;
use crate::loader::{load_batch, LoadReport, LoadRequest};
use crate::outputs::{write_clean_files, OutputPaths};
use crate::transform::{transform_batch, Rejection};
use crate::types::{TrafficLight, WaterQualityRecord};

/// Rejections logged and kept in the summary; the rest are only counted.
const REJECTION_SAMPLE: usize = 20;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub dry_run: bool,
    pub write_files: bool,
    pub output_dir: Option<PathBuf>,
    pub run_migrations: bool,
}

/// Extracted and transformed records, ready to write or load.
#[derive(Debug)]
pub struct PreparedBatch {
    pub source_file: String,
    pub format: &'static str,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub superseded: usize,
    pub records: Vec<WaterQualityRecord>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TrafficLightHistogram {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
}

impl TrafficLightHistogram {
    pub fn from_records(records: &[WaterQualityRecord]) -> Self {
        let mut histogram = Self::default();
        for record in records {
            match record.traffic_light {
                TrafficLight::Green => histogram.green += 1,
                TrafficLight::Yellow => histogram.yellow += 1,
                TrafficLight::Red => histogram.red += 1,
            }
        }
        histogram
    }
}

/// Mean, minimum and maximum of one index over a batch.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct IndexStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl IndexStats {
    /// `None` for an empty batch. The mean is rounded to two decimals.
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        (count > 0).then(|| IndexStats {
            mean: (sum / count as f64 * 100.0).round() / 100.0,
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexSummary {
    pub indice_calidad_dbo: Option<IndexStats>,
    pub indice_calidad_dqo: Option<IndexStats>,
    pub indice_calidad_sst: Option<IndexStats>,
    pub indice_calidad_general: Option<IndexStats>,
}

impl IndexSummary {
    pub fn from_records(records: &[WaterQualityRecord]) -> Self {
        let stats = |field: fn(&WaterQualityRecord) -> f64| {
            IndexStats::from_values(records.iter().map(field))
        };
        Self {
            indice_calidad_dbo: stats(|r: &WaterQualityRecord| f64::from(r.bod_index)),
            indice_calidad_dqo: stats(|r: &WaterQualityRecord| f64::from(r.cod_index)),
            indice_calidad_sst: stats(|r: &WaterQualityRecord| f64::from(r.tss_index)),
            indice_calidad_general: stats(|r: &WaterQualityRecord| r.overall_index),
        }
    }

    fn entries(&self) -> [(&'static str, Option<IndexStats>); 4] {
        [
            ("indice_calidad_dbo", self.indice_calidad_dbo),
            ("indice_calidad_dqo", self.indice_calidad_dqo),
            ("indice_calidad_sst", self.indice_calidad_sst),
            ("indice_calidad_general", self.indice_calidad_general),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Option<Uuid>,
    pub source_file: String,
    pub format: &'static str,
    pub dry_run: bool,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub rejected: usize,
    pub superseded: usize,
    pub transformed: usize,
    pub traffic_lights: TrafficLightHistogram,
    pub indices: IndexSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputPaths>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
}

/// Extracts and transforms `input` without touching the database.
pub fn prepare(config: &EtlConfig, input: &Path) -> Result<PreparedBatch> {
    info!(path = %input.display(), "starting extraction");
    let extracted = extract_file(input)?;

    info!(rows = extracted.records.len(), "starting transformation");
    let outcome = transform_batch(&extracted.records, &config.policy);

    for rejection in outcome.rejected.iter().take(REJECTION_SAMPLE) {
        warn!(
            line = rejection.line,
            site = rejection.site_key.as_deref().unwrap_or("-"),
            reason = %rejection.reason,
            "record rejected"
        );
    }
    if outcome.rejected.len() > REJECTION_SAMPLE {
        warn!(
            omitted = outcome.rejected.len() - REJECTION_SAMPLE,
            "further rejections not logged individually"
        );
    }

    info!(
        transformed = outcome.records.len(),
        rejected = outcome.rejected.len(),
        superseded = outcome.superseded,
        "transformation finished"
    );
    for (index, stats) in IndexSummary::from_records(&outcome.records).entries() {
        if let Some(stats) = stats {
            info!(index, mean = stats.mean, min = stats.min, max = stats.max, "index summary");
        }
    }

    Ok(PreparedBatch {
        source_file: input.display().to_string(),
        format: extracted.metadata.format,
        rows_read: extracted.rows_read,
        duplicates_dropped: extracted.duplicates_dropped,
        superseded: outcome.superseded,
        records: outcome.records,
        rejected: outcome.rejected,
    })
}

/// Runs the whole pipeline for one input file.
pub async fn run(config: &EtlConfig, options: &RunOptions) -> Result<RunSummary> {
    let batch = prepare(config, &options.input)?;

    let outputs = if options.write_files {
        let dir = options.output_dir.as_deref();
        Some(write_clean_files(
            &batch.records,
            &config.paths.clean_csv_path(dir),
            &config.paths.clean_parquet_path(dir),
        )?)
    } else {
        None
    };

    let load = if options.dry_run {
        info!("dry run, skipping load");
        None
    } else {
        Some(load_with_retry(config, &batch, options.run_migrations).await?)
    };

    Ok(summarize(batch, options.dry_run, outputs, load))
}

/// Connects and loads, retrying while storage is unavailable.
pub async fn load_with_retry(
    config: &EtlConfig,
    batch: &PreparedBatch,
    run_migrations: bool,
) -> Result<LoadReport> {
    let request = LoadRequest {
        source_file: &batch.source_file,
        rows_read: batch.rows_read,
        rows_rejected: batch.rejected.len(),
        chunk_size: config.database.chunk_size,
    };
    let request = &request;

    retry_when_unavailable(&config.retry, || async move {
        let pool = db::connect(&config.database).await?;
        if run_migrations {
            db::run_migrations(&pool).await?;
        }
        load_batch(&pool, &batch.records, request).await
    })
    .await
}

/// Runs `operation` until it succeeds, fails with an error other than storage
/// unavailability, or has been retried `retry.attempts` times.
pub async fn retry_when_unavailable<T, F, Fut>(retry: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_storage_unavailable() && attempt <= retry.attempts => {
                warn!(
                    attempt,
                    retries = retry.attempts,
                    delay_secs = retry.delay_secs,
                    "storage unavailable, retrying load: {err}"
                );
                tokio::time::sleep(retry.delay()).await;
            }
            Err(err) => {
                error!(attempt, "load failed: {err}");
                return Err(err);
            }
        }
    }
}

pub fn summarize(
    batch: PreparedBatch,
    dry_run: bool,
    outputs: Option<OutputPaths>,
    load: Option<LoadReport>,
) -> RunSummary {
    RunSummary {
        run_id: load.as_ref().map(|report| report.run_id),
        traffic_lights: TrafficLightHistogram::from_records(&batch.records),
        indices: IndexSummary::from_records(&batch.records),
        transformed: batch.records.len(),
        rejected: batch.rejected.len(),
        rejections: batch.rejected.into_iter().take(REJECTION_SAMPLE).collect(),
        source_file: batch.source_file,
        format: batch.format,
        dry_run,
        rows_read: batch.rows_read,
        duplicates_dropped: batch.duplicates_dropped,
        superseded: batch.superseded,
        outputs,
        load,
    }
}
