use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{DataFrame, NamedFrom, PolarsResult, Series};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::types::WaterQualityRecord;

/// Locations of the clean files written for one run.
#[derive(Debug, Clone, Serialize)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub parquet: PathBuf,
}

pub fn write_clean_files(
    records: &[WaterQualityRecord],
    csv_path: &Path,
    parquet_path: &Path,
) -> Result<OutputPaths> {
    write_clean_csv(csv_path, records)?;
    write_clean_parquet(parquet_path, records)?;
    Ok(OutputPaths {
        csv: csv_path.to_path_buf(),
        parquet: parquet_path.to_path_buf(),
    })
}

pub fn write_clean_csv(path: &Path, records: &[WaterQualityRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = records.len(), "clean CSV written");
    Ok(())
}

pub fn write_clean_parquet(path: &Path, records: &[WaterQualityRecord]) -> Result<u64> {
    ensure_parent(path)?;
    let mut df = records_to_dataframe(records)?;
    let mut file = File::create(path)?;
    let bytes = ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Snappy)
        .with_statistics(StatisticsOptions::default())
        .finish(&mut df)?;
    info!(path = %path.display(), rows = records.len(), bytes, "clean Parquet written");
    Ok(bytes)
}

/// Builds a frame with the same column names as the database table.
pub fn records_to_dataframe(records: &[WaterQualityRecord]) -> PolarsResult<DataFrame> {
    fn text<'a>(
        records: &'a [WaterQualityRecord],
        field: impl Fn(&'a WaterQualityRecord) -> Option<&'a str>,
    ) -> Vec<Option<&'a str>> {
        records.iter().map(field).collect()
    }

    fn number(
        records: &[WaterQualityRecord],
        field: impl Fn(&WaterQualityRecord) -> f64,
    ) -> Vec<f64> {
        records.iter().map(field).collect()
    }

    fn index(
        records: &[WaterQualityRecord],
        field: impl Fn(&WaterQualityRecord) -> i16,
    ) -> Vec<i32> {
        records.iter().map(|record| i32::from(field(record))).collect()
    }

    DataFrame::new(vec![
        Series::new("clave_sitio".into(), text(records, |r| Some(r.site_key.as_str()))).into(),
        Series::new("sitio".into(), text(records, |r| r.site_name.as_deref())).into(),
        Series::new(
            "organismo_de_cuenca".into(),
            text(records, |r| r.basin_authority.as_deref()),
        )
        .into(),
        Series::new("estado".into(), text(records, |r| r.state.as_deref())).into(),
        Series::new("municipio".into(), text(records, |r| r.municipality.as_deref())).into(),
        Series::new("cuenca".into(), text(records, |r| r.basin.as_deref())).into(),
        Series::new("cuerpo_de_agua".into(), text(records, |r| r.water_body.as_deref())).into(),
        Series::new("tipo".into(), text(records, |r| r.site_type.as_deref())).into(),
        Series::new("subtipo".into(), text(records, |r| r.subtype.as_deref())).into(),
        Series::new(
            "longitud".into(),
            records.iter().map(|r| r.longitude).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "latitud".into(),
            records.iter().map(|r| r.latitude).collect::<Vec<_>>(),
        )
        .into(),
        Series::new("periodo".into(), text(records, |r| Some(r.period.as_str()))).into(),
        Series::new("dbo_mg_l".into(), number(records, |r| r.bod_mg_l)).into(),
        Series::new("calidad_dbo".into(), text(records, |r| Some(r.bod_label.as_str()))).into(),
        Series::new("dqo_mg_l".into(), number(records, |r| r.cod_mg_l)).into(),
        Series::new("calidad_dqo".into(), text(records, |r| Some(r.cod_label.as_str()))).into(),
        Series::new("sst_mg_l".into(), number(records, |r| r.tss_mg_l)).into(),
        Series::new("calidad_sst".into(), text(records, |r| Some(r.tss_label.as_str()))).into(),
        Series::new("indice_calidad_dbo".into(), index(records, |r| r.bod_index)).into(),
        Series::new("indice_calidad_dqo".into(), index(records, |r| r.cod_index)).into(),
        Series::new("indice_calidad_sst".into(), index(records, |r| r.tss_index)).into(),
        Series::new(
            "indice_calidad_general".into(),
            number(records, |r| r.overall_index),
        )
        .into(),
        Series::new(
            "semaforo".into(),
            text(records, |r| Some(r.traffic_light.as_db_str())),
        )
        .into(),
        Series::new("contaminantes".into(), text(records, |r| r.contaminants.as_deref())).into(),
    ])
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
