//! Idempotent upsert of transformed records into `water_data.calidad_agua_clean`.
//!
//! A batch is written inside a single transaction, in multi-row statements
//! keyed on `(clave_sitio, periodo)`. Any error rolls the whole batch back.
//! Concurrent loaders serialize on a transaction-scoped advisory lock.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MAX_CHUNK_SIZE;
use crate::db::DbPool;
use crate::error::{PipelineError, Result};
use crate::reports::{record_count, traffic_light_distribution, TrafficLightCount};
use crate::types::WaterQualityRecord;

const LOADER_LOCK_KEY: i64 = 0x43414C49444144; // "CALIDAD"

const INSERT_PREFIX: &str = r#"
    INSERT INTO water_data.calidad_agua_clean (
        clave_sitio, sitio, organismo_de_cuenca, estado, municipio, cuenca,
        cuerpo_de_agua, tipo, subtipo, longitud, latitud, periodo,
        dbo_mg_l, calidad_dbo, dqo_mg_l, calidad_dqo, sst_mg_l, calidad_sst,
        indice_calidad_dbo, indice_calidad_dqo, indice_calidad_sst,
        indice_calidad_general, semaforo, contaminantes, fecha_carga
    ) "#;

const ON_CONFLICT_SUFFIX: &str = r#"
    ON CONFLICT (clave_sitio, periodo) DO UPDATE SET
        sitio = EXCLUDED.sitio,
        organismo_de_cuenca = EXCLUDED.organismo_de_cuenca,
        estado = EXCLUDED.estado,
        municipio = EXCLUDED.municipio,
        cuenca = EXCLUDED.cuenca,
        cuerpo_de_agua = EXCLUDED.cuerpo_de_agua,
        tipo = EXCLUDED.tipo,
        subtipo = EXCLUDED.subtipo,
        longitud = EXCLUDED.longitud,
        latitud = EXCLUDED.latitud,
        dbo_mg_l = EXCLUDED.dbo_mg_l,
        calidad_dbo = EXCLUDED.calidad_dbo,
        dqo_mg_l = EXCLUDED.dqo_mg_l,
        calidad_dqo = EXCLUDED.calidad_dqo,
        sst_mg_l = EXCLUDED.sst_mg_l,
        calidad_sst = EXCLUDED.calidad_sst,
        indice_calidad_dbo = EXCLUDED.indice_calidad_dbo,
        indice_calidad_dqo = EXCLUDED.indice_calidad_dqo,
        indice_calidad_sst = EXCLUDED.indice_calidad_sst,
        indice_calidad_general = EXCLUDED.indice_calidad_general,
        semaforo = EXCLUDED.semaforo,
        contaminantes = EXCLUDED.contaminantes,
        fecha_carga = EXCLUDED.fecha_carga,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

/// Bookkeeping for the `etl_runs` ledger row of one load.
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub source_file: &'a str,
    pub rows_read: usize,
    pub rows_rejected: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub rows_loaded: usize,
    pub inserted: usize,
    pub updated: usize,
    pub total_rows: i64,
    pub distribution: Vec<TrafficLightCount>,
}

#[derive(Debug, Default, Clone, Copy)]
struct UpsertCounts {
    inserted: usize,
    updated: usize,
}

#[derive(Debug, Clone, Copy)]
enum RunOutcome {
    Accepted,
    Failed,
}

impl RunOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Accepted => "ACCEPTED",
            RunOutcome::Failed => "FAILED",
        }
    }
}

/// Upserts `records` as one atomic batch and records the run in the ledger.
///
/// Identities must be unique within the batch (`transform_batch` guarantees this).
pub async fn load_batch(
    pool: &DbPool,
    records: &[WaterQualityRecord],
    request: &LoadRequest<'_>,
) -> Result<LoadReport> {
    ensure_unique_identities(records)?;

    let run_id = Uuid::new_v4();
    begin_run(pool, run_id, request).await?;
    info!(%run_id, rows = records.len(), source = request.source_file, "loading batch");

    let counts = match upsert_all(pool, records, request.chunk_size).await {
        Ok(counts) => counts,
        Err(err) => {
            if let Err(ledger_err) =
                finish_run(pool, run_id, RunOutcome::Failed, 0, Some(&err.to_string())).await
            {
                warn!(%run_id, "failed to mark run as failed: {ledger_err}");
            }
            return Err(err);
        }
    };

    let rows_loaded = counts.inserted + counts.updated;
    finish_run(pool, run_id, RunOutcome::Accepted, rows_loaded, None).await?;

    let total_rows = record_count(pool).await?;
    let distribution = traffic_light_distribution(pool).await?;

    info!(
        %run_id,
        inserted = counts.inserted,
        updated = counts.updated,
        total_rows,
        "batch committed"
    );
    for entry in &distribution {
        info!(semaforo = %entry.traffic_light, total = entry.total, "traffic-light distribution");
    }

    Ok(LoadReport {
        run_id,
        rows_loaded,
        inserted: counts.inserted,
        updated: counts.updated,
        total_rows,
        distribution,
    })
}

fn ensure_unique_identities(records: &[WaterQualityRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.identity()) {
            let (site, period) = record.identity();
            return Err(PipelineError::Validation(format!(
                "site {site} appears more than once for period {period} in one batch"
            )));
        }
    }
    Ok(())
}

async fn upsert_all(
    pool: &DbPool,
    records: &[WaterQualityRecord],
    chunk_size: usize,
) -> Result<UpsertCounts> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(LOADER_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let loaded_at = Utc::now();
    let mut counts = UpsertCounts::default();
    for chunk in records.chunks(chunk_size.clamp(1, MAX_CHUNK_SIZE)) {
        let chunk_counts = upsert_chunk(&mut tx, chunk, loaded_at).await?;
        counts.inserted += chunk_counts.inserted;
        counts.updated += chunk_counts.updated;
        debug!(rows = chunk.len(), "upserted chunk");
    }

    tx.commit().await?;
    Ok(counts)
}

async fn upsert_chunk(
    tx: &mut Transaction<'_, Postgres>,
    chunk: &[WaterQualityRecord],
    loaded_at: DateTime<Utc>,
) -> Result<UpsertCounts> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_PREFIX);
    builder.push_values(chunk, |mut row, record| {
        row.push_bind(record.site_key.as_str())
            .push_bind(record.site_name.as_deref())
            .push_bind(record.basin_authority.as_deref())
            .push_bind(record.state.as_deref())
            .push_bind(record.municipality.as_deref())
            .push_bind(record.basin.as_deref())
            .push_bind(record.water_body.as_deref())
            .push_bind(record.site_type.as_deref())
            .push_bind(record.subtype.as_deref())
            .push_bind(record.longitude)
            .push_bind(record.latitude)
            .push_bind(record.period.as_str())
            .push_bind(record.bod_mg_l)
            .push_bind(record.bod_label.as_str())
            .push_bind(record.cod_mg_l)
            .push_bind(record.cod_label.as_str())
            .push_bind(record.tss_mg_l)
            .push_bind(record.tss_label.as_str())
            .push_bind(record.bod_index)
            .push_bind(record.cod_index)
            .push_bind(record.tss_index)
            .push_bind(record.overall_index)
            .push_bind(record.traffic_light.as_db_str())
            .push_bind(record.contaminants.as_deref())
            .push_bind(loaded_at);
    });
    builder.push(ON_CONFLICT_SUFFIX);

    let rows = builder.build().fetch_all(&mut **tx).await?;
    let mut counts = UpsertCounts::default();
    for row in rows {
        if row.try_get::<bool, _>("inserted")? {
            counts.inserted += 1;
        } else {
            counts.updated += 1;
        }
    }
    Ok(counts)
}

async fn begin_run(pool: &DbPool, run_id: Uuid, request: &LoadRequest<'_>) -> Result<()> {
    sqlx::query(
        r#"
            INSERT INTO water_data.etl_runs (run_id, source_file, rows_read, rows_rejected, outcome)
            VALUES ($1, $2, $3, $4, 'PENDING')
        "#,
    )
    .bind(run_id)
    .bind(request.source_file)
    .bind(request.rows_read as i64)
    .bind(request.rows_rejected as i64)
    .execute(pool)
    .await?;
    Ok(())
}

async fn finish_run(
    pool: &DbPool,
    run_id: Uuid,
    outcome: RunOutcome,
    rows_loaded: usize,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
            UPDATE water_data.etl_runs
            SET finished_at = NOW(), outcome = $2, rows_loaded = $3, error = $4
            WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(outcome.as_str())
    .bind(rows_loaded as i64)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
