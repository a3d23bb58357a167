//! Read-side queries over the aggregate views and the run ledger.
//!
//! `NUMERIC` aggregates are cast to `float8` so they decode into `f64`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StateSummary {
    pub state: Option<String>,
    pub total_sites: i64,
    pub average_index: Option<f64>,
    pub green_sites: i64,
    pub yellow_sites: i64,
    pub red_sites: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PeriodSummary {
    pub period: String,
    pub state: Option<String>,
    pub measurements: i64,
    pub average_index: Option<f64>,
    pub min_index: Option<f64>,
    pub max_index: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TrafficLightCount {
    pub traffic_light: String,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EtlRun {
    pub run_id: Uuid,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_read: i64,
    pub rows_loaded: i64,
    pub rows_rejected: i64,
    pub outcome: String,
    pub error: Option<String>,
}

pub async fn state_summary(pool: &DbPool) -> Result<Vec<StateSummary>> {
    let rows = sqlx::query_as::<_, StateSummary>(
        r#"
            SELECT estado AS state,
                   total_sitios AS total_sites,
                   calidad_promedio::float8 AS average_index,
                   sitios_verdes AS green_sites,
                   sitios_amarillos AS yellow_sites,
                   sitios_rojos AS red_sites
            FROM water_data.resumen_por_estado
            ORDER BY calidad_promedio DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn period_summary(pool: &DbPool, limit: i64) -> Result<Vec<PeriodSummary>> {
    let rows = sqlx::query_as::<_, PeriodSummary>(
        r#"
            SELECT periodo AS period,
                   estado AS state,
                   mediciones AS measurements,
                   calidad_promedio::float8 AS average_index,
                   calidad_minima::float8 AS min_index,
                   calidad_maxima::float8 AS max_index
            FROM water_data.calidad_por_periodo
            ORDER BY periodo DESC, estado
            LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn traffic_light_distribution<'e, E>(executor: E) -> Result<Vec<TrafficLightCount>>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, TrafficLightCount>(
        r#"
            SELECT semaforo AS traffic_light, COUNT(*) AS total
            FROM water_data.calidad_agua_clean
            GROUP BY semaforo
            ORDER BY total DESC, semaforo
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn record_count<'e, E>(executor: E) -> Result<i64>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM water_data.calidad_agua_clean")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

pub async fn recent_runs(pool: &DbPool, limit: i64) -> Result<Vec<EtlRun>> {
    let rows = sqlx::query_as::<_, EtlRun>(
        r#"
            SELECT run_id, source_file, started_at, finished_at,
                   rows_read, rows_loaded, rows_rejected, outcome, error
            FROM water_data.etl_runs
            ORDER BY started_at DESC
            LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
