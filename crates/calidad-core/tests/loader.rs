use std::env;

use anyhow::Result;
use calidad_core::config::{DatabaseConfig, PolicyConfig};
use calidad_core::db::{self, DbPool};
use calidad_core::error::PipelineError;
use calidad_core::loader::{load_batch, LoadRequest};
use calidad_core::reports::{recent_runs, record_count, state_summary};
use calidad_core::transform::{transform_batch, BOUNDED_TEXT_COLUMNS};
use calidad_core::types::WaterQualityRecord;
use calidad_parser::{Column, RawRecord};
use chrono::{DateTime, Utc};
use tokio::runtime::Runtime;

fn test_database_url(test: &str) -> Option<String> {
    match env::var("CALIDAD_TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping {test} because CALIDAD_TEST_DATABASE_URL is not set");
            None
        }
    }
}

async fn fresh_pool(url: String) -> Result<DbPool> {
    let settings = DatabaseConfig {
        url: Some(url),
        max_connections: 2,
        ..DatabaseConfig::default()
    };
    let pool = db::connect(&settings).await?;
    db::run_migrations(&pool).await?;
    sqlx::query("TRUNCATE TABLE water_data.calidad_agua_clean, water_data.etl_runs")
        .execute(&pool)
        .await?;
    Ok(pool)
}

fn records() -> Vec<WaterQualityRecord> {
    let rows = [
        ("OCLSP3827M1", "JALISCO", "2.0", "10.0", "5.0"),
        ("OCLSP3828M1", "GUANAJUATO", "45.0", "150.0", "180.0"),
        ("OCLSP3829M1", "GUANAJUATO", "5.0", "25.0", "30.0"),
    ];
    let raw: Vec<RawRecord> = rows
        .iter()
        .enumerate()
        .map(|(idx, (site, state, bod, cod, tss))| {
            RawRecord::new(idx as u64 + 2)
                .with(Column::SiteKey, site)
                .with(Column::State, state)
                .with(Column::Period, "2020")
                .with(Column::Bod, bod)
                .with(Column::Cod, cod)
                .with(Column::Tss, tss)
        })
        .collect();
    transform_batch(&raw, &PolicyConfig::default()).records
}

fn request(source: &str, rows: usize) -> LoadRequest<'_> {
    LoadRequest {
        source_file: source,
        rows_read: rows,
        rows_rejected: 0,
        chunk_size: 2,
    }
}

#[test]
fn reloading_a_batch_is_idempotent() -> Result<()> {
    let Some(url) = test_database_url("reloading_a_batch_is_idempotent") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        let batch = records();

        let first = load_batch(&pool, &batch, &request("calidad_agua.csv", 3)).await?;
        assert_eq!(first.inserted, 3);
        assert_eq!(first.updated, 0);
        assert_eq!(first.total_rows, 3);

        let created: DateTime<Utc> = sqlx::query_scalar(
            "SELECT created_at FROM water_data.calidad_agua_clean WHERE clave_sitio = 'OCLSP3827M1'",
        )
        .fetch_one(&pool)
        .await?;

        let second = load_batch(&pool, &batch, &request("calidad_agua.csv", 3)).await?;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(record_count(&pool).await?, 3);

        let (created_again, updated): (DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            "SELECT created_at, updated_at FROM water_data.calidad_agua_clean WHERE clave_sitio = 'OCLSP3827M1'",
        )
        .fetch_one(&pool)
        .await?;
        assert_eq!(created, created_again);
        assert!(updated >= created);

        let general: f64 = sqlx::query_scalar(
            "SELECT indice_calidad_general::float8 FROM water_data.calidad_agua_clean WHERE clave_sitio = 'OCLSP3829M1'",
        )
        .fetch_one(&pool)
        .await?;
        assert_eq!(general, 2.33);

        let runs = recent_runs(&pool, 10).await?;
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|run| run.outcome == "ACCEPTED"));
        assert!(runs.iter().all(|run| run.rows_loaded == 3));

        Ok(())
    })
}

#[test]
fn state_summary_accounts_for_every_row() -> Result<()> {
    let Some(url) = test_database_url("state_summary_accounts_for_every_row") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        load_batch(&pool, &records(), &request("calidad_agua.csv", 3)).await?;

        let summary = state_summary(&pool).await?;
        let total: i64 = summary.iter().map(|row| row.total_sites).sum();
        assert_eq!(total, record_count(&pool).await?);

        for row in &summary {
            assert_eq!(
                row.total_sites,
                row.green_sites + row.yellow_sites + row.red_sites
            );
        }

        let guanajuato = summary
            .iter()
            .find(|row| row.state.as_deref() == Some("GUANAJUATO"))
            .expect("GUANAJUATO summary");
        assert_eq!(guanajuato.total_sites, 2);
        assert_eq!(guanajuato.red_sites, 1);
        assert_eq!(guanajuato.yellow_sites, 1);

        Ok(())
    })
}

#[test]
fn duplicate_identities_abort_before_writing() -> Result<()> {
    let Some(url) = test_database_url("duplicate_identities_abort_before_writing") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        let mut batch = records();
        batch.push(batch[0].clone());

        let err = load_batch(&pool, &batch, &request("dup.csv", 4))
            .await
            .expect_err("duplicate identity must fail");
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(record_count(&pool).await?, 0);
        assert!(recent_runs(&pool, 10).await?.is_empty());

        Ok(())
    })
}

#[test]
fn failure_in_a_later_chunk_rolls_back_the_batch() -> Result<()> {
    let Some(url) = test_database_url("failure_in_a_later_chunk_rolls_back_the_batch") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        let mut batch = records();
        // Violates the index CHECK constraint, in the second single-row chunk.
        batch[1].bod_index = 9;

        let request = LoadRequest {
            source_file: "broken.csv",
            rows_read: 3,
            rows_rejected: 0,
            chunk_size: 1,
        };
        let err = load_batch(&pool, &batch, &request)
            .await
            .expect_err("constraint violation must fail the load");
        assert!(matches!(err, PipelineError::Sqlx(_)));
        assert!(!err.is_storage_unavailable());

        assert_eq!(record_count(&pool).await?, 0);
        let runs = recent_runs(&pool, 10).await?;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "FAILED");
        assert_eq!(runs[0].rows_loaded, 0);
        assert!(runs[0].error.is_some());

        Ok(())
    })
}

#[test]
fn overlong_rows_are_rejected_and_the_rest_load() -> Result<()> {
    let Some(url) = test_database_url("overlong_rows_are_rejected_and_the_rest_load") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        let raw = vec![
            RawRecord::new(2)
                .with(Column::SiteKey, "S1")
                .with(Column::Period, "2024")
                .with(Column::Bod, "2.0")
                .with(Column::Cod, "10.0")
                .with(Column::Tss, "5.0"),
            RawRecord::new(3)
                .with(Column::SiteKey, "S2")
                .with(Column::Period, "2024-01-01/2024-03-31 trimestre")
                .with(Column::Bod, "2.0")
                .with(Column::Cod, "10.0")
                .with(Column::Tss, "5.0"),
        ];
        let outcome = transform_batch(&raw, &PolicyConfig::default());
        assert_eq!(outcome.rejected.len(), 1);

        let report = load_batch(&pool, &outcome.records, &request("long.csv", 2)).await?;
        assert_eq!(report.inserted, 1);
        assert_eq!(record_count(&pool).await?, 1);

        Ok(())
    })
}

#[test]
fn text_width_limits_match_the_table() -> Result<()> {
    let Some(url) = test_database_url("text_width_limits_match_the_table") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = fresh_pool(url).await?;
        for (column, max) in BOUNDED_TEXT_COLUMNS {
            let width: Option<i32> = sqlx::query_scalar(
                r#"
                    SELECT character_maximum_length::int4
                    FROM information_schema.columns
                    WHERE table_schema = 'water_data'
                      AND table_name = 'calidad_agua_clean'
                      AND column_name = $1
                "#,
            )
            .bind(column.canonical_name())
            .fetch_one(&pool)
            .await?;
            assert_eq!(width, Some(max as i32), "{column}");
        }
        Ok(())
    })
}
