use tracing::info;

use crate::db::DbPool;
use crate::error::{PipelineError, Result};

pub const SCHEMA: &str = "water_data";

/// Accepts plain SQL identifiers only; the name is interpolated into GRANT statements.
pub fn validate_principal(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(name)
    } else {
        Err(PipelineError::Validation(format!(
            "'{name}' is not a valid role name"
        )))
    }
}

pub fn grant_statements(principal: &str) -> Result<Vec<String>> {
    let role = validate_principal(principal)?;
    Ok(vec![
        format!("GRANT USAGE ON SCHEMA {SCHEMA} TO \"{role}\""),
        format!("GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA {SCHEMA} TO \"{role}\""),
        format!("GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA {SCHEMA} TO \"{role}\""),
        format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {SCHEMA} GRANT ALL ON TABLES TO \"{role}\""),
        format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {SCHEMA} GRANT ALL ON SEQUENCES TO \"{role}\""),
    ])
}

/// Grants the low-privilege loader role full use of the pipeline schema.
pub async fn grant_access(pool: &DbPool, principal: &str) -> Result<()> {
    let statements = grant_statements(principal)?;
    let mut tx = pool.begin().await?;
    for statement in &statements {
        sqlx::query(statement.as_str()).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!(principal, schema = SCHEMA, "privileges granted");
    Ok(())
}
