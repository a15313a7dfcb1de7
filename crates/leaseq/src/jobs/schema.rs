use sqlx::PgPool;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::jobs::PayloadRefType;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Table names are spliced into SQL text, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<(), QueueError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(QueueError::Config(format!(
            "{name:?} is not a valid table name"
        )));
    }
    Ok(())
}

/// Double-quote a validated identifier so reserved words such as `order` or
/// `user` still name a table. Quoted names are case-sensitive.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// DDL for a payload table keyed by the configured reference type.
/// Used by the ctl binary and the test harness; real deployments own this table.
pub fn payload_table_ddl(payload_table: &str, cfg: &QueueConfig) -> String {
    let id_column = match cfg.payload_ref_type {
        PayloadRefType::Uuid => "id uuid PRIMARY KEY DEFAULT gen_random_uuid()",
        PayloadRefType::BigInt => "id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
        PayloadRefType::Text => "id text PRIMARY KEY DEFAULT gen_random_uuid()::text",
    };

    let payload_table = quote_identifier(payload_table);

    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {payload_table} (
            {id_column},
            body jsonb NOT NULL DEFAULT '{{}}'::jsonb,
            created_at timestamptz NOT NULL DEFAULT now()
        )
        "#
    )
}

pub fn queue_table_ddl(payload_table: &str, cfg: &QueueConfig) -> Vec<String> {
    let queue = quote_identifier(&cfg.queue_collection);
    let index = quote_identifier(&format!("{}_claim_order_idx", cfg.queue_collection));
    let payload_table = quote_identifier(payload_table);
    let ref_type = cfg.payload_ref_type.sql_type();

    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {queue} (
                id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at timestamptz NOT NULL DEFAULT now(),
                payload {ref_type} NOT NULL REFERENCES {payload_table}(id) ON DELETE CASCADE,
                blocked_until timestamptz NOT NULL DEFAULT now(),
                worker_id text,
                worker_hostname text,
                retries int NOT NULL DEFAULT 0,
                done boolean NOT NULL DEFAULT false,
                error text
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS {index}
            ON {queue} (created_at, id)
            WHERE done = false
            "#
        ),
    ]
}

pub async fn ensure_payload_table(
    pool: &PgPool,
    payload_table: &str,
    cfg: &QueueConfig,
) -> Result<(), QueueError> {
    validate_identifier(payload_table)?;
    sqlx::query(&payload_table_ddl(payload_table, cfg))
        .execute(pool)
        .await?;
    Ok(())
}

/// Create the job table and its claim-order index if they are missing.
pub async fn ensure_queue_table(
    pool: &PgPool,
    payload_table: &str,
    cfg: &QueueConfig,
) -> Result<(), QueueError> {
    validate_identifier(payload_table)?;
    cfg.validate()?;

    let mut tx = pool.begin().await?;
    for ddl in queue_table_ddl(payload_table, cfg) {
        sqlx::query(&ddl).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::info!(
        queue = %cfg.queue_collection,
        payload_table,
        payload_ref_type = %cfg.payload_ref_type,
        "queue schema ready"
    );
    Ok(())
}
