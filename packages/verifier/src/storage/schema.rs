//! Schema bootstrap.
//!
//! Creates the enum types, tables, and indexes the pipeline needs. Every
//! statement is idempotent so the function can run on every startup.

use anyhow::{Context, Result};
use sqlx::PgPool;

const ENUM_TYPES: &[(&str, &str)] = &[
    ("link_status", "('present', 'missing', 'unknown')"),
    ("anchor_status", "('present', 'missing', 'unknown')"),
    ("follow_status", "('follow', 'no_follow')"),
    ("index_status", "('indexed', 'not_indexed', 'unknown')"),
    ("lane", "('urgent', 'standard', 'weekly')"),
    (
        "job_status",
        "('pending', 'running', 'succeeded', 'dead_letter', 'cancelled')",
    ),
];

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for (name, values) in ENUM_TYPES {
        sqlx::query(&format!(
            r#"
            DO $$ BEGIN
                CREATE TYPE {name} AS ENUM {values};
            EXCEPTION
                WHEN duplicate_object THEN NULL;
            END $$
            "#
        ))
        .execute(pool)
        .await
        .with_context(|| format!("failed to create enum type {name}"))?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS targets (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            source_url TEXT NOT NULL,
            link_to_check TEXT NOT NULL,
            anchor_text TEXT NOT NULL DEFAULT '',
            domain TEXT NOT NULL DEFAULT '',
            status_code INTEGER,
            link_status link_status NOT NULL DEFAULT 'unknown',
            follow_status follow_status,
            anchor_status anchor_status NOT NULL DEFAULT 'unknown',
            index_status index_status NOT NULL DEFAULT 'unknown',
            page_value INTEGER,
            page_trust INTEGER,
            authority_score INTEGER,
            backlinks_external INTEGER,
            outlinks_external INTEGER,
            first_checked TIMESTAMPTZ,
            last_checked TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (source_url, link_to_check, owner_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create targets table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_targets_owner_id ON targets(owner_id)")
        .execute(pool)
        .await
        .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS target_history (
            id UUID PRIMARY KEY,
            target_id UUID NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            status_code INTEGER,
            link_status link_status NOT NULL,
            follow_status follow_status,
            anchor_status anchor_status NOT NULL,
            index_status index_status NOT NULL,
            page_value INTEGER,
            page_trust INTEGER,
            authority_score INTEGER,
            backlinks_external INTEGER,
            outlinks_external INTEGER,
            last_checked TIMESTAMPTZ,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create target_history table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_target_history_target_id ON target_history(target_id)",
    )
    .execute(pool)
    .await
    .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            job_type TEXT NOT NULL,
            args JSONB NOT NULL DEFAULT '{}',
            owner_id UUID NOT NULL,
            lane lane NOT NULL,
            status job_status NOT NULL DEFAULT 'pending',
            attempt INTEGER NOT NULL DEFAULT 1,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            next_run_at TIMESTAMPTZ,
            lease_expires_at TIMESTAMPTZ,
            worker_id TEXT,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create jobs table")?;

    // Covers the claim query's lane + status + readiness filter.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(lane, status, next_run_at)",
    )
    .execute(pool)
    .await
    .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics_snapshots (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            taken_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            total_targets BIGINT NOT NULL,
            total_domains BIGINT NOT NULL,
            follow_percentage DOUBLE PRECISION NOT NULL,
            avg_quality DOUBLE PRECISION NOT NULL,
            raw_data JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create metrics_snapshots table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_owner_id ON metrics_snapshots(owner_id, taken_at)",
    )
    .execute(pool)
    .await
    .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_ledger (
            job_id UUID PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
            owner_id UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create job_ledger table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_ledger_owner_id ON job_ledger(owner_id)",
    )
    .execute(pool)
    .await
    .ok();

    Ok(())
}
