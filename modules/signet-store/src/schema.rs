//! Idempotent schema migration for the identity tables.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id         UUID   PRIMARY KEY,
        username   TEXT   NOT NULL UNIQUE,
        attributes JSONB  NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id   UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_groups (
        user_id  UUID NOT NULL REFERENCES users(id)  ON DELETE CASCADE,
        group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, group_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS applications (
        id   UUID PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        id             UUID    PRIMARY KEY,
        name           TEXT    NOT NULL,
        is_backchannel BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        key      TEXT        PRIMARY KEY,
        expiring BOOLEAN     NOT NULL DEFAULT TRUE,
        expires  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS authenticated_sessions (
        session_key     TEXT        PRIMARY KEY,
        user_id         UUID        NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        device_id       TEXT,
        last_ip         TEXT,
        last_user_agent TEXT,
        expiring        BOOLEAN     NOT NULL DEFAULT TRUE,
        expires         TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_authenticated_sessions_user ON authenticated_sessions(user_id)",
];

/// Create the identity tables. Safe to run on every startup.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running identity schema migrations...");
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Identity schema ready");
    Ok(())
}
