//! PostgreSQL schema bootstrap
//!
//! Idempotent DDL, safe to run on every start.

use sqlx::PgPool;

/// Balanced-transfer ledger tables
pub const LEDGER_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ledger_idempotency_keys (
        idempotency_key VARCHAR(255) PRIMARY KEY,
        tx_ref          UUID        NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id              BIGSERIAL PRIMARY KEY,
        tx_ref          UUID         NOT NULL,
        idempotency_key VARCHAR(255) NOT NULL,
        deal_id         BIGINT,
        account_id      VARCHAR(128) NOT NULL,
        entry_type      VARCHAR(32)  NOT NULL,
        debit_nano      BIGINT       NOT NULL DEFAULT 0,
        credit_nano     BIGINT       NOT NULL DEFAULT 0,
        description     TEXT,
        created_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        CONSTRAINT ledger_entries_one_sided CHECK (
            (debit_nano > 0 AND credit_nano = 0) OR (debit_nano = 0 AND credit_nano > 0)
        )
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_tx_ref ON ledger_entries (tx_ref)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_deal ON ledger_entries (deal_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_account ON ledger_entries (account_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_velocity ON ledger_entries (account_id, entry_type, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS account_balances (
        account_id   VARCHAR(128) PRIMARY KEY,
        balance_nano BIGINT      NOT NULL DEFAULT 0,
        version      BIGINT      NOT NULL DEFAULT 0,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Transactional outbox
pub const OUTBOX_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        id              BIGSERIAL PRIMARY KEY,
        deal_id         BIGINT,
        idempotency_key VARCHAR(255),
        topic           VARCHAR(128) NOT NULL,
        partition_key   VARCHAR(128),
        payload         JSONB        NOT NULL,
        status          SMALLINT     NOT NULL DEFAULT 0,
        retry_count     INT          NOT NULL DEFAULT 0,
        version         INT          NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        processed_at    TIMESTAMPTZ,
        next_attempt_at TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        claimed_at      TIMESTAMPTZ,
        last_error      TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox (next_attempt_at, id) WHERE status = 0",
    "CREATE INDEX IF NOT EXISTS idx_outbox_processing ON outbox (claimed_at) WHERE status = 10",
];

/// Escrow deposit addresses
pub const ESCROW_DDL: &[&str] = &[
    "CREATE SEQUENCE IF NOT EXISTS deposit_subwallet_seq START 1",
    r#"
    CREATE TABLE IF NOT EXISTS deposit_addresses (
        deal_id              BIGINT PRIMARY KEY,
        subwallet_id         BIGINT       NOT NULL UNIQUE,
        address              VARCHAR(128) NOT NULL UNIQUE,
        expected_amount_nano BIGINT       NOT NULL,
        created_at           TIMESTAMPTZ  NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create every table, index and sequence the service needs
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in LEDGER_DDL.iter().chain(OUTBOX_DDL).chain(ESCROW_DDL) {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_is_idempotent() {
        for statement in LEDGER_DDL.iter().chain(OUTBOX_DDL).chain(ESCROW_DDL) {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "DDL must be re-runnable: {}",
                statement
            );
        }
    }

    #[test]
    fn test_one_sided_constraint_present() {
        assert!(LEDGER_DDL.iter().any(|s| s.contains("ledger_entries_one_sided")));
    }
}
