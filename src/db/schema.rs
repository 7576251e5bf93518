//! Ledger schema
//!
//! Idempotent DDL executed at startup. The CHECK constraints repeat the
//! wallet invariant so a faulty write fails at commit instead of persisting.

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        account_id  VARCHAR(128) PRIMARY KEY,
        status      VARCHAR(16) NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'restricted', 'closed')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        account_id         VARCHAR(128) NOT NULL REFERENCES accounts (account_id),
        currency           VARCHAR(16) NOT NULL,
        balance            NUMERIC(38, 18) NOT NULL DEFAULT 0,
        available_balance  NUMERIC(38, 18) NOT NULL DEFAULT 0,
        reserved_balance   NUMERIC(38, 18) NOT NULL DEFAULT 0,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (account_id, currency),
        CONSTRAINT wallets_available_non_negative CHECK (available_balance >= 0),
        CONSTRAINT wallets_reserved_non_negative CHECK (reserved_balance >= 0),
        CONSTRAINT wallets_balance_decomposition
            CHECK (balance = available_balance + reserved_balance)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        seq             BIGSERIAL PRIMARY KEY,
        entry_id        UUID NOT NULL UNIQUE,
        account_id      VARCHAR(128) NOT NULL,
        currency        VARCHAR(16) NOT NULL,
        amount          NUMERIC(38, 18) NOT NULL,
        balance_after   NUMERIC(38, 18) NOT NULL,
        entry_type      VARCHAR(16) NOT NULL,
        reference_id    VARCHAR(128),
        reference_type  VARCHAR(32),
        description     TEXT NOT NULL DEFAULT '',
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        FOREIGN KEY (account_id, currency) REFERENCES wallets (account_id, currency)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_account_time
        ON ledger_entries (account_id, currency, created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_reference
        ON ledger_entries (reference_type, reference_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deposit_addresses (
        currency    VARCHAR(16) NOT NULL,
        address     VARCHAR(128) NOT NULL,
        account_id  VARCHAR(128) NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (currency, address),
        FOREIGN KEY (account_id, currency) REFERENCES wallets (account_id, currency)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deposits (
        id                      UUID PRIMARY KEY,
        account_id              VARCHAR(128) NOT NULL,
        currency                VARCHAR(16) NOT NULL,
        amount                  NUMERIC(38, 18) NOT NULL CHECK (amount > 0),
        address                 VARCHAR(128) NOT NULL,
        txid                    VARCHAR(128) NOT NULL,
        confirmations           BIGINT NOT NULL DEFAULT 0,
        required_confirmations  BIGINT NOT NULL,
        status                  VARCHAR(16) NOT NULL
                                CHECK (status IN ('pending', 'confirmed', 'credited', 'failed')),
        failure_reason          TEXT,
        created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        credited_at             TIMESTAMPTZ,
        UNIQUE (currency, txid),
        FOREIGN KEY (account_id, currency) REFERENCES wallets (account_id, currency)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_deposits_active
        ON deposits (currency, created_at) WHERE status IN ('pending', 'confirmed')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id              UUID PRIMARY KEY,
        account_id      VARCHAR(128) NOT NULL,
        currency        VARCHAR(16) NOT NULL,
        amount          NUMERIC(38, 18) NOT NULL CHECK (amount > 0),
        fee             NUMERIC(38, 18) NOT NULL DEFAULT 0 CHECK (fee >= 0 AND fee < amount),
        destination     VARCHAR(256) NOT NULL,
        external_ref    VARCHAR(256),
        status          VARCHAR(16) NOT NULL
                        CHECK (status IN ('pending', 'approved', 'processing', 'completed', 'failed')),
        failure_reason  TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        FOREIGN KEY (account_id, currency) REFERENCES wallets (account_id, currency)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_withdrawals_status
        ON withdrawals (status, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reconciliation_reports (
        id          UUID PRIMARY KEY,
        status      VARCHAR(32) NOT NULL,
        body        JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proof_of_reserves_reports (
        id           UUID PRIMARY KEY,
        merkle_root  CHAR(64) NOT NULL,
        body         JSONB NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL
    )
    "#,
];
