//! PostgreSQL schema (idempotent)

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    id          UUID PRIMARY KEY,
    client_id   TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    is_active   BOOLEAN NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS admins (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS files (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    app_id      UUID NOT NULL REFERENCES apps(id),
    mime_type   TEXT NOT NULL,
    size        BIGINT NOT NULL,
    location    TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_files_app_id ON files (app_id);

CREATE TABLE IF NOT EXISTS metadata (
    id          UUID PRIMARY KEY,
    file_id     UUID NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
    hash        TEXT NOT NULL,
    enc_hash    TEXT,
    key_uid     TEXT,
    enc_key     TEXT NOT NULL DEFAULT '',
    key_algo    TEXT NOT NULL,
    version_id  TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_metadata_key_uid ON metadata (key_uid);

CREATE TABLE IF NOT EXISTS file_logs (
    id          BIGSERIAL PRIMARY KEY,
    actor_id    TEXT NOT NULL,
    actor_type  TEXT NOT NULL,
    file_id     UUID,
    action      TEXT NOT NULL,
    ip          TEXT,
    user_agent  TEXT,
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_file_logs_file_id ON file_logs (file_id);
"#;
