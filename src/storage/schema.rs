//! Database schema constants.
//!
//! All DDL for the PostgreSQL backend: the job queue, the proxy fleet,
//! durable settings, and the seen-URL mirror.

/// SQL schema for the job queue table.
pub const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    id BIGSERIAL PRIMARY KEY,
    url TEXT NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 100,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at TIMESTAMPTZ,
    last_error TEXT,
    keywords JSONB NOT NULL DEFAULT '[]',
    match_mode VARCHAR(10) NOT NULL DEFAULT 'any',
    min_matches INTEGER NOT NULL DEFAULT 1,
    country_filter VARCHAR(10),
    lang_filter VARCHAR(10),
    use_js BOOLEAN NOT NULL DEFAULT FALSE,
    max_pages_per_domain INTEGER NOT NULL DEFAULT 25,
    session_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ
)
"#;

/// SQL schema for the proxy fleet table.
pub const CREATE_PROXIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id BIGSERIAL PRIMARY KEY,
    scheme VARCHAR(10) NOT NULL DEFAULT 'http',
    host VARCHAR(255) NOT NULL,
    port INTEGER NOT NULL,
    username VARCHAR(255),
    password VARCHAR(255),
    label VARCHAR(100),
    active BOOLEAN NOT NULL DEFAULT TRUE,
    priority INTEGER NOT NULL DEFAULT 100,
    weight DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    success_rate DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    response_time_ms DOUBLE PRECISION,
    total_requests BIGINT NOT NULL DEFAULT 0,
    failed_requests BIGINT NOT NULL DEFAULT 0,
    last_used_at TIMESTAMPTZ,
    breaker_status VARCHAR(20) NOT NULL DEFAULT 'closed',
    cooldown_until TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for the durable settings table (pause flag, heartbeat,
/// stats snapshots).
pub const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key VARCHAR(100) PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for the durable seen-URL mirror.
pub const CREATE_SEEN_URLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS seen_urls (
    url TEXT PRIMARY KEY,
    normalized_url TEXT NOT NULL,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Index supporting the claim query's eligibility scan and ordering.
pub const CREATE_QUEUE_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_claimable
    ON queue (priority, retry_count, id)
    WHERE status = 'pending' AND deleted_at IS NULL
"#;

/// Index for status counts and the expired-job sweep.
pub const CREATE_QUEUE_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_status ON queue (status) WHERE deleted_at IS NULL
"#;

/// Index for candidate selection over the proxy fleet.
pub const CREATE_PROXIES_ACTIVE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_proxies_active ON proxies (active, priority)
"#;

/// Index for cross-run dedup lookups in the seen-URL mirror.
pub const CREATE_SEEN_URLS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_seen_urls_normalized ON seen_urls (normalized_url)
"#;

/// Returns all schema statements in creation order. Each entry is a single
/// statement so the migration runner can execute them as prepared queries.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_QUEUE_TABLE,
        CREATE_PROXIES_TABLE,
        CREATE_SETTINGS_TABLE,
        CREATE_SEEN_URLS_TABLE,
        CREATE_QUEUE_CLAIM_INDEX,
        CREATE_QUEUE_STATUS_INDEX,
        CREATE_PROXIES_ACTIVE_INDEX,
        CREATE_SEEN_URLS_INDEX,
    ]
}
