//! Centralized storage layout and SQL schema definitions.
//!
//! Maia keeps one SQLite database per concern under `claude/data/`:
//! 1. routing_decisions.db: suggestions, acceptance metrics, override patterns.
//! 2. system_state.db: the phase index consumed by the context loader.
//!
//! Capability gaps and agent recommendations are flat JSON arrays.

pub const DATA_DIR: &str = "claude/data";
pub const AUDIT_LOG_FILE: &str = "routing.events.jsonl";
pub const CAPABILITY_GAPS_FILE: &str = "capability_gaps.json";
pub const AGENT_RECOMMENDATIONS_FILE: &str = "agent_recommendations.json";
pub const SYSTEM_STATE_MD: &str = "claude/context/SYSTEM_STATE.md";
pub const AGENTS_DIR: &str = "claude/agents";

// --- 1. Routing decisions ---
pub const ROUTING_DB_NAME: &str = "routing_decisions.db";

pub const ROUTING_DB_SCHEMA_SUGGESTIONS: &str = "
    CREATE TABLE IF NOT EXISTS routing_suggestions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        query_hash TEXT NOT NULL,
        query_text TEXT NOT NULL,
        query_category TEXT NOT NULL,
        query_complexity INTEGER NOT NULL,
        intent_confidence REAL NOT NULL,
        candidate_domains TEXT NOT NULL,
        suggested_agents TEXT NOT NULL,
        initial_agent TEXT,
        strategy TEXT NOT NULL,
        reasoning TEXT NOT NULL,
        routing_confidence REAL NOT NULL,
        accepted INTEGER,
        actual_agents TEXT,
        override_reason TEXT,
        acceptance_timestamp TEXT
    )
";

pub const ROUTING_DB_SCHEMA_METRICS: &str = "
    CREATE TABLE IF NOT EXISTS acceptance_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        category TEXT NOT NULL,
        total_suggestions INTEGER NOT NULL,
        accepted_count INTEGER NOT NULL,
        rejected_count INTEGER NOT NULL,
        pending_count INTEGER NOT NULL,
        acceptance_rate REAL NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(date, category)
    )
";

pub const ROUTING_DB_SCHEMA_OVERRIDES: &str = "
    CREATE TABLE IF NOT EXISTS override_patterns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        suggestion_id INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        query_category TEXT NOT NULL,
        suggested_agents TEXT NOT NULL,
        actual_agents TEXT NOT NULL,
        override_type TEXT NOT NULL,
        override_reason TEXT,
        FOREIGN KEY(suggestion_id) REFERENCES routing_suggestions(id)
    )
";

pub const ROUTING_DB_INDEX_HASH: &str =
    "CREATE INDEX IF NOT EXISTS idx_suggestions_hash ON routing_suggestions(query_hash)";
pub const ROUTING_DB_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_suggestions_timestamp ON routing_suggestions(timestamp)";
pub const ROUTING_DB_INDEX_ACCEPTED: &str =
    "CREATE INDEX IF NOT EXISTS idx_suggestions_accepted ON routing_suggestions(accepted)";
pub const ROUTING_DB_INDEX_CATEGORY: &str =
    "CREATE INDEX IF NOT EXISTS idx_suggestions_category ON routing_suggestions(query_category)";

// --- 2. System state (phase index) ---
pub const SYSTEM_STATE_DB_NAME: &str = "system_state.db";

pub const SYSTEM_STATE_DB_SCHEMA_PHASES: &str = "
    CREATE TABLE IF NOT EXISTS phases (
        phase_number INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'complete',
        summary TEXT NOT NULL DEFAULT '',
        keywords TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL
    )
";
