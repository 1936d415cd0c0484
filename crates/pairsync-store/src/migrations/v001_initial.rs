//! v001 -- Initial schema creation.
//!
//! Creates `local_identity`, `identities`, `topics`, `topic_participants`,
//! `channels` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- The local main identity (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_identity (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    secret_key TEXT NOT NULL,                 -- hex-encoded Ed25519 secret
    created_at TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Known identities and the person (main identity) they belong to
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS identities (
    identity   TEXT PRIMARY KEY NOT NULL,     -- hex-encoded identity id
    person     TEXT NOT NULL,                 -- hex-encoded main identity id
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_identities_person ON identities(person);

-- ----------------------------------------------------------------
-- Topics and their participant sets
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS topics (
    id         TEXT PRIMARY KEY NOT NULL,     -- sorted ids joined with '<->'
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topic_participants (
    topic_id TEXT NOT NULL,                   -- FK -> topics(id)
    identity TEXT NOT NULL,                   -- hex-encoded identity id

    PRIMARY KEY (topic_id, identity),
    FOREIGN KEY (topic_id) REFERENCES topics(id)
);

CREATE INDEX IF NOT EXISTS idx_topic_participants_identity
    ON topic_participants(identity);

-- ----------------------------------------------------------------
-- Channels: one append-only log per (topic, owner)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4 (local only)
    topic_id   TEXT NOT NULL,                 -- FK -> topics(id)
    owner      TEXT NOT NULL,                 -- hex-encoded identity id
    created_at TEXT NOT NULL,

    UNIQUE (topic_id, owner),
    FOREIGN KEY (topic_id) REFERENCES topics(id)
);

-- ----------------------------------------------------------------
-- Messages, content-addressed by hash
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    hash       TEXT PRIMARY KEY NOT NULL,     -- hex-encoded BLAKE3
    channel_id TEXT NOT NULL,                 -- FK -> channels(id)
    seq        INTEGER NOT NULL,              -- 1-based, per channel
    author     TEXT NOT NULL,                 -- hex-encoded identity id
    content    TEXT NOT NULL,
    timestamp  TEXT NOT NULL,                 -- RFC-3339

    UNIQUE (channel_id, seq),
    FOREIGN KEY (channel_id) REFERENCES channels(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
