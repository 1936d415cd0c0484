use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS access_grants (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    channel_id TEXT NOT NULL,                 -- FK -> channels(id)
    grantee    TEXT NOT NULL,                 -- hex-encoded identity id
    created_at TEXT NOT NULL,

    UNIQUE (channel_id, grantee),
    FOREIGN KEY (channel_id) REFERENCES channels(id)
);

CREATE INDEX IF NOT EXISTS idx_access_grants_grantee ON access_grants(grantee);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
