/// Numbered schema migrations, applied in strictly increasing order.
/// Applied versions are tracked in schema_migrations; each entry runs at
/// most once per database.
pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
-- source table: registered feeds with cached HTTP validators
CREATE TABLE source (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    etag TEXT,
    last_modified TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    ),
    (
        2,
        r#"
-- article table: deduplicated by canonical_id across all polls
CREATE TABLE article (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES source(id),
    canonical_id TEXT NOT NULL UNIQUE,
    canonical_url TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT,
    author TEXT,
    published_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_article_source_id ON article(source_id);
CREATE INDEX idx_article_published_at ON article(published_at DESC);
"#,
    ),
    (
        3,
        r#"
-- edition: one ranked snapshot per civil date
CREATE TABLE edition (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_date TEXT NOT NULL UNIQUE,
    published_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- edition_article: ordered join rows, wholly replaced on each assembly
CREATE TABLE edition_article (
    edition_id INTEGER NOT NULL REFERENCES edition(id) ON DELETE CASCADE,
    article_id INTEGER NOT NULL REFERENCES article(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (edition_id, article_id),
    UNIQUE (edition_id, position)
);
"#,
    ),
];

/// Applies any pending migrations inside one transaction.
pub fn apply(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER NOT NULL)",
        [],
    )?;
    let current: i64 = tx
        .query_row(
            "SELECT IFNULL(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )?;
    }
    tx.commit()
}
