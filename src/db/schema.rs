pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- keywords table
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL UNIQUE,
    master_id INTEGER REFERENCES keywords(id) ON DELETE SET NULL
);

-- external_posts table (id is the url hash)
CREATE TABLE IF NOT EXISTS external_posts (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    category TEXT,
    published_at TEXT,
    collected_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    is_analyzed INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    archive_key TEXT
);

CREATE INDEX IF NOT EXISTS idx_external_posts_category ON external_posts(category);
CREATE INDEX IF NOT EXISTS idx_external_posts_published_at ON external_posts(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_external_posts_is_analyzed ON external_posts(is_analyzed);

-- post <-> keyword edges
CREATE TABLE IF NOT EXISTS external_posts_keywords (
    post_id TEXT NOT NULL REFERENCES external_posts(id) ON DELETE CASCADE ON UPDATE CASCADE,
    keyword_id INTEGER NOT NULL REFERENCES keywords(id) ON DELETE CASCADE ON UPDATE CASCADE,
    PRIMARY KEY (post_id, keyword_id)
);

CREATE INDEX IF NOT EXISTS idx_external_posts_keywords_keyword ON external_posts_keywords(keyword_id);
"#;
