use crate::error::Result;
use crate::graph::{GraphStore, PageRecord, SessionStatus};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use stategraph_scanner::result::Edge;
use stategraph_scanner::snapshot::PageState;
use std::path::Path;

/// SQLite-backed state graph plus crawl session history.
pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub status: String,
    pub scan_type: String,
    pub seed_urls: String,
    pub configuration: Option<String>,
    pub stop_reason: Option<String>,
    pub end_time: Option<i64>,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    scan_type TEXT NOT NULL CHECK(scan_type IN ('crawl', 'collect')),
    seed_urls TEXT NOT NULL,  -- JSON array
    configuration TEXT,       -- JSON configuration used
    stop_reason TEXT
);

-- One row per distinct UI state
CREATE TABLE IF NOT EXISTS pages (
    snapshot_hash TEXT PRIMARY KEY,
    site TEXT NOT NULL,
    route TEXT NOT NULL,
    url TEXT NOT NULL,
    snapshot_text TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    seen_count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
CREATE INDEX IF NOT EXISTS idx_pages_site ON pages(site);

-- Actions between states
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_hash TEXT NOT NULL,
    to_hash TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('click', 'navigate', 'submit')),
    ref_token TEXT,
    href TEXT,
    role TEXT,
    name TEXT,
    discovered_at INTEGER NOT NULL,

    FOREIGN KEY(from_hash) REFERENCES pages(snapshot_hash) ON DELETE CASCADE,
    FOREIGN KEY(to_hash) REFERENCES pages(snapshot_hash) ON DELETE CASCADE,
    CHECK(from_hash <> to_hash),
    UNIQUE(from_hash, to_hash, kind)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_transitions_navigate
    ON transitions(from_hash, href) WHERE kind = 'navigate';
CREATE INDEX IF NOT EXISTS idx_transitions_to ON transitions(to_hash);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, scan_type: &str, seed_urls: &str, configuration: Option<&str>) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, scan_type, seed_urls, configuration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![&session_id, timestamp, "running", scan_type, seed_urls, configuration],
        )?;

        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str, stop_reason: Option<&str>) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed, stop_reason)
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Failed, None)
    }

    fn finish_session(&self, session_id: &str, status: SessionStatus, stop_reason: Option<&str>) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2, stop_reason = ?3 WHERE id = ?4",
            params![status.as_str(), timestamp, stop_reason, session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, scan_type, seed_urls, configuration, stop_reason, end_time
             FROM crawl_sessions WHERE id = ?1",
        )?;

        let record = stmt
            .query_row(params![session_id], |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    status: row.get(1)?,
                    scan_type: row.get(2)?,
                    seed_urls: row.get(3)?,
                    configuration: row.get(4)?,
                    stop_reason: row.get(5)?,
                    end_time: row.get(6)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    // Graph operations
    pub fn clear_graph(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            DELETE FROM transitions;
            DELETE FROM pages;
            ",
        )?;
        Ok(())
    }

    pub fn upsert_page(&self, state: &PageState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pages (snapshot_hash, site, route, url, snapshot_text, depth, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(snapshot_hash) DO UPDATE SET
                last_seen = excluded.last_seen,
                seen_count = seen_count + 1",
            params![
                &state.snapshot_hash,
                &state.site,
                &state.route,
                state.url(),
                &state.snapshot_text,
                state.depth as i64,
                &state.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Insert a transition unless it is a self-loop or already stored.
    /// Returns whether a row was written.
    pub fn insert_transition(&self, edge: &Edge) -> Result<bool> {
        if edge.is_self_loop() {
            return Ok(false);
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO transitions (
                from_hash, to_hash, kind, ref_token, href, role, name, discovered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &edge.from_hash,
                &edge.to_hash,
                edge.action_type.as_str(),
                &edge.ref_token,
                &edge.href,
                &edge.role,
                &edge.name,
                current_timestamp(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_page_depth(&self, snapshot_hash: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depth FROM pages WHERE snapshot_hash = ?1")?;

        let result = stmt
            .query_row(params![snapshot_hash], |row| row.get(0))
            .optional()?;
        Ok(result)
    }

    pub fn get_transitions_from(&self, from_hash: &str) -> Result<Vec<(String, String, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT to_hash, kind, href FROM transitions WHERE from_hash = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![from_hash], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn count(&self, table: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

impl GraphStore for Database {
    fn init(&mut self, clear: bool) -> Result<()> {
        self.init_schema()?;
        if clear {
            self.clear_graph()?;
        }
        Ok(())
    }

    fn upsert_node(&mut self, state: &PageState) -> Result<()> {
        self.upsert_page(state)
    }

    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool> {
        self.insert_transition(edge)
    }

    fn node_count(&self) -> Result<usize> {
        self.count("pages")
    }

    fn edge_count(&self) -> Result<usize> {
        self.count("transitions")
    }

    fn pages(&self) -> Result<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.url, p.snapshot_hash, p.depth,
                    (SELECT COUNT(*) FROM transitions t WHERE t.from_hash = p.snapshot_hash)
             FROM pages p
             ORDER BY p.depth, p.first_seen",
        )?;

        let pages = stmt
            .query_map([], |row| {
                Ok(PageRecord {
                    url: row.get(0)?,
                    snapshot_hash: row.get(1)?,
                    depth: row.get::<_, i64>(2)? as usize,
                    out_edges: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(pages)
    }

    fn begin_session(&mut self, scan_type: &str, seed_urls: &str, configuration: &str) -> Result<Option<String>> {
        self.create_session(scan_type, seed_urls, Some(configuration)).map(Some)
    }

    fn end_session(&mut self, session_id: &str, status: SessionStatus, stop_reason: Option<&str>) -> Result<()> {
        self.finish_session(session_id, status, stop_reason)
    }
}
