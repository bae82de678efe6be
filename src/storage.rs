use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// The bearer token for the forum API, persisted so a restart does not
/// force a new browser login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// There is only ever one session row; saving replaces it.
    pub fn save_session(&self, token: &str, username: &str) -> Result<()> {
        if token.is_empty() {
            bail!("storage: token required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session (id, token, username, saved_at)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
  token = excluded.token,
  username = excluded.username,
  saved_at = excluded.saved_at
"#,
            params![token, username, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, username, saved_at FROM session WHERE id = 1",
            [],
            |row| {
                let saved: i64 = row.get(2)?;
                Ok(Session {
                    token: row.get(0)?,
                    username: row.get(1)?,
                    saved_at: Utc
                        .timestamp_opt(saved, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .context("storage: query session")
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session", [])?;
        Ok(())
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: preference key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO preferences (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("storage: query preference")
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS session (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  token TEXT NOT NULL,
  username TEXT NOT NULL,
  saved_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("threadscout").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(dir.path().join("state.db").exists());
        store.close().unwrap();
    }

    #[test]
    fn session_round_trip_and_clear() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.load_session().unwrap().is_none());
        store.save_session("tok-1", "alice").unwrap();
        store.save_session("tok-2", "alice").unwrap();

        let session = store.load_session().unwrap().unwrap();
        assert_eq!(session.token, "tok-2");
        assert_eq!(session.username, "alice");

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
        store.close().unwrap();
    }

    #[test]
    fn preferences_upsert() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.get_preference("open_mode").unwrap().is_none());
        store.set_preference("open_mode", "app").unwrap();
        store.set_preference("open_mode", "web").unwrap();
        assert_eq!(
            store.get_preference("open_mode").unwrap().as_deref(),
            Some("web")
        );
        store.close().unwrap();
    }
}
