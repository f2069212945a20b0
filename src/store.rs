use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

const STORE_DIR: &str = "standings_forecast";
const STORE_FILE: &str = "models.json";

/// Opaque blob persistence for the committed model set.
pub trait ModelStore: Send + Sync {
    fn load(&self) -> Result<Option<Vec<u8>>>;
    fn store(&self, blob: &[u8]) -> Result<()>;
}

pub fn app_data_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_DATA_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(STORE_DIR));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".local").join("share").join(STORE_DIR))
}

#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Option<Self> {
        app_data_dir().map(|dir| Self::new(dir.join(STORE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("read model blob {}", self.path.display()))?;
        Ok(Some(bytes))
    }

    fn store(&self, blob: &[u8]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create model dir {}", dir.display()))?;
        }
        // Write then rename so a reader never sees a half-written blob.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, blob).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

/// Keeps every stored blob; `load` returns the newest.
#[derive(Debug)]
pub struct SqliteModelStore {
    conn: Mutex<Connection>,
}

impl SqliteModelStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS model_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stored_at TEXT NOT NULL,
                blob BLOB NOT NULL
            );
            "#,
        )
        .context("create sqlite schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn versions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM model_sets", [], |row| row.get(0))
            .context("count model sets")?;
        Ok(count as usize)
    }
}

impl ModelStore for SqliteModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT blob FROM model_sets ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .context("load latest model set")
    }

    fn store(&self, blob: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO model_sets (stored_at, blob) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), blob],
        )
        .context("insert model set")?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryModelStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.blob.lock().clone())
    }

    fn store(&self, blob: &[u8]) -> Result<()> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_replaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileModelStore::new(dir.path().join("nested").join("models.json"));
        assert!(store.load().expect("load").is_none());

        store.store(b"first").expect("store");
        store.store(b"second").expect("store");
        assert_eq!(store.load().expect("load").as_deref(), Some(&b"second"[..]));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn sqlite_store_returns_latest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteModelStore::open(&dir.path().join("models.sqlite")).expect("open");
        assert!(store.load().expect("load").is_none());
        store.store(b"v1").expect("store");
        store.store(b"v2").expect("store");
        assert_eq!(store.versions().expect("count"), 2);
        assert_eq!(store.load().expect("load").as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn sqlite_store_creates_missing_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("models.sqlite");
        SqliteModelStore::open(&path).expect("open");
        assert!(path.exists());
    }

    #[test]
    fn sqlite_store_reports_unusable_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a dir").expect("write");
        let err = SqliteModelStore::open(&blocker.join("models.sqlite")).unwrap_err();
        assert!(err.to_string().starts_with("create db dir"), "{err:#}");
    }

    #[test]
    fn memory_store_starts_empty() {
        let store = MemoryModelStore::new();
        assert!(store.load().expect("load").is_none());
        store.store(b"x").expect("store");
        assert_eq!(store.load().expect("load"), Some(b"x".to_vec()));
    }
}
