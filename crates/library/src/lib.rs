use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod albums;
mod extract;
mod scan;
mod search;
mod store;
mod walk;

pub use extract::{extract_song, ExtractionError};
pub use scan::{run_scan, NoopObserver, ScanObserver, ScanOptions, ScanReport};
pub use store::UpsertOutcome;
pub use walk::{FolderWalker, DEFAULT_EXTENSIONS};

const INDEX_VERSION: u32 = 2;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");
const SONG_SIGNATURES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("song_signatures");
const ALBUM_SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_songs");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const ALBUMS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums_by_name");
/// Album keys whose rows are stale. Written with every membership change and
/// drained by album recomputation.
const DIRTY_ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dirty_albums");

const ALL_TABLES: [TableDefinition<&str, &[u8]>; 7] = [
    META_TABLE,
    SONGS_TABLE,
    SONG_SIGNATURES_TABLE,
    ALBUM_SONGS_TABLE,
    ALBUMS_TABLE,
    ALBUMS_BY_NAME_TABLE,
    DIRTY_ALBUMS_TABLE,
];

const META_VERSION_KEY: &str = "version";
const META_ROOTS_KEY: &str = "scanned_roots";

/// Handle on the persistent catalog. Cheap to clone; every clone shares the
/// same database, which serializes writers and lets readers run alongside.
#[derive(Clone)]
pub struct Library {
    db: Arc<Database>,
}

impl Library {
    pub fn open(db_path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(db_path)?;
        let library = Self::with_db(Arc::new(db))?;
        info!("Loaded catalog from {:?}", db_path);
        Ok(library)
    }

    pub fn with_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        let library = Self { db };
        match read_version(&library.db)? {
            Some(version) if version == INDEX_VERSION => {}
            Some(version) => {
                warn!("Catalog version mismatch ({}); clearing", version);
                library.reset()?;
            }
            None => library.reset()?,
        }
        Ok(library)
    }

    /// Drops every song and album and recreates empty tables.
    pub fn reset(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        for table in ALL_TABLES {
            clear_table(&write_txn, table)?;
        }
        {
            for table in ALL_TABLES {
                write_txn.open_table(table)?;
            }
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&INDEX_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let songs = read_txn.open_table(SONGS_TABLE)?.len()? as usize;
        let albums = read_txn.open_table(ALBUMS_TABLE)?.len()? as usize;
        Ok(LibraryStats { albums, songs })
    }

    /// Whether `root` completed a scan before, which makes the next scan of
    /// it deletion-aware.
    pub fn is_root_scanned(&self, root: &Path) -> Result<bool, LibraryError> {
        let key = common::path_string(root);
        Ok(self.scanned_roots()?.iter().any(|value| *value == key))
    }

    pub fn scanned_roots(&self) -> Result<Vec<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        let roots = match table.get(META_ROOTS_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => Vec::new(),
        };
        Ok(roots)
    }

    pub(crate) fn mark_root_scanned(&self, root: &Path) -> Result<(), LibraryError> {
        let key = common::path_string(root);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            let mut roots: Vec<String> = match table.get(META_ROOTS_KEY)? {
                Some(value) => decode_value(value.value())?,
                None => Vec::new(),
            };
            if roots.contains(&key) {
                return Ok(());
            }
            roots.push(key);
            roots.sort();
            let bytes = encode_value(&roots)?;
            table.insert(META_ROOTS_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub albums: usize,
    pub songs: usize,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    FolderUnavailable { path: PathBuf, reason: String },
    NotFound(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::FolderUnavailable { path, reason } => {
                write!(f, "music folder {} is unavailable: {}", path.display(), reason)
            }
            LibraryError::NotFound(what) => write!(f, "{} not found", what),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn prefix_end(prefix: &str) -> String {
    let mut end = prefix_key(prefix);
    end.push('\u{10ffff}');
    end
}

fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}
