use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{Album, Song};
use library::{LibraryError, LibraryStats, ScanOptions};
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::config::{resolve_library_root, save_config, ConfigError};
use crate::scan::{CancelReason, ScanStatus};
use crate::state::AppState;
use crate::watch::configure_watcher;

/// Failure returned to the presentation layer. Serializes as its message.
#[derive(Debug)]
pub enum CommandError {
    AlreadyScanning,
    NotFound(String),
    FolderUnavailable { path: PathBuf, reason: String },
    NoLibraryRoot,
    Library(LibraryError),
    Config(ConfigError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::AlreadyScanning => write!(f, "a library scan is already running"),
            CommandError::NotFound(what) => write!(f, "{} not found", what),
            CommandError::FolderUnavailable { path, reason } => {
                write!(f, "music folder {} is unavailable: {}", path.display(), reason)
            }
            CommandError::NoLibraryRoot => write!(f, "no music folder has been selected"),
            CommandError::Library(err) => write!(f, "library error: {}", err),
            CommandError::Config(err) => write!(f, "config error: {}", err),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<LibraryError> for CommandError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound(what) => CommandError::NotFound(what),
            LibraryError::FolderUnavailable { path, reason } => {
                CommandError::FolderUnavailable { path, reason }
            }
            other => CommandError::Library(other),
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        CommandError::Config(err)
    }
}

impl Serialize for CommandError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SongInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: Option<String>,
    pub duration: f64,
    pub path: String,
    pub lyrics_path: Option<String>,
    pub cover_art_base64: Option<String>,
    pub album_artist: Option<String>,
    pub year: Option<String>,
    pub label: Option<String>,
    pub track_number: Option<String>,
}

impl From<Song> for SongInfo {
    fn from(song: Song) -> Self {
        Self {
            id: song.id,
            title: song.title,
            artist: song.artist,
            album: song.album,
            genre: song.genre,
            duration: song.duration,
            path: song.path,
            lyrics_path: song.lyrics_path,
            cover_art_base64: song.cover_art.map(|bytes| STANDARD.encode(bytes)),
            album_artist: Some(song.album_artist),
            year: song.year,
            label: song.label,
            track_number: song.track_number,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlbumInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub cover_art_base64: Option<String>,
    pub song_count: u32,
    pub total_duration: f64,
    pub folder_path: String,
}

fn album_info(state: &AppState, album: Album) -> AlbumInfo {
    let cover = match state.library.album_cover(&album) {
        Ok(cover) => cover,
        Err(err) => {
            warn!("Cover for album {} unavailable: {}", album.id, err);
            None
        }
    };
    AlbumInfo {
        cover_art_base64: cover.map(|bytes| STANDARD.encode(bytes)),
        id: album.id,
        title: album.title,
        artist: album.artist,
        year: album.year,
        genre: album.genre,
        song_count: album.song_count,
        total_duration: album.total_duration,
        folder_path: album.folder_path,
    }
}

pub fn get_library_root(state: &AppState) -> Option<String> {
    let root = state.config.read().library_root.clone();
    if root.is_empty() {
        None
    } else {
        Some(root)
    }
}

/// Persists the music folder. Does not scan.
pub fn set_library_root(state: &AppState, path: &str) -> Result<(), CommandError> {
    let updated = {
        let mut config = state.config.write();
        config.library_root = path.trim().to_string();
        config.clone()
    };
    save_config(&state.config_path, &updated)?;
    info!("Library root set to {:?}", updated.library_root);
    configure_watcher(state);
    Ok(())
}

/// Starts a scan of `root`. The scan removes vanished songs only when this
/// root completed a scan before.
pub fn start_scan(state: &AppState, root: &str) -> Result<(), CommandError> {
    let root = PathBuf::from(root.trim());
    let deletion_aware = match root.canonicalize() {
        Ok(real) => state.library.is_root_scanned(&real)?,
        Err(_) => false,
    };
    begin_scan(state, root, deletion_aware)
}

/// Re-scans the configured root, removing songs whose files are gone.
pub fn rescan(state: &AppState) -> Result<(), CommandError> {
    let root = configured_root(state).ok_or(CommandError::NoLibraryRoot)?;
    begin_scan(state, root, true)
}

fn begin_scan(state: &AppState, root: PathBuf, deletion_aware: bool) -> Result<(), CommandError> {
    let options = ScanOptions {
        extensions: state.config.read().extensions.clone(),
        deletion_aware,
    };
    state
        .coordinator
        .start(state.library.clone(), root, options)
}

pub(crate) fn configured_root(state: &AppState) -> Option<PathBuf> {
    let value = state.config.read().library_root.clone();
    resolve_library_root(&state.config_path, &value)
}

pub fn get_scan_status(state: &AppState) -> ScanStatus {
    state.coordinator.status()
}

/// Returns false when no scan was running.
pub fn cancel_scan(state: &AppState) -> bool {
    state.coordinator.cancel(CancelReason::Caller)
}

pub fn list_albums(
    state: &AppState,
    limit: usize,
    offset: usize,
) -> Result<Vec<AlbumInfo>, CommandError> {
    let albums = state.library.list_albums(limit, offset)?;
    Ok(albums
        .into_iter()
        .map(|album| album_info(state, album))
        .collect())
}

pub fn get_album(state: &AppState, album_id: &str) -> Result<AlbumInfo, CommandError> {
    let album = state.library.get_album(album_id)?;
    Ok(album_info(state, album))
}

pub fn get_album_songs(state: &AppState, album_id: &str) -> Result<Vec<SongInfo>, CommandError> {
    let songs = state.library.get_album_songs(album_id)?;
    Ok(songs.into_iter().map(SongInfo::from).collect())
}

pub fn search_albums(
    state: &AppState,
    query: &str,
    limit: usize,
) -> Result<Vec<AlbumInfo>, CommandError> {
    let albums = state.library.search_albums(query, limit)?;
    Ok(albums
        .into_iter()
        .map(|album| album_info(state, album))
        .collect())
}

pub fn get_library_stats(state: &AppState) -> Result<LibraryStats, CommandError> {
    Ok(state.library.stats()?)
}
