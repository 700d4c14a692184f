use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

const ALBUM_KEY_SEP: char = '\x1e';

/// One audio file in the catalog. `path` is the unique key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    /// Tag title, or the file name without extension.
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Tag album artist, or `artist` when the tag is absent.
    pub album_artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    /// Kept verbatim, not validated as a number.
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Kept verbatim so "03" or "1/12" survive.
    #[serde(default)]
    pub track_number: Option<String>,
    /// Seconds, from stream sample count over sample rate.
    pub duration: f64,
    pub path: String,
    #[serde(default)]
    pub lyrics_path: Option<String>,
    #[serde(default)]
    pub cover_art: Option<Vec<u8>>,
    pub signature: FileSignature,
}

impl Song {
    pub fn album_key(&self) -> AlbumKey {
        AlbumKey::new(&self.album, &self.album_artist)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub cover_ref: Option<CoverRef>,
    pub song_count: u32,
    pub total_duration: f64,
    pub folder_path: String,
}

impl Album {
    pub fn key(&self) -> AlbumKey {
        AlbumKey::new(&self.title, &self.artist)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverRef {
    Embedded { song_path: String },
    File { path: String },
}

/// Normalized (title, artist) identity of an album: trimmed, lowercased,
/// control characters removed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlbumKey(String);

impl AlbumKey {
    pub fn new(title: &str, artist: &str) -> Self {
        let mut out = normalize_key_part(title);
        out.push(ALBUM_KEY_SEP);
        out.push_str(&normalize_key_part(artist));
        AlbumKey(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> String {
        stable_id(&self.0)
    }
}

impl std::fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.replace(ALBUM_KEY_SEP, " / "))
    }
}

/// Cheap change detector: modification time plus size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub modified_ns: u64,
    pub size: u64,
}

impl FileSignature {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|value| value.as_nanos().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0);
        Self {
            modified_ns,
            size: metadata.len(),
        }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn normalize_key_part(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| !ch.is_control())
        .flat_map(char::to_lowercase)
        .collect()
}
