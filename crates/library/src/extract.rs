use std::fs;
use std::path::{Path, PathBuf};

use common::{path_string, stable_id, FileSignature, Song, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use metadata::{find_lyrics, read_tags};

/// A file that could not be turned into a [`Song`]. Never fatal to a scan.
#[derive(Debug)]
pub struct ExtractionError {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported or corrupt audio file {}: {}",
            self.path.display(),
            self.reason
        )
    }
}

impl std::error::Error for ExtractionError {}

/// Parses one audio file into a song record.
///
/// Fallbacks: title -> file stem, artist -> "Unknown Artist",
/// album -> "Unknown Album", album artist -> artist.
pub fn extract_song(path: &Path) -> Result<Song, ExtractionError> {
    let fail = |reason: String| ExtractionError {
        path: path.to_path_buf(),
        reason,
    };

    let file_meta = fs::metadata(path).map_err(|err| fail(err.to_string()))?;
    if !file_meta.is_file() {
        return Err(fail("not a regular file".to_string()));
    }
    let signature = FileSignature::from_metadata(&file_meta);
    let tags = read_tags(path).map_err(|err| fail(err.to_string()))?;

    let artist = tags
        .artist
        .or_else(|| tags.album_artist.clone())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album_artist = tags.album_artist.unwrap_or_else(|| artist.clone());
    let path_str = path_string(path);

    Ok(Song {
        id: stable_id(&path_str),
        title: tags.title.unwrap_or_else(|| file_stem(path)),
        artist,
        album: tags.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        album_artist,
        genre: tags.genre,
        year: tags.year,
        label: tags.label,
        track_number: tags.track_number,
        duration: tags.duration_secs.max(0.0),
        lyrics_path: find_lyrics(path).map(|lyrics| path_string(&lyrics)),
        cover_art: tags.cover,
        path: path_str,
        signature,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}
