use std::path::{Path, PathBuf};

use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::tag::Tag;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub const LYRICS_EXTENSIONS: &[&str] = &["lrc", "LRC"];

#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub label: Option<String>,
    pub track_number: Option<String>,
    pub duration_secs: f64,
    /// Front cover image bytes, else the first embedded picture.
    pub cover: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads the tag block and stream properties of one audio file.
///
/// Duration comes from the stream header (sample count over sample rate),
/// never from tag text. A file without any tag block still succeeds with
/// empty fields; only unreadable or unparsable files fail.
pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo {
        duration_secs: properties.duration().as_secs_f64(),
        ..TagInfo::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = text(tag, &ItemKey::TrackTitle);
        info.album = text(tag, &ItemKey::AlbumTitle);
        info.artist = text(tag, &ItemKey::TrackArtist);
        info.album_artist = text(tag, &ItemKey::AlbumArtist);
        info.genre = text(tag, &ItemKey::Genre);
        info.year = text(tag, &ItemKey::Year).or_else(|| text(tag, &ItemKey::RecordingDate));
        info.label = text(tag, &ItemKey::Label).or_else(|| text(tag, &ItemKey::Publisher));
        info.track_number = text(tag, &ItemKey::TrackNumber);
        info.cover = pick_picture(tag.pictures()).map(|picture| picture.data().to_vec());
    }

    Ok(info)
}

/// Looks next to `path` for a lyrics file sharing its base name.
pub fn find_lyrics(path: &Path) -> Option<PathBuf> {
    LYRICS_EXTENSIONS
        .iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate != path && candidate.is_file())
}

fn text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FlacFixture;

    #[test]
    fn reads_vorbis_comments_and_stream_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.flac");
        FlacFixture::new(44_100, 441_000)
            .comment("TITLE", "Blue in Green")
            .comment("ARTIST", "Miles Davis")
            .comment("ALBUM", "Kind of Blue")
            .comment("GENRE", "Jazz")
            .comment("LABEL", "Columbia")
            .comment("TRACKNUMBER", "3")
            .write(&path)
            .unwrap();

        let info = read_tags(&path).unwrap();
        assert_eq!(info.title.as_deref(), Some("Blue in Green"));
        assert_eq!(info.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(info.album.as_deref(), Some("Kind of Blue"));
        assert_eq!(info.album_artist, None);
        assert_eq!(info.genre.as_deref(), Some("Jazz"));
        assert_eq!(info.label.as_deref(), Some("Columbia"));
        assert_eq!(info.track_number.as_deref(), Some("3"));
        assert!((info.duration_secs - 10.0).abs() < 0.01);
        assert!(info.cover.is_none());
    }

    #[test]
    fn blank_tags_count_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.flac");
        FlacFixture::new(48_000, 96_000)
            .comment("TITLE", "   ")
            .comment("ARTIST", "Someone")
            .write(&path)
            .unwrap();

        let info = read_tags(&path).unwrap();
        assert_eq!(info.title, None);
        assert_eq!(info.artist.as_deref(), Some("Someone"));
        assert!((info.duration_secs - 2.0).abs() < 0.01);
    }

    #[test]
    fn prefers_front_cover_picture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.flac");
        let png = vec![0x89, 0x50, 0x4E, 0x47, 1, 2, 3];
        FlacFixture::new(44_100, 44_100)
            .comment("TITLE", "With Art")
            .picture(4, "image/png", vec![0x89, 0x50, 0x4E, 0x47, 9, 9])
            .picture(3, "image/png", png.clone())
            .write(&path)
            .unwrap();

        assert_eq!(read_tags(&path).unwrap().cover, Some(png));
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.flac");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        assert!(read_tags(&path).is_err());
    }

    #[test]
    fn finds_sidecar_lyrics_by_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("track.flac");
        std::fs::write(&song, b"").unwrap();
        assert_eq!(find_lyrics(&song), None);

        std::fs::write(dir.path().join("other.lrc"), b"[00:01]la").unwrap();
        assert_eq!(find_lyrics(&song), None);

        let lyrics = dir.path().join("track.lrc");
        std::fs::write(&lyrics, b"[00:01]la").unwrap();
        assert_eq!(find_lyrics(&song), Some(lyrics));
    }
}
