use common::{AlbumKey, FileSignature, Song};
use redb::{ReadableTable, Table};

use crate::{
    decode_value, encode_value, prefix_end, prefix_key, Library, LibraryError, ALBUM_SONGS_TABLE,
    DIRTY_ALBUMS_TABLE, SONGS_TABLE, SONG_SIGNATURES_TABLE,
};

/// Result of [`Library::upsert_song`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted {
        album: AlbumKey,
    },
    /// `previous_album` differs from `album` when the song's album tags
    /// changed and it moved to another album.
    Updated {
        album: AlbumKey,
        previous_album: AlbumKey,
    },
    Unchanged,
}

impl UpsertOutcome {
    /// Albums whose membership or aggregates may have moved.
    pub fn touched_albums(&self) -> Vec<AlbumKey> {
        match self {
            UpsertOutcome::Inserted { album } => vec![album.clone()],
            UpsertOutcome::Updated {
                album,
                previous_album,
            } if album != previous_album => vec![album.clone(), previous_album.clone()],
            UpsertOutcome::Updated { album, .. } => vec![album.clone()],
            UpsertOutcome::Unchanged => Vec::new(),
        }
    }
}

impl Library {
    /// Inserts or refreshes the song stored at `song.path`.
    ///
    /// An existing record is rewritten only when its change signature
    /// differs. The song row, its signature, its album membership and the
    /// dirty marks for every album it touched are committed in one
    /// transaction.
    pub fn upsert_song(&self, song: &Song) -> Result<UpsertOutcome, LibraryError> {
        let path = song.path.as_str();
        let album = song.album_key();
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut songs_table = write_txn.open_table(SONGS_TABLE)?;
            let mut signatures_table = write_txn.open_table(SONG_SIGNATURES_TABLE)?;
            let mut membership_table = write_txn.open_table(ALBUM_SONGS_TABLE)?;
            let mut dirty_table = write_txn.open_table(DIRTY_ALBUMS_TABLE)?;

            let existing: Option<Song> = match songs_table.get(path)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };

            let mut record = song.clone();
            let outcome = match existing {
                Some(existing) if existing.signature == song.signature => {
                    return Ok(UpsertOutcome::Unchanged);
                }
                Some(existing) => {
                    record.id = existing.id.clone();
                    let previous_album = existing.album_key();
                    if previous_album != album {
                        membership_table.remove(membership_key(&previous_album, path).as_str())?;
                    }
                    UpsertOutcome::Updated {
                        album: album.clone(),
                        previous_album,
                    }
                }
                None => UpsertOutcome::Inserted {
                    album: album.clone(),
                },
            };

            let song_bytes = encode_value(&record)?;
            songs_table.insert(path, song_bytes.as_slice())?;
            let signature_bytes = encode_value(&record.signature)?;
            signatures_table.insert(path, signature_bytes.as_slice())?;
            membership_table.insert(membership_key(&album, path).as_str(), path.as_bytes())?;
            for key in outcome.touched_albums() {
                mark_dirty(&mut dirty_table, &key)?;
            }
            outcome
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Removes the song at `path`, returning the album it belonged to, which
    /// is marked dirty. Absent paths are a no-op.
    pub fn delete_song(&self, path: &str) -> Result<Option<AlbumKey>, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let album = {
            let mut songs_table = write_txn.open_table(SONGS_TABLE)?;
            let mut signatures_table = write_txn.open_table(SONG_SIGNATURES_TABLE)?;
            let mut membership_table = write_txn.open_table(ALBUM_SONGS_TABLE)?;
            let mut dirty_table = write_txn.open_table(DIRTY_ALBUMS_TABLE)?;

            let existing: Song = match songs_table.remove(path)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(None),
            };
            signatures_table.remove(path)?;
            let album = existing.album_key();
            membership_table.remove(membership_key(&album, path).as_str())?;
            mark_dirty(&mut dirty_table, &album)?;
            album
        };
        write_txn.commit()?;
        Ok(Some(album))
    }

    /// Every stored song path, in ascending order.
    pub fn list_song_paths(&self) -> Result<Vec<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SONG_SIGNATURES_TABLE)?;
        let mut paths = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            paths.push(entry.0.value().to_string());
        }
        Ok(paths)
    }

    pub fn get_song(&self, path: &str) -> Result<Option<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SONGS_TABLE)?;
        let song = match table.get(path)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(song)
    }

    pub fn song_signature(&self, path: &str) -> Result<Option<FileSignature>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SONG_SIGNATURES_TABLE)?;
        let signature = match table.get(path)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(signature)
    }

    /// Member songs of an album, ordered by path.
    pub fn get_songs_for_album(&self, album: &AlbumKey) -> Result<Vec<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let membership_table = read_txn.open_table(ALBUM_SONGS_TABLE)?;
        let songs_table = read_txn.open_table(SONGS_TABLE)?;
        collect_members(&membership_table, &songs_table, album)
    }
}

fn mark_dirty(
    dirty_table: &mut Table<'_, '_, &'static str, &'static [u8]>,
    album: &AlbumKey,
) -> Result<(), LibraryError> {
    let bytes = encode_value(album)?;
    dirty_table.insert(album.as_str(), bytes.as_slice())?;
    Ok(())
}

pub(crate) fn membership_key(album: &AlbumKey, path: &str) -> String {
    let mut out = prefix_key(album.as_str());
    out.push_str(path);
    out
}

pub(crate) fn collect_members(
    membership_table: &impl ReadableTable<&'static str, &'static [u8]>,
    songs_table: &impl ReadableTable<&'static str, &'static [u8]>,
    album: &AlbumKey,
) -> Result<Vec<Song>, LibraryError> {
    let start = prefix_key(album.as_str());
    let end = prefix_end(album.as_str());
    let mut songs = Vec::new();
    for entry in membership_table.range(start.as_str()..end.as_str())? {
        let entry = entry?;
        let path = String::from_utf8_lossy(entry.1.value()).to_string();
        if let Some(value) = songs_table.get(path.as_str())? {
            let song: Song = decode_value(value.value())?;
            songs.push(song);
        }
    }
    Ok(songs)
}
