use std::fs;
use std::path::Path;

use common::{path_string, Album, AlbumKey, CoverRef, Song};
use redb::{ReadableTable, Table};
use tracing::debug;

use crate::store::collect_members;
use crate::{
    decode_value, encode_value, split_key_last, Library, LibraryError, ALBUMS_BY_NAME_TABLE,
    ALBUMS_TABLE, ALBUM_SONGS_TABLE, DIRTY_ALBUMS_TABLE, KEY_SEP, SONGS_TABLE,
};

const RECOMPUTE_BATCH: usize = 256;

const COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.jpeg",
    "front.png",
    "album.jpg",
    "album.png",
];

impl Library {
    /// Rebuilds the album rows for `keys` from their current members and
    /// clears their dirty marks in the same transaction. Albums left without
    /// members are removed. Returns how many keys were processed.
    pub fn recompute_albums(&self, keys: &[AlbumKey]) -> Result<usize, LibraryError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        for batch in keys.chunks(RECOMPUTE_BATCH) {
            let write_txn = self.db.begin_write()?;
            {
                let membership_table = write_txn.open_table(ALBUM_SONGS_TABLE)?;
                let songs_table = write_txn.open_table(SONGS_TABLE)?;
                let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
                let mut name_table = write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
                let mut dirty_table = write_txn.open_table(DIRTY_ALBUMS_TABLE)?;

                for key in batch {
                    let members = collect_members(&membership_table, &songs_table, key)?;
                    recompute_one(&mut album_table, &mut name_table, key, &members)?;
                    dirty_table.remove(key.as_str())?;
                }
            }
            write_txn.commit()?;
        }
        Ok(keys.len())
    }

    /// Albums whose membership changed since they were last rebuilt.
    pub fn dirty_albums(&self) -> Result<Vec<AlbumKey>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DIRTY_ALBUMS_TABLE)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            keys.push(decode_value(entry.1.value())?);
        }
        Ok(keys)
    }

    /// Rebuilds every dirty album, including ones left over from a pass that
    /// never reached its aggregation step.
    pub fn recompute_dirty_albums(&self) -> Result<usize, LibraryError> {
        let keys = self.dirty_albums()?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.recompute_albums(&keys)
    }

    /// Albums ordered by title, then artist, case-insensitively. An offset
    /// past the end yields an empty page.
    pub fn list_albums(&self, limit: usize, offset: usize) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let name_table = read_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;

        let mut seen = 0usize;
        let mut items = Vec::new();
        for entry in name_table.iter()? {
            if items.len() >= limit {
                break;
            }
            let entry = entry?;
            seen += 1;
            if seen <= offset {
                continue;
            }
            let (_, album_id) = split_key_last(entry.0.value())?;
            if let Some(value) = album_table.get(album_id)? {
                let album: Album = decode_value(value.value())?;
                items.push(album);
            }
        }
        Ok(items)
    }

    pub fn get_album(&self, id: &str) -> Result<Album, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let album = match table.get(id)? {
            Some(value) => decode_value(value.value())?,
            None => return Err(LibraryError::NotFound(format!("album {}", id))),
        };
        Ok(album)
    }

    pub fn get_album_songs(&self, id: &str) -> Result<Vec<Song>, LibraryError> {
        let album = self.get_album(id)?;
        self.get_songs_for_album(&album.key())
    }

    /// Image bytes for the album's representative cover, if any.
    pub fn album_cover(&self, album: &Album) -> Result<Option<Vec<u8>>, LibraryError> {
        match &album.cover_ref {
            Some(CoverRef::Embedded { song_path }) => {
                Ok(self.get_song(song_path)?.and_then(|song| song.cover_art))
            }
            Some(CoverRef::File { path }) => match fs::read(path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
            None => Ok(None),
        }
    }
}

fn recompute_one(
    album_table: &mut Table<'_, '_, &'static str, &'static [u8]>,
    name_table: &mut Table<'_, '_, &'static str, &'static [u8]>,
    key: &AlbumKey,
    members: &[Song],
) -> Result<(), LibraryError> {
    let album_id = key.id();
    let existing: Option<Album> = match album_table.get(album_id.as_str())? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    if let Some(existing) = &existing {
        name_table.remove(name_key(existing).as_str())?;
    }

    let first = match members.first() {
        Some(first) => first,
        None => {
            album_table.remove(album_id.as_str())?;
            debug!("Removed empty album {}", key);
            return Ok(());
        }
    };

    let folder_path = match existing.as_ref().map(|album| album.folder_path.clone()) {
        Some(folder) if !folder.is_empty() => folder,
        _ => Path::new(&first.path)
            .parent()
            .map(path_string)
            .unwrap_or_default(),
    };

    let cover_ref = members
        .iter()
        .find(|song| song.cover_art.is_some())
        .map(|song| CoverRef::Embedded {
            song_path: song.path.clone(),
        })
        .or_else(|| {
            Path::new(&first.path)
                .parent()
                .and_then(find_folder_cover)
                .map(|path| CoverRef::File { path })
        });

    let album = Album {
        id: album_id,
        title: first.album.clone(),
        artist: first.album_artist.clone(),
        year: first_present(members, |song| song.year.as_deref()),
        genre: first_present(members, |song| song.genre.as_deref()),
        cover_ref,
        song_count: members.len() as u32,
        total_duration: members.iter().map(|song| song.duration).sum(),
        folder_path,
    };

    let bytes = encode_value(&album)?;
    album_table.insert(album.id.as_str(), bytes.as_slice())?;
    name_table.insert(name_key(&album).as_str(), album.id.as_bytes())?;
    Ok(())
}

fn first_present<'a>(
    members: &'a [Song],
    field: impl Fn(&'a Song) -> Option<&'a str>,
) -> Option<String> {
    members
        .iter()
        .filter_map(field)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn name_key(album: &Album) -> String {
    let mut out = String::new();
    out.push_str(&name_part(&album.title));
    out.push(KEY_SEP);
    out.push_str(&name_part(&album.artist));
    out.push(KEY_SEP);
    out.push_str(&album.id);
    out
}

fn name_part(value: &str) -> String {
    value.to_lowercase().replace(KEY_SEP, "")
}

fn find_folder_cover(album_dir: &Path) -> Option<String> {
    let entries = fs::read_dir(album_dir).ok()?;
    let mut best: Option<(usize, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_ascii_lowercase(),
            None => continue,
        };
        if let Some(rank) = COVERS.iter().position(|candidate| *candidate == name) {
            if best.as_ref().map_or(true, |(current, _)| rank < *current) {
                best = Some((rank, path_string(&path)));
            }
        }
    }
    best.map(|(_, path)| path)
}
