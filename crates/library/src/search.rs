use common::Album;
use redb::ReadableTable;

use crate::{decode_value, Library, LibraryError, ALBUMS_BY_NAME_TABLE, ALBUMS_TABLE, KEY_SEP};

impl Library {
    /// Case-insensitive substring search over album title and artist.
    ///
    /// Albums whose title or artist starts with the query come first, then
    /// interior matches; each tier keeps title order. A blank query returns
    /// nothing without opening a transaction.
    pub fn search_albums(&self, query: &str, limit: usize) -> Result<Vec<Album>, LibraryError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let name_table = read_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;

        let mut leading = Vec::new();
        let mut interior = Vec::new();
        for entry in name_table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            let mut parts = key.splitn(3, KEY_SEP);
            let (title, artist, album_id) = match (parts.next(), parts.next(), parts.next()) {
                (Some(title), Some(artist), Some(album_id)) => (title, artist, album_id),
                _ => return Err(LibraryError::KeyParse(key.to_string())),
            };
            match match_tier(&query, title, artist) {
                Some(0) => leading.push(album_id.to_string()),
                Some(_) => interior.push(album_id.to_string()),
                None => {}
            }
            if leading.len() >= limit {
                break;
            }
        }

        let mut items = Vec::new();
        for album_id in leading.into_iter().chain(interior).take(limit) {
            if let Some(value) = album_table.get(album_id.as_str())? {
                let album: Album = decode_value(value.value())?;
                items.push(album);
            }
        }
        Ok(items)
    }
}

fn match_tier(query: &str, title: &str, artist: &str) -> Option<u8> {
    if title.starts_with(query) || artist.starts_with(query) {
        Some(0)
    } else if title.contains(query) || artist.contains(query) {
        Some(1)
    } else {
        None
    }
}
