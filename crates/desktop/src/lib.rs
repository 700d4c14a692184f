//! Command and event surface over the music catalog.
//!
//! Commands are plain functions over [`AppState`]; scan outcomes arrive on
//! the [`EventBus`].

pub mod commands;
pub mod config;
pub mod events;
pub mod scan;
pub mod state;
pub mod watch;

pub use commands::{AlbumInfo, CommandError, SongInfo};
pub use events::{CatalogEvent, EventBus};
pub use scan::{CancelReason, ProgressPolicy, ScanCoordinator, ScanState, ScanStatus};
pub use state::AppState;
