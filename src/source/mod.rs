pub mod plex;

use thiserror::Error;

use crate::track::RawTrack;

pub use plex::Plex;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("music library \"{0}\" not found")]
    LibraryNotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<ureq::Error> for SourceError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Timeout(_) => Self::Timeout,
            other => Self::Http(other.to_string()),
        }
    }
}

/// The rating-authoritative music library.
pub trait Source {
    /// Every rated track in `library`, as one consistent snapshot.
    /// Any failure fails the whole call; a partial list is never returned.
    fn list_rated_tracks(&mut self, library: &str) -> Result<Vec<RawTrack>, SourceError>;
}
