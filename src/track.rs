use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("track \"{title}\" by \"{artist}\" has no source id")]
    MissingSourceId { artist: String, title: String },
    #[error("track {source_id} has no artist")]
    MissingArtist { source_id: String },
    #[error("track {source_id} has no title")]
    MissingTitle { source_id: String },
}

impl IdentityError {
    /// Source id of the offending record, when it had one.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::MissingSourceId { .. } => None,
            Self::MissingArtist { source_id } | Self::MissingTitle { source_id } => {
                Some(source_id)
            }
        }
    }
}

/// A track record as handed over by the source library, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrack {
    pub source_id: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    /// MusicBrainz track id, if the source library knows it.
    pub mbid: Option<String>,
    /// User rating on the 0-10 scale. `None` = never rated.
    pub rating: Option<f64>,
}

/// Stable identity of a source track.
///
/// `source_id` is the only field used to correlate with the ledger. The name
/// fields travel along so destinations can look the track up on their side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub source_id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub mbid: Option<String>,
}

impl TrackIdentity {
    pub fn resolve(raw: &RawTrack) -> Result<Self, IdentityError> {
        let source_id = clean(&raw.source_id);
        let artist = clean(&raw.artist);
        let title = clean(&raw.title);

        let Some(source_id) = source_id else {
            return Err(IdentityError::MissingSourceId {
                artist: artist.unwrap_or_default(),
                title: title.unwrap_or_default(),
            });
        };
        let Some(artist) = artist else {
            return Err(IdentityError::MissingArtist { source_id });
        };
        let Some(title) = title else {
            return Err(IdentityError::MissingTitle { source_id });
        };

        Ok(Self {
            source_id,
            artist,
            title,
            album: clean(&raw.album),
            mbid: clean(&raw.mbid),
        })
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" by {}", self.title, self.artist)
    }
}

/// One rated track as seen during the current run.
#[derive(Debug, Clone)]
pub struct Observation {
    pub track: TrackIdentity,
    pub rating: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Comparison key for artist and title text coming from different services.
///
/// Lowercases, drops straight and typographic apostrophes, spells out `&`
/// and collapses runs of whitespace.
pub fn normalize_name(name: &str) -> String {
    let lowered = name
        .to_lowercase()
        .replace(['\'', '\u{2019}', '\u{2018}'], "")
        .replace('&', " and ");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(source_id: Option<&str>, artist: Option<&str>, title: Option<&str>) -> RawTrack {
        RawTrack {
            source_id: source_id.map(String::from),
            artist: artist.map(String::from),
            title: title.map(String::from),
            album: Some("Blue Train".into()),
            mbid: None,
            rating: Some(8.0),
        }
    }

    #[test]
    fn test_resolve_complete_record() {
        let t = TrackIdentity::resolve(&raw(Some("4211"), Some("John Coltrane"), Some("Moment's Notice")))
            .unwrap();
        assert_eq!(t.source_id, "4211");
        assert_eq!(t.artist, "John Coltrane");
        assert_eq!(t.title, "Moment's Notice");
        assert_eq!(t.album.as_deref(), Some("Blue Train"));
        assert!(t.mbid.is_none());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let r = raw(Some("4211"), Some("John Coltrane"), Some("Locomotion"));
        assert_eq!(TrackIdentity::resolve(&r).unwrap(), TrackIdentity::resolve(&r).unwrap());
    }

    #[test]
    fn test_resolve_trims_and_rejects_blank() {
        let t = TrackIdentity::resolve(&raw(Some(" 7 "), Some(" Nina Simone "), Some("Sinnerman")))
            .unwrap();
        assert_eq!(t.source_id, "7");
        assert_eq!(t.artist, "Nina Simone");

        let err = TrackIdentity::resolve(&raw(Some("7"), Some("   "), Some("Sinnerman"))).unwrap_err();
        assert_eq!(err, IdentityError::MissingArtist { source_id: "7".into() });
    }

    #[test]
    fn test_resolve_missing_fields() {
        let err = TrackIdentity::resolve(&raw(None, Some("Nina Simone"), Some("Sinnerman"))).unwrap_err();
        assert!(matches!(err, IdentityError::MissingSourceId { .. }));
        assert_eq!(err.source_id(), None);

        let err = TrackIdentity::resolve(&raw(Some("9"), Some("Nina Simone"), None)).unwrap_err();
        assert_eq!(err, IdentityError::MissingTitle { source_id: "9".into() });
        assert_eq!(err.source_id(), Some("9"));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Don't Stop Me Now"), "dont stop me now");
        assert_eq!(normalize_name("Don\u{2019}t  Stop"), "dont stop");
        assert_eq!(normalize_name("Simon & Garfunkel"), "simon and garfunkel");
        assert_eq!(normalize_name("Simon&Garfunkel"), "simon and garfunkel");
    }
}
