//! Destination services that accept love/hate feedback.
//!
//! Each service gets one [`Destination`] implementation. The engine only
//! talks to the trait; [`connect_all`] builds the enabled adapters from the
//! configuration in the order of [`Service::ALL`].

pub mod lastfm;
pub mod listenbrainz;
pub mod musicbrainz;

use std::fmt;

use thiserror::Error;
use ureq::Agent;

use crate::classify::{Capabilities, Mark};
use crate::config::{AppConfig, ConfigError};
use crate::track::TrackIdentity;

pub use lastfm::LastFm;
pub use listenbrainz::ListenBrainz;

/// Identifier of a destination service. Stored in the ledger as `as_str()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    LastFm,
    ListenBrainz,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::LastFm, Service::ListenBrainz];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastFm => "lastfm",
            Self::ListenBrainz => "listenbrainz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|svc| svc.as_str() == s)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::LastFm => "Last.fm",
            Self::ListenBrainz => "ListenBrainz",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// Credentials rejected. Fatal for the destination's whole pass.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The service has no track matching the artist/title.
    #[error("no matching track: {0}")]
    NotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
}

impl From<ureq::Error> for DestinationError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Timeout(_) => Self::Timeout,
            ureq::Error::StatusCode(401 | 403) => Self::Auth(e.to_string()),
            other => Self::Network(other.to_string()),
        }
    }
}

/// A service the relay can push loves and hates to.
pub trait Destination {
    fn service(&self) -> Service;

    /// Marks this destination accepts for new additions. Fixed for the
    /// adapter's lifetime. Retraction of a previously placed mark is always
    /// attempted, even if the mark is no longer listed here.
    fn capabilities(&self) -> Capabilities;

    /// Check (and if needed establish) authentication before a pass.
    fn verify(&mut self) -> Result<(), DestinationError>;

    /// Apply `mark` to the track. Already holding it remotely is success.
    /// Returns the destination's own key for the marked item, if it has one.
    fn add(&mut self, track: &TrackIdentity, mark: Mark) -> Result<Option<String>, DestinationError>;

    /// Retract `mark` from the track. `remote_id` is the key `add` returned,
    /// when the ledger has it. Already absent remotely is success, and so is
    /// a mark the user has since changed by hand (it is no longer ours).
    fn remove(
        &mut self,
        track: &TrackIdentity,
        mark: Mark,
        remote_id: Option<&str>,
    ) -> Result<(), DestinationError>;
}

/// Build every enabled destination. No network traffic happens here;
/// authentication is checked per destination when its pass starts.
pub fn connect_all(config: &AppConfig, agent: &Agent) -> Result<Vec<Box<dyn Destination>>, ConfigError> {
    let mut destinations: Vec<Box<dyn Destination>> = Vec::new();

    for service in Service::ALL {
        match service {
            Service::LastFm => match config.lastfm.as_ref() {
                Some(cfg) if cfg.enabled => {
                    let creds = cfg.credentials()?;
                    destinations.push(Box::new(LastFm::new(agent.clone(), &creds)));
                }
                Some(_) => log::info!("Last.fm disabled in config - skipping"),
                None => log::info!("Last.fm not configured - skipping"),
            },
            Service::ListenBrainz => match config.listenbrainz.as_ref() {
                Some(cfg) if cfg.enabled => {
                    let token = cfg.credentials()?;
                    let resolver = musicbrainz::RecordingResolver::new(
                        agent.clone(),
                        &config.musicbrainz,
                    );
                    destinations.push(Box::new(ListenBrainz::new(
                        agent.clone(),
                        token,
                        cfg.relay_hates,
                        resolver,
                    )));
                }
                Some(_) => log::info!("ListenBrainz disabled in config - skipping"),
                None => log::info!("ListenBrainz not configured - skipping"),
            },
        }
    }

    if destinations.is_empty() {
        return Err(ConfigError::NoDestinations);
    }
    Ok(destinations)
}
