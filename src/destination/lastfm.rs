use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::Deserialize;
use ureq::Agent;

use super::{Destination, DestinationError, Service};
use crate::classify::{Capabilities, Mark};
use crate::config::LastFmCredentials;
use crate::http::USER_AGENT;
use crate::track::TrackIdentity;

const API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";

/// Last.fm error payload: `{"error": 6, "message": "Track not found"}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    name: String,
    key: String,
}

/// Last.fm adapter. Only supports loves.
pub struct LastFm {
    agent: Agent,
    api_key: String,
    api_secret: String,
    username: String,
    password: String,
    session_key: Option<String>,
}

impl LastFm {
    pub fn new(agent: Agent, creds: &LastFmCredentials<'_>) -> Self {
        Self {
            agent,
            api_key: creds.api_key.to_string(),
            api_secret: creds.api_secret.to_string(),
            username: creds.username.to_string(),
            password: creds.password.to_string(),
            session_key: None,
        }
    }

    /// Exchange username/password for a session key (`auth.getMobileSession`).
    fn authenticate(&self) -> Result<String, DestinationError> {
        log::debug!("Requesting Last.fm session for {}", self.username);
        let mut params = BTreeMap::new();
        params.insert("method", "auth.getMobileSession");
        params.insert("username", self.username.as_str());
        params.insert("password", self.password.as_str());
        params.insert("api_key", self.api_key.as_str());

        let body = self.call(params)?;
        let response: SessionResponse = serde_json::from_str(&body)
            .map_err(|e| DestinationError::Api(format!("unexpected session response: {e}")))?;
        log::info!("Authenticated with Last.fm as {}", response.session.name);
        Ok(response.session.key)
    }

    fn session_key(&mut self) -> Result<String, DestinationError> {
        if let Some(key) = &self.session_key {
            return Ok(key.clone());
        }
        let key = self.authenticate()?;
        self.session_key = Some(key.clone());
        Ok(key)
    }

    /// `track.love` / `track.unlove`.
    fn track_call(&mut self, method: &str, track: &TrackIdentity) -> Result<(), DestinationError> {
        let sk = self.session_key()?;
        let mut params = BTreeMap::new();
        params.insert("method", method);
        params.insert("artist", track.artist.as_str());
        params.insert("track", track.title.as_str());
        params.insert("api_key", self.api_key.as_str());
        params.insert("sk", sk.as_str());

        match self.call(params) {
            Err(DestinationError::Auth(msg)) => {
                // A revoked session is re-negotiated on the next run
                self.session_key = None;
                Err(DestinationError::Auth(msg))
            }
            other => other.map(|_| ()),
        }
    }

    /// Signed POST. Returns the raw JSON body on success.
    fn call(&self, params: BTreeMap<&str, &str>) -> Result<String, DestinationError> {
        let api_sig = sign(&params, &self.api_secret);
        let mut form: Vec<(&str, &str)> = params.into_iter().collect();
        form.push(("api_sig", api_sig.as_str()));
        form.push(("format", "json"));

        let mut response = self
            .agent
            .post(API_BASE)
            .header("User-Agent", USER_AGENT)
            .send_form(form)?;
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string()?;

        if let Ok(err) = serde_json::from_str::<ErrorBody>(&body) {
            return Err(error_from_code(err.error, err.message));
        }
        if status >= 400 {
            return Err(DestinationError::Network(format!("HTTP {status} from Last.fm")));
        }
        Ok(body)
    }
}

impl Destination for LastFm {
    fn service(&self) -> Service {
        Service::LastFm
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LOVED_ONLY
    }

    fn verify(&mut self) -> Result<(), DestinationError> {
        self.session_key().map(|_| ())
    }

    fn add(&mut self, track: &TrackIdentity, mark: Mark) -> Result<Option<String>, DestinationError> {
        match mark {
            Mark::Loved => {
                log::debug!("Last.fm: loving {track}");
                // Loves are keyed by artist and title; there is no separate id
                self.track_call("track.love", track).map(|()| None)
            }
            Mark::Hated => Err(unsupported()),
        }
    }

    fn remove(
        &mut self,
        track: &TrackIdentity,
        mark: Mark,
        _remote_id: Option<&str>,
    ) -> Result<(), DestinationError> {
        match mark {
            Mark::Loved => {
                log::debug!("Last.fm: unloving {track}");
                self.track_call("track.unlove", track)
            }
            // Last.fm cannot hold a hate, so there is nothing to retract
            Mark::Hated => Ok(()),
        }
    }
}

fn unsupported() -> DestinationError {
    DestinationError::Api("Last.fm does not support hated tracks".to_string())
}

/// API signature: md5 of the sorted `keyvalue` pairs followed by the secret.
/// `format` and `callback` are never part of the signature.
fn sign(params: &BTreeMap<&str, &str>, secret: &str) -> String {
    let mut payload = String::new();
    for (k, v) in params {
        if matches!(*k, "format" | "callback") {
            continue;
        }
        payload.push_str(k);
        payload.push_str(v);
    }
    payload.push_str(secret);
    hex::encode(Md5::digest(payload.as_bytes()))
}

/// Map Last.fm API error codes onto the relay's error kinds.
fn error_from_code(code: u32, message: String) -> DestinationError {
    let msg = format!("Last.fm error {code}: {message}");
    match code {
        // auth failed, invalid session, invalid api key, unauthorized token, suspended key
        4 | 9 | 10 | 14 | 26 => DestinationError::Auth(msg),
        // invalid parameters (unknown track), invalid resource
        6 | 7 => DestinationError::NotFound(msg),
        _ => DestinationError::Api(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_sorts_params() {
        let mut params = BTreeMap::new();
        params.insert("track", "Vitamin C");
        params.insert("method", "track.love");
        params.insert("artist", "Can");
        params.insert("sk", "SESSION");
        params.insert("api_key", "KEY");
        assert_eq!(sign(&params, "SECRET"), "d82fad8dade83f0c1d00302ecd120acb");
    }

    #[test]
    fn test_sign_ignores_format() {
        let mut params = BTreeMap::new();
        params.insert("method", "track.love");
        let without = sign(&params, "s");
        params.insert("format", "json");
        assert_eq!(sign(&params, "s"), without);
    }

    #[test]
    fn test_error_codes() {
        assert!(matches!(
            error_from_code(9, "Invalid session key".into()),
            DestinationError::Auth(_)
        ));
        assert!(matches!(
            error_from_code(4, "Authentication Failed".into()),
            DestinationError::Auth(_)
        ));
        assert!(matches!(
            error_from_code(6, "Track not found".into()),
            DestinationError::NotFound(_)
        ));
        assert!(matches!(
            error_from_code(29, "Rate limit exceeded".into()),
            DestinationError::Api(_)
        ));
    }

    #[test]
    fn test_error_body_parse() {
        let err: ErrorBody =
            serde_json::from_str(r#"{"error": 6, "message": "Track not found", "links": []}"#).unwrap();
        assert_eq!(err.error, 6);
        assert!(serde_json::from_str::<ErrorBody>("{}").is_err());
    }

    #[test]
    fn test_session_parse() {
        let s: SessionResponse = serde_json::from_str(
            r#"{"session": {"name": "rj", "key": "d580d57f32848f5dcf574d1ce18d78b2", "subscriber": 0}}"#,
        )
        .unwrap();
        assert_eq!(s.session.name, "rj");
        assert_eq!(s.session.key.len(), 32);
    }

    #[test]
    fn test_hates_are_refused_but_retract_cleanly() {
        let creds = LastFmCredentials {
            api_key: "k",
            api_secret: "s",
            username: "u",
            password: "p",
        };
        let agent = crate::http::agent(std::time::Duration::from_secs(1));
        let mut lfm = LastFm::new(agent, &creds);
        assert_eq!(lfm.capabilities(), Capabilities::LOVED_ONLY);
        let track = TrackIdentity {
            source_id: "1".into(),
            artist: "Can".into(),
            title: "Vitamin C".into(),
            album: None,
            mbid: None,
        };
        assert!(matches!(lfm.add(&track, Mark::Hated), Err(DestinationError::Api(_))));
        assert_eq!(lfm.remove(&track, Mark::Hated, None), Ok(()));
    }
}
