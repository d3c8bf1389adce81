use serde::{Deserialize, Serialize};
use ureq::Agent;

use super::musicbrainz::RecordingResolver;
use super::{Destination, DestinationError, Service};
use crate::classify::{Capabilities, Mark};
use crate::http::USER_AGENT;
use crate::track::TrackIdentity;

const API_ROOT: &str = "https://api.listenbrainz.org/1";

#[derive(Debug, Deserialize)]
struct TokenValidation {
    valid: bool,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct FeedbackRequest<'a> {
    recording_mbid: &'a str,
    score: i8,
}

#[derive(Debug, Deserialize)]
struct FeedbackList {
    #[serde(default)]
    feedback: Vec<FeedbackItem>,
}

#[derive(Debug, Deserialize)]
struct FeedbackItem {
    #[serde(default)]
    recording_mbid: Option<String>,
    score: i8,
}

/// ListenBrainz adapter. Feedback is keyed by MusicBrainz recording id:
/// 1 = love, -1 = hate, 0 = cleared.
pub struct ListenBrainz {
    agent: Agent,
    token: String,
    relay_hates: bool,
    resolver: RecordingResolver,
    /// Set by `verify`; feedback lookups are per user.
    user_name: Option<String>,
}

impl ListenBrainz {
    pub fn new(agent: Agent, token: &str, relay_hates: bool, resolver: RecordingResolver) -> Self {
        Self {
            agent,
            token: token.to_string(),
            relay_hates,
            resolver,
            user_name: None,
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    fn recording_id(&mut self, track: &TrackIdentity) -> Result<String, DestinationError> {
        self.resolver.recording_id(track)?.ok_or_else(|| {
            DestinationError::NotFound(format!("no MusicBrainz recording for {track}"))
        })
    }

    fn submit(&self, recording_mbid: &str, score: i8) -> Result<(), DestinationError> {
        log::debug!("ListenBrainz: feedback {score} for {recording_mbid}");

        let mut response = self
            .agent
            .post(format!("{API_ROOT}/feedback/recording-feedback"))
            .header("Authorization", self.auth_header())
            .header("User-Agent", USER_AGENT)
            .send_json(FeedbackRequest {
                recording_mbid,
                score,
            })?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(());
        }
        let body = response.body_mut().read_to_string().unwrap_or_default();
        Err(error_from_status(status, body))
    }

    /// The user's current feedback score for one recording (0 when none).
    fn current_score(&mut self, recording_mbid: &str) -> Result<i8, DestinationError> {
        if self.user_name.is_none() {
            self.verify()?;
        }
        let Some(user) = self.user_name.as_deref() else {
            return Err(DestinationError::Auth("ListenBrainz user unknown".to_string()));
        };

        let mut response = self
            .agent
            .get(format!("{API_ROOT}/feedback/user/{user}/get-feedback-for-recordings"))
            .header("Authorization", self.auth_header())
            .header("User-Agent", USER_AGENT)
            .query("recording_mbids", recording_mbid)
            .call()?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(error_from_status(status, body));
        }
        let list: FeedbackList = response
            .body_mut()
            .read_json()
            .map_err(|e| DestinationError::Api(format!("bad feedback response: {e}")))?;
        Ok(score_for(&list, recording_mbid))
    }
}

impl Destination for ListenBrainz {
    fn service(&self) -> Service {
        Service::ListenBrainz
    }

    fn capabilities(&self) -> Capabilities {
        if self.relay_hates {
            Capabilities::LOVED_AND_HATED
        } else {
            Capabilities::LOVED_ONLY
        }
    }

    fn verify(&mut self) -> Result<(), DestinationError> {
        let mut response = self
            .agent
            .get(format!("{API_ROOT}/validate-token"))
            .header("Authorization", self.auth_header())
            .header("User-Agent", USER_AGENT)
            .call()?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(error_from_status(status, body));
        }
        let validation: TokenValidation = response
            .body_mut()
            .read_json()
            .map_err(|e| DestinationError::Api(format!("bad validate-token response: {e}")))?;
        self.user_name = Some(check_validation(validation)?);
        Ok(())
    }

    fn add(&mut self, track: &TrackIdentity, mark: Mark) -> Result<Option<String>, DestinationError> {
        if mark == Mark::Hated && !self.relay_hates {
            return Err(DestinationError::Api(
                "hate relaying is disabled for ListenBrainz".to_string(),
            ));
        }
        let recording_mbid = self.recording_id(track)?;
        log::debug!("ListenBrainz: {mark} {track} as {recording_mbid}");
        self.submit(&recording_mbid, mark_score(mark))?;
        Ok(Some(recording_mbid))
    }

    fn remove(
        &mut self,
        track: &TrackIdentity,
        mark: Mark,
        remote_id: Option<&str>,
    ) -> Result<(), DestinationError> {
        // Entries recorded before recording ids were stored fall back to a lookup
        let recording_mbid = match remote_id {
            Some(id) => id.to_string(),
            None => self.recording_id(track)?,
        };

        let current = self.current_score(&recording_mbid)?;
        if still_holds(current, mark) {
            return self.submit(&recording_mbid, 0);
        }
        if current == 0 {
            log::debug!("ListenBrainz: no feedback left on {track}");
        } else {
            log::info!("ListenBrainz: feedback on {track} changed by hand to {current}, leaving it");
        }
        Ok(())
    }
}

fn mark_score(mark: Mark) -> i8 {
    match mark {
        Mark::Loved => 1,
        Mark::Hated => -1,
    }
}

/// Feedback at `current` is still the one placed for `mark`.
fn still_holds(current: i8, mark: Mark) -> bool {
    current == mark_score(mark)
}

fn score_for(list: &FeedbackList, recording_mbid: &str) -> i8 {
    list.feedback
        .iter()
        .find(|f| f.recording_mbid.as_deref() == Some(recording_mbid))
        .map_or(0, |f| f.score)
}

/// The validated user name.
fn check_validation(validation: TokenValidation) -> Result<String, DestinationError> {
    if !validation.valid {
        return Err(DestinationError::Auth(
            validation
                .message
                .unwrap_or_else(|| "token rejected".to_string()),
        ));
    }
    let Some(user_name) = validation.user_name else {
        return Err(DestinationError::Api("validate-token returned no user name".to_string()));
    };
    log::info!("Authenticated with ListenBrainz as {user_name}");
    Ok(user_name)
}

fn error_from_status(status: u16, body: String) -> DestinationError {
    let msg = format!("HTTP {status} from ListenBrainz: {}", body.trim());
    match status {
        401 | 403 => DestinationError::Auth(msg),
        404 => DestinationError::NotFound(msg),
        500.. => DestinationError::Network(msg),
        _ => DestinationError::Api(msg),
    }
}
