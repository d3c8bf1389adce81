use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use ureq::Agent;

use super::DestinationError;
use crate::config::MusicBrainzConfig;
use crate::track::{TrackIdentity, normalize_name};

const SEARCH_URL: &str = "https://musicbrainz.org/ws/2/recording";

/// Recording search response, trimmed to ids, titles and credits.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
    #[serde(default)]
    joinphrase: String,
}

/// Looks up MusicBrainz recording ids for source tracks.
///
/// Plex exposes the MusicBrainz *track* id; ListenBrainz feedback wants the
/// *recording* id. Results (including misses) are cached for the lifetime of
/// the resolver, so one run asks at most once per track.
pub struct RecordingResolver {
    agent: Agent,
    user_agent: String,
    rate_limit: Duration,
    last_request: Option<Instant>,
    cache: HashMap<String, Option<String>>,
}

impl RecordingResolver {
    pub fn new(agent: Agent, config: &MusicBrainzConfig) -> Self {
        Self {
            agent,
            user_agent: config.user_agent.clone(),
            rate_limit: Duration::from_millis(config.rate_limit_ms),
            last_request: None,
            cache: HashMap::new(),
        }
    }

    pub fn recording_id(&mut self, track: &TrackIdentity) -> Result<Option<String>, DestinationError> {
        if let Some(hit) = self.cache.get(&track.source_id) {
            return Ok(hit.clone());
        }

        let found = match &track.mbid {
            Some(track_mbid) => {
                log::debug!("MusicBrainz: searching recording for track id {track_mbid}");
                let recordings = self.search(&format!("tid:{track_mbid}"))?;
                recordings.into_iter().next().map(|r| r.id)
            }
            None => {
                log::debug!("MusicBrainz: searching recording for {track}");
                let query = format!(
                    "recording:\"{}\" AND artist:\"{}\"",
                    escape_lucene(&track.title),
                    escape_lucene(&track.artist)
                );
                let recordings = self.search(&query)?;
                best_match(track, &recordings).map(str::to_string)
            }
        };

        if found.is_none() {
            log::warn!("No MusicBrainz recording found for {track}");
        }
        self.cache.insert(track.source_id.clone(), found.clone());
        Ok(found)
    }

    fn search(&mut self, query: &str) -> Result<Vec<Recording>, DestinationError> {
        self.throttle();

        let mut response = self
            .agent
            .get(SEARCH_URL)
            .header("User-Agent", self.user_agent.as_str())
            .header("Accept", "application/json")
            .query("query", query)
            .query("fmt", "json")
            .query("limit", "10")
            .call()?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(DestinationError::Network(format!(
                "HTTP {status} from MusicBrainz"
            )));
        }
        let parsed: SearchResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| DestinationError::Api(format!("bad MusicBrainz response: {e}")))?;
        Ok(parsed.recordings)
    }

    fn throttle(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.rate_limit {
                thread::sleep(self.rate_limit - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// First recording whose title and artist credit both match after normalization.
fn best_match<'a>(track: &TrackIdentity, recordings: &'a [Recording]) -> Option<&'a str> {
    let title = normalize_name(&track.title);
    let artist = normalize_name(&track.artist);

    recordings
        .iter()
        .find(|r| {
            if normalize_name(&r.title) != title {
                return false;
            }
            let credited: String = r
                .artist_credit
                .iter()
                .map(|c| format!("{}{}", c.name, c.joinphrase))
                .collect();
            let first = r.artist_credit.first().map(|c| normalize_name(&c.name));
            normalize_name(&credited) == artist || first.as_deref() == Some(artist.as_str())
        })
        .map(|r| r.id.as_str())
}

fn escape_lucene(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "created": "2024-03-01T12:00:00.000Z",
        "count": 2,
        "recordings": [
            {
                "id": "aaaa-live",
                "score": 100,
                "title": "Dont Stop Me Now (live)",
                "artist-credit": [{"name": "Queen", "artist": {"id": "q", "name": "Queen"}}]
            },
            {
                "id": "bbbb-studio",
                "score": 98,
                "title": "Don’t Stop Me Now",
                "artist-credit": [{"name": "Queen", "artist": {"id": "q", "name": "Queen"}}]
            }
        ]
    }"#;

    fn track(artist: &str, title: &str) -> TrackIdentity {
        TrackIdentity {
            source_id: "1".into(),
            artist: artist.into(),
            title: title.into(),
            album: None,
            mbid: None,
        }
    }

    #[test]
    fn test_parse_search_response() {
        let r: SearchResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(r.recordings.len(), 2);
        assert_eq!(r.recordings[1].artist_credit[0].name, "Queen");
    }

    #[test]
    fn test_best_match_normalizes_quotes() {
        let r: SearchResponse = serde_json::from_str(SAMPLE).unwrap();
        let t = track("Queen", "Don't Stop Me Now");
        assert_eq!(best_match(&t, &r.recordings), Some("bbbb-studio"));
    }

    #[test]
    fn test_best_match_requires_artist() {
        let r: SearchResponse = serde_json::from_str(SAMPLE).unwrap();
        let t = track("McFly", "Don't Stop Me Now");
        assert_eq!(best_match(&t, &r.recordings), None);
    }

    #[test]
    fn test_best_match_joined_credit() {
        let json = r#"{"recordings": [{
            "id": "cccc",
            "title": "Under Pressure",
            "artist-credit": [
                {"name": "Queen", "joinphrase": " & "},
                {"name": "David Bowie"}
            ]
        }]}"#;
        let r: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(best_match(&track("Queen & David Bowie", "Under Pressure"), &r.recordings), Some("cccc"));
        assert_eq!(best_match(&track("Queen", "Under Pressure"), &r.recordings), Some("cccc"));
    }

    #[test]
    fn test_empty_response() {
        let r: SearchResponse = serde_json::from_str(r#"{"count": 0}"#).unwrap();
        assert!(r.recordings.is_empty());
    }

    #[test]
    fn test_escape_lucene() {
        assert_eq!(escape_lucene(r#"12" Mix"#), r#"12\" Mix"#);
    }
}
