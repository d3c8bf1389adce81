use serde::Deserialize;
use ureq::Agent;

use super::{Source, SourceError};
use crate::http::USER_AGENT;
use crate::track::RawTrack;

/// Plex `type` code for tracks.
const TRACK_TYPE: &str = "10";
const PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TracksContainer {
    #[serde(rename = "totalSize")]
    total_size: Option<usize>,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexTrack>,
}

#[derive(Debug, Deserialize)]
struct PlexTrack {
    #[serde(rename = "ratingKey")]
    rating_key: Option<String>,
    title: Option<String>,
    #[serde(rename = "grandparentTitle")]
    artist: Option<String>,
    #[serde(rename = "parentTitle")]
    album: Option<String>,
    #[serde(rename = "userRating")]
    user_rating: Option<f64>,
    #[serde(rename = "Guid", default)]
    guids: Vec<Guid>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    id: String,
}

impl From<PlexTrack> for RawTrack {
    fn from(t: PlexTrack) -> Self {
        let mbid = t
            .guids
            .iter()
            .find_map(|g| g.id.strip_prefix("mbid://"))
            .map(str::to_string);
        RawTrack {
            source_id: t.rating_key,
            artist: t.artist,
            title: t.title,
            album: t.album,
            mbid,
            rating: t.user_rating,
        }
    }
}

/// Plex Media Server source.
pub struct Plex {
    agent: Agent,
    base_url: String,
    token: String,
}

impl Plex {
    pub fn new(agent: Agent, base_url: &str, token: &str) -> Self {
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        log::debug!("Fetching {url}");

        let mut request = self
            .agent
            .get(url.as_str())
            .header("X-Plex-Token", self.token.as_str())
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);
        for (k, v) in query {
            request = request.query(k, v);
        }
        let mut response = request.call()?;

        match response.status().as_u16() {
            401 | 403 => return Err(SourceError::Auth("Plex rejected the token".to_string())),
            s if s >= 400 => return Err(SourceError::Http(format!("HTTP {s} for {path}"))),
            _ => {}
        }
        response
            .body_mut()
            .read_json()
            .map_err(|e| SourceError::Parse(format!("{path}: {e}")))
    }

    fn section_key(&self, library: &str) -> Result<String, SourceError> {
        let sections: Envelope<SectionsContainer> = self.get("/library/sections", &[])?;
        find_section(&sections.container.directories, library)
            .map(|s| s.key.clone())
            .ok_or_else(|| SourceError::LibraryNotFound(library.to_string()))
    }
}

impl Source for Plex {
    fn list_rated_tracks(&mut self, library: &str) -> Result<Vec<RawTrack>, SourceError> {
        let key = self.section_key(library)?;
        let path = format!("/library/sections/{key}/all");
        let mut tracks = Vec::new();
        let mut start = 0;

        loop {
            let page: Envelope<TracksContainer> = self.get(
                &path,
                &[
                    ("type", TRACK_TYPE.to_string()),
                    // Plex filter syntax: `userRating>>=0` means rating > 0
                    ("userRating>>", "0".to_string()),
                    ("includeGuids", "1".to_string()),
                    ("X-Plex-Container-Start", start.to_string()),
                    ("X-Plex-Container-Size", PAGE_SIZE.to_string()),
                ],
            )?;
            let page = page.container;
            let received = page.metadata.len();
            tracks.extend(page.metadata.into_iter().map(RawTrack::from));
            start += received;

            let done = match page.total_size {
                Some(total) => start >= total,
                None => received < PAGE_SIZE,
            };
            if done || received == 0 {
                break;
            }
        }

        log::info!("Plex returned {} rated tracks from \"{library}\"", tracks.len());
        Ok(tracks)
    }
}

/// Music sections only, matched by exact title.
fn find_section<'a>(sections: &'a [Section], library: &str) -> Option<&'a Section> {
    sections
        .iter()
        .find(|s| s.kind == "artist" && s.title == library)
}
