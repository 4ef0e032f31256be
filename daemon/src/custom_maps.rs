/// Network-backed gamemode classification for community maps.
///
/// [`CustomMapResolver`] owns a [`MapCacheStore`] and a [`ClassificationClient`].
/// A fresh cache entry is served without touching the network; otherwise one
/// request is issued and a successful answer is written back exactly once.
/// Timeouts and transport errors resolve to the unknown sentinel and leave the
/// cache untouched so the next resolution retries.
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::gamemodes::{
    gamemode_display, is_known_gamemode, MapClassification, UNKNOWN_GAMEMODE_CODE,
    UNKNOWN_GAMEMODE_DISPLAY,
};
use crate::map_cache::{CacheEntry, MapCacheStore};

const API_URL: &str = "https://teamwork.tf/api/v1/map-stats/map";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("classification request timed out")]
    Timeout,

    #[error("classification request failed: {0}")]
    Transport(String),

    #[error("classification response could not be decoded: {0}")]
    Decode(String),
}

/// Outbound classification service. Returns the gamemode codes the service
/// associates with a map, most relevant first.
pub trait ClassificationClient: Send {
    fn fetch_gamemodes(&self, map_id: &str) -> Result<Vec<String>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct MapStatsResponse {
    #[serde(default)]
    all_gamemodes: Vec<String>,
}

/// teamwork.tf map-stats client.
pub struct TeamworkClient {
    http: reqwest::blocking::Client,
    api_key: String,
}

impl TeamworkClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tf2-presence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }
}

impl ClassificationClient for TeamworkClient {
    fn fetch_gamemodes(&self, map_id: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{API_URL}/{map_id}");
        let response = self
            .http
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "map-stats request failed: {}",
                response.status()
            )));
        }

        let body: MapStatsResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Decode(e.to_string())
            }
        })?;
        Ok(body.all_gamemodes)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Cache-fronted remote classification.
pub struct CustomMapResolver {
    store: Box<dyn MapCacheStore>,
    client: Box<dyn ClassificationClient>,
    ttl_secs: i64,
}

impl CustomMapResolver {
    pub fn new(
        store: Box<dyn MapCacheStore>,
        client: Box<dyn ClassificationClient>,
        ttl_hours: u32,
    ) -> Self {
        Self {
            store,
            client,
            ttl_secs: i64::from(ttl_hours) * 60 * 60,
        }
    }

    pub fn set_ttl_hours(&mut self, ttl_hours: u32) {
        self.ttl_secs = i64::from(ttl_hours) * 60 * 60;
    }

    /// Resolves `map_id` as of now.
    pub fn resolve(&mut self, map_id: &str) -> MapClassification {
        self.resolve_at(map_id, chrono::Utc::now().timestamp())
    }

    /// Resolves `map_id` as of `now` (epoch seconds).
    pub fn resolve_at(&mut self, map_id: &str, now: i64) -> MapClassification {
        if map_id.is_empty() {
            return MapClassification::unknown("");
        }

        if let Some(entry) = self.store.get_fresh(map_id, now, self.ttl_secs) {
            tracing::debug!(target: "custom_maps", "Cache hit for {map_id}: {}", entry.gamemode_code);
            return classification(map_id, &entry.gamemode_code, &entry.gamemode_display);
        }

        let gamemodes = match self.client.fetch_gamemodes(map_id) {
            Ok(gamemodes) => gamemodes,
            Err(FetchError::Timeout) => {
                tracing::info!(target: "custom_maps", "Classification of {map_id} timed out, will retry later");
                return MapClassification::unknown(map_id);
            }
            Err(e) => {
                tracing::warn!(target: "custom_maps", "Could not classify {map_id}: {e}");
                return MapClassification::unknown(map_id);
            }
        };

        let (code, display) = match gamemodes.iter().find(|g| is_known_gamemode(g)) {
            Some(code) => (code.as_str(), gamemode_display(code)),
            None => {
                tracing::info!(target: "custom_maps", "No known gamemode for {map_id} in {gamemodes:?}");
                (UNKNOWN_GAMEMODE_CODE, UNKNOWN_GAMEMODE_DISPLAY)
            }
        };

        let entry = CacheEntry {
            gamemode_code: code.to_string(),
            gamemode_display: display.to_string(),
            resolved_at: now,
        };
        if let Err(e) = self.store.put(map_id, entry) {
            tracing::warn!(target: "custom_maps", "Failed to cache classification of {map_id}: {e}");
        }

        tracing::info!(target: "custom_maps", "Classified {map_id} as {code}");
        classification(map_id, code, display)
    }
}

fn classification(map_id: &str, code: &str, display: &str) -> MapClassification {
    MapClassification {
        display_name: map_id.to_string(),
        gamemode_code: code.to_string(),
        gamemode_display: display.to_string(),
        is_custom: true,
        has_art: false,
    }
}
