//! Song recommendation service client.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CatalogConfig, CatalogError, Mood, Result};

/// Number of songs returned by the "recent" listing.
pub const RECENT_LIMIT: usize = 10;

/// Title shown before any mood has been detected.
pub const DISCOVER_TITLE: &str = "Discover Something New";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub artist: String,
    pub audio_url: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response envelope shared by both listing endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SongsResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub songs: Vec<Song>,
}

/// Titled song list handed to whatever renders recommendations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub title: String,
    pub songs: Vec<Song>,
}

impl Playlist {
    pub fn discover(songs: Vec<Song>) -> Self {
        Self {
            title: DISCOVER_TITLE.to_string(),
            songs,
        }
    }

    pub fn for_mood(mood: Mood, songs: Vec<Song>) -> Self {
        Self {
            title: mood.playlist_title(),
            songs,
        }
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::discover(Vec::new())
    }
}

#[async_trait]
pub trait SongCatalog: Send + Sync {
    /// Most recently added songs, newest first.
    async fn fetch_recent_songs(&self) -> std::result::Result<Vec<Song>, CatalogError>;

    async fn fetch_songs_by_mood(
        &self,
        mood: Mood,
    ) -> std::result::Result<Vec<Song>, CatalogError>;
}

/// [`SongCatalog`] backed by the REST service.
#[derive(Debug, Clone)]
pub struct HttpSongCatalog {
    client: Client,
    base_url: String,
}

impl HttpSongCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(CatalogError::from)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_songs(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Vec<Song>, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?query, "requesting songs");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<SongsResponse>(&body)
                .map(|parsed| parsed.message)
                .unwrap_or(body);
            return Err(CatalogError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: SongsResponse = response.json().await?;
        debug!(count = parsed.songs.len(), message = %parsed.message, "songs received");
        Ok(parsed.songs)
    }
}

#[async_trait]
impl SongCatalog for HttpSongCatalog {
    async fn fetch_recent_songs(&self) -> std::result::Result<Vec<Song>, CatalogError> {
        self.get_songs("/recent", &[]).await
    }

    async fn fetch_songs_by_mood(
        &self,
        mood: Mood,
    ) -> std::result::Result<Vec<Song>, CatalogError> {
        self.get_songs("/songs", &[("mood", mood.as_str())]).await
    }
}

/// In-memory [`SongCatalog`] with the same filtering and ordering rules as
/// the service. Counts requests and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemorySongCatalog {
    songs: Arc<Mutex<Vec<Song>>>,
    failing: Arc<Mutex<Option<String>>>,
    latency: Duration,
    recent_requests: Arc<AtomicUsize>,
    mood_requests: Arc<AtomicUsize>,
}

impl InMemorySongCatalog {
    pub fn new(songs: Vec<Song>) -> Self {
        Self {
            songs: Arc::new(Mutex::new(songs)),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes later requests fail with `Status 503` (or succeed with `None`).
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = message.map(str::to_string);
        }
    }

    pub fn recent_requests(&self) -> usize {
        self.recent_requests.load(Ordering::SeqCst)
    }

    pub fn mood_requests(&self) -> usize {
        self.mood_requests.load(Ordering::SeqCst)
    }

    async fn respond<F>(&self, select: F) -> std::result::Result<Vec<Song>, CatalogError>
    where
        F: FnOnce(&[Song]) -> Vec<Song>,
    {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = self.failing.lock().ok().and_then(|failing| failing.clone());
        if let Some(message) = failure {
            return Err(CatalogError::Status {
                status: 503,
                message,
            });
        }
        let songs = self.songs.lock().map(|songs| select(&songs)).unwrap_or_default();
        Ok(songs)
    }
}

#[async_trait]
impl SongCatalog for InMemorySongCatalog {
    async fn fetch_recent_songs(&self) -> std::result::Result<Vec<Song>, CatalogError> {
        self.recent_requests.fetch_add(1, Ordering::SeqCst);
        self.respond(newest_first).await
    }

    async fn fetch_songs_by_mood(
        &self,
        mood: Mood,
    ) -> std::result::Result<Vec<Song>, CatalogError> {
        self.mood_requests.fetch_add(1, Ordering::SeqCst);
        self.respond(|songs| {
            songs
                .iter()
                .filter(|song| song.mood.as_deref() == Some(mood.as_str()))
                .cloned()
                .collect()
        })
        .await
    }
}

fn newest_first(songs: &[Song]) -> Vec<Song> {
    let mut sorted = songs.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted.truncate(RECENT_LIMIT);
    sorted
}
