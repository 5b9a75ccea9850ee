//! Shared test infrastructure.
//!
//! [`Harness`] mounts a session against the synthetic camera, a scripted
//! detector and an in-memory catalog, keeping clones of each so tests can
//! inspect what the session did to them. [`TestServer`] runs a stand-in for
//! the song service on a random local port.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{TimeZone, Utc};
use mood_recommender_core::{
    catalog::{SongsResponse, RECENT_LIMIT},
    Collaborators, Expression, ExpressionScores, InMemorySongCatalog, ModelState, Phase,
    ScriptedDetector, ScriptedOutcome, SessionConfig, SessionController, SessionHandle,
    SessionView, Song, SyntheticCamera,
};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::oneshot};

pub fn scores(values: &[(Expression, f32)]) -> ExpressionScores {
    values.iter().copied().collect()
}

/// Clear 80% happy reading.
pub fn happy_face() -> ExpressionScores {
    scores(&[
        (Expression::Happy, 0.8),
        (Expression::Neutral, 0.1),
        (Expression::Sad, 0.05),
        (Expression::Surprised, 0.05),
    ])
}

pub fn song(title: &str, mood: &str, day: u32) -> Song {
    Song {
        id: Some(format!("id-{title}")),
        title: title.to_string(),
        artist: format!("{title} Artist"),
        audio_url: format!("https://cdn.example/{title}.mp3"),
        mood: Some(mood.to_string()),
        created_at: Utc.with_ymd_and_hms(2024, 5, day, 9, 30, 0).single(),
    }
}

/// A small library with two songs per mood, added on consecutive days.
pub fn library() -> Vec<Song> {
    let moods = ["Happy", "Sad", "Energetic", "Calm", "Chill"];
    moods
        .iter()
        .enumerate()
        .flat_map(|(index, mood)| {
            let day = index as u32 * 2 + 1;
            [
                song(&format!("{mood} One"), mood, day),
                song(&format!("{mood} Two"), mood, day + 1),
            ]
        })
        .collect()
}

pub fn is_result(view: &SessionView) -> bool {
    matches!(
        view.phase,
        Phase::ResultNoFace | Phase::ResultClassified(_) | Phase::ResultError { .. }
    )
}

pub struct Harness {
    pub camera: SyntheticCamera,
    pub detector: ScriptedDetector,
    pub catalog: InMemorySongCatalog,
    pub session: SessionHandle,
}

impl Harness {
    pub fn mount(
        camera: SyntheticCamera,
        detector: ScriptedDetector,
        catalog: InMemorySongCatalog,
    ) -> Self {
        Self::mount_with(SessionConfig::default(), camera, detector, catalog)
    }

    pub fn mount_with(
        config: SessionConfig,
        camera: SyntheticCamera,
        detector: ScriptedDetector,
        catalog: InMemorySongCatalog,
    ) -> Self {
        let session = SessionController::mount(
            config,
            Collaborators {
                camera: Arc::new(camera.clone()),
                detector: Arc::new(detector.clone()),
                catalog: Arc::new(catalog.clone()),
            },
        );
        Self {
            camera,
            detector,
            catalog,
            session,
        }
    }

    /// Session with default collaborators whose detector always answers
    /// `outcome`.
    pub fn answering(outcome: ScriptedOutcome) -> Self {
        Self::mount(
            SyntheticCamera::new(),
            ScriptedDetector::new(outcome),
            InMemorySongCatalog::new(library()),
        )
    }

    pub async fn models_settled(&mut self) -> SessionView {
        self.wait_for(|view| view.models != ModelState::Loading)
            .await
    }

    pub async fn wait_for(&mut self, predicate: impl FnMut(&SessionView) -> bool) -> SessionView {
        self.session
            .wait_for(predicate)
            .await
            .expect("session ended while waiting")
    }

    pub async fn trigger(&self) {
        self.session.trigger().await.expect("session is mounted");
    }

    /// Triggers once and waits for the result of that attempt. A result
    /// still on screen from an earlier attempt is skipped.
    pub async fn run_attempt(&mut self) -> SessionView {
        self.trigger().await;
        self.wait_for(|view| !is_result(view)).await;
        self.wait_for(is_result).await
    }
}

#[derive(Clone)]
struct ServiceState {
    songs: Arc<Vec<Song>>,
    failure: Option<StatusCode>,
}

#[derive(Debug, Deserialize)]
struct MoodQuery {
    mood: Option<String>,
}

/// Song service stand-in serving `/recent` and `/songs?mood=`.
///
/// The server shuts down when this is dropped.
pub struct TestServer {
    pub base_url: String,
    _shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn(songs: Vec<Song>) -> Self {
        Self::start(ServiceState {
            songs: Arc::new(songs),
            failure: None,
        })
        .await
    }

    /// Server that answers every request with `status`.
    pub async fn failing(status: StatusCode) -> Self {
        Self::start(ServiceState {
            songs: Arc::new(Vec::new()),
            failure: Some(status),
        })
        .await
    }

    async fn start(state: ServiceState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr: SocketAddr = listener.local_addr().expect("Failed to get local address");

        let app = Router::new()
            .route("/recent", get(recent))
            .route("/songs", get(songs_by_mood))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            _shutdown_tx: Some(shutdown_tx),
        }
    }
}

fn reply(state: &ServiceState, message: &str, songs: Vec<Song>) -> Response {
    if let Some(status) = state.failure {
        let body = SongsResponse {
            message: "Server error".to_string(),
            songs: Vec::new(),
        };
        return (status, Json(body)).into_response();
    }
    Json(SongsResponse {
        message: message.to_string(),
        songs,
    })
    .into_response()
}

async fn recent(State(state): State<ServiceState>) -> Response {
    let mut songs = state.songs.to_vec();
    songs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    songs.truncate(RECENT_LIMIT);
    reply(&state, "Recent songs fetched", songs)
}

async fn songs_by_mood(
    State(state): State<ServiceState>,
    Query(query): Query<MoodQuery>,
) -> Response {
    let songs = state
        .songs
        .iter()
        .filter(|song| query.mood.is_none() || song.mood == query.mood)
        .cloned()
        .collect();
    reply(&state, "Songs fetched successfully", songs)
}
