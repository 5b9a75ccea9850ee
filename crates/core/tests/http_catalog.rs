mod common;

use axum::http::StatusCode;
use common::{library, TestServer};
use mood_recommender_core::{
    CatalogConfig, CatalogError, HttpSongCatalog, Mood, MoodError, SongCatalog,
};
use tokio::net::TcpListener;

fn client_for(server: &TestServer) -> HttpSongCatalog {
    HttpSongCatalog::new(&CatalogConfig {
        base_url: format!("{}/", server.base_url),
        ..CatalogConfig::default()
    })
    .expect("valid config")
}

#[tokio::test]
async fn recent_songs_come_back_newest_first() {
    let server = TestServer::spawn(library()).await;
    let catalog = client_for(&server);
    assert_eq!(catalog.base_url(), server.base_url);

    let songs = catalog.fetch_recent_songs().await.unwrap();
    assert_eq!(songs.len(), 10);
    assert_eq!(songs[0].title, "Chill Two");
    assert_eq!(songs[9].title, "Happy One");
    assert!(songs.iter().all(|song| song.created_at.is_some()));
}

#[tokio::test]
async fn songs_are_filtered_by_mood() {
    let server = TestServer::spawn(library()).await;
    let catalog = client_for(&server);

    let energetic = catalog.fetch_songs_by_mood(Mood::Energetic).await.unwrap();
    let titles: Vec<_> = energetic.iter().map(|song| song.title.as_str()).collect();
    assert_eq!(titles, ["Energetic One", "Energetic Two"]);
    assert!(energetic
        .iter()
        .all(|song| song.mood.as_deref() == Some("Energetic")));
    assert_eq!(energetic[0].id.as_deref(), Some("id-Energetic One"));
}

#[tokio::test]
async fn error_status_carries_service_message() {
    let server = TestServer::failing(StatusCode::INTERNAL_SERVER_ERROR).await;
    let catalog = client_for(&server);

    let err = catalog.fetch_songs_by_mood(Mood::Sad).await.unwrap_err();
    match err {
        CatalogError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Server error");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    // Bind then drop, so nothing listens on the port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let catalog = HttpSongCatalog::new(&CatalogConfig {
        base_url: format!("http://{addr}"),
        ..CatalogConfig::default()
    })
    .unwrap();
    let err = catalog.fetch_recent_songs().await.unwrap_err();
    assert!(matches!(err, CatalogError::Request(_)), "unexpected error: {err}");
}

#[test]
fn invalid_base_url_is_rejected() {
    let err = HttpSongCatalog::new(&CatalogConfig {
        base_url: String::new(),
        ..CatalogConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, MoodError::InvalidConfig(_)));
}
