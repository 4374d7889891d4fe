//! Schedule fetcher against a local stand-in for the schedule service.

use livestreams_core::config::ScheduleConfig;
use livestreams_core::error::FetchError;
use livestreams_core::fetcher::ScheduleFetcher;
use livestreams_core::model::{ChannelId, ScheduleEntry};
use livestreams_core::schedule::{ScheduleCache, ScheduleDocument};
use livestreams_core::store::{KeyValueStore, PROGRAM_NAMESPACE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serves every connection with `status` and `body`; the raw request head
/// of each connection is forwarded on the returned channel.
async fn serve(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).to_string()).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (
        format!("http://{}/livestreams/2.0/program/upcoming/", addr),
        rx,
    )
}

fn config(endpoint: String) -> ScheduleConfig {
    ScheduleConfig {
        endpoint,
        token: Some("test-token".to_string()),
        ..ScheduleConfig::default()
    }
}

fn cached(title: &str) -> ScheduleCache {
    let mut cache = ScheduleCache::open(KeyValueStore::in_memory());
    let mut doc = ScheduleDocument::default();
    doc.0.insert(
        "1".into(),
        vec![ScheduleEntry::new(chrono::Utc::now(), title)],
    );
    let ticket = cache.begin_refresh();
    cache.apply(ticket, doc).unwrap();
    cache
}

#[tokio::test]
async fn fetch_sends_client_headers_and_decodes() {
    let (endpoint, mut requests) = serve(
        "200 OK",
        r#"{"1":[{"date":"2024-03-01T12:00:00Z","title":"B"},{"date":"2024-03-01T11:00:00Z","title":"A"}]}"#,
    )
    .await;
    let config = config(endpoint);
    let fetcher = ScheduleFetcher::new(&config).unwrap();

    let doc = fetcher.fetch().await.unwrap();
    let titles: Vec<&str> = doc
        .entries(ChannelId(1))
        .iter()
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, vec!["A", "B"]);

    let head = requests.recv().await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /livestreams/2.0/program/upcoming/ "));
    assert!(head.contains("\r\napp: livestreams\r\n"));
    let token = config.resolved_token().unwrap().to_ascii_lowercase();
    assert!(head.contains(&format!("\r\ntoken: {token}\r\n")));
    assert!(head.contains("\r\ncache-control: no-cache\r\n"));
}

#[tokio::test]
async fn malformed_response_leaves_cache_untouched() {
    let (endpoint, _requests) = serve("200 OK", r#"{"1": [{"date": "#).await;
    let fetcher = ScheduleFetcher::new(&config(endpoint)).unwrap();
    let mut cache = cached("before");
    let before = cache.snapshot();

    let ticket = cache.begin_refresh();
    match fetcher.fetch().await {
        Ok(doc) => {
            cache.apply(ticket, doc).unwrap();
            panic!("malformed body decoded");
        }
        Err(e) => assert!(matches!(e, FetchError::Decode(_)), "got {e:?}"),
    }
    assert_eq!(*cache.snapshot(), *before);
    assert_eq!(cache.snapshot().entries(ChannelId(1))[0].title, "before");
}

#[tokio::test]
async fn server_error_is_reported_as_status() {
    let (endpoint, _requests) = serve("503 Service Unavailable", "{}").await;
    let fetcher = ScheduleFetcher::new(&config(endpoint)).unwrap();
    let err = fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Status(503)), "got {err:?}");
}

#[tokio::test]
async fn unresponsive_service_times_out() {
    // Accepts but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let config = ScheduleConfig {
        endpoint: format!("http://{}/", addr),
        timeout_secs: 1,
        ..ScheduleConfig::default()
    };
    let fetcher = ScheduleFetcher::new(&config).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), fetcher.fetch())
        .await
        .expect("fetch ignored its timeout")
        .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn applied_fetch_is_persisted_for_next_start() {
    let (endpoint, _requests) = serve(
        "200 OK",
        r#"{"2":[{"date":"2024-03-01T20:15:00Z","title":"Tatort"}]}"#,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScheduleFetcher::new(&config(endpoint)).unwrap();
    {
        let mut cache = ScheduleCache::open(KeyValueStore::open(dir.path(), PROGRAM_NAMESPACE));
        let ticket = cache.begin_refresh();
        let doc = fetcher.fetch().await.unwrap();
        assert!(cache.apply(ticket, doc).unwrap());
    }
    let cache = ScheduleCache::open(KeyValueStore::open(dir.path(), PROGRAM_NAMESPACE));
    assert_eq!(cache.snapshot().entries(ChannelId(2))[0].title, "Tatort");
}
