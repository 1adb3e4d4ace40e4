//! End-to-end tests: encoder process → distributor → HTTP viewer
//!
//! `cat` over a file of concatenated JPEGs stands in for ffmpeg.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use image::{DynamicImage, Rgb, RgbImage};
use tower::ServiceExt;

use mjpeg_relay::media::jpeg;
use mjpeg_relay::server::gate::SALT_LEN;
use mjpeg_relay::{
    source, AllowAll, AntiIndexer, Distributor, RelayServer, ServerConfig, SourceConfig,
    StillImage, ViewConfig, ViewerPolicy,
};

fn card(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

fn write_frames(dir: &tempfile::TempDir, count: usize) -> String {
    let path = dir.path().join("camera.mjpeg");
    let mut data = Vec::new();
    for _ in 0..count {
        data.extend_from_slice(&jpeg::encode(&card(40, 30, [0, 200, 0]), 90).unwrap());
    }
    std::fs::write(&path, data).unwrap();
    path.to_string_lossy().into_owned()
}

fn relay(path: String, view: ViewConfig) -> RelayServer {
    let policy: Arc<dyn ViewerPolicy> = Arc::new(AllowAll);
    let frames = source::open(
        SourceConfig::command("cat", [path]).restart_delay(Duration::from_millis(20)),
    )
    .unwrap();

    let distributor = Distributor::new(Arc::clone(&policy));
    distributor.spawn(frames);

    RelayServer::new(ServerConfig::default().view(view), distributor, policy)
        .with_gate(AntiIndexer::with_salt([1; SALT_LEN]))
}

fn stream_request(server: &RelayServer) -> Request<Body> {
    Request::builder()
        .uri(format!("/stream?token={}", server.gate().token()))
        .body(Body::empty())
        .unwrap()
}

/// Split a multipart body into its JPEG payloads
fn parts(body: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = body;
    let marker = b"Content-Length: ";

    while let Some(pos) = rest.windows(marker.len()).position(|w| w == marker) {
        let after = &rest[pos + marker.len()..];
        let Some(eol) = after.windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let len: usize = std::str::from_utf8(&after[..eol]).unwrap().parse().unwrap();
        let start = eol + 4;
        if after.len() < start + len {
            break;
        }
        out.push(after[start..start + len].to_vec());
        rest = &after[start + len..];
    }

    out
}

#[tokio::test]
async fn test_viewer_receives_live_frames() {
    let dir = tempfile::tempdir().unwrap();
    let server = relay(write_frames(&dir, 3), ViewConfig::default());

    let response = server.router().oneshot(stream_request(&server)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut received = Vec::new();

    let frames = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let chunk = body.next().await.unwrap().unwrap();
            received.extend_from_slice(&chunk);
            let frames = parts(&received);
            if frames.len() >= 2 {
                return frames;
            }
        }
    })
    .await
    .unwrap();

    assert!(received.starts_with(b"--jpegBoundary\r\n"));
    for frame in &frames {
        let image = jpeg::decode(frame).unwrap();
        assert_eq!((image.width(), image.height()), (40, 30));
    }

    assert!(server.distributor().stats().frames_encoded >= 2);
    assert_eq!(server.distributor().viewer_count(), 1);

    drop(body);
}

#[tokio::test]
async fn test_view_limit_ends_with_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let placeholder = StillImage::from_image(&card(10, 10, [255, 0, 0])).unwrap();
    let view = ViewConfig::default()
        .limit(Duration::from_millis(300))
        .after_limit(placeholder.clone());
    let server = relay(write_frames(&dir, 2), view);

    let response = server.router().oneshot(stream_request(&server)).await.unwrap();
    let body = tokio::time::timeout(
        Duration::from_secs(10),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .unwrap()
    .unwrap();

    let frames = parts(&body);
    assert!(!frames.is_empty());
    assert_eq!(frames.last().unwrap(), &placeholder.data().to_vec());
    assert!(body.ends_with(b"\r\n--jpegBoundary\r\n"));

    // Teardown unregistered the viewer
    assert_eq!(server.distributor().viewer_count(), 0);
}

#[tokio::test]
async fn test_viewer_disconnect_unregisters() {
    let dir = tempfile::tempdir().unwrap();
    let server = relay(write_frames(&dir, 3), ViewConfig::default());

    let response = server.router().oneshot(stream_request(&server)).await.unwrap();
    assert_eq!(server.distributor().viewer_count(), 1);
    drop(response);

    // The next write into the dropped body fails and tears the session down
    tokio::time::timeout(Duration::from_secs(10), async {
        while server.distributor().viewer_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_bad_token_never_registers() {
    let dir = tempfile::tempdir().unwrap();
    let server = relay(write_frames(&dir, 1), ViewConfig::default());

    let request = Request::builder()
        .uri("/stream?token=yesterday")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.distributor().viewer_count(), 0);
}
