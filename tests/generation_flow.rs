//! End-to-end generation flows against a mock service
//!
//! Exercises the full public surface: submit, status tracking, export
//! fan-out, artifact caching and cancellation, with wiremock standing in
//! for the remote service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Cursor, Write};
use std::time::Duration;

use skygen::{
    ApiConfig, ArtifactKind, ArtifactPayload, CacheConfig, Config, CubeFace, Event,
    GenerationRequest, SkygenClient, Status, TrackingConfig,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer, cache_dir: &std::path::Path) -> Config {
    Config {
        api: ApiConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            ..Default::default()
        },
        cache: CacheConfig {
            cache_dir: cache_dir.to_path_buf(),
        },
        tracking: TrackingConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn generation_json(id: i64, status: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "obfuscated_id": format!("ob-{}", id),
        "status": status,
        "prompt": "forest",
    })
}

fn export_json(id: i64, status: &str, kind: &str, file_url: Option<String>) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "obfuscated_id": format!("ob-{}", id),
        "status": status,
        "kind": kind,
        "file_url": file_url,
    })
}

/// Encode a tiny solid-color PNG
fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        2,
        2,
        image::Rgba([r, g, b, 255]),
    ));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Build a zip archive from (entry name, bytes) pairs
fn build_zip(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default();
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn full_face_zip() -> Vec<u8> {
    build_zip(&[
        ("skybox_front.png", png_bytes(255, 0, 0)),
        ("skybox_back.png", png_bytes(0, 255, 0)),
        ("skybox_left.png", png_bytes(0, 0, 255)),
        ("skybox_right.png", png_bytes(255, 255, 0)),
        ("skybox_up.png", png_bytes(0, 255, 255)),
        ("skybox_down.png", png_bytes(255, 0, 255)),
        ("metadata.txt", b"prompt: forest".to_vec()),
    ])
}

#[tokio::test]
async fn generation_with_export_produces_a_cached_artifact() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .and(body_partial_json(serde_json::json!({"prompt": "forest"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(100, "pending")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(100, "processing")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(100, "complete")))
        .mount(&server)
        .await;

    let file_url = format!("{}/files/img.png", server.uri());
    Mock::given(method("POST"))
        .and(path("/export"))
        .and(body_partial_json(serde_json::json!({
            "job_id": 100,
            "kind": "equirectangular-png",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            200,
            "complete",
            "equirectangular-png",
            Some(file_url),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/img.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(10, 20, 30)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

    let result = client
        .generate(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::EquirectangularPng],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.status(), Status::Complete);
    assert!(result.failures.is_empty());

    let payload = result.artifact(ArtifactKind::EquirectangularPng).unwrap();
    let cached = payload.path().unwrap();
    assert!(cached.ends_with("img.png"));
    assert_eq!(std::fs::read(cached).unwrap(), png_bytes(10, 20, 30));

    // Both cached-artifact lookups hit without another request.
    assert_eq!(
        client
            .try_get_cached_artifact(&result, ArtifactKind::EquirectangularPng)
            .as_deref(),
        Some(cached)
    );
    let url = format!("{}/files/img.png", server.uri());
    assert_eq!(client.try_resolve_cached(&url).as_deref(), Some(cached));
}

#[tokio::test]
async fn event_stream_reports_the_full_lifecycle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(110, "pending")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/110"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(110, "complete")))
        .mount(&server)
        .await;

    let file_url = format!("{}/files/pano.png", server.uri());
    Mock::given(method("POST"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            210,
            "complete",
            "equirectangular-png",
            Some(file_url),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/pano.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(1, 1, 1)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();
    let mut events = client.subscribe();

    client
        .generate(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::EquirectangularPng],
            ..Default::default()
        })
        .await
        .unwrap();

    let mut submitted = false;
    let mut export_started = false;
    let mut export_finished = false;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Submitted { .. } => submitted = true,
            Event::ExportStarted { .. } => export_started = true,
            Event::ExportFinished { .. } => export_finished = true,
            Event::Completed { .. } => completed = true,
            _ => {}
        }
    }
    assert!(submitted && export_started && export_finished && completed);
}

#[tokio::test]
async fn cancellation_resolves_abort_and_issues_a_remote_cancel() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(120, "pending")))
        .mount(&server)
        .await;
    // The job never terminates on its own.
    Mock::given(method("GET"))
        .and(path("/generation/120"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(120, "processing")))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/generation/120"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

    let handle = client
        .submit(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::EquirectangularPng],
            ..Default::default()
        })
        .await;

    // Let at least one poll happen, then cancel.
    tokio::time::sleep(Duration::from_millis(60)).await;
    client.cancel(handle).await.unwrap();

    let result = client.await_result(handle).await.unwrap();
    assert_eq!(result.status(), Status::Abort);
    assert!(result.artifacts.is_empty());
    // Mock `expect(1)` verifies the remote cancel was issued.
}

#[tokio::test]
async fn cancellation_during_exporting_resolves_abort_not_a_failure() {
    let server = MockServer::start().await;

    // The generation itself is already complete; only the export is live
    // when cancellation triggers.
    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(125, "complete")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            225,
            "pending",
            "equirectangular-png",
            None,
        )))
        .mount(&server)
        .await;
    // The export never terminates on its own.
    Mock::given(method("GET"))
        .and(path("/export/225"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            225,
            "processing",
            "equirectangular-png",
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/export/225"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();
    let mut events = client.subscribe();

    let handle = client
        .submit(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::EquirectangularPng],
            ..Default::default()
        })
        .await;

    // Let the export submission land and at least one poll happen.
    tokio::time::sleep(Duration::from_millis(60)).await;
    client.cancel(handle).await.unwrap();

    let result = client.await_result(handle).await.unwrap();
    assert_eq!(result.status(), Status::Abort);
    // The interrupted export is not recorded as a failure.
    assert!(result.failures.is_empty());
    assert!(result.artifacts.is_empty());

    let mut cancelled = false;
    let mut completed = false;
    let mut export_failed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Cancelled { .. } => cancelled = true,
            Event::Completed { .. } => completed = true,
            Event::ExportFailed { .. } => export_failed = true,
            _ => {}
        }
    }
    assert!(cancelled && !completed && !export_failed);
    // Mock `expect(1)` verifies the export's remote cancel was issued.
}

#[tokio::test]
async fn failed_export_is_isolated_from_its_siblings() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(130, "complete")))
        .mount(&server)
        .await;

    // The equirectangular export succeeds.
    let png_url = format!("{}/files/sky.png", server.uri());
    Mock::given(method("POST"))
        .and(path("/export"))
        .and(body_partial_json(
            serde_json::json!({"kind": "equirectangular-png"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            230,
            "complete",
            "equirectangular-png",
            Some(png_url),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/sky.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(5, 5, 5)))
        .mount(&server)
        .await;

    // The cubemap export's archive is missing its bottom face.
    let bad_zip = build_zip(&[
        ("front.png", png_bytes(0, 0, 0)),
        ("back.png", png_bytes(0, 0, 0)),
        ("left.png", png_bytes(0, 0, 0)),
        ("right.png", png_bytes(0, 0, 0)),
        ("up.png", png_bytes(0, 0, 0)),
    ]);
    let zip_url = format!("{}/files/faces.zip", server.uri());
    Mock::given(method("POST"))
        .and(path("/export"))
        .and(body_partial_json(serde_json::json!({"kind": "cubemap-png"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            231,
            "complete",
            "cubemap-png",
            Some(zip_url),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/faces.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bad_zip))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

    let result = client
        .generate(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::EquirectangularPng, ArtifactKind::CubemapPng],
            ..Default::default()
        })
        .await
        .unwrap();

    // The generation itself completed; only the cubemap export failed.
    assert_eq!(result.status(), Status::Complete);
    assert!(result.artifact(ArtifactKind::EquirectangularPng).is_some());
    assert!(result.artifact(ArtifactKind::CubemapPng).is_none());
    let failure = result.failures.get(&ArtifactKind::CubemapPng).unwrap();
    assert!(failure.contains("bottom"));
}

#[tokio::test]
async fn cubemap_export_assembles_six_decoded_faces() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(140, "complete")))
        .mount(&server)
        .await;

    let zip_url = format!("{}/files/skybox.zip", server.uri());
    Mock::given(method("POST"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_json(
            240,
            "complete",
            "cubemap-png",
            Some(zip_url),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/skybox.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(full_face_zip()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

    let result = client
        .generate(GenerationRequest {
            prompt: "forest".to_string(),
            exports: vec![ArtifactKind::CubemapPng],
            ..Default::default()
        })
        .await
        .unwrap();

    let payload = result.artifact(ArtifactKind::CubemapPng).unwrap();
    let cubemap = match payload {
        ArtifactPayload::Cubemap(cubemap) => cubemap,
        other => panic!("expected cubemap payload, got {:?}", other),
    };
    let front = cubemap.face(CubeFace::Front).to_rgba8();
    assert_eq!(front.get_pixel(0, 0).0, [255, 0, 0, 255]);
    let top = cubemap.face(CubeFace::Top).to_rgba8();
    assert_eq!(top.get_pixel(0, 0).0, [0, 255, 255, 255]);
}

#[tokio::test]
async fn remote_failure_surfaces_the_server_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generation_json(150, "pending")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/150"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 150,
            "obfuscated_id": "ob-150",
            "status": "error",
            "error_message": "content policy violation",
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = SkygenClient::new(test_config(&server, dir.path())).unwrap();

    let err = client
        .generate(GenerationRequest {
            prompt: "forest".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("content policy violation"));
}
