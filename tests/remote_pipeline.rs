mod common;

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::tempdir;

use common::{completion_body, test_jpeg, CannedResponse, FakeServer};
use room_occupancy::config::MonitorConfig;
use room_occupancy::{
    CameraConfig, CycleOutcome, OpenAiConfig, Pipeline, RoomSeed, RoomStore, S3Config,
    SqliteRoomStore,
};

struct Fakes {
    camera: FakeServer,
    s3: FakeServer,
    model: FakeServer,
}

fn monitor_config(db_path: &str, fakes: &Fakes) -> MonitorConfig {
    MonitorConfig {
        db_path: db_path.to_string(),
        room: RoomSeed::default(),
        api_addr: "127.0.0.1:0".to_string(),
        poll_interval: Duration::from_millis(10),
        camera: CameraConfig {
            source: format!("{}/capture", fakes.camera.base_url()),
            width: 16,
            height: 12,
        },
        s3: S3Config {
            bucket: "room-snapshots".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: Some("AKIDTEST".to_string()),
            secret_access_key: Some("secret-test".to_string()),
            endpoint: Some(fakes.s3.base_url()),
        },
        openai: OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            base_url: fakes.model.base_url(),
            ..OpenAiConfig::default()
        },
    }
}

#[test]
fn pending_request_flows_through_camera_s3_and_model() -> Result<()> {
    let jpeg = test_jpeg();
    let fakes = Fakes {
        camera: FakeServer::start(vec![CannedResponse::new(200, "image/jpeg", jpeg.clone())]),
        s3: FakeServer::start(vec![CannedResponse::new(200, "application/xml", "")]),
        model: FakeServer::start(vec![CannedResponse::new(
            200,
            "application/json",
            completion_body(" 4\n"),
        )]),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let cfg = monitor_config(&db_path, &fakes);

    let mut observer = SqliteRoomStore::open(&db_path)?;
    let room = observer.seed(&cfg.room)?;
    assert!(room.updating);

    let mut pipeline = Pipeline::from_config(&cfg)?;
    let outcome = pipeline.run_cycle()?;
    let expected_picture = format!("{}/room-snapshots/room-{}.jpg", fakes.s3.base_url(), room.id);
    assert_eq!(
        outcome,
        CycleOutcome::Updated {
            occupancy: 4,
            picture: expected_picture.clone()
        }
    );

    let camera_request = fakes.camera.next_request();
    assert_eq!(camera_request.method, "GET");
    assert_eq!(camera_request.path, "/capture");

    let put = fakes.s3.next_request();
    assert_eq!(put.method, "PUT");
    assert_eq!(put.path, format!("/room-snapshots/room-{}.jpg", room.id));
    assert_eq!(put.body, jpeg);
    assert_eq!(put.header("content-type"), Some("image/jpeg"));
    assert_eq!(
        put.header("x-amz-content-sha256"),
        Some(hex::encode(Sha256::digest(&jpeg)).as_str())
    );
    let authorization = put.header("authorization").unwrap_or("");
    assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/"));
    assert!(authorization.contains("/us-east-1/s3/aws4_request"));

    let chat = fakes.model.next_request();
    assert_eq!(chat.method, "POST");
    assert_eq!(chat.path, "/v1/chat/completions");
    assert_eq!(chat.header("authorization"), Some("Bearer sk-test"));
    let body: serde_json::Value = serde_json::from_slice(&chat.body)?;
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(
        body["messages"][1]["content"][1]["image_url"]["url"],
        expected_picture.as_str()
    );

    let stored = observer.find_by_name(&cfg.room.name)?.expect("room exists");
    assert!(!stored.updating);
    assert_eq!(stored.current_occupancy, Some(4));
    assert_eq!(stored.picture.as_deref(), Some(expected_picture.as_str()));
    Ok(())
}

#[test]
fn rejected_upload_leaves_request_pending() -> Result<()> {
    let fakes = Fakes {
        camera: FakeServer::start(vec![CannedResponse::new(200, "image/jpeg", test_jpeg())]),
        s3: FakeServer::start(vec![CannedResponse::new(
            403,
            "application/xml",
            "<Error><Code>AccessDenied</Code></Error>",
        )]),
        model: FakeServer::start(Vec::new()),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let cfg = monitor_config(&db_path, &fakes);

    let mut observer = SqliteRoomStore::open(&db_path)?;
    observer.seed(&cfg.room)?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    let err = pipeline.run_cycle().unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("403"), "unexpected error: {}", message);
    assert!(message.contains("AccessDenied"), "unexpected error: {}", message);

    let stored = observer.find_by_name(&cfg.room.name)?.expect("room exists");
    assert!(stored.updating);
    assert!(stored.current_occupancy.is_none());
    Ok(())
}

#[test]
fn unreadable_model_reply_leaves_request_pending() -> Result<()> {
    let fakes = Fakes {
        camera: FakeServer::start(vec![CannedResponse::new(200, "image/jpeg", test_jpeg())]),
        s3: FakeServer::start(vec![CannedResponse::new(200, "application/xml", "")]),
        model: FakeServer::start(vec![CannedResponse::new(
            200,
            "application/json",
            completion_body("I can't tell."),
        )]),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let cfg = monitor_config(&db_path, &fakes);

    let mut observer = SqliteRoomStore::open(&db_path)?;
    observer.seed(&cfg.room)?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    assert!(pipeline.run_cycle().is_err());
    assert!(observer.find_by_name(&cfg.room.name)?.expect("room exists").updating);
    Ok(())
}

#[test]
fn model_server_error_leaves_request_pending() -> Result<()> {
    let fakes = Fakes {
        camera: FakeServer::start(vec![CannedResponse::new(200, "image/jpeg", test_jpeg())]),
        s3: FakeServer::start(vec![CannedResponse::new(200, "application/xml", "")]),
        model: FakeServer::start(vec![CannedResponse::new(
            500,
            "application/json",
            r#"{"error":{"message":"upstream overloaded"}}"#,
        )]),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let cfg = monitor_config(&db_path, &fakes);

    let mut observer = SqliteRoomStore::open(&db_path)?;
    observer.seed(&cfg.room)?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    let err = pipeline.run_cycle().unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("HTTP 500"), "unexpected error: {}", message);
    assert!(message.contains("upstream overloaded"), "unexpected error: {}", message);
    assert_eq!(fakes.model.next_request().path, "/v1/chat/completions");

    let stored = observer.find_by_name(&cfg.room.name)?.expect("room exists");
    assert!(stored.updating);
    assert!(stored.current_occupancy.is_none());
    Ok(())
}

#[test]
fn idle_room_makes_no_remote_calls() -> Result<()> {
    let fakes = Fakes {
        camera: FakeServer::start(Vec::new()),
        s3: FakeServer::start(Vec::new()),
        model: FakeServer::start(Vec::new()),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let mut cfg = monitor_config(&db_path, &fakes);
    cfg.room.updating = false;

    SqliteRoomStore::open(&db_path)?.seed(&cfg.room)?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    assert_eq!(pipeline.run_cycle()?, CycleOutcome::Idle);
    assert!(fakes.camera.no_more_requests());
    assert!(fakes.s3.no_more_requests());
    assert!(fakes.model.no_more_requests());
    Ok(())
}

#[test]
fn production_wiring_requires_credentials() -> Result<()> {
    let fakes = Fakes {
        camera: FakeServer::start(Vec::new()),
        s3: FakeServer::start(Vec::new()),
        model: FakeServer::start(Vec::new()),
    };
    let dir = tempdir()?;
    let db_path = dir.path().join("rooms.db").to_string_lossy().to_string();
    let mut cfg = monitor_config(&db_path, &fakes);
    cfg.openai.api_key = None;
    assert!(Pipeline::from_config(&cfg).is_err());
    Ok(())
}
