//! Upload tests against a mocked analysis endpoint

use bytes::Bytes;
use camlink_analysis::*;
use camlink_core::Credentials;
use camlink_media::{Recording, VideoCodec};
use std::time::Duration;
use wiremock::matchers::{basic_auth, body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn recording() -> Recording {
    Recording::new(
        VideoCodec::Vp9,
        vec![
            Bytes::from_static(b"webm-header"),
            Bytes::from_static(b"cluster"),
        ],
        Duration::from_secs(3),
    )
}

fn client(server: &MockServer) -> AnalysisClient {
    AnalysisClient::new(
        &format!("{}/analisar", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_upload_sends_file_part_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analisar"))
        .and(basic_auth("admin", "1234"))
        .and(header_exists("content-type"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("filename=\"video.webm\""))
        .and(body_string_contains("video/webm"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"resultado":"humano"}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let verdict = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap();
    assert_eq!(verdict.summary(), "humano");
}

#[tokio::test]
async fn test_missing_result_reads_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analisar"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap();
    assert_eq!(verdict.summary(), NO_RESULT);
}

#[tokio::test]
async fn test_analysis_failure_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analisar"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"resultado":"erro","detalhes":"No space left on device"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap();
    assert_eq!(verdict.summary(), "erro");
    assert_eq!(verdict.details.as_deref(), Some("No space left on device"));
}

#[tokio::test]
async fn test_rejected_credentials_map_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analisar"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"detail":"invalid username or password"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Unauthorized));
}

#[tokio::test]
async fn test_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analisar"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap_err();
    match &err {
        AnalysisError::Http { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected HTTP error, got {:?}", other),
    }
    assert!(err.is_recoverable());
    assert_eq!(err.to_string(), "HTTP error! status: 500");
}

#[tokio::test]
async fn test_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_RESPONSE");
}

#[tokio::test]
async fn test_empty_recording_is_not_uploaded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let empty = Recording::new(VideoCodec::Vp8, Vec::new(), Duration::ZERO);
    let err = client(&server)
        .analyze(&empty, &Credentials::new("admin", "1234"))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::EmptyRecording));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"resultado":"humano"}"#, "application/json")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = AnalysisClient::new(
        &format!("{}/analisar", server.uri()),
        Duration::from_millis(200),
    )
    .unwrap();
    let err = client
        .analyze(&recording(), &Credentials::new("admin", "1234"))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Timeout { .. }));
}
