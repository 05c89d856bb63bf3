//! HTTP contract tests for the control plane client.

use std::time::Duration;

use mre_models::{ReplayResult, ReplayStatus, ReplayUpdate, ScanOrder};
use mre_plane::{
    ChunkSource, ControlPlane, PlaneClient, PlaneConfig, PlaneError, RetryConfig, SegmentQuery,
    SegmentStore,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> PlaneClient {
    let mut config = PlaneConfig::with_base_url(server.uri());
    config.timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    PlaneClient::new(config).unwrap()
}

fn replay_json() -> serde_json::Value {
    json!({
        "Program": "Tennis",
        "Event": "Final",
        "ReplayId": "r1",
        "Features": [
            {"AttribName": "Ace", "Name": "Score | Ace | true", "Weight": 5.0}
        ],
        "Resolutions": ["1:1 (1080 x 1080)"],
        "Catchup": true,
        "Version": 4
    })
}

#[tokio::test]
async fn test_get_replay_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/replay/program/Tennis/event/Final/replayid/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(replay_json()))
        .expect(1)
        .mount(&server)
        .await;

    let replay = client_for(&server)
        .get_replay_request("Tennis", "Final", "r1")
        .await
        .unwrap();
    assert_eq!(replay.replay_id, "r1");
    assert!(replay.catchup);
    assert_eq!(replay.version, 4);
    assert_eq!(replay.features.len(), 1);
    assert_eq!(replay.status, ReplayStatus::Queued);
}

#[tokio::test]
async fn test_missing_replay_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_replay_request("Tennis", "Final", "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::NotFound(_)));
}

#[tokio::test]
async fn test_missing_feedback_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clippreview/feedback/program/Tennis/event/Final/classifier/Rally"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let feedback = client_for(&server)
        .get_feedback("Tennis", "Final", "Rally")
        .await
        .unwrap();
    assert!(feedback.is_empty());
}

#[tokio::test]
async fn test_retries_unavailable_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/profile/Default"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile/Default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Name": "Default",
            "Classifier": {"Name": "Rally"},
            "Optimizer": {"Name": "Trim"}
        })))
        .mount(&server)
        .await;

    let profile = client_for(&server).get_profile("Default").await.unwrap();
    assert!(profile.has_optimizer());
    assert_eq!(profile.classifier.name, "Rally");
}

#[tokio::test]
async fn test_results_write_sends_version_and_reports_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/replay/program/Tennis/event/Final/replayid/r1/results"))
        .and(header("if-match", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Version": 5})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/replay/program/Tennis/event/Final/replayid/r1/results"))
        .and(header("if-match", "3"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({"Version": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let update = ReplayUpdate::new(vec![ReplayResult::new(1.0, 2.0)]);

    let version = client
        .update_replay_results("Tennis", "Final", "r1", 4, &update)
        .await
        .unwrap();
    assert_eq!(version, 5);

    let err = client
        .update_replay_results("Tennis", "Final", "r1", 3, &update)
        .await
        .unwrap_err();
    match err {
        PlaneError::ConcurrencyConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_segment_query_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/segments/query"))
        .and(body_partial_json(json!({"Classifier": "Rally", "Order": "descending"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Items": [
                {"Program": "Tennis", "Event": "Final", "PluginName": "Rally", "Start": 30.0, "End": 40.0},
                {"Program": "Tennis", "Event": "Final", "PluginName": "Rally", "Start": 10.0, "End": 20.0,
                 "OptoStart": {"1": 11.0}, "OptoEnd": {"1": 19.0}, "Ace": true}
            ],
            "NextToken": "abc"
        })))
        .mount(&server)
        .await;

    let query = SegmentQuery::new("Tennis", "Final", "Rally").with_order(ScanOrder::Descending);
    let page = client_for(&server).query(&query).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.next_token.as_deref(), Some("abc"));
    assert_eq!(page.items[1].optimized_bounds(1), Some((11.0, 19.0)));
    assert!(page.items[1].attributes.contains_key("Ace"));
}

#[tokio::test]
async fn test_chunks_are_sorted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chunks/program/Tennis/event/Final"))
        .and(query_param("start", "5"))
        .and(query_param("end", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Filename": "b.ts", "Start": 10.0, "Duration": 10.0},
            {"Filename": "a.ts", "Start": 0.0, "Duration": 10.0}
        ])))
        .mount(&server)
        .await;

    let chunks = client_for(&server)
        .chunks_between("Tennis", "Final", 5.0, 25.0)
        .await
        .unwrap();
    assert_eq!(chunks[0].filename, "a.ts");
    assert_eq!(chunks[1].filename, "b.ts");
}
