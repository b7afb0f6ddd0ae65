// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{search_handle_body, start_relay, test_config, wait_until_matched};
use mockito::Matcher;
use serde_json::json;

#[tokio::test]
async fn test_slash_command_search_end_to_end() {
    let mut loggly = mockito::Server::new_async().await;
    let slack = mockito::Server::new_async().await;
    let search = loggly
        .mock("GET", "/apiv2/search")
        .match_query(Matcher::UrlEncoded("q".into(), "error".into()))
        .with_body(search_handle_body("42"))
        .expect(1)
        .create_async()
        .await;
    loggly
        .mock("GET", "/apiv2/events")
        .match_query(Matcher::UrlEncoded("rsid".into(), "42".into()))
        .with_body(
            json!({
                "total_events": 1,
                "events": [{
                    "timestamp": 1700000000000_i64,
                    "logmsg": "NullPointerException#012> at foo#012> at bar",
                    "event": {}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let response = reqwest::Client::new()
        .post(relay.url("/loggly/search"))
        .form(&[("command", "/loggly"), ("text", "error")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "*2023-11-14 22:13:20 UTC*\n`NullPointerException`\n> > at foo\n> > at bar"
    );
    search.assert_async().await;
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_search_with_no_events() {
    let mut loggly = mockito::Server::new_async().await;
    let slack = mockito::Server::new_async().await;
    loggly
        .mock("GET", "/apiv2/search")
        .match_query(Matcher::UrlEncoded("q".into(), "level:error".into()))
        .with_body(search_handle_body("43"))
        .create_async()
        .await;
    loggly
        .mock("GET", "/apiv2/events")
        .match_query(Matcher::Any)
        .with_body(json!({"total_events": 0, "events": []}).to_string())
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let response = reqwest::Client::new()
        .post(relay.url("/loggly/search"))
        .form(&[("text", "")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "No events found for level:error"
    );
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_search_failure_returns_generic_error() {
    let mut loggly = mockito::Server::new_async().await;
    let slack = mockito::Server::new_async().await;
    loggly
        .mock("GET", "/apiv2/search")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body("Unauthorized")
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let response = reqwest::Client::new()
        .post(relay.url("/loggly/search"))
        .form(&[("text", "error")])
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    let body = response.text().await.unwrap();
    assert_eq!(body, "Something went wrong");
    assert!(!body.contains("Unauthorized"));
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_alert_is_delivered_to_slack() {
    let loggly = mockito::Server::new_async().await;
    let mut slack = mockito::Server::new_async().await;
    let post = slack
        .mock("POST", "/chat.postMessage")
        .match_header("authorization", "Bearer xoxb-test")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("channel".into(), "#loggly".into()),
            Matcher::Regex("Foo%3A%3ABar".into()),
        ]))
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let response = reqwest::Client::new()
        .post(relay.url("/loggly"))
        .json(&json!({
            "alert_name": "Errors",
            "alert_description": "Too many errors",
            "edit_alert_link": "https://acme.loggly.com/alerts/edit/1",
            "search_link": "https://acme.loggly.com/search",
            "query": "error",
            "num_hits": 1,
            "recent_hits": ["Foo::Bar failed#012at a#012at b"]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(wait_until_matched(&post).await, "alert never reached Slack");
    post.assert_async().await;
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_slack_failure_does_not_affect_alert_response() {
    let loggly = mockito::Server::new_async().await;
    let mut slack = mockito::Server::new_async().await;
    let post = slack
        .mock("POST", "/chat.postMessage")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let client = reqwest::Client::new();
    for hit in ["first", "second"] {
        let response = client
            .post(relay.url("/loggly"))
            .json(&json!({"alert_name": "Errors", "num_hits": 1, "recent_hits": [hit]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    assert!(wait_until_matched(&post).await, "second alert was not attempted");
    post.assert_async().await;
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_queued_alerts_are_delivered_on_shutdown() {
    let loggly = mockito::Server::new_async().await;
    let mut slack = mockito::Server::new_async().await;
    let post = slack
        .mock("POST", "/chat.postMessage")
        .with_body(r#"{"ok":true}"#)
        .expect(3)
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let client = reqwest::Client::new();
    for hit in ["first", "second", "third"] {
        let response = client
            .post(relay.url("/loggly"))
            .json(&json!({"alert_name": "Errors", "num_hits": 1, "recent_hits": [hit]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    // stopping waits for the queue to drain, and shutdown does not cancel queued deliveries
    relay.stop().await.unwrap();
    post.assert_async().await;
}

#[tokio::test]
async fn test_malformed_alert_is_rejected() {
    let loggly = mockito::Server::new_async().await;
    let mut slack = mockito::Server::new_async().await;
    let post = slack
        .mock("POST", "/chat.postMessage")
        .expect(0)
        .create_async()
        .await;

    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let response = reqwest::Client::new()
        .post(relay.url("/loggly"))
        .body("not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    relay.stop().await.unwrap();
    post.assert_async().await;
}

#[tokio::test]
async fn test_health_info_and_unknown_routes() {
    let loggly = mockito::Server::new_async().await;
    let slack = mockito::Server::new_async().await;
    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let client = reqwest::Client::new();

    let health = client.get(relay.url("/loggly/search")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "ok");

    let info: serde_json::Value = client
        .get(relay.url("/info"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        info["endpoints"],
        json!(["/loggly", "/loggly/search", "/info"])
    );

    let missing = client.get(relay.url("/missing")).send().await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_relay_stops_on_shutdown() {
    let loggly = mockito::Server::new_async().await;
    let slack = mockito::Server::new_async().await;
    let relay = start_relay(test_config(&loggly.url(), &slack.url())).await;
    let addr = relay.addr;
    relay.stop().await.unwrap();

    let err = reqwest::Client::new()
        .get(format!("http://{addr}/loggly/search"))
        .send()
        .await;
    assert!(err.is_err());
}
