// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::http::StatusCode;
use docvault::infrastructure::database::store::{DocumentStore, FindOptions};
use serde_json::{json, Map};
use tower::util::ServiceExt;
use uuid::Uuid;

use super::helpers::{get, json_body, send_json, test_app};

#[tokio::test]
async fn create_then_get_entity() {
    let (store, app) = test_app();

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/v1/entities",
            Some("vn"),
            json!({ "phone_number": "0901234567", "email": "a@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["status"], "pending");
    assert_eq!(created["data"]["contact"]["phone_number"], "0901234567");

    // stored ciphertext, served plaintext
    let raw = store
        .find("entities", &Map::new(), &FindOptions::default(), None)
        .await
        .unwrap();
    assert_ne!(raw[0]["contact"]["phone_number"], "0901234567");

    let response = app
        .oneshot(get(&format!("/v1/entities/{}", id), Some("VN")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["data"], created["data"]);
}

#[tokio::test]
async fn missing_region_is_bad_request() {
    let (_store, app) = test_app();

    let response = app
        .oneshot(get(&format!("/v1/entities/{}", Uuid::new_v4()), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("region"));
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let (_store, app) = test_app();

    let response = app
        .oneshot(get(&format!("/v1/entities/{}", Uuid::new_v4()), Some("TH")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_id_and_empty_phone_are_rejected() {
    let (_store, app) = test_app();

    let response = app
        .clone()
        .oneshot(get("/v1/entities/not-a-uuid", Some("VN")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(send_json(
            "POST",
            "/v1/entities",
            Some("VN"),
            json!({ "phone_number": "" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_update_is_visible_on_next_read() {
    let (_store, app) = test_app();

    let created = json_body(
        app.clone()
            .oneshot(send_json(
                "POST",
                "/v1/entities",
                Some("VN"),
                json!({ "phone_number": "0901234567" }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();

    // warm the cache
    let response = app
        .clone()
        .oneshot(get(&format!("/v1/entities/{}", id), Some("VN")))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["data"]["status"], "pending");

    let response = app
        .clone()
        .oneshot(send_json(
            "PUT",
            &format!("/v1/entities/{}/status", id),
            Some("VN"),
            json!({ "status": "accepted" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/v1/entities/{}", id), Some("VN")))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["data"]["status"], "accepted");
}

#[tokio::test]
async fn find_by_encrypted_phone_number() {
    let (_store, app) = test_app();

    for phone in ["0901234567", "0907654321"] {
        app.clone()
            .oneshot(send_json(
                "POST",
                "/v1/entities",
                Some("VN"),
                json!({ "phone_number": phone }),
            ))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(get("/v1/entities?phone_number=0907654321", Some("VN")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let found = body["data"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["contact"]["phone_number"], "0907654321");
}
