//! End-to-end tests of the HTTP surface over an in-memory row store.
//!
//! Run with `cargo test --test api`. No network or spreadsheet is needed.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use eventsheet::config::{Config, Environment, SecretString};
use eventsheet::models::analytics::ANALYTICS_SHEET;
use eventsheet::models::event::{Event, COL_DATA, EVENTS_SHEET};
use eventsheet::store::memory::MemoryStore;
use eventsheet::{api, AppState};

const SECRET: &str = "test-admin-secret";

fn app_with(config: Config) -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::with_default_sheets());
    let state = Arc::new(AppState::new(config, store.clone()));
    (store, api::router(state))
}

fn app() -> (Arc<MemoryStore>, Router) {
    app_with(Config {
        admin_secret: Some(SecretString::new(SECRET)),
        ..Config::default()
    })
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn bocce() -> Value {
    json!({ "name": "Bocce Night", "startDateISO": "2025-06-01", "venue": "Park" })
}

mod events {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_create_returns_same_event() {
        let (store, app) = app();

        let (status, first) = send(&app, post("/api/admin/events", bocce())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["success"], true);
        assert_eq!(first["duplicate"], false);
        assert_eq!(first["event"]["slug"], "bocce-night");
        assert_eq!(first["event"]["brandId"], "root");

        let (status, second) = send(&app, post("/api/admin/events", bocce())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["duplicate"], true);
        assert_eq!(second["event"]["id"], first["event"]["id"]);

        assert_eq!(store.rows(EVENTS_SHEET).len(), 1);
        assert_eq!(store.append_count(), 1);
    }

    #[tokio::test]
    async fn test_created_event_shows_sponsors_by_default() {
        let (store, app) = app();
        let (status, body) = send(&app, post("/api/admin/events", bocce())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["event"]["settings"]["showSponsors"], true);
        assert_eq!(body["event"]["settings"]["showSchedule"], false);

        let event = Event::from_record(&store.rows(EVENTS_SHEET)[0][COL_DATA]).unwrap();
        assert!(event.settings.show_sponsors);
    }

    #[tokio::test]
    async fn test_same_name_other_venue_gets_suffixed_slug() {
        let (store, app) = app();
        send(&app, post("/api/admin/events", bocce())).await;

        let mut other = bocce();
        other["venue"] = json!("Beach");
        let (status, body) = send(&app, post("/api/admin/events", other)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["event"]["slug"], "bocce-night-2");
        assert_eq!(store.rows(EVENTS_SHEET).len(), 2);
    }

    #[tokio::test]
    async fn test_formula_in_name_is_stored_inertly() {
        let (store, app) = app();
        let (status, body) = send(
            &app,
            post(
                "/api/admin/events",
                json!({ "name": "=IMPORTXML(\"x\")", "startDateISO": "2025-06-01" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["event"]["name"], "=IMPORTXML(\"x\")");

        let row = &store.rows(EVENTS_SHEET)[0];
        let event = Event::from_record(&row[COL_DATA]).unwrap();
        assert_eq!(event.name, "=IMPORTXML(\"x\")");
    }

    #[tokio::test]
    async fn test_validation_errors_are_400() {
        let (store, app) = app();

        let (status, body) = send(&app, post("/api/admin/events", json!({ "startDateISO": "2025-06-01" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "MISSING_FIELD");

        let (_, body) = send(
            &app,
            post("/api/admin/events", json!({ "name": "x", "startDateISO": "June 1st" })),
        )
        .await;
        assert_eq!(body["error"]["code"], "MALFORMED_DATE");

        let (_, body) = send(
            &app,
            post(
                "/api/admin/events",
                json!({ "name": "x", "startDateISO": "2025-06-01", "brandId": "nope" }),
            ),
        )
        .await;
        assert_eq!(body["error"]["code"], "UNKNOWN_BRAND");

        let req = Request::builder()
            .method("POST")
            .uri("/api/admin/events")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_JSON");

        assert_eq!(store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_503_without_detail() {
        let (store, app) = app();
        store.set_offline(true);
        let (status, body) = send(&app, post("/api/admin/events", bocce())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert!(!body.to_string().contains("offline"));
    }
}

mod results {
    use super::*;

    async fn create(app: &Router) -> String {
        let (_, body) = send(app, post("/api/admin/events", bocce())).await;
        body["event"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_standings_update_round_trip() {
        let (store, app) = app();
        let id = create(&app).await;

        let (status, body) = send(
            &app,
            post(
                &format!("/api/admin/events/{}/results", id),
                json!({ "standings": [{ "rank": 1, "name": "Team A", "score": 21 }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], json!(["standings"]));
        assert_eq!(body["event"]["settings"]["showStandings"], true);
        assert_eq!(body["event"]["settings"]["showSchedule"], false);
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_is_404() {
        let (_, app) = app();
        let (status, body) = send(
            &app,
            post("/api/admin/events/evt-missing/results", json!({ "schedule": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_empty_update_is_400() {
        let (_, app) = app();
        let id = create(&app).await;
        let (status, body) = send(&app, post(&format!("/api/admin/events/{}/results", id), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "NO_UPDATES");
    }
}

mod analytics {
    use super::*;

    fn public(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/analytics")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_event_needs_no_auth() {
        let (store, app) = app();
        let (status, body) = send(
            &app,
            public(json!({ "eventId": "evt-1", "surface": "display", "metric": "impression", "sponsorId": "sp-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "count": 1 }));
        assert_eq!(store.rows(ANALYTICS_SHEET).len(), 1);
    }

    #[tokio::test]
    async fn test_batch_reports_partial_failure() {
        let (store, app) = app();
        let (status, body) = send(
            &app,
            public(json!({ "events": [
                { "eventId": "evt-1", "surface": "public", "metric": "click" },
                { "eventId": "evt-1", "surface": "public" },
                { "eventId": "evt-1", "surface": "poster", "metric": "scan" }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["count"], 2);
        assert_eq!(body["failed"], 1);
        assert!(body["error"].as_str().unwrap().contains("MISSING_FIELD"));
        assert_eq!(store.rows(ANALYTICS_SHEET).len(), 2);
    }

    #[tokio::test]
    async fn test_mistyped_batch_item_fails_alone() {
        let (store, app) = app();
        let (status, body) = send(
            &app,
            public(json!({ "events": [
                { "eventId": "evt-1", "surface": "public", "metric": "click" },
                { "eventId": "evt-1", "surface": "display", "metric": "dwellSec", "value": "5" }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["failed"], 1);
        assert!(body["error"].as_str().unwrap().starts_with("[1] INVALID_INPUT"));
        assert_eq!(store.rows(ANALYTICS_SHEET).len(), 1);
    }

    #[tokio::test]
    async fn test_events_must_be_an_array() {
        let (store, app) = app();
        let (status, body) = send(&app, public(json!({ "events": { "eventId": "evt-1" } }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_BATCH");
        assert_eq!(store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_single_event_is_400() {
        let (_, app) = app();
        let (status, body) = send(&app, public(json!({ "eventId": "evt-1", "surface": "tv", "metric": "click" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }
}

mod guard {
    use super::*;

    fn unauthenticated(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bocce().to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_is_challenged() {
        let (store, app) = app();
        let resp = app.clone().oneshot(unauthenticated("/api/admin/events")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer realm=\"admin\"");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "MISSING_TOKEN");
        assert!(!body.to_string().contains(SECRET));
        assert_eq!(store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_credential_is_rejected() {
        let (_, app) = app();
        let mut req = unauthenticated("/api/admin/events");
        req.headers_mut()
            .insert(header::AUTHORIZATION, "Bearer test-admin-secreT".parse().unwrap());
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_legacy_query_credential() {
        let (_, app) = app();
        let req = unauthenticated(&format!("/api/admin/events?adminKey={}", SECRET));
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_other_scheme_falls_back_to_query_credential() {
        let (_, app) = app();
        let mut req = unauthenticated(&format!("/api/admin/events?adminKey={}", SECRET));
        req.headers_mut()
            .insert(header::AUTHORIZATION, "Basic Zm9vOmJhcg==".parse().unwrap());
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_unknown_admin_path_is_guarded_before_404() {
        let (_, app) = app();
        let (status, _) = send(&app, unauthenticated("/API/Admin/nothing-here")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_production_without_secret_fails_closed() {
        let (store, app) = app_with(Config {
            environment: Environment::Prod,
            ..Config::default()
        });
        let (status, body) = send(&app, unauthenticated("/api/admin/events")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "NOT_CONFIGURED");
        assert_eq!(store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_development_without_secret_is_open() {
        let (_, app) = app_with(Config::default());
        let (status, _) = send(&app, unauthenticated("/api/admin/events")).await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_health_and_headers() {
        let (store, app) = app();
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
        assert!(resp.headers().get("x-request-id").is_some());

        store.set_offline(true);
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store"]["connected"], false);
        assert_eq!(body["store"]["error"], "NETWORK_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_route_and_wrong_method_are_json_404() {
        let (_, app) = app();
        let req = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let req = Request::builder().uri("/api/analytics").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let (_, app) = app();
        let req = Request::builder()
            .uri("/healthz")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-123");
    }
}
