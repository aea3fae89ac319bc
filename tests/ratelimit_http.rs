use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{middleware, routing::get, Extension, Router};
use tower::ServiceExt;

use stockflow_metering::ratelimit::{enforce, FixedWindowLimiter};

fn app(limiter: FixedWindowLimiter) -> Router {
    Router::new()
        .route("/ping", get(|| async { "ok" }))
        .route_layer(middleware::from_fn(enforce))
        .layer(Extension(limiter))
}

fn request(ip: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/ping");
    if let Some(ip) = ip {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn requests_over_cap_get_429_with_retry_guidance() {
    let app = app(FixedWindowLimiter::new(2, chrono::Duration::seconds(60)));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request(Some("10.0.0.1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    let response = app
        .clone()
        .oneshot(request(Some("10.0.0.1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry_after: i64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "rate limit exceeded");
    assert!(body["retryAfter"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn distinct_identities_do_not_share_quota() {
    let app = app(FixedWindowLimiter::new(1, chrono::Duration::seconds(60)));

    let response = app
        .clone()
        .oneshot(request(Some("10.0.0.1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(Some("10.0.0.2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_forwarded_address_shares_the_unknown_bucket() {
    let app = app(FixedWindowLimiter::new(1, chrono::Duration::seconds(60)));

    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // second anonymous caller lands in the same bucket
    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn allowed_responses_expose_quota_headers() {
    let app = app(FixedWindowLimiter::new(5, chrono::Duration::seconds(60)));

    let response = app
        .clone()
        .oneshot(request(Some("10.0.0.9")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
}
