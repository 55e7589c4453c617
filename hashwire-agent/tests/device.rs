mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use hashwire_agent::device::{DeviceClient, DeviceTarget, PollError, PollErrorKind, Poller};

const STATUS: &str = "/api/system/info";

async fn miner(body: Value) -> SocketAddr {
    common::serve(Router::new().route(STATUS, get(move || async move { Json(body) }))).await
}

fn client() -> DeviceClient {
    DeviceClient::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn minimal_status_becomes_a_record() {
    let addr = miner(json!({"hashRate": 523.4, "temp": 54.2})).await;
    let mut target = DeviceTarget::new(addr.to_string());

    let record = client().poll(&mut target).await.unwrap();

    assert_eq!(record.label, target.label());
    assert!((record.hashrate.as_gigahashes() - 523.4).abs() < 1e-9);
    assert_eq!(record.temperature_c, 54.2);
    assert_eq!(record.power_w, None);
    assert_eq!(record.shares_accepted, None);
    assert_eq!(target.consecutive_failures(), 0);
    assert!(target.last_success().is_some());
}

#[tokio::test]
async fn reported_hostname_labels_the_device() {
    let addr = miner(json!({
        "hashRate": 480.0,
        "temp": 61.0,
        "power": 13.2,
        "sharesAccepted": 1200,
        "sharesRejected": 3,
        "bestDiff": "4.29G",
        "hostname": "bitaxe-office",
    }))
    .await;
    let mut target = DeviceTarget::new(addr.to_string());

    let record = client().poll(&mut target).await.unwrap();

    assert_eq!(record.label, "bitaxe-office");
    assert_eq!(record.power_w, Some(13.2));
    assert_eq!(record.shares_accepted, Some(1200));
    assert_eq!(record.shares_rejected, Some(3));
    assert_eq!(record.best_difficulty.as_deref(), Some("4.29G"));
}

#[tokio::test]
async fn error_status_is_bad_response() {
    let router = Router::new().route(STATUS, get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let addr = common::serve(router).await;
    let mut target = DeviceTarget::new(addr.to_string());

    let err = client().poll(&mut target).await.unwrap_err();

    assert_eq!(err, PollError::BadResponse(500));
    assert_eq!(target.consecutive_failures(), 1);
    assert_eq!(target.last_error(), Some(&err));
}

#[tokio::test]
async fn garbage_body_is_parse_error() {
    let router = Router::new().route(STATUS, get(|| async { "<html>captive portal</html>" }));
    let addr = common::serve(router).await;
    let mut target = DeviceTarget::new(addr.to_string());

    let err = client().poll(&mut target).await.unwrap_err();
    assert_eq!(err.kind(), PollErrorKind::ParseError);
}

#[tokio::test]
async fn missing_temperature_is_parse_error() {
    let addr = miner(json!({"hashRate": 500.0})).await;
    let mut target = DeviceTarget::new(addr.to_string());

    let err = client().poll(&mut target).await.unwrap_err();
    assert_eq!(err.kind(), PollErrorKind::ParseError);
    assert!(err.to_string().contains("temp"), "{err}");
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let mut target = DeviceTarget::new(common::closed_port().to_string());

    let started = Instant::now();
    let err = client().poll(&mut target).await.unwrap_err();

    assert_eq!(err.kind(), PollErrorKind::Unreachable);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(target.consecutive_failures(), 1);
}

#[tokio::test]
async fn silent_device_times_out() {
    let router = Router::new().route(
        STATUS,
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({"hashRate": 1.0, "temp": 1.0}))
        }),
    );
    let addr = common::serve(router).await;
    let client = DeviceClient::new(Duration::from_millis(300)).unwrap();
    let mut target = DeviceTarget::new(addr.to_string());

    let started = Instant::now();
    let err = client.poll(&mut target).await.unwrap_err();

    assert_eq!(err, PollError::TimedOut(Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn recovery_resets_the_failure_streak() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StatusCode::SERVICE_UNAVAILABLE)
                } else {
                    Ok(Json(json!({"hashRate": 500.0, "temp": 50.0})))
                }
            }
        }
    };
    let addr = common::serve(Router::new().route(STATUS, get(handler))).await;
    let client = client();
    let mut target = DeviceTarget::new(addr.to_string());

    assert!(client.poll(&mut target).await.is_err());
    assert!(client.poll(&mut target).await.is_err());
    assert_eq!(target.consecutive_failures(), 2);

    client.poll(&mut target).await.unwrap();
    assert_eq!(target.consecutive_failures(), 0);
    assert!(target.last_error().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
