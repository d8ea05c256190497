use std::sync::Arc;
use std::time::Duration;

use rollcall_directory::{
    ClientRecord, DirectoryError, MemoryAuthProvider, MemoryDirectory, Principal, Role,
};
use rollcall_server::{AppConfig, ServerBuilder};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    directory: Arc<MemoryDirectory>,
    auth: Arc<MemoryAuthProvider>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

async fn start_server(cfg: AppConfig) -> TestServer {
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert_client(ClientRecord {
        user_id: "c-1".to_string(),
        phone: "+15551234567".to_string(),
        name: Some("Ada".to_string()),
    });
    let auth = Arc::new(MemoryAuthProvider::new());
    auth.add_account(
        "hunter2",
        Principal {
            id: "u-1".to_string(),
            email: "lead@example.com".to_string(),
            display_name: Some("Lead".to_string()),
            role: Role::TeamLeader,
        },
    );

    let server = ServerBuilder::new()
        .with_config(cfg)
        .with_directory(directory.clone())
        .with_auth_provider(auth.clone())
        .build()
        .expect("build server");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = server
            .serve(listener, async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        directory,
        auth,
        shutdown_tx: tx,
        handle,
    }
}

async fn poll_until_done(client: &reqwest::Client, url: &str) -> (u16, Value) {
    for _ in 0..100 {
        let resp = client.get(url).send().await.unwrap();
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap();
        if status != 202 {
            return (status, body);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("processing never finished for {url}");
}

#[tokio::test]
async fn server_endpoints_work() {
    let srv = start_server(AppConfig::default()).await;
    let client = reqwest::Client::new();
    let base = &srv.base;

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // POST /clients/check-phone, second call served from cache
    let resp = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "+1 (555) 123-4567" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["exists"], true);
    assert_eq!(body["userId"], "c-1");

    let lookups = srv.directory.lookup_count();
    let body: Value = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "+15551234567" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["exists"], true);
    assert_eq!(srv.directory.lookup_count(), lookups);

    let body: Value = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "555 000" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["exists"], false);
    assert!(body["userId"].is_null());

    let resp = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "--" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "bad_request");

    // POST /guests creates once, then reports the existing guest
    let guest = json!({ "eventId": "evt-1", "clientUserId": "c-1", "name": "Ada" });
    let resp = client
        .post(format!("{base}/guests"))
        .json(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["created"], true);

    let resp = client
        .post(format!("{base}/guests"))
        .json(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let existing: Value = resp.json().await.unwrap();
    assert_eq!(existing["created"], false);
    assert_eq!(existing["guest"]["id"], created["guest"]["id"]);

    // GET /status for an unknown key
    let resp = client
        .get(format!("{base}/status/guest:nope:nope:0000"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "not_found");

    // GET /metrics reflects the caches without touching them
    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["phoneCache"]["size"], 2);
    assert_eq!(body["phoneCache"]["hits"], 1);
    assert_eq!(body["derived"]["status"], "healthy");
    assert_eq!(body["sessionActive"], false);

    // No exporter installed in this process
    let resp = client
        .get(format!("{base}/metrics/prometheus"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    // Upstream failures are 500s, never "not found"
    srv.directory
        .set_failure(Some(DirectoryError::connection("db unreachable")));
    let resp = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "+4420000000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "upstream_failure");
    assert_eq!(body["error"]["message"], "internal error");
    srv.directory.set_failure(None);

    srv.stop().await;
}

#[tokio::test]
async fn async_guest_creation_is_polled() {
    let srv = start_server(AppConfig::default()).await;
    srv.directory.set_latency(Duration::from_millis(300));
    let client = reqwest::Client::new();
    let base = &srv.base;
    let guest = json!({ "eventId": "evt-2", "clientUserId": "c-1" });

    let resp = client
        .post(format!("{base}/guests/async"))
        .json(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let location = resp
        .headers()
        .get("content-location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("content-location header");
    let body: Value = resp.json().await.unwrap();
    let key = body["processingKey"].as_str().unwrap().to_string();
    assert!(key.starts_with("guest:evt-2:c-1:"));
    assert_eq!(body["statusUrl"], location);
    assert!(location.ends_with(&format!("/status/{key}")));

    // A second request for the same pair joins the running creation
    let body: Value = client
        .post(format!("{base}/guests/async"))
        .json(&guest)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["processingKey"], key.as_str());

    let status_url = format!("{base}/status/{key}");
    let (status, body) = poll_until_done(&client, &status_url).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["eventId"], "evt-2");
    assert_eq!(srv.directory.create_count(), 1);

    // The result stays readable until swept
    let resp = client.get(&status_url).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // Now the guest exists, so the async endpoint answers inline
    let resp = client
        .post(format!("{base}/guests/async"))
        .json(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], false);

    // A failed creation is reported as failed; the worker reads the
    // injected failure after its simulated latency
    srv.directory.set_latency(Duration::from_millis(500));
    let resp = client
        .post(format!("{base}/guests/async"))
        .json(&json!({ "eventId": "evt-3", "clientUserId": "c-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    srv.directory
        .set_failure(Some(DirectoryError::query("qr generation failed")));
    let key = body["processingKey"].as_str().unwrap();
    let (status, body) = poll_until_done(&client, &format!("{base}/status/{key}")).await;
    assert_eq!(status, 500);
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("qr generation failed"));

    srv.stop().await;
}

#[tokio::test]
async fn expired_processing_entries_report_408_then_404() {
    let mut cfg = AppConfig::default();
    cfg.processing.expiry_ceiling_ms = 150;
    let srv = start_server(cfg).await;
    let client = reqwest::Client::new();
    let base = &srv.base;

    let resp = client
        .post(format!("{base}/guests/async"))
        .json(&json!({ "eventId": "evt-9", "clientUserId": "c-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let key = body["processingKey"].as_str().unwrap().to_string();

    // Past the ceiling the entry is gone whatever its status
    tokio::time::sleep(Duration::from_millis(300)).await;
    let resp = client
        .get(format!("{base}/status/{key}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 408);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "processing expired");

    let resp = client
        .get(format!("{base}/status/{key}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    srv.stop().await;
}

#[tokio::test]
async fn auth_session_flow() {
    let srv = start_server(AppConfig::default()).await;
    let client = reqwest::Client::new();
    let base = &srv.base;

    let resp = client.get(format!("{base}/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "email": "lead@example.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "email": "lead@example.com", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{base}/auth/me"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["user"]["email"], "lead@example.com");
    assert_eq!(body["user"]["role"], "team_leader");

    // Remote sign-out failure still succeeds locally, with a warning
    srv.auth.set_sign_out_failure(true);
    let resp = client
        .post(format!("{base}/auth/logout"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["warning"].is_string());

    // The provider kept its session, but the user is logged out locally
    let resp = client.get(format!("{base}/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    srv.auth.set_sign_out_failure(false);
    let body: Value = client
        .post(format!("{base}/auth/logout"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.get("warning").is_none());

    let resp = client.get(format!("{base}/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    srv.stop().await;
}

#[tokio::test]
async fn rate_limit_rejects_excess_requests() {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.limit = 3;
    cfg.rate_limit.window_ms = 60_000;
    let srv = start_server(cfg).await;
    let client = reqwest::Client::new();
    let base = &srv.base;

    for _ in 0..3 {
        let resp = client
            .post(format!("{base}/clients/check-phone"))
            .json(&json!({ "phone": "+15551234567" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .post(format!("{base}/clients/check-phone"))
        .json(&json!({ "phone": "+15551234567" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let retry_after: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "rate_limited");

    // Health and metrics are never limited
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["rateLimiter"]["deniedTotal"], 1);

    srv.stop().await;
}
