//! Baidu drive client against an in-process fake of the xpan / PCS / OAuth
//! hosts. No network access or real credentials needed.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use pdf_distributor::pipeline::upload::{upload_with_retry, RetryPolicy};
use pdf_distributor::{
    BaiduDrive, BaiduEndpoints, Channel, CloudDrive, DistributionArtifact, DistributorError, DriveCredentials,
    Session, TokenRecord, TokenStore,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const FOLDER: &str = "/apps/PDF_Distributor/Feishu";

// ── Fake provider ────────────────────────────────────────────────────────────

struct Fake {
    /// The only access token the fake accepts.
    valid_token: Mutex<String>,
    /// The only refresh token the fake honours.
    refresh_token: String,
    /// Number of upcoming precreate calls answered with HTTP 503.
    busy: AtomicUsize,
    calls: Mutex<Vec<String>>,
    files: Mutex<Vec<Value>>,
    uploaded_bytes: AtomicUsize,
}

impl Fake {
    fn new(valid_token: &str, refresh_token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(valid_token.into()),
            refresh_token: refresh_token.into(),
            busy: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            uploaded_bytes: AtomicUsize::new(0),
        })
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn accepts(&self, query: &HashMap<String, String>) -> bool {
        query.get("access_token") == Some(&*self.valid_token.lock().unwrap())
    }

    fn add_file(&self, path: &str, size: u64) {
        self.files.lock().unwrap().push(json!({
            "path": path,
            "server_filename": path.rsplit('/').next().unwrap(),
            "size": size,
            "isdir": 0,
            "fs_id": 4242,
            "md5": "0123456789abcdef0123456789abcdef",
        }));
    }
}

fn rejected_token() -> Json<Value> {
    Json(json!({ "errno": 111, "errmsg": "access token invalid or no longer valid" }))
}

async fn file_get(State(fake): State<Arc<Fake>>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    fake.record("list");
    if !fake.accepts(&q) {
        return rejected_token();
    }
    let dir = q.get("dir").cloned().unwrap_or_default();
    let files = fake.files.lock().unwrap();
    let entries: Vec<Value> = files
        .iter()
        .filter(|f| {
            let path = f["path"].as_str().unwrap_or("");
            path.rsplit_once('/').map(|(parent, _)| parent) == Some(dir.as_str())
        })
        .cloned()
        .collect();
    if entries.is_empty() && dir != "/apps" {
        return Json(json!({ "errno": -9, "errmsg": "file does not exist" }));
    }
    Json(json!({ "errno": 0, "list": entries }))
}

async fn file_post(
    State(fake): State<Arc<Fake>>,
    Query(q): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let method = q.get("method").cloned().unwrap_or_default();
    fake.record(&method);
    if !fake.accepts(&q) {
        return rejected_token().into_response();
    }
    match method.as_str() {
        "precreate" => {
            let busy = fake.busy.load(Ordering::SeqCst);
            if busy > 0 {
                fake.busy.store(busy - 1, Ordering::SeqCst);
                return (StatusCode::SERVICE_UNAVAILABLE, "server busy").into_response();
            }
            assert_eq!(form.get("rtype").map(String::as_str), Some("3"));
            Json(json!({ "errno": 0, "uploadid": "N1-upload", "return_type": 1, "block_list": [] })).into_response()
        }
        "create" => {
            let path = form.get("path").cloned().unwrap_or_default();
            let size: u64 = form.get("size").and_then(|s| s.parse().ok()).unwrap_or(0);
            fake.add_file(&path, size);
            Json(json!({ "errno": 0, "fs_id": 4242, "path": path, "size": size, "isdir": 0 })).into_response()
        }
        other => (StatusCode::BAD_REQUEST, format!("unexpected method {other}")).into_response(),
    }
}

async fn superfile2(
    State(fake): State<Arc<Fake>>,
    Query(q): Query<HashMap<String, String>>,
    body: Bytes,
) -> Json<Value> {
    fake.record("superfile2");
    if !fake.accepts(&q) {
        return Json(json!({ "error_code": 111, "error_msg": "access token invalid" }));
    }
    fake.uploaded_bytes.fetch_add(body.len(), Ordering::SeqCst);
    Json(json!({ "partseq": "0", "request_id": 1 }))
}

async fn oauth_token(State(fake): State<Arc<Fake>>, Query(q): Query<HashMap<String, String>>) -> Response {
    fake.record("token");
    let granted = match q.get("grant_type").map(String::as_str) {
        Some("refresh_token") => q.get("refresh_token") == Some(&fake.refresh_token),
        Some("authorization_code") => q.get("code").map(String::as_str) == Some("good-code"),
        _ => false,
    };
    if !granted {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "refresh token has been used" })),
        )
            .into_response();
    }
    *fake.valid_token.lock().unwrap() = "fresh-token".into();
    Json(json!({
        "access_token": "fresh-token",
        "refresh_token": "refresh-2",
        "expires_in": 2592000,
        "scope": "basic netdisk",
        "session_key": "",
        "session_secret": "",
    }))
    .into_response()
}

async fn spawn_fake(fake: Arc<Fake>) -> String {
    let app = Router::new()
        .route("/rest/2.0/xpan/file", get(file_get).post(file_post))
        .route("/rest/2.0/pcs/superfile2", post(superfile2))
        .route("/oauth/2.0/token", get(oauth_token))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn token(access: &str, refresh: &str) -> TokenRecord {
    TokenRecord {
        access_token: access.into(),
        refresh_token: refresh.into(),
        expires_in: 2_592_000,
        scope: "basic netdisk".into(),
        obtained_at: 0,
    }
    .issued_now()
}

fn drive(origin: &str, dir: &Path, token: Option<TokenRecord>) -> BaiduDrive {
    let session = Arc::new(Session::with_token(TokenStore::new(dir.join("token.json")), token));
    BaiduDrive::new(DriveCredentials::new("ak", "sk"), session, 5)
        .unwrap()
        .with_endpoints(BaiduEndpoints::single_origin(origin))
}

fn artifact() -> DistributionArtifact {
    DistributionArtifact::new(
        Channel::Feishu,
        "Distf_250101.pdf",
        FOLDER,
        2,
        b"%PDF-1.5\n% not really encrypted\n".to_vec(),
    )
}

const FAST: RetryPolicy = RetryPolicy {
    max_retries: 3,
    backoff_ms: 1,
};

// ── Upload ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_runs_precreate_block_create() {
    let fake = Fake::new("good-token", "refresh-1");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("good-token", "refresh-1")));

    let artifact = artifact();
    let remote = drive.upload(&artifact).await.unwrap();

    assert_eq!(remote.path, format!("{FOLDER}/Distf_250101.pdf"));
    assert_eq!(remote.fs_id, Some(4242));
    assert_eq!(remote.md5, artifact.md5);
    assert_eq!(fake.calls(), vec!["precreate", "superfile2", "create"]);
    assert!(fake.uploaded_bytes.load(Ordering::SeqCst) >= artifact.bytes.len());
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let fake = Fake::new("good-token", "refresh-1");
    fake.busy.store(2, Ordering::SeqCst);
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("good-token", "refresh-1")));

    let (result, attempts) = upload_with_retry(&drive, &artifact(), FAST, None).await;
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(attempts, 3);
    assert_eq!(fake.count("precreate"), 3);
    assert_eq!(fake.count("create"), 1);
}

#[tokio::test]
async fn retries_give_up_after_the_limit() {
    let fake = Fake::new("good-token", "refresh-1");
    fake.busy.store(10, Ordering::SeqCst);
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("good-token", "refresh-1")));

    let (result, attempts) = upload_with_retry(&drive, &artifact(), FAST, None).await;
    match result {
        Err(DistributorError::Upload { detail, .. }) => assert!(detail.contains("503"), "{detail}"),
        other => panic!("expected Upload error, got {other:?}"),
    }
    assert_eq!(attempts, 4);
}

// ── Authorization ────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_token_is_refreshed_and_persisted() {
    let fake = Fake::new("server-side-token", "refresh-1");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("stale-token", "refresh-1")));

    let remote = drive.upload(&artifact()).await.unwrap();
    assert_eq!(remote.name(), "Distf_250101.pdf");
    assert_eq!(fake.calls(), vec!["precreate", "token", "precreate", "superfile2", "create"]);

    let stored = TokenStore::new(dir.path().join("token.json")).load().await.unwrap();
    assert_eq!(stored.access_token, "fresh-token");
    assert_eq!(stored.refresh_token, "refresh-2");
    assert_eq!(drive.session().access_token().await.as_deref(), Some("fresh-token"));
}

#[tokio::test]
async fn revoked_session_is_an_auth_error_and_not_retried() {
    let fake = Fake::new("server-side-token", "other-refresh");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("stale-token", "refresh-1")));

    let (result, attempts) = upload_with_retry(&drive, &artifact(), FAST, None).await;
    match result {
        Err(DistributorError::Auth { detail }) => assert!(detail.contains("invalid_grant"), "{detail}"),
        other => panic!("expected Auth error, got {other:?}"),
    }
    assert_eq!(attempts, 1);
    assert_eq!(fake.count("precreate"), 1);
    assert_eq!(fake.count("superfile2"), 0);
}

#[tokio::test]
async fn upload_without_a_token_is_an_auth_error() {
    let fake = Fake::new("good-token", "refresh-1");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), None);

    let err = drive.upload(&artifact()).await.unwrap_err();
    assert!(matches!(err, DistributorError::Auth { .. }), "{err:?}");
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn activation_stores_a_token_that_survives_restart() {
    let fake = Fake::new("nobody-yet", "refresh-2");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();

    let first = drive(&origin, dir.path(), None);
    assert!(!first.check_auth().await.unwrap());
    let record = first.activate("good-code").await.unwrap();
    assert_eq!(record.access_token, "fresh-token");
    assert!(record.obtained_at > 0);

    // A new process loads the same file.
    let session = Arc::new(Session::load(TokenStore::new(dir.path().join("token.json"))).await);
    let second = BaiduDrive::new(DriveCredentials::new("ak", "sk"), session, 5)
        .unwrap()
        .with_endpoints(BaiduEndpoints::single_origin(&origin));
    assert!(second.check_auth().await.unwrap());
}

#[tokio::test]
async fn bad_authorization_code_is_an_auth_error() {
    let fake = Fake::new("nobody-yet", "refresh-2");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), None);

    let err = drive.activate("typo").await.unwrap_err();
    assert!(matches!(err, DistributorError::Auth { .. }), "{err:?}");
    assert!(!dir.path().join("token.json").exists());
}

#[tokio::test]
async fn check_auth_reports_a_dead_session_as_false() {
    let fake = Fake::new("server-side-token", "other-refresh");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("stale-token", "refresh-1")));

    assert!(!drive.check_auth().await.unwrap());
}

// ── Listing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn find_locates_files_by_name() {
    let fake = Fake::new("good-token", "refresh-1");
    fake.add_file(&format!("{FOLDER}/Distf_250101.pdf"), 1234);
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("good-token", "refresh-1")));

    let found = drive.find(FOLDER, "Distf_250101.pdf").await.unwrap().unwrap();
    assert_eq!(found.size, 1234);
    assert_eq!(found.fs_id, Some(4242));

    assert!(drive.find(FOLDER, "Distf_250102.pdf").await.unwrap().is_none());
    assert!(drive.find("/apps/PDF_Distributor/Red", "Distr_250101.pdf").await.unwrap().is_none());
}

#[tokio::test]
async fn uploaded_file_is_listed_afterwards() {
    let fake = Fake::new("good-token", "refresh-1");
    let origin = spawn_fake(Arc::clone(&fake)).await;
    let dir = tempfile::tempdir().unwrap();
    let drive = drive(&origin, dir.path(), Some(token("good-token", "refresh-1")));

    let artifact = artifact();
    assert!(drive.list_dir(FOLDER).await.unwrap().is_empty());
    drive.upload(&artifact).await.unwrap();

    let listed = drive.list_dir(FOLDER).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, artifact.size());
}
