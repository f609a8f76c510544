//! Baidu Netdisk ("xpan" open API) client.
//!
//! ## Upload protocol
//!
//! A file that fits in one block is stored in three calls:
//!
//! 1. `file?method=precreate` registers the path, size and block MD5 list
//!    and returns an `uploadid`.
//! 2. `superfile2?method=upload` on the PCS host receives the bytes as a
//!    multipart `file` part (`partseq=0`).
//! 3. `file?method=create` commits the upload and returns the `fs_id`.
//!
//! ## Error classification
//!
//! | Response                               | Error                       |
//! |----------------------------------------|-----------------------------|
//! | `errno` 110 / 111 / -6, HTTP 401 / 403  | [`DistributorError::Auth`]   |
//! | any other `errno`, HTTP 5xx, network   | [`DistributorError::Upload`] |
//!
//! An auth failure triggers one silent `refresh_token` grant; if that
//! succeeds the call is repeated once with the new token.

use super::token::{Session, TokenRecord};
use super::{CloudDrive, RemoteFile};
use crate::config::DriveCredentials;
use crate::error::DistributorError;
use crate::output::DistributionArtifact;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The provider rejects clients that do not identify as its own SDK.
const USER_AGENT: &str = "pan.baidu.com";
/// `errno` values meaning the access token is expired, invalid or revoked.
const AUTH_ERRNOS: [i64; 3] = [110, 111, -6];
/// `errno` for "directory does not exist" on `list`.
const ERRNO_NO_SUCH_DIR: i64 = -9;
const CHECK_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Base URLs of the three provider hosts. Tests point these at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaiduEndpoints {
    /// xpan file API, e.g. `https://pan.baidu.com/rest/2.0/xpan`.
    pub api_base: String,
    /// PCS upload host, e.g. `https://d.pcs.baidu.com/rest/2.0/pcs`.
    pub pcs_base: String,
    /// OAuth host, e.g. `https://openapi.baidu.com/oauth/2.0`.
    pub oauth_base: String,
}

impl Default for BaiduEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://pan.baidu.com/rest/2.0/xpan".into(),
            pcs_base: "https://d.pcs.baidu.com/rest/2.0/pcs".into(),
            oauth_base: "https://openapi.baidu.com/oauth/2.0".into(),
        }
    }
}

impl BaiduEndpoints {
    /// All three hosts served from one origin with the provider's path layout.
    pub fn single_origin(origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            api_base: format!("{origin}/rest/2.0/xpan"),
            pcs_base: format!("{origin}/rest/2.0/pcs"),
            oauth_base: format!("{origin}/oauth/2.0"),
        }
    }
}

/// Baidu Netdisk client bound to one [`Session`].
pub struct BaiduDrive {
    client: Client,
    credentials: DriveCredentials,
    endpoints: BaiduEndpoints,
    session: Arc<Session>,
}

impl std::fmt::Debug for BaiduDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaiduDrive")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl BaiduDrive {
    /// Create a client whose requests time out after `timeout_secs`.
    pub fn new(
        credentials: DriveCredentials,
        session: Arc<Session>,
        timeout_secs: u64,
    ) -> Result<Self, DistributorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DistributorError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            credentials,
            endpoints: BaiduEndpoints::default(),
            session,
        })
    }

    pub fn with_endpoints(mut self, endpoints: BaiduEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// URL the user opens to grant access; the page shows a one-time code.
    pub fn authorize_url(&self) -> Result<String, DistributorError> {
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.endpoints.oauth_base),
            &[
                ("response_type", "code"),
                ("client_id", self.credentials.app_key.as_str()),
                ("redirect_uri", "oob"),
                ("scope", "basic,netdisk"),
            ],
        )
        .map_err(|e| DistributorError::InvalidConfig(format!("bad OAuth endpoint: {e}")))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for a token and persist it.
    pub async fn activate(&self, code: &str) -> Result<TokenRecord, DistributorError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(DistributorError::InvalidConfig("authorization code is empty".into()));
        }
        self.require_credentials()?;

        let record = self
            .token_grant(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.credentials.app_key.as_str()),
                ("client_secret", self.credentials.secret_key.as_str()),
                ("redirect_uri", "oob"),
            ])
            .await?;
        self.session.install(record.clone()).await?;
        info!("Drive authorized; token stored in {}", self.session.store().path().display());
        Ok(record)
    }

    /// Trade the refresh token for a new access token and persist it.
    pub async fn refresh(&self) -> Result<(), DistributorError> {
        self.require_credentials()?;
        let current = self.session.token().await.ok_or_else(|| DistributorError::Auth {
            detail: "no token to refresh".into(),
        })?;
        if !current.can_refresh() {
            return Err(DistributorError::Auth {
                detail: "token has no refresh_token".into(),
            });
        }

        let record = self
            .token_grant(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.credentials.app_key.as_str()),
                ("client_secret", self.credentials.secret_key.as_str()),
            ])
            .await?;
        self.session.install(record).await?;
        info!("Drive token refreshed");
        Ok(())
    }

    /// Files directly inside `dir`. A missing directory lists as empty.
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteFile>, DistributorError> {
        self.with_auth_retry(dir, |token| async move {
            let req = self.client.get(format!("{}/file", self.endpoints.api_base)).query(&[
                ("method", "list"),
                ("access_token", token.as_str()),
                ("dir", dir),
                ("limit", "1000"),
            ]);
            let body = send_json(req, dir).await?;
            if errno(&body) == ERRNO_NO_SUCH_DIR {
                return Ok(Vec::new());
            }
            check_errno(&body, dir)?;
            Ok::<_, DistributorError>(parse_listing(&body))
        })
        .await
    }

    fn require_credentials(&self) -> Result<(), DistributorError> {
        if self.credentials.is_complete() {
            Ok(())
        } else {
            Err(DistributorError::InvalidConfig(
                "BAIDU_AK and BAIDU_SK must both be set".into(),
            ))
        }
    }

    async fn token_grant(&self, params: &[(&str, &str)]) -> Result<TokenRecord, DistributorError> {
        let endpoint = format!("{}/token", self.endpoints.oauth_base);
        let transient = |detail: String| DistributorError::Upload {
            remote_path: endpoint.clone(),
            detail,
        };

        // A rejected grant comes back as HTTP 400 with a JSON error body.
        let response = self
            .client
            .get(&endpoint)
            .query(params)
            .send()
            .await
            .map_err(|e| transient(format!("network error: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(transient(format!("HTTP {status} from token endpoint")));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| transient(format!("HTTP {status}: token response is not JSON: {e}")))?;

        if body.get("access_token").and_then(Value::as_str).is_some_and(|t| !t.is_empty()) {
            let record: TokenRecord = serde_json::from_value(body)
                .map_err(|e| DistributorError::Auth {
                    detail: format!("malformed token response: {e}"),
                })?;
            return Ok(record.issued_now());
        }

        let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        let description = body
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or("token endpoint returned no access_token");
        Err(DistributorError::Auth {
            detail: format!("{error}: {description}"),
        })
    }

    /// Run `call` with the current access token. On an auth failure, refresh
    /// once (unless another task already did) and run it again.
    async fn with_auth_retry<T, F, Fut>(&self, what: &str, call: F) -> Result<T, DistributorError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, DistributorError>>,
    {
        let mut token = self.current_token(what).await?;
        if token.is_expired() && token.can_refresh() {
            debug!("Access token past expiry; refreshing before {}", what);
            self.refresh().await?;
            token = self.current_token(what).await?;
        }

        match call(token.access_token.clone()).await {
            Err(DistributorError::Auth { detail }) => {
                let latest = self.current_token(what).await?;
                if latest.access_token == token.access_token {
                    warn!("Drive rejected token ({}); attempting silent refresh", detail);
                    self.refresh().await?;
                }
                let fresh = self.current_token(what).await?;
                call(fresh.access_token).await
            }
            other => other,
        }
    }

    async fn current_token(&self, what: &str) -> Result<TokenRecord, DistributorError> {
        self.session.token().await.ok_or_else(|| DistributorError::Auth {
            detail: format!("no drive token available for {what}; authorize first"),
        })
    }

    async fn upload_once(
        &self,
        token: &str,
        artifact: &DistributionArtifact,
    ) -> Result<RemoteFile, DistributorError> {
        let path = artifact.remote_path();
        let size = artifact.size().to_string();
        let block_list = serde_json::json!([artifact.md5]).to_string();

        // ── Step 1: precreate ───────────────────────────────────────────────
        let req = self
            .client
            .post(format!("{}/file", self.endpoints.api_base))
            .query(&[("method", "precreate"), ("access_token", token)])
            .form(&[
                ("path", path.as_str()),
                ("size", size.as_str()),
                ("isdir", "0"),
                ("autoinit", "1"),
                ("block_list", block_list.as_str()),
                ("rtype", "3"),
            ]);
        let pre = send_json(req, &path).await?;
        check_errno(&pre, &path)?;
        let upload_id = pre
            .get("uploadid")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DistributorError::Upload {
                remote_path: path.clone(),
                detail: "precreate returned no uploadid".into(),
            })?
            .to_string();
        debug!("{}: precreate ok (uploadid {})", path, upload_id);

        // ── Step 2: upload the single block ─────────────────────────────────
        let part = Part::bytes(artifact.bytes.clone())
            .file_name(artifact.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| DistributorError::Internal(format!("multipart: {e}")))?;
        let req = self
            .client
            .post(format!("{}/superfile2", self.endpoints.pcs_base))
            .query(&[
                ("method", "upload"),
                ("access_token", token),
                ("type", "tmpfile"),
                ("path", path.as_str()),
                ("uploadid", upload_id.as_str()),
                ("partseq", "0"),
            ])
            .multipart(Form::new().part("file", part));
        let block = send_json(req, &path).await?;
        check_errno(&block, &path)?;
        if let Some(md5) = block.get("md5").and_then(Value::as_str) {
            if !md5.eq_ignore_ascii_case(&artifact.md5) {
                return Err(DistributorError::Upload {
                    remote_path: path,
                    detail: format!("block checksum mismatch: sent {}, stored {md5}", artifact.md5),
                });
            }
        }
        debug!("{}: block uploaded ({} bytes)", path, artifact.size());

        // ── Step 3: create ──────────────────────────────────────────────────
        let req = self
            .client
            .post(format!("{}/file", self.endpoints.api_base))
            .query(&[("method", "create"), ("access_token", token)])
            .form(&[
                ("path", path.as_str()),
                ("size", size.as_str()),
                ("isdir", "0"),
                ("uploadid", upload_id.as_str()),
                ("block_list", block_list.as_str()),
                ("rtype", "3"),
            ]);
        let created = send_json(req, &path).await?;
        check_errno(&created, &path)?;
        let fs_id = created.get("fs_id").and_then(Value::as_u64).ok_or_else(|| DistributorError::Upload {
            remote_path: path.clone(),
            detail: "create returned no fs_id".into(),
        })?;
        let stored_path = created
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(path);

        Ok(RemoteFile {
            path: stored_path,
            size: artifact.size(),
            md5: artifact.md5.clone(),
            fs_id: Some(fs_id),
        })
    }
}

#[async_trait]
impl CloudDrive for BaiduDrive {
    async fn upload(&self, artifact: &DistributionArtifact) -> Result<RemoteFile, DistributorError> {
        let path = artifact.remote_path();
        let remote = self
            .with_auth_retry(&path, |token| async move { self.upload_once(&token, artifact).await })
            .await?;
        info!("Uploaded {} ({} bytes, fs_id {:?})", remote.path, remote.size, remote.fs_id);
        Ok(remote)
    }

    async fn find(&self, dir: &str, name: &str) -> Result<Option<RemoteFile>, DistributorError> {
        Ok(self.list_dir(dir).await?.into_iter().find(|f| f.name() == name))
    }

    async fn check_auth(&self) -> Result<bool, DistributorError> {
        if !self.session.is_authorized().await {
            return Ok(false);
        }
        let outcome = self
            .with_auth_retry("/apps", |token| async move {
                let req = self
                    .client
                    .get(format!("{}/file", self.endpoints.api_base))
                    .query(&[
                        ("method", "list"),
                        ("access_token", token.as_str()),
                        ("dir", "/apps"),
                        ("limit", "1"),
                    ])
                    .timeout(CHECK_AUTH_TIMEOUT);
                let body = send_json(req, "/apps").await?;
                check_errno(&body, "/apps")
            })
            .await;
        match outcome {
            Ok(()) => Ok(true),
            Err(DistributorError::Auth { detail }) => {
                debug!("Drive session not authorized: {}", detail);
                Ok(false)
            }
            // A fresh account may have no /apps yet; the token itself was accepted.
            Err(DistributorError::Upload { detail, .. })
                if detail.starts_with(&format!("errno {ERRNO_NO_SUCH_DIR}")) =>
            {
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

/// Send a request and decode the JSON body, classifying transport failures.
async fn send_json(req: RequestBuilder, remote_path: &str) -> Result<Value, DistributorError> {
    let upload_err = |detail: String| DistributorError::Upload {
        remote_path: remote_path.to_string(),
        detail,
    };

    let response = req.send().await.map_err(|e| {
        if e.is_timeout() {
            upload_err(format!("request timed out: {e}"))
        } else {
            upload_err(format!("network error: {e}"))
        }
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DistributorError::Auth {
            detail: format!("HTTP {status} from drive"),
        });
    }
    let text = response
        .text()
        .await
        .map_err(|e| upload_err(format!("cannot read response body: {e}")))?;

    // Error bodies are JSON too, so parse before judging the status.
    let body: Option<Value> = serde_json::from_str(&text).ok();
    match body {
        Some(body) if status.is_success() || errno(&body) != 0 => Ok(body),
        _ if !status.is_success() => Err(upload_err(format!("HTTP {status}: {}", truncate(&text, 200)))),
        _ => Err(upload_err(format!("response is not JSON: {}", truncate(&text, 200)))),
    }
}

/// The provider's error number. The xpan host uses `errno`, the PCS host
/// `error_code`; absent means success.
fn errno(body: &Value) -> i64 {
    body.get("errno")
        .and_then(Value::as_i64)
        .or_else(|| body.get("error_code").and_then(Value::as_i64))
        .unwrap_or(0)
}

fn check_errno(body: &Value, remote_path: &str) -> Result<(), DistributorError> {
    let code = errno(body);
    if code == 0 {
        return Ok(());
    }
    let message = body
        .get("errmsg")
        .or_else(|| body.get("error_msg"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if AUTH_ERRNOS.contains(&code) {
        Err(DistributorError::Auth {
            detail: format!("errno {code} {message}").trim_end().to_string(),
        })
    } else {
        Err(DistributorError::Upload {
            remote_path: remote_path.to_string(),
            detail: format!("errno {code} {message}").trim_end().to_string(),
        })
    }
}

fn parse_listing(body: &Value) -> Vec<RemoteFile> {
    body.get("list")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e.get("isdir").and_then(Value::as_i64).unwrap_or(0) == 0)
                .filter_map(|e| {
                    Some(RemoteFile {
                        path: e.get("path")?.as_str()?.to_string(),
                        size: e.get("size").and_then(Value::as_u64).unwrap_or(0),
                        md5: e.get("md5").and_then(Value::as_str).unwrap_or("").to_string(),
                        fs_id: e.get("fs_id").and_then(Value::as_u64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
