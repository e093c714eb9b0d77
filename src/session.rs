//! Seafile API session: transport, authentication, and library operations.
//!
//! All API traffic funnels through [`Session::request`], which owns the
//! status-code classification and the retry-once-after-reauthentication
//! policy. Authentication itself tries a cached token first and falls back
//! to password login, persisting whatever token it ends up with.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, RwLock};

use crate::crypto;
use crate::error::{Result, SeafileError};
use crate::models::{AuthTokenResponse, FileEntry, LibraryInfo, OwnerResponse};
use crate::progress::{self, ProgressSnapshot};
use crate::token_store::{self, TokenStore};

/// Path suffix every API endpoint lives under.
const API_SUFFIX: &str = "/api2";

/// How long a cached token is trusted before it is treated as stale.
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Depth of the upload byte pipe, in chunks.
const PIPE_DEPTH: usize = 1;

/// A connection to one Seafile server on behalf of one user.
///
/// Holding a token does not imply it is still valid; validity is only
/// established by a successful authenticated request. Concurrent API calls
/// on one session are not supported.
#[derive(Debug)]
pub struct Session {
    base_url: String,
    user: String,
    password: Option<String>,
    token: RwLock<Option<String>>,
    token_max_age: Duration,
    store: Option<TokenStore>,
    http: Client,
}

impl Session {
    /// Create a session against `url` for `user`.
    ///
    /// The `/api2` suffix is appended to `url` unless already present.
    /// Without a password only a cached or externally supplied token can
    /// authenticate.
    pub fn new(url: &str, user: &str, password: Option<&str>) -> Self {
        Self {
            base_url: normalize_endpoint(url),
            user: user.to_string(),
            password: password.map(str::to_string),
            token: RwLock::new(None),
            token_max_age: DEFAULT_TOKEN_MAX_AGE,
            store: TokenStore::open_default(),
            http: Client::new(),
        }
    }

    /// Replace the default token cache location, or disable caching with
    /// `None`.
    pub fn with_token_store(mut self, store: Option<TokenStore>) -> Self {
        self.store = store;
        self
    }

    /// Override the cached-token freshness window.
    pub fn with_token_max_age(mut self, max_age: Duration) -> Self {
        self.token_max_age = max_age;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current bearer token, if any.
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Replace the in-memory token (no validation, no persistence).
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    fn endpoint_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// One request attempt: build, send, classify the status. No retry.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint_url(path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await?;
        classify_status(response.status(), method.as_str(), path)?;
        Ok(response)
    }

    /// Single-attempt request decoding the JSON reply. Used by the paths
    /// that must not recurse into re-authentication.
    async fn request_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<T> {
        let response = self.execute(method, path, form).await?;
        Ok(response.json().await?)
    }

    /// Issue an API request, re-authenticating and retrying exactly once
    /// when the server rejects the current token.
    ///
    /// A loop rather than recursion; termination is guaranteed because the
    /// second rejection propagates and re-authentication itself never
    /// comes back through here.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<T> {
        let mut reauthed = false;
        loop {
            match self.execute(method.clone(), path, form).await {
                Ok(response) => return Ok(response.json().await?),
                Err(err @ SeafileError::Auth { .. }) if !reauthed => {
                    reauthed = true;
                    log::warn!("token rejected on {method} {path}; re-authenticating");
                    self.set_token(None).await;
                    if self.ensure_authenticated().await.is_err() {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Unauthenticated reachability probe.
    ///
    /// True on a literal `"pong"` reply, and also on 429: a throttled
    /// server is still a reachable server.
    pub async fn ping(&self) -> bool {
        match self.execute(Method::GET, "/ping/", None).await {
            Ok(response) => matches!(response.json::<String>().await.as_deref(), Ok("pong")),
            Err(SeafileError::Throttled { .. }) => true,
            Err(err) => {
                log::debug!("ping failed: {err}");
                false
            }
        }
    }

    /// Probe whether the current token is accepted by the server.
    ///
    /// Any failure clears the in-memory token.
    pub async fn validate_token(&self) -> bool {
        match self.execute(Method::GET, "/auth/ping/", None).await {
            Ok(response) => {
                if matches!(response.json::<String>().await.as_deref(), Ok("pong")) {
                    return true;
                }
                self.set_token(None).await;
                false
            }
            Err(err) => {
                log::debug!("auth probe failed: {err}");
                self.set_token(None).await;
                false
            }
        }
    }

    /// Obtain a fresh token with explicit credentials.
    ///
    /// Pings first so credentials are never posted to an endpoint that
    /// does not behave like a Seafile server.
    pub async fn login(&self, user: &str, password: &str) -> Result<()> {
        if !self.ping().await {
            return Err(SeafileError::Unreachable(self.base_url.clone()));
        }
        let form = [("username", user), ("password", password)];
        let reply: AuthTokenResponse = self
            .request_once(Method::POST, "/auth-token/", Some(&form))
            .await?;
        self.set_token(Some(reply.token)).await;
        Ok(())
    }

    /// Establish a working token: a fresh cached one if it validates,
    /// otherwise password login. Newly obtained tokens are persisted
    /// best-effort; cache trouble never fails the attempt.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        log::debug!("trying to authenticate against {}", self.base_url);
        let key = self.password.as_deref().map(crypto::derive_key);
        let account = token_store::account_id(&self.base_url, &self.user);

        let mut cached = None;
        if let (Some(store), Some(key)) = (&self.store, &key) {
            if let Some(entry) = store.lookup(&account, key) {
                if entry.age() < self.token_max_age {
                    cached = Some(entry.token);
                } else {
                    log::warn!("cached token for {} is stale", self.user);
                }
            }
        }

        if let Some(token) = cached {
            self.set_token(Some(token)).await;
            if self.validate_token().await {
                log::debug!("cached token accepted");
                return Ok(());
            }
            log::warn!("cached token rejected; evicting it");
            if let (Some(store), Some(key)) = (&self.store, &key) {
                if let Err(err) = store.store(&account, "", key, self.token_max_age) {
                    log::warn!("could not evict cached token: {err}");
                }
            }
        }

        let Some(password) = self.password.clone() else {
            return Err(SeafileError::NoCredentials);
        };
        self.login(&self.user, &password).await?;
        log::debug!("password login succeeded");

        if let (Some(store), Some(key), Some(token)) = (&self.store, &key, self.token().await) {
            if let Err(err) = store.store(&account, &token, key, self.token_max_age) {
                log::warn!("could not persist auth token: {err}");
            }
        }
        Ok(())
    }

    /// List the libraries available to the authenticated user.
    pub async fn list_libraries(&self) -> Result<Vec<LibraryInfo>> {
        self.request(Method::GET, "/repos/", None).await
    }

    /// Find a library by name.
    pub async fn get_library(&self, name: &str) -> Result<Library<'_>> {
        let libraries = self.list_libraries().await?;
        libraries
            .into_iter()
            .find(|library| library.name == name)
            .map(|info| Library {
                session: self,
                info,
            })
            .ok_or_else(|| SeafileError::LibraryNotFound(name.to_string()))
    }
}

/// A handle to one remote library, tied to the session that produced it.
#[derive(Debug)]
pub struct Library<'a> {
    session: &'a Session,
    /// Library metadata as last fetched.
    pub info: LibraryInfo,
}

impl Library<'_> {
    /// List the entries under `path` (empty string for the library root).
    pub async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let route = if path.is_empty() {
            format!("/repos/{}/dir/", self.info.id)
        } else {
            format!("/repos/{}/dir/?p={}", self.info.id, urlencoding::encode(path))
        };
        self.session.request(Method::GET, &route, None).await
    }

    /// Owner of the library.
    pub async fn owner(&self) -> Result<String> {
        let reply: OwnerResponse = self
            .session
            .request(
                Method::GET,
                &format!("/repos/{}/owner/", self.info.id),
                None,
            )
            .await?;
        Ok(reply.owner)
    }

    /// Re-fetch the library metadata.
    pub async fn refresh(&mut self) -> Result<()> {
        self.info = self
            .session
            .request(Method::GET, &format!("/repos/{}/", self.info.id), None)
            .await?;
        Ok(())
    }

    /// Upload `size` bytes from `source` to `target_path` inside the
    /// library, optionally publishing progress snapshots.
    ///
    /// The payload streams through a bounded pipe into the multipart body,
    /// so it is never held in memory whole. The progress feed never blocks
    /// the transfer and closes when it ends, successfully or not.
    pub async fn upload<R>(
        &self,
        source: R,
        size: u64,
        target_path: &str,
        progress: Option<mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let upload_url: String = self
            .session
            .request(
                Method::GET,
                &format!("/repos/{}/upload-link/", self.info.id),
                None,
            )
            .await?;

        let (parent_dir, filename) = split_target_path(target_path);
        log::debug!("uploading {} bytes to {parent_dir}/{filename} via {upload_url}", size);

        let (pipe_tx, pipe_rx) = futures::channel::mpsc::channel(PIPE_DEPTH);
        let producer = tokio::spawn(progress::copy_with_progress(
            source, size, pipe_tx, progress,
        ));

        let mime_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(pipe_rx), size)
            .file_name(filename.clone())
            .mime_str(&mime_type)?;
        let form = Form::new()
            .text("parent_dir", parent_dir)
            .text("filename", filename)
            .part("file", part);

        let mut request = self.session.http.post(&upload_url).multipart(form);
        if let Some(token) = self.session.token.read().await.as_deref() {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }

        let outcome = request.send().await;
        let _ = producer.await;

        let response = outcome?;
        let status = response.status();
        if !status.is_success() {
            return Err(SeafileError::UnexpectedStatus {
                status: status.as_u16(),
                method: "POST".to_string(),
                path: upload_url,
            });
        }
        Ok(())
    }
}

/// Map a response status to the error taxonomy. The single source of
/// truth for HTTP status handling.
fn classify_status(status: StatusCode, method: &str, path: &str) -> Result<()> {
    let ctx = || (method.to_string(), path.to_string());
    match status.as_u16() {
        200 | 201 | 202 => Ok(()),
        403 => {
            let (method, path) = ctx();
            Err(SeafileError::Auth { method, path })
        }
        404 => {
            let (method, path) = ctx();
            Err(SeafileError::NotFound { method, path })
        }
        429 => {
            log::warn!("rate limited by server on {method} {path}");
            let (method, path) = ctx();
            Err(SeafileError::Throttled { method, path })
        }
        500 => {
            let (method, path) = ctx();
            Err(SeafileError::InternalServer { method, path })
        }
        520 => {
            let (method, path) = ctx();
            Err(SeafileError::OperationFailed { method, path })
        }
        other => {
            let (method, path) = ctx();
            Err(SeafileError::UnexpectedStatus {
                status: other,
                method,
                path,
            })
        }
    }
}

fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(API_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{API_SUFFIX}")
    }
}

/// Split a remote target path into (parent directory, file name).
fn split_target_path(target: &str) -> (String, String) {
    let cleaned = format!("/{}", target.trim_matches('/'));
    let (dir, name) = cleaned.rsplit_once('/').unwrap_or(("", cleaned.as_str()));
    let dir = if dir.is_empty() { "/" } else { dir };
    (dir.to_string(), name.to_string())
}
