//! HTTP document store client.
//!
//! The service exposes one JSON document per user at
//! `{base}/v1/users/{user}/document`: `GET` reads it (404 when absent) and
//! `PATCH` merges top-level keys into it. There is no push channel, so a
//! subscription polls the document and reports a change whenever its
//! `revision` field, or the body when no revision is present, differs.
//! Snapshots produced by this client's own uploads are not reported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{CloudDocument, RemoteError, RemoteEvent, RemoteResult, RemoteStore, RemoteSubscription};
use crate::auth::AuthProvider;
use crate::config::SyncSettings;
use crate::util::{compact_text, is_http_url};
use crate::wire::{decode_document, encode_document};
use crate::{Error, Result};

/// Remote store speaking to the Tally document API
pub struct HttpRemoteStore<A: AuthProvider> {
    base_url: String,
    client: Client,
    auth: Arc<A>,
    poll_interval: Duration,
    request_timeout: Duration,
    uploads: UploadMarks,
}

/// Fingerprint of the document as it stood after this client's latest
/// upload, per user
#[derive(Debug, Clone, Default)]
struct UploadMarks(Arc<Mutex<HashMap<String, String>>>);

impl UploadMarks {
    fn record(&self, user_id: &str, fingerprint: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string(), fingerprint);
    }

    fn take(&self, user_id: &str) -> Option<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id)
    }
}

/// Decides which polled snapshots a subscription reports
struct PollFilter {
    user_id: String,
    last_seen: Option<String>,
    uploads: UploadMarks,
}

impl PollFilter {
    /// Whether a poll that found `current` is a change to report. An
    /// unchanged document is not, and neither is our own latest upload.
    fn observe(&mut self, current: Option<String>) -> bool {
        if current == self.last_seen {
            return false;
        }
        let own = self.uploads.take(&self.user_id);
        let echo = current.is_some() && current == own;
        self.last_seen = current;
        !echo
    }
}

impl<A: AuthProvider> HttpRemoteStore<A> {
    pub fn new(base_url: impl AsRef<str>, auth: Arc<A>, settings: &SyncSettings) -> Result<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            base_url,
            client,
            auth,
            poll_interval: settings.poll_interval,
            request_timeout: settings.request_timeout,
            uploads: UploadMarks::default(),
        })
    }

    /// Remember the stored document's fingerprint after an upload
    async fn mark_upload(&self, user_id: &str) -> RemoteResult<()> {
        let request = self.authorized(self.client.get(self.document_url(user_id)))?;
        if let Some(raw) = fetch_raw(request, self.request_timeout).await? {
            self.uploads.record(user_id, fingerprint(&raw));
        }
        Ok(())
    }

    fn document_url(&self, user_id: &str) -> String {
        document_url(&self.base_url, user_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let session = self
            .auth
            .current_session()
            .ok_or_else(|| RemoteError::Unauthenticated("no active session".to_string()))?;
        Ok(request
            .bearer_auth(session.access_token)
            .header("Accept", "application/json"))
    }
}

impl<A: AuthProvider> std::fmt::Debug for HttpRemoteStore<A> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<A: AuthProvider> RemoteStore for HttpRemoteStore<A> {
    async fn download(&self, user_id: &str) -> RemoteResult<Option<CloudDocument>> {
        let request = self.authorized(self.client.get(self.document_url(user_id)))?;
        let raw = fetch_raw(request, self.request_timeout).await?;
        raw.map(decode).transpose()
    }

    async fn upload(&self, user_id: &str, document: &CloudDocument) -> RemoteResult<()> {
        let body =
            encode_document(document).map_err(|error| RemoteError::Other(error.to_string()))?;
        let request = self.authorized(self.client.patch(self.document_url(user_id)))?;
        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(&error, self.request_timeout))?;
        check_status(response).await?;
        tracing::debug!("Uploaded remote document");
        if let Err(error) = self.mark_upload(user_id).await {
            tracing::debug!("Could not read back the uploaded document: {error}");
        }
        Ok(())
    }

    async fn subscribe(&self, user_id: &str) -> RemoteResult<RemoteSubscription> {
        let url = self.document_url(user_id);
        let request = self.authorized(self.client.get(&url))?;
        let last_seen = fetch_raw(request, self.request_timeout)
            .await?
            .map(|raw| fingerprint(&raw));
        let mut filter = PollFilter {
            user_id: user_id.to_string(),
            last_seen,
            uploads: self.uploads.clone(),
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let auth = Arc::clone(&self.auth);
        let poll_interval = self.poll_interval;
        let timeout = self.request_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }

                let Some(session) = auth.current_session() else {
                    let _ = sender.send(RemoteEvent::Failed(RemoteError::Unauthenticated(
                        "no active session".to_string(),
                    )));
                    break;
                };
                let request = client
                    .get(&url)
                    .bearer_auth(session.access_token)
                    .header("Accept", "application/json");

                let event = match fetch_raw(request, timeout).await {
                    Ok(raw) => {
                        if !filter.observe(raw.as_ref().map(fingerprint)) {
                            continue;
                        }
                        match raw.map(decode).transpose() {
                            Ok(document) => RemoteEvent::Changed(document),
                            Err(error) => RemoteEvent::Failed(error),
                        }
                    }
                    Err(error) => RemoteEvent::Failed(error),
                };

                let fatal = matches!(&event, RemoteEvent::Failed(error) if error.is_session());
                if sender.send(event).is_err() || fatal {
                    break;
                }
            }
            tracing::debug!("Remote document poller stopped");
        });

        Ok(RemoteSubscription::new(receiver, move || task.abort()))
    }

    fn echoes_uploads(&self) -> bool {
        false
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !is_http_url(trimmed) {
        return Err(Error::InvalidInput(format!(
            "API base URL must start with http:// or https://, got '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

fn document_url(base_url: &str, user_id: &str) -> String {
    format!(
        "{base_url}/v1/users/{}/document",
        urlencoding::encode(user_id)
    )
}

async fn fetch_raw(request: RequestBuilder, timeout: Duration) -> RemoteResult<Option<Value>> {
    let response = request
        .send()
        .await
        .map_err(|error| transport_error(&error, timeout))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = check_status(response).await?;
    let raw = response
        .json::<Value>()
        .await
        .map_err(|error| RemoteError::Malformed(error.to_string()))?;
    Ok(Some(raw))
}

async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthenticated(message),
        StatusCode::FORBIDDEN => RemoteError::PermissionDenied(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Network(message)
        }
        status if status.is_server_error() => RemoteError::Network(message),
        _ => RemoteError::Other(message),
    }
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout(timeout)
    } else if error.is_connect() || error.is_request() {
        RemoteError::Network(error.to_string())
    } else {
        RemoteError::Other(error.to_string())
    }
}

fn decode(raw: Value) -> RemoteResult<CloudDocument> {
    decode_document(raw).map_err(|error| RemoteError::Malformed(error.to_string()))
}

fn fingerprint(raw: &Value) -> String {
    match raw.get("revision") {
        Some(revision) if !revision.is_null() => revision.to_string(),
        _ => raw.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuth;
    use serde_json::json;

    #[test]
    fn normalize_base_url_trims_trailing_slash() {
        assert_eq!(
            normalize_base_url(" https://api.tally.app/ ").unwrap(),
            "https://api.tally.app"
        );
        assert!(normalize_base_url("api.tally.app").is_err());
    }

    #[test]
    fn document_url_encodes_user_id() {
        assert_eq!(
            document_url("https://api.tally.app", "user/1"),
            "https://api.tally.app/v1/users/user%2F1/document"
        );
    }

    #[test]
    fn status_errors_follow_sync_error_classes() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "").is_session());
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, r#"{"message":"denied"}"#),
            RemoteError::PermissionDenied(message) if message == "denied (403)"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "upstream"),
            RemoteError::Network(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, ""),
            RemoteError::Other(message) if message == "HTTP 422"
        ));
    }

    #[test]
    fn fingerprint_prefers_revision() {
        let first = json!({"revision": 7, "books": []});
        let second = json!({"revision": 7, "books": [1]});
        assert_eq!(fingerprint(&first), fingerprint(&second));

        let unversioned = json!({"books": []});
        assert_ne!(fingerprint(&unversioned), fingerprint(&json!({"books": [1]})));
    }

    fn poll_filter(last_seen: Option<&str>, uploads: &UploadMarks) -> PollFilter {
        PollFilter {
            user_id: "u1".to_string(),
            last_seen: last_seen.map(str::to_string),
            uploads: uploads.clone(),
        }
    }

    #[test]
    fn identical_upload_does_not_hide_the_next_change() {
        let uploads = UploadMarks::default();
        let mut filter = poll_filter(Some("r1"), &uploads);

        // Upload that left the document as it was
        uploads.record("u1", "r1".to_string());
        assert!(!filter.observe(Some("r1".to_string())));

        assert!(filter.observe(Some("r2".to_string())));
    }

    #[test]
    fn own_uploads_are_skipped_once() {
        let uploads = UploadMarks::default();
        let mut filter = poll_filter(Some("r1"), &uploads);

        // Two uploads within one poll interval
        uploads.record("u1", "r2".to_string());
        uploads.record("u1", "r3".to_string());
        assert!(!filter.observe(Some("r3".to_string())));
        assert!(!filter.observe(Some("r3".to_string())));

        assert!(filter.observe(Some("r4".to_string())));
        assert!(filter.observe(None));
    }

    #[test]
    fn marks_are_kept_per_user() {
        let uploads = UploadMarks::default();
        uploads.record("u2", "r2".to_string());
        let mut filter = poll_filter(Some("r1"), &uploads);

        assert!(filter.observe(Some("r2".to_string())));
        assert_eq!(uploads.take("u2").as_deref(), Some("r2"));
    }

    #[test]
    fn polling_store_filters_its_own_uploads() {
        let auth = Arc::new(StaticTokenAuth::signed_out());
        let store =
            HttpRemoteStore::new("https://api.tally.app", auth, &SyncSettings::default()).unwrap();
        assert!(!store.echoes_uploads());
    }

    #[tokio::test]
    async fn requests_without_session_are_unauthenticated() {
        let auth = Arc::new(StaticTokenAuth::signed_out());
        let store =
            HttpRemoteStore::new("https://api.tally.app", auth, &SyncSettings::default()).unwrap();

        let error = store.download("u1").await.unwrap_err();
        assert!(matches!(error, RemoteError::Unauthenticated(_)));
    }

    #[test]
    fn debug_output_omits_credentials() {
        let auth = Arc::new(StaticTokenAuth::new("secret-token", "u1", None).unwrap());
        let store =
            HttpRemoteStore::new("https://api.tally.app", auth, &SyncSettings::default()).unwrap();
        let rendered = format!("{store:?}");
        assert!(!rendered.contains("secret-token"));
    }
}
