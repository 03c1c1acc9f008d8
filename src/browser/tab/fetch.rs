//! Fetch interception: resource blocking and in-memory download capture.
//!
//! Both features claim the single CDP `Fetch` interception channel, so they
//! are composed through one state machine:
//!
//! | State | Enabled pattern stages |
//! |-------|------------------------|
//! | `Off` | none |
//! | `BlockingOnly` | Request |
//! | `DownloadOnly` | Response |
//! | `Both` | Request + Response |
//!
//! [`Tab::block_resources`] re-arms interception from any state; beginning
//! a download capture layers the Response stage on top of whatever blocking
//! is active, and ending it reverts to the prior steady state.
//!
//! Captured downloads never touch disk: the paused response body is read
//! over the protocol and the request is then fulfilled with an empty 200.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manager::messages::TabEvent;

use super::Tab;
use super::core::TabChannel;

// ============================================================================
// Constants
// ============================================================================

/// Content types treated as downloads even without a disposition header.
const DOWNLOAD_CONTENT_TYPES: [&str; 3] = [
    "application/pdf",
    "application/octet-stream",
    "application/zip",
];

/// Fallback name when neither disposition nor URL yields one.
const FALLBACK_FILENAME: &str = "download";

// ============================================================================
// Types
// ============================================================================

/// Resource categories that can be blocked at the request stage.
///
/// Mirrors the CDP `Network.ResourceType` values this crate acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Main document and iframes.
    Document,
    /// CSS.
    Stylesheet,
    /// Images.
    Image,
    /// Audio and video.
    Media,
    /// Web fonts.
    Font,
    /// Scripts.
    Script,
    /// XMLHttpRequest traffic.
    Xhr,
    /// `fetch()` traffic.
    Fetch,
    /// WebSocket upgrades.
    WebSocket,
    /// Everything else.
    Other,
}

impl ResourceType {
    /// Parses a CDP resource-type string; unrecognized values map to
    /// [`ResourceType::Other`].
    #[must_use]
    pub fn from_cdp(raw: &str) -> Self {
        match raw {
            "Document" => Self::Document,
            "Stylesheet" => Self::Stylesheet,
            "Image" => Self::Image,
            "Media" => Self::Media,
            "Font" => Self::Font,
            "Script" => Self::Script,
            "XHR" => Self::Xhr,
            "Fetch" => Self::Fetch,
            "WebSocket" => Self::WebSocket,
            _ => Self::Other,
        }
    }
}

/// Interception channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterceptionMode {
    /// Fetch interception disabled.
    #[default]
    Off,
    /// Request-stage blocking only.
    BlockingOnly,
    /// Response-stage download capture only.
    DownloadOnly,
    /// Blocking and download capture composed.
    Both,
}

/// A download captured in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Decoded body bytes.
    pub data: Vec<u8>,
    /// Filename from the disposition header, or derived from the URL.
    pub filename: String,
    /// Mime type from the content type, or inferred from the filename.
    pub mime_type: String,
    /// Body size in bytes.
    pub size: usize,
}

impl fmt::Debug for DownloadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedFile")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FetchInterceptor
// ============================================================================

/// Per-tab interception state machine.
pub(crate) struct FetchInterceptor {
    mode: InterceptionMode,
    blocked: FxHashSet<ResourceType>,
    captured: Option<DownloadedFile>,
}

impl FetchInterceptor {
    pub(crate) fn new() -> Self {
        Self {
            mode: InterceptionMode::Off,
            blocked: FxHashSet::default(),
            captured: None,
        }
    }

    pub(crate) fn mode(&self) -> InterceptionMode {
        self.mode
    }

    /// Replaces the blocked set; the machine settles on `BlockingOnly` or
    /// `Off` regardless of the prior state.
    pub(crate) fn set_blocked(&mut self, kinds: &[ResourceType]) {
        self.blocked = kinds.iter().copied().collect();
        self.mode = if self.blocked.is_empty() {
            InterceptionMode::Off
        } else {
            InterceptionMode::BlockingOnly
        };
    }

    /// Layers the response stage on top of any active blocking.
    pub(crate) fn begin_capture(&mut self) {
        self.mode = match self.mode {
            InterceptionMode::BlockingOnly | InterceptionMode::Both => InterceptionMode::Both,
            InterceptionMode::Off | InterceptionMode::DownloadOnly => {
                InterceptionMode::DownloadOnly
            }
        };
    }

    /// Reverts to the steady state the capture was layered over.
    pub(crate) fn end_capture(&mut self) {
        self.mode = match self.mode {
            InterceptionMode::Both => InterceptionMode::BlockingOnly,
            InterceptionMode::DownloadOnly => InterceptionMode::Off,
            steady => steady,
        };
    }

    pub(crate) fn take_captured(&mut self) -> Option<DownloadedFile> {
        self.captured.take()
    }

    fn capturing(&self) -> bool {
        matches!(
            self.mode,
            InterceptionMode::DownloadOnly | InterceptionMode::Both
        )
    }

    /// Disables Fetch and re-enables it with the current state's patterns.
    pub(crate) async fn re_arm(&self, channel: &TabChannel) -> Result<()> {
        channel.send("Fetch.disable", json!({})).await?;

        let stages: &[&str] = match self.mode {
            InterceptionMode::Off => &[],
            InterceptionMode::BlockingOnly => &["Request"],
            InterceptionMode::DownloadOnly => &["Response"],
            InterceptionMode::Both => &["Request", "Response"],
        };
        if stages.is_empty() {
            return Ok(());
        }

        let patterns: Vec<Value> = stages
            .iter()
            .map(|stage| json!({"urlPattern": "*", "requestStage": stage}))
            .collect();
        channel
            .send("Fetch.enable", json!({"patterns": patterns}))
            .await?;
        Ok(())
    }

    /// Offers one forwarded event to the machine.
    ///
    /// Returns `true` when the event was a paused request this machine
    /// acted on (block, capture, or continue); such events are invisible to
    /// the surrounding wait loop.
    pub(crate) async fn handle_event(
        &mut self,
        channel: &TabChannel,
        event: &TabEvent,
    ) -> Result<bool> {
        if event.method != "Fetch.requestPaused" || self.mode == InterceptionMode::Off {
            return Ok(false);
        }

        let params = &event.params;
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            warn!("Paused request without requestId, ignoring");
            return Ok(true);
        };

        let response_stage = params.get("responseStatusCode").is_some()
            || params.get("responseHeaders").is_some()
            || params.get("responseErrorReason").is_some();

        if response_stage {
            if self.capturing()
                && let Some(detected) = detect_download(params)
            {
                self.captured = Some(self.capture_body(channel, request_id, detected).await?);
            } else {
                channel
                    .send("Fetch.continueResponse", json!({"requestId": request_id}))
                    .await?;
            }
            return Ok(true);
        }

        let resource =
            ResourceType::from_cdp(params.get("resourceType").and_then(Value::as_str).unwrap_or(""));
        if self.blocked.contains(&resource) {
            debug!(request_id = %request_id, resource = ?resource, "Blocking request");
            channel
                .send(
                    "Fetch.failRequest",
                    json!({"requestId": request_id, "errorReason": "BlockedByClient"}),
                )
                .await?;
        } else {
            channel
                .send("Fetch.continueRequest", json!({"requestId": request_id}))
                .await?;
        }
        Ok(true)
    }

    /// Reads the paused response body, then fulfills the request with an
    /// empty 200 so nothing is persisted to disk.
    async fn capture_body(
        &self,
        channel: &TabChannel,
        request_id: &str,
        detected: DetectedDownload,
    ) -> Result<DownloadedFile> {
        let body = channel
            .send("Fetch.getResponseBody", json!({"requestId": request_id}))
            .await
            .map_err(|e| Error::download_failed(format!("body read failed: {e}")))?;

        let raw = body.get("body").and_then(Value::as_str).unwrap_or_default();
        let data = if body
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            Base64Standard
                .decode(raw)
                .map_err(|e| Error::download_failed(format!("undecodable body: {e}")))?
        } else {
            raw.as_bytes().to_vec()
        };

        channel
            .send(
                "Fetch.fulfillRequest",
                json!({"requestId": request_id, "responseCode": 200, "body": ""}),
            )
            .await
            .map_err(|e| Error::download_failed(format!("fulfill failed: {e}")))?;

        debug!(
            filename = %detected.filename,
            mime_type = %detected.mime_type,
            size = data.len(),
            "Download captured"
        );

        let size = data.len();
        Ok(DownloadedFile {
            data,
            filename: detected.filename,
            mime_type: detected.mime_type,
            size,
        })
    }
}

// ============================================================================
// Download Detection
// ============================================================================

struct DetectedDownload {
    filename: String,
    mime_type: String,
}

/// Decides whether a paused response is a download.
///
/// A response is a download when its `Content-Disposition` contains
/// `attachment` or a `filename=` parameter, or when its `Content-Type` is
/// one of the known binary/document types.
fn detect_download(params: &Value) -> Option<DetectedDownload> {
    let disposition = header_value(params, "content-disposition");
    let mime = header_value(params, "content-type")
        .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    let by_disposition = disposition.as_deref().is_some_and(|d| {
        let lower = d.to_ascii_lowercase();
        lower.contains("attachment") || lower.contains("filename=")
    });
    let by_type = mime
        .as_deref()
        .is_some_and(|m| DOWNLOAD_CONTENT_TYPES.contains(&m));

    if !by_disposition && !by_type {
        return None;
    }

    let filename = disposition
        .as_deref()
        .and_then(disposition_filename)
        .or_else(|| url_filename(params))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    let mime_type = mime.unwrap_or_else(|| mime_from_extension(&filename));

    Some(DetectedDownload {
        filename,
        mime_type,
    })
}

/// Looks up one response header by lowercase name.
fn header_value(params: &Value, name: &str) -> Option<String> {
    params
        .get("responseHeaders")
        .and_then(Value::as_array)?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Extracts the `filename=` parameter from a disposition value.
fn disposition_filename(disposition: &str) -> Option<String> {
    let lower = disposition.to_ascii_lowercase();
    let start = lower.find("filename=")? + "filename=".len();
    let rest = &disposition[start..];
    let value = rest.split(';').next().unwrap_or("").trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

/// Last path segment of the paused request's URL.
fn url_filename(params: &Value) -> Option<String> {
    let url = params
        .get("request")
        .and_then(|r| r.get("url"))
        .and_then(Value::as_str)?;
    let path = url.split(['?', '#']).next().unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or("");
    (!name.is_empty() && !name.contains(':')).then(|| name.to_string())
}

/// Infers a mime type from the filename extension.
fn mime_from_extension(filename: &str) -> String {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        "application/pdf".to_string()
    } else if lower.ends_with(".zip") {
        "application/zip".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

// ============================================================================
// Tab - Interception Surface
// ============================================================================

impl Tab {
    /// Blocks the given resource categories at the request stage.
    ///
    /// An empty set disables blocking. The interception channel is
    /// disabled and re-enabled with the new pattern set.
    ///
    /// # Errors
    ///
    /// Propagates `Fetch.disable`/`Fetch.enable` failures.
    pub async fn block_resources(&mut self, kinds: &[ResourceType]) -> Result<()> {
        self.fetch.set_blocked(kinds);
        self.fetch.re_arm(&self.channel).await
    }

    /// Returns the current interception state.
    #[inline]
    #[must_use]
    pub fn interception_mode(&self) -> InterceptionMode {
        self.fetch.mode()
    }

    /// Runs `action` and captures the download it triggers, using the tab's
    /// operation deadline.
    ///
    /// # Errors
    ///
    /// See [`Tab::expect_download_within`].
    pub async fn expect_download<F>(&mut self, action: F) -> Result<DownloadedFile>
    where
        F: for<'a> FnOnce(&'a mut Tab) -> BoxFuture<'a, Result<Value>>,
    {
        let timeout = self.options().operation_timeout;
        self.expect_download_within(action, timeout).await
    }

    /// Runs `action` and captures the download it triggers within the given
    /// deadline.
    ///
    /// Download capture is layered over any active resource blocking for
    /// the duration of the wait and reverted afterwards.
    ///
    /// # Errors
    ///
    /// - the action's error, immediately, when the action fails;
    /// - [`Error::DownloadTimeout`] when nothing is captured in time;
    /// - [`Error::DownloadFailed`] when the body cannot be read;
    /// - [`Error::TabClosed`] when the event feed closes while waiting.
    pub async fn expect_download_within<F>(
        &mut self,
        action: F,
        timeout: Duration,
    ) -> Result<DownloadedFile>
    where
        F: for<'a> FnOnce(&'a mut Tab) -> BoxFuture<'a, Result<Value>>,
    {
        self.begin_capture().await?;

        if let Err(e) = action(self).await {
            let _ = self.end_capture().await;
            return Err(e);
        }

        let outcome = self.wait_for_capture(timeout).await;
        match outcome {
            Ok(file) => {
                self.end_capture().await?;
                Ok(file)
            }
            Err(e) => {
                let _ = self.end_capture().await;
                Err(e)
            }
        }
    }

    /// Allows downloads in this tab's context and arms the response stage.
    async fn begin_capture(&mut self) -> Result<()> {
        self.channel
            .send(
                "Browser.setDownloadBehavior",
                json!({"behavior": "allow", "browserContextId": self.context().as_str()}),
            )
            .await?;

        self.fetch.begin_capture();
        self.fetch.re_arm(&self.channel).await
    }

    /// Reverts the machine to its prior steady state.
    async fn end_capture(&mut self) -> Result<()> {
        self.fetch.end_capture();
        self.fetch.re_arm(&self.channel).await
    }

    /// Consumes events until the interceptor captures a download.
    async fn wait_for_capture(&mut self, timeout: Duration) -> Result<DownloadedFile> {
        let deadline = Instant::now() + timeout;

        loop {
            let event = match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(Error::tab_closed("event feed closed")),
                Err(_) => return Err(Error::download_timeout(timeout)),
            };

            self.fetch.handle_event(&self.channel, &event).await?;
            if let Some(file) = self.fetch.take_captured() {
                return Ok(file);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::config::Config;
    use crate::manager::testsupport::{MockBrowser, default_respond, err, event, ok};

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    #[test]
    fn blocking_then_capture_composes() {
        let mut fetch = FetchInterceptor::new();

        fetch.set_blocked(&[ResourceType::Image]);
        assert_eq!(fetch.mode(), InterceptionMode::BlockingOnly);

        fetch.begin_capture();
        assert_eq!(fetch.mode(), InterceptionMode::Both);

        fetch.end_capture();
        assert_eq!(fetch.mode(), InterceptionMode::BlockingOnly);
    }

    #[test]
    fn capture_then_blocking_composes() {
        let mut fetch = FetchInterceptor::new();

        fetch.begin_capture();
        assert_eq!(fetch.mode(), InterceptionMode::DownloadOnly);

        fetch.set_blocked(&[ResourceType::Image]);
        assert_eq!(fetch.mode(), InterceptionMode::BlockingOnly);
    }

    #[test]
    fn capture_without_blocking_reverts_to_off() {
        let mut fetch = FetchInterceptor::new();
        fetch.begin_capture();
        fetch.end_capture();
        assert_eq!(fetch.mode(), InterceptionMode::Off);
    }

    #[test]
    fn empty_blocked_set_is_off() {
        let mut fetch = FetchInterceptor::new();
        fetch.set_blocked(&[ResourceType::Image]);
        fetch.set_blocked(&[]);
        assert_eq!(fetch.mode(), InterceptionMode::Off);
    }

    // ------------------------------------------------------------------
    // Download detection
    // ------------------------------------------------------------------

    fn paused(headers: Value, url: &str) -> Value {
        json!({
            "requestId": "req-1",
            "request": {"url": url},
            "resourceType": "Document",
            "responseStatusCode": 200,
            "responseHeaders": headers,
        })
    }

    #[test]
    fn detects_attachment_disposition() {
        let params = paused(
            json!([{"name": "Content-Disposition", "value": "attachment; filename=\"x.pdf\""}]),
            "https://example.com/dl",
        );
        let detected = detect_download(&params).expect("download");
        assert_eq!(detected.filename, "x.pdf");
        assert_eq!(detected.mime_type, "application/pdf");
    }

    #[test]
    fn detects_content_type_without_disposition() {
        let params = paused(
            json!([{"name": "Content-Type", "value": "application/pdf"}]),
            "https://example.com/report.pdf",
        );
        let detected = detect_download(&params).expect("download");
        assert_eq!(detected.mime_type, "application/pdf");
        assert_eq!(detected.filename, "report.pdf");
    }

    #[test]
    fn mime_prefix_strips_parameters() {
        let params = paused(
            json!([{"name": "content-type", "value": "application/zip; charset=binary"}]),
            "https://example.com/bundle",
        );
        let detected = detect_download(&params).expect("download");
        assert_eq!(detected.mime_type, "application/zip");
    }

    #[test]
    fn plain_html_is_not_a_download() {
        let params = paused(
            json!([{"name": "Content-Type", "value": "text/html; charset=utf-8"}]),
            "https://example.com/",
        );
        assert!(detect_download(&params).is_none());
    }

    #[test]
    fn filename_parameter_without_attachment_counts() {
        let params = paused(
            json!([{"name": "Content-Disposition", "value": "inline; filename=notes.zip"}]),
            "https://example.com/notes",
        );
        let detected = detect_download(&params).expect("download");
        assert_eq!(detected.filename, "notes.zip");
        assert_eq!(detected.mime_type, "application/zip");
    }

    // ------------------------------------------------------------------
    // End-to-end capture
    // ------------------------------------------------------------------

    fn config_for(mock: &MockBrowser) -> Config {
        Config::new(mock.address())
            .with_command_timeout("5s")
            .unwrap()
            .with_operation_timeout("5s")
            .unwrap()
    }

    #[tokio::test]
    async fn captures_download_and_reverts_to_blocking() {
        let body = Base64Standard.encode(b"%PDF-1.4 payload");

        let mock = MockBrowser::with_script(move |call| match call.method.as_str() {
            "Runtime.evaluate" => {
                let session = call.session_id.clone().unwrap_or_default();
                vec![
                    ok(call.id, json!({"result": {"value": true}})),
                    event(
                        "Fetch.requestPaused",
                        json!({
                            "requestId": "req-9",
                            "request": {"url": "https://example.com/r"},
                            "resourceType": "Document",
                            "responseStatusCode": 200,
                            "responseHeaders": [
                                {"name": "Content-Disposition", "value": "attachment; filename=\"r.pdf\""}
                            ],
                        }),
                        Some(&session),
                    ),
                ]
            }
            "Fetch.getResponseBody" => vec![ok(
                call.id,
                json!({"body": body.clone(), "base64Encoded": true}),
            )],
            _ => default_respond(&call),
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        tab.block_resources(&[ResourceType::Image]).await.expect("block");
        assert_eq!(tab.interception_mode(), InterceptionMode::BlockingOnly);

        let file = tab
            .expect_download(|tab| Box::pin(tab.evaluate("triggerDownload()")))
            .await
            .expect("captured download");

        assert_eq!(file.data, b"%PDF-1.4 payload");
        assert_eq!(file.filename, "r.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.size, file.data.len());
        assert_eq!(tab.interception_mode(), InterceptionMode::BlockingOnly);
    }

    #[tokio::test]
    async fn blocked_resource_is_failed_at_request_stage() {
        let mock = MockBrowser::with_script(|call| match call.method.as_str() {
            "Custom.trigger" => {
                let session = call.session_id.clone().unwrap_or_default();
                vec![
                    ok(call.id, json!({})),
                    event(
                        "Fetch.requestPaused",
                        json!({
                            "requestId": "req-2",
                            "request": {"url": "https://example.com/banner.png"},
                            "resourceType": "Image",
                        }),
                        Some(&session),
                    ),
                ]
            }
            "Fetch.failRequest" => {
                assert_eq!(call.params["errorReason"], json!("BlockedByClient"));
                let session = call.session_id.clone().unwrap_or_default();
                vec![
                    ok(call.id, json!({})),
                    event("Custom.done", json!({}), Some(&session)),
                ]
            }
            _ => default_respond(&call),
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        tab.block_resources(&[ResourceType::Image]).await.expect("block");
        tab.send_command("Custom.trigger", json!({})).await.expect("trigger");

        // The wait loop hands the paused request to the interceptor (which
        // fails it) and then sees the completion event.
        tab.wait_event("Custom.done", Duration::from_secs(5))
            .await
            .expect("blocked and continued");
    }

    #[tokio::test]
    async fn action_error_aborts_capture_immediately() {
        let mock = MockBrowser::with_script(|call| match call.method.as_str() {
            "Runtime.evaluate" => vec![err(
                call.id,
                -32000,
                "ReferenceError: triggerDownload is not defined",
            )],
            _ => default_respond(&call),
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let mut tab = browser.new_tab().await.expect("tab");

        let started = Instant::now();
        let err = tab
            .expect_download(|tab| Box::pin(tab.send_command("Runtime.evaluate", json!({"expression": "triggerDownload()"}))))
            .await
            .expect_err("action failure must abort");

        assert_eq!(err.kind(), "EVAL_ERROR");
        // The wait must not run out the capture deadline.
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(tab.interception_mode(), InterceptionMode::Off);
    }
}
