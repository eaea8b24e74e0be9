// SPDX-License-Identifier: MIT
//! Chromium DevTools adapter — the one real [`RenderSession`].
//!
//! Strategy:
//!   1. `detect_browser()` searches PATH for a supported browser binary.
//!   2. `launch()` spawns it headless with a throwaway profile directory and
//!      an ephemeral DevTools port, then reads the "DevTools listening on"
//!      line from stderr to find the endpoint.
//!   3. The page target is discovered over the DevTools HTTP endpoint and
//!      its WebSocket is driven directly: commands are matched to responses
//!      by id, events fan out to the request-policy and completion hooks.
//!
//! Request interception uses the Fetch domain (pause, decide, continue or
//! fail); completed-request tracking uses the Network domain. Everything
//! DOM-shaped goes through `Runtime.evaluate`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::avatar::ImageRef;
use crate::capture::inline_data_uri;
use crate::render::{
    ClipRect, CompletionListener, RenderError, RenderSession, RequestDecision, RequestPolicy,
    ScreenshotSink,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Browser binaries to probe, in preference order.
const CANDIDATE_BROWSERS: &[&str] = &["chromium", "chrome", "google-chrome", "chromium-browser"];

/// How long the browser gets to print its DevTools endpoint.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);
/// Bound on any single DevTools command round-trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on a navigation reaching the load event.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Selector-wait polling interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Detect the first headless-capable browser binary on PATH.
pub fn detect_browser() -> Option<String> {
    for candidate in CANDIDATE_BROWSERS {
        if on_path(candidate) {
            debug!(browser = *candidate, "headless browser detected on PATH");
            return Some((*candidate).to_string());
        }
    }
    None
}

fn on_path(binary: &str) -> bool {
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in path_var.split(':') {
            if Path::new(dir).join(binary).is_file() {
                return true;
            }
        }
    }
    false
}

struct Inner {
    sink: tokio::sync::Mutex<WsSink>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    policy: Mutex<Option<RequestPolicy>>,
    completion_listeners: Mutex<Vec<CompletionListener>>,
    /// requestId -> URL, filled by requestWillBeSent, drained on completion.
    in_flight: Mutex<HashMap<String, String>>,
    completed_tx: broadcast::Sender<String>,
    loaded_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

/// A headless Chromium tab driven over the DevTools protocol.
pub struct CdpSession {
    inner: Arc<Inner>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Keeps the throwaway profile alive for the session's lifetime.
    _profile_dir: TempDir,
}

impl CdpSession {
    /// Launch a browser and attach to its initial page target.
    pub async fn launch(viewport: (u32, u32)) -> Result<Arc<Self>, RenderError> {
        let browser = detect_browser().ok_or_else(|| {
            RenderError::Launch(format!(
                "no headless browser found on PATH (tried: {})",
                CANDIDATE_BROWSERS.join(", ")
            ))
        })?;

        let profile_dir = TempDir::new().map_err(|e| RenderError::Launch(e.to_string()))?;
        let (width, height) = viewport;

        let mut child = Command::new(&browser)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--remote-debugging-port=0")
            .arg(format!("--window-size={width},{height}"))
            .arg(format!(
                "--user-data-dir={}",
                profile_dir.path().to_string_lossy()
            ))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::Launch(format!("failed to start {browser}: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RenderError::Launch("browser stderr not captured".into()))?;
        let endpoint = tokio::time::timeout(STARTUP_TIMEOUT, read_devtools_endpoint(stderr))
            .await
            .map_err(|_| RenderError::Timeout {
                what: "DevTools endpoint announcement".into(),
            })??;
        debug!(browser = %browser, endpoint = %endpoint, "browser started");

        let page_ws = discover_page_target(&endpoint).await?;
        let (ws, _) = connect_async(&page_ws)
            .await
            .map_err(|e| RenderError::Transport(format!("DevTools connect failed: {e}")))?;
        let (sink, stream) = ws.split();

        let (completed_tx, _) = broadcast::channel(256);
        let (loaded_tx, _) = broadcast::channel(16);
        let inner = Arc::new(Inner {
            sink: tokio::sync::Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            policy: Mutex::new(None),
            completion_listeners: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            completed_tx,
            loaded_tx,
            closed: AtomicBool::new(false),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&inner), stream));

        let session = Arc::new(Self {
            inner,
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
            _profile_dir: profile_dir,
        });

        session.inner.command("Page.enable", json!({})).await?;
        session.inner.command("Network.enable", json!({})).await?;
        session.inner.command("Runtime.enable", json!({})).await?;
        // Transparent page background so captures keep their alpha channel.
        session
            .inner
            .command(
                "Emulation.setDefaultBackgroundColorOverride",
                json!({ "color": { "r": 0, "g": 0, "b": 0, "a": 0 } }),
            )
            .await?;

        Ok(session)
    }
}

impl Inner {
    async fn send_raw(&self, payload: String) -> Result<(), RenderError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))
    }

    /// One DevTools command round-trip.
    async fn command(&self, method: &str, params: Value) -> Result<Value, RenderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RenderError::Transport("session is closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending map poisoned").insert(id, tx);

        let payload = json!({ "id": id, "method": method, "params": params }).to_string();
        trace!(method, id, "devtools command");
        self.send_raw(payload).await?;

        let response = tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| RenderError::Timeout {
                what: format!("response to {method}"),
            })?
            .map_err(|_| RenderError::Transport("connection closed mid-command".into()))?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown devtools error");
            return Err(RenderError::Protocol(format!("{method}: {message}")));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    fn notify_completed(&self, url: &str) {
        for listener in self
            .completion_listeners
            .lock()
            .expect("listeners poisoned")
            .iter()
        {
            listener(url);
        }
        let _ = self.completed_tx.send(url.to_string());
    }
}

/// Scan browser stderr for the DevTools announcement line.
async fn read_devtools_endpoint(
    stderr: tokio::process::ChildStderr,
) -> Result<String, RenderError> {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(rest) = line.strip_prefix("DevTools listening on ") {
            let endpoint = rest.trim().to_string();
            // Keep draining so the browser never blocks on a full pipe.
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            return Ok(endpoint);
        }
    }
    Err(RenderError::Launch(
        "browser exited before announcing its DevTools endpoint".into(),
    ))
}

/// Resolve the initial page target's WebSocket URL over the HTTP endpoint.
async fn discover_page_target(browser_ws: &str) -> Result<String, RenderError> {
    // ws://127.0.0.1:<port>/devtools/browser/<id> -> http://127.0.0.1:<port>/json/list
    let host = browser_ws
        .strip_prefix("ws://")
        .and_then(|rest| rest.split('/').next())
        .ok_or_else(|| {
            RenderError::Protocol(format!("unexpected DevTools endpoint: {browser_ws}"))
        })?;

    let targets: Vec<Value> = reqwest::get(format!("http://{host}/json/list"))
        .await
        .map_err(|e| RenderError::Transport(format!("target discovery failed: {e}")))?
        .json()
        .await
        .map_err(|e| RenderError::Protocol(format!("malformed target list: {e}")))?;

    targets
        .iter()
        .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .and_then(|t| t.get("webSocketDebuggerUrl").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| RenderError::Protocol("no page target exposed by the browser".into()))
}

/// Route responses to their callers and fan events out to the hooks.
async fn read_loop(inner: Arc<Inner>, mut stream: WsStream) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => continue,
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(tx) = inner.pending.lock().expect("pending map poisoned").remove(&id) {
                let _ = tx.send(value);
            }
            continue;
        }

        match value.get("method").and_then(Value::as_str) {
            Some("Fetch.requestPaused") => handle_request_paused(&inner, &value),
            Some("Network.requestWillBeSent") => {
                let params = &value["params"];
                if let (Some(request_id), Some(url)) = (
                    params.get("requestId").and_then(Value::as_str),
                    params["request"].get("url").and_then(Value::as_str),
                ) {
                    inner
                        .in_flight
                        .lock()
                        .expect("in-flight map poisoned")
                        .insert(request_id.to_string(), url.to_string());
                }
            }
            Some("Network.loadingFinished") => {
                let request_id = value["params"].get("requestId").and_then(Value::as_str);
                if let Some(request_id) = request_id {
                    let url = inner
                        .in_flight
                        .lock()
                        .expect("in-flight map poisoned")
                        .remove(request_id);
                    if let Some(url) = url {
                        inner.notify_completed(&url);
                    }
                }
            }
            Some("Page.loadEventFired") => {
                let _ = inner.loaded_tx.send(());
            }
            _ => {}
        }
    }
    debug!("devtools stream ended");
    // Fail anything still waiting for a response.
    inner.pending.lock().expect("pending map poisoned").clear();
}

fn handle_request_paused(inner: &Arc<Inner>, event: &Value) {
    let params = &event["params"];
    let (request_id, url) = match (
        params.get("requestId").and_then(Value::as_str),
        params["request"].get("url").and_then(Value::as_str),
    ) {
        (Some(id), Some(url)) => (id.to_string(), url.to_string()),
        _ => return,
    };

    let decision = match inner.policy.lock().expect("policy poisoned").as_ref() {
        Some(policy) => policy(&url),
        None => RequestDecision::Accept,
    };

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let result = match decision {
            RequestDecision::Accept => {
                inner
                    .command("Fetch.continueRequest", json!({ "requestId": request_id }))
                    .await
            }
            RequestDecision::Abort => {
                inner
                    .command(
                        "Fetch.failRequest",
                        json!({ "requestId": request_id, "errorReason": "BlockedByClient" }),
                    )
                    .await
            }
        };
        if let Err(e) = result {
            warn!(url = %url, error = %e, "request interception response failed");
        }
    });
}

#[async_trait]
impl RenderSession for CdpSession {
    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        let mut loaded = self.inner.loaded_tx.subscribe();
        self.inner
            .command("Page.navigate", json!({ "url": url }))
            .await?;
        tokio::time::timeout(NAVIGATION_TIMEOUT, loaded.recv())
            .await
            .map_err(|_| RenderError::Timeout {
                what: format!("load of {url}"),
            })?
            .map_err(|_| RenderError::Transport("connection closed during navigation".into()))?;
        Ok(())
    }

    async fn intercept_requests(&self, policy: RequestPolicy) -> Result<(), RenderError> {
        *self.inner.policy.lock().expect("policy poisoned") = Some(policy);
        self.inner
            .command(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] }),
            )
            .await?;
        Ok(())
    }

    async fn on_request_completed(&self, listener: CompletionListener) -> Result<(), RenderError> {
        self.inner
            .completion_listeners
            .lock()
            .expect("listeners poisoned")
            .push(listener);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        let probe = format!("!!document.querySelector('{selector}')");
        let poll = async {
            loop {
                if let Ok(value) = self.evaluate(&probe).await {
                    if value == Value::Bool(true) {
                        return;
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| RenderError::Timeout {
                what: format!("selector {selector}"),
            })
    }

    async fn click(&self, selector: &str) -> Result<(), RenderError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector('{selector}'); \
             if (!el) return false; el.click(); return true; }})()"
        );
        match self.evaluate(&expression).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(RenderError::Protocol(format!(
                "click target not found: {selector}"
            ))),
        }
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, RenderError> {
        let result = self
            .inner
            .command(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("evaluation failed");
            return Err(RenderError::Protocol(format!("evaluate: {text}")));
        }
        Ok(result["result"].get("value").cloned().unwrap_or(Value::Null))
    }

    async fn query_all_html(&self, selector: &str) -> Result<Vec<String>, RenderError> {
        let expression = format!(
            "Array.from(document.querySelectorAll('{selector}')).map(el => el.outerHTML)"
        );
        string_array(self.evaluate(&expression).await?)
    }

    async fn query_all_attr(
        &self,
        selector: &str,
        attr: &str,
    ) -> Result<Vec<String>, RenderError> {
        let expression = format!(
            "Array.from(document.querySelectorAll('{selector}'))\
             .map(el => el.getAttribute('{attr}') || '')"
        );
        string_array(self.evaluate(&expression).await?)
    }

    async fn wait_for_response_matching(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        let mut completed = self.inner.completed_tx.subscribe();
        let wait = async {
            loop {
                match completed.recv().await {
                    Ok(finished) if finished == url => return Ok(()),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RenderError::Transport(
                            "connection closed during settle-wait".into(),
                        ))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RenderError::Timeout {
                what: format!("response for {url}"),
            })?
    }

    async fn screenshot(
        &self,
        clip: ClipRect,
        sink: &ScreenshotSink,
    ) -> Result<ImageRef, RenderError> {
        let result = self
            .inner
            .command(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "clip": {
                        "x": clip.x,
                        "y": clip.y,
                        "width": clip.width,
                        "height": clip.height,
                        "scale": 1,
                    },
                    "captureBeyondViewport": true,
                }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| RenderError::Protocol("screenshot carried no data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| RenderError::Protocol(format!("malformed screenshot payload: {e}")))?;

        match sink {
            ScreenshotSink::File(path) => {
                tokio::fs::write(path, &bytes).await?;
                Ok(ImageRef::File(path.clone()))
            }
            ScreenshotSink::Inline => Ok(ImageRef::Inline(inline_data_uri(&bytes))),
        }
    }

    async fn close(&self) -> Result<(), RenderError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort polite shutdown; the kill below is the guarantee.
        let close_cmd = json!({ "id": u64::MAX, "method": "Browser.close", "params": {} });
        let _ = self.inner.send_raw(close_cmd.to_string()).await;

        let reader = self.reader.lock().expect("reader handle poisoned").take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let child = self.child.lock().expect("child handle poisoned").take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
        debug!("browser session closed");
        Ok(())
    }
}

fn string_array(value: Value) -> Result<Vec<String>, RenderError> {
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(|item| item.as_str().unwrap_or_default().to_string())
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(RenderError::Protocol(format!(
            "expected a string array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_array_conversion() {
        let value = json!(["<img>", "<div>"]);
        assert_eq!(string_array(value).unwrap(), vec!["<img>", "<div>"]);
        assert!(string_array(Value::Null).unwrap().is_empty());
        assert!(string_array(json!(42)).is_err());
    }

    #[test]
    fn test_detect_browser_returns_none_without_path() {
        // Whatever the machine has installed, an empty PATH finds nothing.
        let saved = std::env::var("PATH").ok();
        std::env::set_var("PATH", "");
        assert_eq!(detect_browser(), None);
        if let Some(saved) = saved {
            std::env::set_var("PATH", saved);
        }
    }
}
