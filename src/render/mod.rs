// SPDX-License-Identifier: MIT
//! The abstract browser-tab capability the pipeline drives.
//!
//! Everything the core needs from a rendering engine is behind
//! [`RenderSession`]: navigation, request interception, DOM reads and
//! mutations, bounded waits, and clipped screenshots. The one real
//! implementation is the Chromium DevTools adapter in [`cdp`]; tests drive
//! the pipeline with a scripted in-memory session instead.

pub mod cdp;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::avatar::ImageRef;

/// Verdict for one intercepted network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Let the request through.
    Accept,
    /// Abort it before it leaves the browser.
    Abort,
}

/// Decides the fate of every request the page issues.
pub type RequestPolicy = Arc<dyn Fn(&str) -> RequestDecision + Send + Sync>;

/// Invoked with the URL of every request that completed successfully.
pub type CompletionListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Pixel rectangle to capture, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Where a screenshot should go.
#[derive(Debug, Clone)]
pub enum ScreenshotSink {
    /// Write raw PNG bytes to this path and return it.
    File(PathBuf),
    /// Return the PNG inline as a base64 data URI.
    Inline,
}

/// Errors surfaced by a rendering engine.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("browser could not be launched: {0}")]
    Launch(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out waiting for {what}")]
    Timeout { what: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }
}

/// One controllable browser tab.
///
/// Implementations must make [`close`](RenderSession::close) idempotent —
/// the orchestrator calls it on every exit path, including after failures
/// that may already have torn the session down.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Load a URL and wait for the navigation to commit.
    async fn navigate(&self, url: &str) -> Result<(), RenderError>;

    /// Install the request filter. Must be called before the first
    /// navigation so the initial document request is already policed.
    async fn intercept_requests(&self, policy: RequestPolicy) -> Result<(), RenderError>;

    /// Register a listener for successfully completed requests.
    async fn on_request_completed(&self, listener: CompletionListener) -> Result<(), RenderError>;

    /// Wait until `selector` matches at least one element.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), RenderError>;

    /// Dispatch a click on the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), RenderError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, RenderError>;

    /// Outer HTML of every element matching `selector`, in document order.
    async fn query_all_html(&self, selector: &str) -> Result<Vec<String>, RenderError>;

    /// One attribute of every element matching `selector`, in document
    /// order. Elements without the attribute yield an empty string.
    async fn query_all_attr(&self, selector: &str, attr: &str)
        -> Result<Vec<String>, RenderError>;

    /// Wait until a request for exactly `url` completes.
    ///
    /// Fails with [`RenderError::Timeout`] if nothing matching completes in
    /// time; callers treat that as a soft signal, not a fatal error.
    async fn wait_for_response_matching(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(), RenderError>;

    /// Capture the clipped region as PNG and route it to `sink`.
    async fn screenshot(
        &self,
        clip: ClipRect,
        sink: &ScreenshotSink,
    ) -> Result<ImageRef, RenderError>;

    /// Tear the tab (and any owned browser process) down. Idempotent.
    async fn close(&self) -> Result<(), RenderError>;
}
