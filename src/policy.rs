// SPDX-License-Identifier: MIT
//! Request filtering for the designer page.
//!
//! The page pulls in analytics, ads, fonts and other third-party traffic the
//! pipeline has no use for; everything outside a fixed allow-list is aborted
//! before it leaves the browser. Each decision is appended to the run's
//! [`SessionLog`] for diagnostics, and completed avatar-image requests are
//! recorded separately — that log is the settle-wait's synchronization
//! signal.

use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::render::{RenderError, RenderSession, RequestDecision};

/// URL marker of the individually rendered avatar layer tiles.
pub const AVATAR_IMAGE_MARKER: &str = "pyimg";

/// Substrings that identify requests the page actually needs.
const ACCEPTED_URL_PARTS: &[&str] = &[
    "pop-yourself/designer",
    "static/css",
    "static/js",
    "api",
    AVATAR_IMAGE_MARKER,
    "data:image/png",
];

/// Accept iff the URL carries any allow-listed marker.
pub fn decide(url: &str) -> RequestDecision {
    if ACCEPTED_URL_PARTS.iter().any(|part| url.contains(part)) {
        RequestDecision::Accept
    } else {
        RequestDecision::Abort
    }
}

/// Append-only request logs owned by one session.
///
/// Interception callbacks run on the engine's event loop, so the vectors sit
/// behind plain sync mutexes; every operation is a short push or scan.
#[derive(Debug, Default)]
pub struct SessionLog {
    accepted: Mutex<Vec<String>>,
    blocked: Mutex<Vec<String>>,
    observed_images: Mutex<Vec<String>>,
}

impl SessionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_accepted(&self, url: &str) {
        self.accepted.lock().expect("accepted log poisoned").push(url.to_string());
    }

    pub fn record_blocked(&self, url: &str) {
        self.blocked.lock().expect("blocked log poisoned").push(url.to_string());
    }

    /// Record a completed avatar-image request. Non-image completions are
    /// ignored here; the accepted log already has them.
    pub fn record_completed(&self, url: &str) {
        if url.contains(AVATAR_IMAGE_MARKER) {
            self.observed_images
                .lock()
                .expect("observed log poisoned")
                .push(url.to_string());
        }
    }

    /// Has a request for exactly this URL already completed?
    pub fn has_observed_image(&self, url: &str) -> bool {
        self.observed_images
            .lock()
            .expect("observed log poisoned")
            .iter()
            .any(|seen| seen == url)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().expect("accepted log poisoned").len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.lock().expect("blocked log poisoned").len()
    }

    pub fn observed_image_count(&self) -> usize {
        self.observed_images.lock().expect("observed log poisoned").len()
    }
}

/// Install the filter and the completion observer on a session.
///
/// Must run before the first navigation — the initial document request is
/// itself subject to the policy.
pub async fn install(
    render: &dyn RenderSession,
    log: Arc<SessionLog>,
) -> Result<(), RenderError> {
    let policy_log = Arc::clone(&log);
    render
        .intercept_requests(Arc::new(move |url: &str| {
            let decision = decide(url);
            match decision {
                RequestDecision::Accept => {
                    trace!(url = %url, "request accepted");
                    policy_log.record_accepted(url);
                }
                RequestDecision::Abort => {
                    debug!(url = %url, "request blocked");
                    policy_log.record_blocked(url);
                }
            }
            decision
        }))
        .await?;

    render
        .on_request_completed(Arc::new(move |url: &str| {
            log.record_completed(url);
        }))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designer_assets_accepted() {
        for url in [
            "https://www.funko.com/pop-yourself/designer",
            "https://www.funko.com/static/css/app.css",
            "https://www.funko.com/static/js/bundle.js",
            "https://www.funko.com/api/catalog",
            "https://cdn.funko.com/pyimg/female/top/shirt.png",
            "data:image/png;base64,iVBORw0KGgo=",
        ] {
            assert_eq!(decide(url), RequestDecision::Accept, "should accept {url}");
        }
    }

    #[test]
    fn test_third_party_traffic_aborted() {
        for url in [
            "https://www.google-analytics.com/collect",
            "https://fonts.gstatic.com/s/roboto.woff2",
            "https://ads.example.com/pixel.gif",
        ] {
            assert_eq!(decide(url), RequestDecision::Abort, "should abort {url}");
        }
    }

    #[test]
    fn test_log_appends_decisions() {
        let log = SessionLog::new();
        log.record_accepted("https://www.funko.com/api/catalog");
        log.record_blocked("https://ads.example.com/pixel.gif");
        assert_eq!(log.accepted_count(), 1);
        assert_eq!(log.blocked_count(), 1);
    }

    #[test]
    fn test_only_avatar_images_observed() {
        let log = SessionLog::new();
        log.record_completed("https://cdn.funko.com/pyimg/male/hair/buzz.png");
        log.record_completed("https://www.funko.com/static/js/bundle.js");
        assert_eq!(log.observed_image_count(), 1);
        assert!(log.has_observed_image("https://cdn.funko.com/pyimg/male/hair/buzz.png"));
        assert!(!log.has_observed_image("https://www.funko.com/static/js/bundle.js"));
    }
}
