// SPDX-License-Identifier: MIT
//! One live designer session: the page, its request logs, and the DOM
//! plumbing every pipeline stage goes through.
//!
//! A [`DesignerSession`] is owned by exactly one batch run. Opening it
//! installs the request filter *before* the first navigation, walks the page
//! to its ready state (randomize control present, avatar rendered), and
//! applies the baseline styling. It is closed on every exit path; closing
//! twice is a no-op because the underlying engine guarantees idempotency.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capture::circle_clip_style;
use crate::config::GeneratorOptions;
use crate::policy::{self, SessionLog};
use crate::render::{RenderError, RenderSession};

/// The character designer this pipeline targets.
pub const DESIGNER_URL: &str = "https://www.funko.com/pop-yourself/designer";

pub const SELECTOR_AVATAR: &str = ".avatar";
pub const SELECTOR_AVATAR_BUTTON_UNDO: &str = ".avatar .button";
pub const SELECTOR_BUTTON_RANDOMIZE: &str = ".avatar-ctas .faux-link";
pub const SELECTOR_AVATAR_BODIES: &str = ".tabContent .paginateParts.body .partTile";
pub const SELECTOR_AVATAR_BODY_SKINS: &str =
    ".tabContent .paginateParts.body .partTile.selected .partBack div";
pub const SELECTOR_AVATAR_IMAGES: &str = ".avatar img";

/// Seasonal pet/decoration overlays, hidden before every extraction.
const DECORATIVE_ACCESSORIES: &[&str] = &["cat", "dog", "jackolantern", "pumpkin-pail"];

/// Source markers of the layers hidden in head-only mode.
const ONLY_HEAD_HIDDEN_MARKERS: &[&str] = &["_body_skin", "/outfit/", "/bottom/", "/top/"];

/// How long to wait for page controls to appear.
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-image settle-wait bound. Missing the window is not an error — the
/// image may already be cached and rendered.
const IMAGE_SETTLE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Selector for the 1-indexed body tile / skin swatch pair.
pub fn select_body_and_skin_selector(body_nth: i64, skin_nth: i64) -> String {
    format!(
        ".tabContent .paginateParts.body .partTile:nth-child({body_nth}) \
         .partBack div:nth-child({skin_nth})"
    )
}

// ─── Settle outcomes ──────────────────────────────────────────────────────────

/// How one avatar image reached (or failed to reach) the settled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// A request for this URL had already completed before we looked.
    AlreadyObserved,
    /// The network response arrived within the settle window.
    Settled,
    /// Nothing arrived in time; the iteration proceeds with whatever is
    /// currently rendered.
    TimedOut,
}

/// Settle result for a single image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettle {
    pub url: String,
    pub outcome: SettleOutcome,
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// One open designer page plus its request logs.
pub struct DesignerSession {
    render: Arc<dyn RenderSession>,
    log: Arc<SessionLog>,
}

impl DesignerSession {
    /// Open the designer and bring it to its ready state.
    ///
    /// Sequence: install the request filter, navigate, wait for the
    /// randomize control, roll the first random avatar, style the avatar
    /// container to the scaled capture size (plus the circular mask when
    /// requested), and hide the undo control and any embedded iframes.
    pub async fn open(
        render: Arc<dyn RenderSession>,
        options: &GeneratorOptions,
    ) -> Result<Self> {
        let log = SessionLog::new();
        policy::install(render.as_ref(), Arc::clone(&log))
            .await
            .context("installing request filter")?;

        render
            .navigate(DESIGNER_URL)
            .await
            .context("navigating to the designer")?;
        render
            .wait_for_selector(SELECTOR_BUTTON_RANDOMIZE, SELECTOR_TIMEOUT)
            .await
            .context("waiting for the randomize control")?;

        let session = Self { render, log };
        session
            .randomize()
            .await
            .context("rolling the initial avatar")?;

        let side = options.size_scaled();
        let side_px = format!("{side}px");
        session
            .set_elements_style(SELECTOR_AVATAR, &[("width", &side_px), ("height", &side_px)])
            .await
            .context("sizing the avatar container")?;
        if let Some(mask) = circle_clip_style(options) {
            session
                .set_elements_style(SELECTOR_AVATAR, &[("clip-path", &mask)])
                .await
                .context("applying circular mask")?;
        }
        session
            .hide_elements(SELECTOR_AVATAR_BUTTON_UNDO)
            .await
            .context("hiding the undo control")?;
        session
            .hide_elements("iframe")
            .await
            .context("hiding embedded iframes")?;

        info!(url = DESIGNER_URL, "designer session ready");
        Ok(session)
    }

    pub fn render(&self) -> &dyn RenderSession {
        self.render.as_ref()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Roll a new random avatar and wait for the container to be back.
    pub async fn randomize(&self) -> Result<()> {
        self.render
            .click(SELECTOR_BUTTON_RANDOMIZE)
            .await
            .context("clicking randomize")?;
        self.render
            .wait_for_selector(SELECTOR_AVATAR, SELECTOR_TIMEOUT)
            .await
            .context("waiting for the avatar container")?;
        Ok(())
    }

    // ─── DOM helpers ─────────────────────────────────────────────────────────

    /// Apply inline style declarations to every element matching `selector`.
    pub async fn set_elements_style(
        &self,
        selector: &str,
        declarations: &[(&str, &str)],
    ) -> Result<(), RenderError> {
        let body: String = declarations
            .iter()
            .map(|(key, value)| format!("el.style.setProperty('{key}', '{value}');"))
            .collect();
        let expression = format!(
            "(() => {{ \
               const els = document.querySelectorAll('{selector}'); \
               for (const el of els) {{ {body} }} \
               return els.length; \
             }})()"
        );
        self.render.evaluate(&expression).await?;
        Ok(())
    }

    /// Hide every element matching `selector` via `display: none`.
    pub async fn hide_elements(&self, selector: &str) -> Result<(), RenderError> {
        self.set_elements_style(selector, &[("display", "none")]).await
    }

    // ─── Settle-wait ─────────────────────────────────────────────────────────

    /// Wait for the avatar's current image sources to finish loading.
    ///
    /// Images are independent network resources and are awaited
    /// concurrently. A URL already in the observed-image log is not waited
    /// for; a per-image timeout is logged and tolerated. Only engine-level
    /// failures abort.
    pub async fn settle_avatar_images(&self) -> Result<Vec<ImageSettle>> {
        let sources = self
            .render
            .query_all_attr(SELECTOR_AVATAR_IMAGES, "src")
            .await
            .context("reading avatar image sources")?;

        let outcomes: Vec<Result<ImageSettle, RenderError>> =
            join_all(sources.iter().map(|src| self.settle_one(src))).await;

        let mut settles = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            settles.push(outcome.context("settle-wait failed")?);
        }
        Ok(settles)
    }

    async fn settle_one(&self, url: &str) -> Result<ImageSettle, RenderError> {
        if self.log.has_observed_image(url) {
            return Ok(ImageSettle {
                url: url.to_string(),
                outcome: SettleOutcome::AlreadyObserved,
            });
        }
        match self
            .render
            .wait_for_response_matching(url, IMAGE_SETTLE_TIMEOUT)
            .await
        {
            Ok(()) => Ok(ImageSettle {
                url: url.to_string(),
                outcome: SettleOutcome::Settled,
            }),
            Err(e) if e.is_timeout() => {
                warn!(url = %url, "avatar image did not settle in time, proceeding");
                Ok(ImageSettle {
                    url: url.to_string(),
                    outcome: SettleOutcome::TimedOut,
                })
            }
            Err(e) => Err(e),
        }
    }

    // ─── Masking ─────────────────────────────────────────────────────────────

    /// Hide decorative overlays, and body/outfit layers in head-only mode.
    pub async fn mask_layers(&self, options: &GeneratorOptions) -> Result<()> {
        let decorative = DECORATIVE_ACCESSORIES
            .iter()
            .map(|name| format!(r#".avatar img[alt^="{name}"]"#))
            .collect::<Vec<_>>()
            .join(", ");
        self.hide_elements(&decorative)
            .await
            .context("hiding decorative overlays")?;

        if options.remove_accessories {
            self.hide_elements(
                r#".avatar img[src*="/accessories/"], .avatar img[src*="/accessory/"]"#,
            )
            .await
            .context("hiding accessory layers")?;
        }

        if options.only_head {
            let body_layers = ONLY_HEAD_HIDDEN_MARKERS
                .iter()
                .map(|marker| format!(r#".avatar img[src*="{marker}"]"#))
                .collect::<Vec<_>>()
                .join(", ");
            self.hide_elements(&body_layers)
                .await
                .context("hiding body layers")?;
        }

        Ok(())
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    /// Close the underlying engine. Never fails; safe to call at any state.
    pub async fn close(&self) {
        debug!(
            accepted = self.log.accepted_count(),
            blocked = self.log.blocked_count(),
            observed_images = self.log.observed_image_count(),
            "closing designer session"
        );
        if let Err(e) = self.render.close().await {
            warn!(error = %e, "session close reported an error");
        }
    }
}
