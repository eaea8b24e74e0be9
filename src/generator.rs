// SPDX-License-Identifier: MIT
//! The batch orchestrator: one session, `count` avatars.
//!
//! Per iteration: selection (reused or reselected), settle-wait on the
//! rendered image set, layer masking, DOM extraction, screenshot capture.
//! An avatar is appended only once fully assembled, so a failed run still
//! returns every avatar that completed, and the session is closed on every
//! exit path.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::avatar::{Avatar, CaptureSnapshot, Sex};
use crate::capture::capture_avatar;
use crate::config::GeneratorOptions;
use crate::features::{extract_avatar_state, identity_hash};
use crate::render::{RenderSession, cdp::CdpSession};
use crate::selection::{apply_selection, plan_selection};
use crate::session::{DesignerSession, SettleOutcome};

/// Terminal state of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    /// Every requested avatar was produced.
    Completed,
    /// A session-level failure aborted the run; `avatars` holds whatever
    /// completed before it.
    Failed { error: String },
}

/// Result of one `generate` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub avatars: Vec<Avatar>,
    /// The page's default randomized avatar, extracted once at session start
    /// to seed the first selection decision. Diagnostic only — never part of
    /// `avatars`, and it carries no image.
    pub original: Option<Avatar>,
    pub outcome: RunOutcome,
}

impl GenerationReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed { .. })
    }

    fn failed(error: String) -> Self {
        Self {
            avatars: Vec::new(),
            original: None,
            outcome: RunOutcome::Failed { error },
        }
    }
}

/// Generate avatars with the built-in Chromium engine.
///
/// The single entry point for ordinary callers: launches a browser, runs the
/// batch, tears everything down. Fatal session failures come back as a
/// failed report, never a panic or an `Err`.
pub async fn generate(options: GeneratorOptions) -> GenerationReport {
    let options = options.normalized();
    let render = match CdpSession::launch(options.viewport()).await {
        Ok(render) => render,
        Err(e) => {
            error!(error = %e, "browser launch failed");
            return GenerationReport::failed(e.to_string());
        }
    };
    generate_with(render, options).await
}

/// Generate avatars against a caller-supplied rendering engine.
///
/// Owns the engine for the duration of the run and closes it on the way out,
/// success or failure.
pub async fn generate_with(
    render: Arc<dyn RenderSession>,
    options: GeneratorOptions,
) -> GenerationReport {
    let options = options.normalized();

    let session = match DesignerSession::open(Arc::clone(&render), &options).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %format!("{e:#}"), "session open failed");
            // The engine may be half-started; closing is idempotent.
            let _ = render.close().await;
            return GenerationReport::failed(format!("{e:#}"));
        }
    };

    let report = generate_in_session(&session, &options).await;
    session.close().await;
    report
}

/// Run one batch inside an already-open session, leaving it open.
///
/// For advanced callers holding a session across batches via
/// [`start_session`] / [`stop_session`].
pub async fn generate_in_session(
    session: &DesignerSession,
    options: &GeneratorOptions,
) -> GenerationReport {
    let options = options.clone().normalized();
    let mut original = None;
    let mut avatars = Vec::with_capacity(options.count as usize);

    let outcome = match run_batch(session, &options, &mut original, &mut avatars).await {
        Ok(()) => RunOutcome::Completed,
        Err(e) => {
            error!(error = %format!("{e:#}"), completed = avatars.len(), "batch aborted");
            RunOutcome::Failed {
                error: format!("{e:#}"),
            }
        }
    };

    GenerationReport {
        avatars,
        original,
        outcome,
    }
}

/// Open a designer session for external batch management.
pub async fn start_session(options: &GeneratorOptions) -> Result<DesignerSession> {
    let options = options.clone().normalized();
    let render = CdpSession::launch(options.viewport())
        .await
        .context("launching browser")?;
    DesignerSession::open(render, &options).await
}

/// Close a session opened with [`start_session`]. Idempotent.
pub async fn stop_session(session: &DesignerSession) {
    session.close().await;
}

// ─── Batch loop ───────────────────────────────────────────────────────────────

async fn run_batch(
    session: &DesignerSession,
    options: &GeneratorOptions,
    original: &mut Option<Avatar>,
    avatars: &mut Vec<Avatar>,
) -> Result<()> {
    let seed = assemble_avatar_record(session, options)
        .await
        .context("extracting the original avatar")?;
    let (mut prev_body, mut prev_skin) = (seed.body_index, seed.skin_index);
    *original = Some(seed);

    for index in 0..options.count {
        let plan = plan_selection(options, prev_body, prev_skin);
        apply_selection(session.render(), &plan)
            .await
            .context("applying body selection")?;

        let settles = session.settle_avatar_images().await?;
        let timed_out = settles
            .iter()
            .filter(|s| s.outcome == SettleOutcome::TimedOut)
            .count();
        debug!(
            index,
            images = settles.len(),
            timed_out,
            "avatar images settled"
        );

        session
            .mask_layers(options)
            .await
            .context("masking layers")?;

        let mut avatar = assemble_avatar_record(session, options)
            .await
            .context("extracting avatar state")?;
        let image = capture_avatar(session.render(), options, index)
            .await
            .context("capturing avatar")?;
        avatar.image = Some(image);

        info!(
            index,
            id = %avatar.id,
            sex = %avatar.sex,
            body = avatar.body_index,
            skin = avatar.skin_index,
            "avatar generated"
        );
        prev_body = avatar.body_index;
        prev_skin = avatar.skin_index;
        avatars.push(avatar);

        if index + 1 < options.count {
            session
                .randomize()
                .await
                .context("rolling the next avatar")?;
        }
    }

    Ok(())
}

/// Extract the current page state into an avatar record without an image.
async fn assemble_avatar_record(
    session: &DesignerSession,
    options: &GeneratorOptions,
) -> Result<Avatar> {
    let state = extract_avatar_state(session.render()).await?;
    Ok(Avatar {
        id: identity_hash(&state.features),
        image: None,
        sex: Sex::from_body_index(state.body_index),
        body_index: state.body_index,
        skin_index: state.skin_index,
        features: state.features,
        options: CaptureSnapshot::from_options(options),
        captured_at: Utc::now().to_rfc3339(),
    })
}
