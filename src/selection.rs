// SPDX-License-Identifier: MIT
//! Body/skin selection against the previous avatar.
//!
//! Forcing a body or skin is a UI click, and a redundant click on an
//! already-selected tile re-triggers asset loads and destabilizes the
//! settle-wait. The controller therefore decides first — as a pure function
//! returning a tagged plan — and only then touches the page.

use std::time::Duration;
use tracing::debug;

use crate::config::GeneratorOptions;
use crate::render::{RenderError, RenderSession};
use crate::session::select_body_and_skin_selector;

/// Decision for one iteration. Indices are zero-based (model space).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPlan {
    /// Neither index is forced; keep whatever randomize produced.
    NoPreference,
    /// Targets equal the previous avatar's known selection — no UI action.
    Reused { body: i64, skin: i64 },
    /// Click the tile/swatch for this body and skin.
    Reselect { body: i64, skin: i64 },
}

/// Decide whether this iteration needs a selection click.
///
/// Targets resolve from the options, falling back to the previous avatar's
/// indices. Reuse requires both previous indices to be *known* (not -1): an
/// unknown selection can never be proven unchanged, so it forces a
/// reselection, and an unknown resolved target falls back to the first tile.
pub fn plan_selection(
    options: &GeneratorOptions,
    previous_body: i64,
    previous_skin: i64,
) -> SelectionPlan {
    if options.body_index.is_none() && options.skin_index.is_none() {
        return SelectionPlan::NoPreference;
    }

    let mut body = options.body_index.unwrap_or(previous_body);
    let mut skin = options.skin_index.unwrap_or(previous_skin);

    let previous_known = previous_body >= 0 && previous_skin >= 0;
    if previous_known && body == previous_body && skin == previous_skin {
        return SelectionPlan::Reused { body, skin };
    }

    if body < 0 {
        body = 0;
    }
    if skin < 0 {
        skin = 0;
    }

    SelectionPlan::Reselect { body, skin }
}

/// Carry out a plan. Only `Reselect` touches the page: one click on the
/// 1-indexed tile/swatch pair, then a minimal yield so the UI dispatches the
/// click before the caller moves on to the settle-wait.
pub async fn apply_selection(
    render: &dyn RenderSession,
    plan: &SelectionPlan,
) -> Result<(), RenderError> {
    match plan {
        SelectionPlan::NoPreference => Ok(()),
        SelectionPlan::Reused { body, skin } => {
            debug!(body, skin, "selection unchanged, skipping click");
            Ok(())
        }
        SelectionPlan::Reselect { body, skin } => {
            let selector = select_body_and_skin_selector(body + 1, skin + 1);
            debug!(body, skin, "selecting body tile and skin swatch");
            render.click(&selector).await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(body: Option<i64>, skin: Option<i64>) -> GeneratorOptions {
        GeneratorOptions {
            body_index: body,
            skin_index: skin,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_options_means_no_preference() {
        assert_eq!(plan_selection(&options(None, None), 4, 2), SelectionPlan::NoPreference);
    }

    #[test]
    fn test_unchanged_selection_is_reused() {
        let plan = plan_selection(&options(Some(4), Some(2)), 4, 2);
        assert_eq!(plan, SelectionPlan::Reused { body: 4, skin: 2 });
    }

    #[test]
    fn test_partial_option_resolves_from_previous() {
        // Only the body is forced; skin carries over from the previous
        // avatar, so the pair still matches and is reused.
        let plan = plan_selection(&options(Some(4), None), 4, 9);
        assert_eq!(plan, SelectionPlan::Reused { body: 4, skin: 9 });
    }

    #[test]
    fn test_changed_selection_reselects() {
        let plan = plan_selection(&options(Some(5), Some(2)), 4, 2);
        assert_eq!(plan, SelectionPlan::Reselect { body: 5, skin: 2 });
    }

    #[test]
    fn test_unknown_previous_forces_reselection() {
        // Previous skin index was never found (-1): even a matching body
        // target cannot be proven unchanged.
        let plan = plan_selection(&options(Some(4), None), 4, -1);
        assert_eq!(plan, SelectionPlan::Reselect { body: 4, skin: 0 });
    }

    #[test]
    fn test_unknown_resolved_target_falls_back_to_first_tile() {
        let plan = plan_selection(&options(None, Some(3)), -1, -1);
        assert_eq!(plan, SelectionPlan::Reselect { body: 0, skin: 3 });
    }
}
