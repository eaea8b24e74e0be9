// SPDX-License-Identifier: MIT
//! Run options and their normalization.
//!
//! [`GeneratorOptions`] is the caller-facing configuration for one batch run.
//! Values arrive from the CLI, from a TOML file, or from library callers;
//! [`GeneratorOptions::normalized`] is applied once at the start of a run and
//! everything downstream can assume in-range values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Final captured square side length, in pixels.
pub const DEFAULT_SIZE: u32 = 400;
/// Highest body tile index in the designer's catalog (zero-based).
pub const MAX_BODY_INDEX: i64 = 7;
/// Highest skin swatch index in the designer's catalog (zero-based).
pub const MAX_SKIN_INDEX: i64 = 11;
/// Body indices below this are classified female, the rest male.
pub const BODY_MALE_THRESHOLD: i64 = 3;
/// Head-focus renders the avatar at `size / HEAD_ZOOM` so the cropped head
/// region still yields `size` output pixels.
pub const HEAD_ZOOM: f64 = 0.5;

/// Page viewport. Wide enough for the designer's side panel plus the avatar.
pub const VIEWPORT_WIDTH: u32 = 2000;
pub const VIEWPORT_HEIGHT: u32 = 700;

/// Configuration for one avatar generation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneratorOptions {
    /// Number of avatars to produce. Minimum 1.
    pub count: u32,

    /// Hide every accessory overlay before extraction and capture.
    pub remove_accessories: bool,

    /// Hide body, outfit, top and bottom layers — head only.
    pub only_head: bool,

    /// Final captured square side length in pixels.
    pub size: u32,

    /// Capture a sub-region centered on the head instead of the full figure.
    pub focus_head: bool,

    /// Apply a circular clip mask over the capture.
    pub circle: bool,

    /// Force a specific body archetype (0..=7). Out-of-range acts as unset.
    pub body_index: Option<i64>,

    /// Force a specific skin tone (0..=11). Out-of-range acts as unset.
    pub skin_index: Option<i64>,

    /// When set, images are written as `avatar_<index>.png` under this
    /// directory; otherwise they are returned inline as data URIs.
    pub output_dir: Option<PathBuf>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            count: 1,
            remove_accessories: false,
            only_head: false,
            size: DEFAULT_SIZE,
            focus_head: false,
            circle: false,
            body_index: None,
            skin_index: None,
            output_dir: None,
        }
    }
}

impl GeneratorOptions {
    /// Clamp everything into the ranges the pipeline assumes.
    ///
    /// Out-of-catalog indices become unset rather than an error: a forced
    /// selection the page cannot satisfy is treated as no preference.
    pub fn normalized(mut self) -> Self {
        self.count = self.count.max(1);
        if self.size == 0 {
            self.size = DEFAULT_SIZE;
        }
        self.body_index = self.body_index.filter(|i| (0..=MAX_BODY_INDEX).contains(i));
        self.skin_index = self.skin_index.filter(|i| (0..=MAX_SKIN_INDEX).contains(i));
        self
    }

    /// Side length the avatar element is styled to before capture.
    ///
    /// Head-focus doubles the rendered size so the head crop keeps full
    /// resolution; otherwise the element is rendered at `size` directly.
    pub fn size_scaled(&self) -> f64 {
        if self.focus_head {
            f64::from(self.size) / HEAD_ZOOM
        } else {
            f64::from(self.size)
        }
    }

    /// Browser viewport for this run. Grows vertically when the scaled
    /// avatar would not fit the default height.
    pub fn viewport(&self) -> (u32, u32) {
        let height = (self.size_scaled().ceil() as u32).max(VIEWPORT_HEIGHT);
        (VIEWPORT_WIDTH, height)
    }

    /// Load options from a TOML file.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options: Self = toml::from_str(&raw)?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = GeneratorOptions::default().normalized();
        assert_eq!(opts.count, 1);
        assert_eq!(opts.size, DEFAULT_SIZE);
        assert_eq!(opts.body_index, None);
        assert_eq!(opts.skin_index, None);
    }

    #[test]
    fn test_out_of_range_indices_become_unset() {
        let opts = GeneratorOptions {
            body_index: Some(8),
            skin_index: Some(-1),
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.body_index, None, "bodyIndex 8 is past the catalog");
        assert_eq!(opts.skin_index, None, "negative skinIndex is unset");
    }

    #[test]
    fn test_in_range_indices_survive() {
        let opts = GeneratorOptions {
            body_index: Some(0),
            skin_index: Some(11),
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.body_index, Some(0));
        assert_eq!(opts.skin_index, Some(11));
    }

    #[test]
    fn test_count_minimum_one() {
        let opts = GeneratorOptions {
            count: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.count, 1);
    }

    #[test]
    fn test_size_scaled_doubles_under_focus_head() {
        let plain = GeneratorOptions::default();
        assert_eq!(plain.size_scaled(), 400.0);

        let focused = GeneratorOptions {
            focus_head: true,
            ..Default::default()
        };
        assert_eq!(focused.size_scaled(), 800.0);
    }

    #[test]
    fn test_viewport_grows_for_scaled_avatar() {
        let focused = GeneratorOptions {
            focus_head: true,
            size: 600,
            ..Default::default()
        };
        let (w, h) = focused.viewport();
        assert_eq!(w, VIEWPORT_WIDTH);
        assert_eq!(h, 1200, "viewport must fit the 2x-scaled avatar");
    }
}
