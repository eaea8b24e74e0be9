// SPDX-License-Identifier: MIT
//! The avatar record produced by each generation step.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::{GeneratorOptions, BODY_MALE_THRESHOLD};
use crate::features::Features;

/// Classification derived from the selected body tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    /// The catalog puts female bodies first; everything from
    /// [`BODY_MALE_THRESHOLD`] up is male.
    pub fn from_body_index(body_index: i64) -> Self {
        if body_index < BODY_MALE_THRESHOLD {
            Sex::Female
        } else {
            Sex::Male
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sex::Female => write!(f, "female"),
            Sex::Male => write!(f, "male"),
        }
    }
}

/// Where a captured image ended up. A produced avatar carries exactly one of
/// the two — inline data when no output directory was given, a file path
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// `data:image/png;base64,<...>`
    Inline(String),
    /// Path of the written `avatar_<index>.png`.
    File(PathBuf),
}

impl ImageRef {
    pub fn is_inline(&self) -> bool {
        matches!(self, ImageRef::Inline(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ImageRef::File(_))
    }
}

/// Snapshot of the capture-relevant options in effect for one avatar.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub size: u32,
    pub focus_head: bool,
    pub circle: bool,
    pub remove_accessories: bool,
    pub only_head: bool,
}

impl CaptureSnapshot {
    pub fn from_options(options: &GeneratorOptions) -> Self {
        Self {
            size: options.size,
            focus_head: options.focus_head,
            circle: options.circle,
            remove_accessories: options.remove_accessories,
            only_head: options.only_head,
        }
    }
}

/// One generated avatar. Immutable once assembled; the orchestrator only
/// appends fully-built records to the run output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    /// Content hash of the canonical feature map. Two draws that render the
    /// identical set of visible parts and accessories share an id.
    pub id: String,
    /// Absent only on the seed avatar extracted at session start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    pub sex: Sex,
    /// Zero-based selected body tile, or -1 when no tile was flagged.
    pub body_index: i64,
    /// Zero-based selected skin swatch, or -1 when no swatch was flagged.
    pub skin_index: i64,
    pub features: Features,
    pub options: CaptureSnapshot,
    /// RFC 3339 timestamp of when the record was assembled.
    pub captured_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sex_classification_boundary() {
        assert_eq!(Sex::from_body_index(0), Sex::Female);
        assert_eq!(Sex::from_body_index(2), Sex::Female);
        assert_eq!(Sex::from_body_index(3), Sex::Male, "boundary tile is male");
        assert_eq!(Sex::from_body_index(7), Sex::Male);
    }

    #[test]
    fn test_image_ref_exclusivity() {
        let inline = ImageRef::Inline("data:image/png;base64,AAAA".into());
        assert!(inline.is_inline() && !inline.is_file());

        let file = ImageRef::File(PathBuf::from("/tmp/avatar_0.png"));
        assert!(file.is_file() && !file.is_inline());
    }
}
