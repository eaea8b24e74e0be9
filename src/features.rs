// SPDX-License-Identifier: MIT
//! Parsing the rendered avatar DOM into a structured feature map.
//!
//! Every visible avatar layer is an `<img>` whose source URL encodes what it
//! is: `pyimg/<sex>/<part>/<feature>.png` for body parts,
//! `pyimg/accessories/<feature>.png` (or the singular spelling) for
//! accessories. The extractor classifies each layer with a small explicit
//! grammar, folds the results into a key-sorted map, and derives a
//! content-addressed identity from the map's canonical JSON. Extraction
//! never fails: unmatched layers are skipped and a missing "selected" flag
//! yields `-1`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::render::{RenderError, RenderSession};
use crate::session::{SELECTOR_AVATAR_BODIES, SELECTOR_AVATAR_BODY_SKINS, SELECTOR_AVATAR_IMAGES};

// ─── URL grammar ──────────────────────────────────────────────────────────────

static BODY_PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pyimg/(\w+)/(\w+)/(.*?)\.png").expect("regex: body part url")
});
static ACCESSORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pyimg/(?:accessories|accessory)/(.*?)\.png").expect("regex: accessory url")
});
static HIDDEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"display:\s*none").expect("regex: hidden style"));
static SELECTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"class="[^"]*\bselected\b[^"]*""#).expect("regex: selected class")
});

/// Classification of one avatar image source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    BodyPart {
        sex: String,
        part: String,
        feature: String,
    },
    Accessory {
        feature: String,
    },
    /// Decorative chrome with no semantic payload.
    Unrecognized,
}

/// Classify an image source URL (or any string containing one).
///
/// The body-part pattern is tried first; it requires three path segments, so
/// plain accessory URLs fall through to the accessory pattern.
pub fn parse_image_source(src: &str) -> ImageSource {
    if let Some(caps) = BODY_PART_RE.captures(src) {
        return ImageSource::BodyPart {
            sex: caps[1].to_string(),
            part: caps[2].to_string(),
            feature: caps[3].to_string(),
        };
    }
    if let Some(caps) = ACCESSORY_RE.captures(src) {
        return ImageSource::Accessory {
            feature: caps[1].to_string(),
        };
    }
    ImageSource::Unrecognized
}

// ─── Feature map ──────────────────────────────────────────────────────────────

/// The worn parts and accessories of one rendered avatar.
///
/// Keys are sorted (`BTreeMap`), so serializing the map yields a canonical
/// string no matter the order the layers were encountered in. Lists keep DOM
/// draw order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Features {
    pub accessories: Vec<String>,
    #[serde(flatten)]
    pub parts: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Features {
    fn push_part(&mut self, sex: String, part: String, feature: String) {
        self.parts
            .entry(sex)
            .or_default()
            .entry(part)
            .or_default()
            .push(feature);
    }
}

/// Build the feature map from the outer HTML of every avatar image element,
/// in document order. Layers styled `display: none` are not worn and are
/// skipped.
pub fn parse_features(rendered_images: &[String]) -> Features {
    let mut features = Features::default();

    for html in rendered_images {
        if HIDDEN_RE.is_match(html) {
            continue;
        }
        match parse_image_source(html) {
            ImageSource::BodyPart { sex, part, feature } => {
                features.push_part(sex, part, feature);
            }
            ImageSource::Accessory { feature } => features.accessories.push(feature),
            ImageSource::Unrecognized => {}
        }
    }

    features
}

/// Content-addressed identity: SHA-256 over the canonical JSON of the map.
pub fn identity_hash(features: &Features) -> String {
    let canonical =
        serde_json::to_string(features).expect("feature map serialization cannot fail");
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

// ─── Selected-tile scan ───────────────────────────────────────────────────────

/// Zero-based index of the element flagged `selected`, or -1 if none is.
///
/// `-1` means "unknown" — callers must not compare it against a real index.
pub fn selected_index(elements_html: &[String]) -> i64 {
    elements_html
        .iter()
        .position(|html| SELECTED_RE.is_match(html))
        .map_or(-1, |i| i as i64)
}

// ─── DOM extraction ───────────────────────────────────────────────────────────

/// Everything the extractor reads off the live page for one avatar.
#[derive(Debug, Clone)]
pub struct AvatarState {
    pub features: Features,
    pub body_index: i64,
    pub skin_index: i64,
}

/// Read the current avatar's features and body/skin selection from the page.
pub async fn extract_avatar_state(
    render: &dyn RenderSession,
) -> Result<AvatarState, RenderError> {
    let images = render.query_all_html(SELECTOR_AVATAR_IMAGES).await?;
    let bodies = render.query_all_html(SELECTOR_AVATAR_BODIES).await?;
    let skins = render.query_all_html(SELECTOR_AVATAR_BODY_SKINS).await?;

    Ok(AvatarState {
        features: parse_features(&images),
        body_index: selected_index(&bodies),
        skin_index: selected_index(&skins),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(src: &str) -> String {
        format!(r#"<img src="https://cdn.funko.com/{src}" alt="layer">"#)
    }

    #[test]
    fn test_parse_body_part() {
        let parsed = parse_image_source("https://cdn.funko.com/pyimg/female/top/flannel-red.png");
        assert_eq!(
            parsed,
            ImageSource::BodyPart {
                sex: "female".into(),
                part: "top".into(),
                feature: "flannel-red".into(),
            }
        );
    }

    #[test]
    fn test_parse_accessory_both_spellings() {
        for src in ["pyimg/accessories/cat.png", "pyimg/accessory/cat.png"] {
            assert_eq!(
                parse_image_source(src),
                ImageSource::Accessory {
                    feature: "cat".into()
                },
                "should parse {src}"
            );
        }
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(
            parse_image_source("https://www.funko.com/static/img/chrome.png"),
            ImageSource::Unrecognized
        );
    }

    #[test]
    fn test_hidden_layers_are_not_worn() {
        let images = vec![
            img("pyimg/male/hair/buzz.png"),
            r#"<img src="https://cdn.funko.com/pyimg/male/top/hoodie.png" style="display: none">"#
                .to_string(),
        ];
        let features = parse_features(&images);
        assert_eq!(features.parts["male"]["hair"], vec!["buzz"]);
        assert!(
            !features.parts["male"].contains_key("top"),
            "hidden layer must not appear in the map"
        );
    }

    #[test]
    fn test_identity_ignores_insertion_order() {
        let mut a = Features::default();
        a.push_part("female".into(), "top".into(), "flannel".into());
        a.push_part("female".into(), "hair".into(), "bob".into());
        a.accessories.push("glasses".into());

        let mut b = Features::default();
        b.accessories.push("glasses".into());
        b.push_part("female".into(), "hair".into(), "bob".into());
        b.push_part("female".into(), "top".into(), "flannel".into());

        assert_eq!(identity_hash(&a), identity_hash(&b));
    }

    #[test]
    fn test_identity_changes_with_any_feature() {
        let mut a = Features::default();
        a.push_part("male".into(), "hair".into(), "buzz".into());

        let mut b = Features::default();
        b.push_part("male".into(), "hair".into(), "mohawk".into());

        assert_ne!(identity_hash(&a), identity_hash(&b));
    }

    #[test]
    fn test_selected_index_found() {
        let tiles = vec![
            r#"<div class="partTile">"#.to_string(),
            r#"<div class="partTile selected">"#.to_string(),
            r#"<div class="partTile">"#.to_string(),
        ];
        assert_eq!(selected_index(&tiles), 1);
    }

    #[test]
    fn test_selected_index_absent_is_unknown() {
        let tiles = vec![r#"<div class="partTile">"#.to_string()];
        assert_eq!(selected_index(&tiles), -1);
        assert_eq!(selected_index(&[]), -1);
    }

    #[test]
    fn test_selected_requires_word_boundary() {
        let tiles = vec![r#"<div class="partTile preselected">"#.to_string()];
        assert_eq!(selected_index(&tiles), -1, "substring match is not selection");
    }
}
