// SPDX-License-Identifier: MIT
//! Screenshot geometry: which pixels to grab, and where they go.
//!
//! The baseline capture is the avatar container's bounding box. Head-focus
//! crops a fixed sub-region of the 2x-scaled render; the circle option is a
//! CSS clip applied to the element before capture, not pixel
//! post-processing. All offsets are rounded to one decimal place so
//! sub-pixel layout jitter cannot move the clip between iterations.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use crate::avatar::ImageRef;
use crate::config::GeneratorOptions;
use crate::render::{ClipRect, RenderError, RenderSession, ScreenshotSink};
use crate::session::SELECTOR_AVATAR;

/// Horizontal offset of the head region, as a fraction of the scaled size.
pub const HEAD_OFFSET_X_RATIO: f64 = 0.25;
/// Vertical offset of the head region, as a fraction of the scaled size.
pub const HEAD_OFFSET_Y_RATIO: f64 = 0.11;

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Bounding box of a rendered element, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ElementRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Read an element's bounding box, offset by the scroll position of an
/// optional containing viewport.
pub async fn element_rect(
    render: &dyn RenderSession,
    selector: &str,
    container_selector: Option<&str>,
) -> Result<ElementRect, RenderError> {
    let scroll_probe = match container_selector {
        Some(container) => format!(
            "(document.querySelector('{container}') || {{scrollTop: 0}}).scrollTop"
        ),
        None => "0".to_string(),
    };
    let expression = format!(
        "(() => {{ \
           const el = document.querySelector('{selector}'); \
           if (!el) return null; \
           const r = el.getBoundingClientRect(); \
           return {{left: r.x, top: r.y + {scroll_probe}, width: r.width, height: r.height}}; \
         }})()"
    );

    let value = render.evaluate(&expression).await?;
    if value == Value::Null {
        return Err(RenderError::Protocol(format!(
            "element not found: {selector}"
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| RenderError::Protocol(format!("malformed bounding box: {e}")))
}

/// Compute the capture rectangle for the current options.
///
/// Baseline: the container box itself. Head-focus: a `size x size` window
/// translated by the fixed head-region ratios of the scaled render.
pub fn compute_clip(rect: &ElementRect, options: &GeneratorOptions) -> ClipRect {
    if options.focus_head {
        let scaled = options.size_scaled();
        ClipRect {
            x: round1(rect.left + scaled * HEAD_OFFSET_X_RATIO),
            y: round1(rect.top + scaled * HEAD_OFFSET_Y_RATIO),
            width: f64::from(options.size),
            height: f64::from(options.size),
        }
    } else {
        ClipRect {
            x: round1(rect.left),
            y: round1(rect.top),
            width: round1(rect.width),
            height: round1(rect.height),
        }
    }
}

/// CSS `clip-path` for the circular mask, or `None` when disabled.
///
/// Under head-focus the circle sits over the head window; otherwise it is
/// centered on the element itself.
pub fn circle_clip_style(options: &GeneratorOptions) -> Option<String> {
    if !options.circle {
        return None;
    }
    let radius = f64::from(options.size) / 2.0;
    if options.focus_head {
        let scaled = options.size_scaled();
        let cx = round1(scaled * HEAD_OFFSET_X_RATIO + radius);
        let cy = round1(scaled * HEAD_OFFSET_Y_RATIO + radius);
        Some(format!("circle({radius}px at {cx}px {cy}px)"))
    } else {
        Some(format!("circle({radius}px at 50% 50%)"))
    }
}

/// Pick the output sink for avatar number `index`.
pub fn screenshot_sink(options: &GeneratorOptions, index: u32) -> ScreenshotSink {
    match &options.output_dir {
        Some(dir) => ScreenshotSink::File(dir.join(format!("avatar_{index}.png"))),
        None => ScreenshotSink::Inline,
    }
}

/// Encode PNG bytes as an inline data URI.
pub fn inline_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}

/// Capture the avatar container with the geometry the options call for.
pub async fn capture_avatar(
    render: &dyn RenderSession,
    options: &GeneratorOptions,
    index: u32,
) -> Result<ImageRef, RenderError> {
    let rect = element_rect(render, SELECTOR_AVATAR, None).await?;
    let clip = compute_clip(&rect, options);
    let sink = screenshot_sink(options, index);
    render.screenshot(clip, &sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rect(left: f64, top: f64, size: f64) -> ElementRect {
        ElementRect {
            left,
            top,
            width: size,
            height: size,
        }
    }

    #[test]
    fn test_baseline_clip_is_the_container_box() {
        let options = GeneratorOptions::default();
        let clip = compute_clip(&rect(120.0, 40.0, 400.0), &options);
        assert_eq!(clip.x, 120.0);
        assert_eq!(clip.y, 40.0);
        assert_eq!(clip.width, 400.0);
        assert_eq!(clip.height, 400.0);
    }

    #[test]
    fn test_focus_head_clip_offsets() {
        let options = GeneratorOptions {
            focus_head: true,
            ..Default::default()
        };
        // size 400 -> sizeScaled 800 -> offsets (200.0, 88.0)
        let clip = compute_clip(&rect(0.0, 0.0, 800.0), &options);
        assert_eq!(clip.x, 200.0);
        assert_eq!(clip.y, 88.0);
        assert_eq!(clip.width, 400.0);
        assert_eq!(clip.height, 400.0);
    }

    #[test]
    fn test_offsets_rounded_to_one_decimal() {
        let options = GeneratorOptions::default();
        let clip = compute_clip(&rect(10.06, 19.99, 400.44), &options);
        assert_eq!(clip.x, 10.1);
        assert_eq!(clip.y, 20.0);
        assert_eq!(clip.width, 400.4);
    }

    #[test]
    fn test_circle_style_disabled() {
        assert_eq!(circle_clip_style(&GeneratorOptions::default()), None);
    }

    #[test]
    fn test_circle_style_centered_on_element() {
        let options = GeneratorOptions {
            circle: true,
            ..Default::default()
        };
        assert_eq!(
            circle_clip_style(&options).as_deref(),
            Some("circle(200px at 50% 50%)")
        );
    }

    #[test]
    fn test_circle_style_over_head_window() {
        let options = GeneratorOptions {
            circle: true,
            focus_head: true,
            ..Default::default()
        };
        assert_eq!(
            circle_clip_style(&options).as_deref(),
            Some("circle(200px at 400px 288px)")
        );
    }

    #[test]
    fn test_sink_follows_output_dir() {
        let inline = screenshot_sink(&GeneratorOptions::default(), 0);
        assert!(matches!(inline, ScreenshotSink::Inline));

        let options = GeneratorOptions {
            output_dir: Some(PathBuf::from("/tmp/out")),
            ..Default::default()
        };
        match screenshot_sink(&options, 3) {
            ScreenshotSink::File(path) => {
                assert_eq!(path, PathBuf::from("/tmp/out/avatar_3.png"));
            }
            ScreenshotSink::Inline => panic!("outputDir set must produce a file sink"),
        }
    }

    #[test]
    fn test_inline_data_uri_prefix() {
        let uri = inline_data_uri(b"\x89PNG");
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
