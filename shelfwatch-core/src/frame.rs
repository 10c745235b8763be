//! Reference frame model
//!
//! Detection boxes are always expressed in a fixed coordinate space,
//! whatever size the feed is rendered at. Overlays are positioned in
//! percentages of that space so they stay aligned when the image is
//! resized.

use crate::error::{Error, Result};
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

pub const REFERENCE_WIDTH: f64 = 1920.0;
pub const REFERENCE_HEIGHT: f64 = 1080.0;

/// Coordinate space of detection boxes. Always has a positive, finite area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceFrame {
    width: f64,
    height: f64,
}

impl ReferenceFrame {
    /// The 1920x1080 frame the detection service reports in
    pub const HD: ReferenceFrame = ReferenceFrame {
        width: REFERENCE_WIDTH,
        height: REFERENCE_HEIGHT,
    };

    pub fn new(width: f64, height: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(Error::InvalidFrame { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

impl Default for ReferenceFrame {
    fn default() -> Self {
        Self::HD
    }
}

impl<'de> Deserialize<'de> for ReferenceFrame {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            width: f64,
            height: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        ReferenceFrame::new(raw.width, raw.height).map_err(serde::de::Error::custom)
    }
}

/// Box position and size as percentages of the reference frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayRect {
    pub left_pct: f64,
    pub top_pct: f64,
    pub width_pct: f64,
    pub height_pct: f64,
}

/// Map a box from reference-frame units to overlay percentages.
///
/// Values are not clamped: a box reaching past the frame edge yields
/// percentages outside 0..=100 and is clipped by the renderer.
pub fn to_overlay_percent(bbox: &BoundingBox, frame: &ReferenceFrame) -> OverlayRect {
    OverlayRect {
        left_pct: 100.0 * bbox.x / frame.width,
        top_pct: 100.0 * bbox.y / frame.height,
        width_pct: 100.0 * bbox.width / frame.width,
        height_pct: 100.0 * bbox.height / frame.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_center_box() {
        let rect = to_overlay_percent(
            &BoundingBox::new(960.0, 540.0, 192.0, 108.0),
            &ReferenceFrame::HD,
        );
        assert_eq!(
            rect,
            OverlayRect {
                left_pct: 50.0,
                top_pct: 50.0,
                width_pct: 10.0,
                height_pct: 10.0,
            }
        );
    }

    #[test]
    fn test_box_past_edge_is_not_clamped() {
        let rect = to_overlay_percent(
            &BoundingBox::new(1900.0, -54.0, 192.0, 108.0),
            &ReferenceFrame::HD,
        );
        assert!(rect.left_pct + rect.width_pct > 100.0);
        assert_eq!(rect.top_pct, -5.0);
    }

    #[test]
    fn test_zero_area_frame_rejected() {
        assert!(ReferenceFrame::new(0.0, 1080.0).is_err());
        assert!(ReferenceFrame::new(1920.0, 0.0).is_err());
        assert!(ReferenceFrame::new(-1920.0, 1080.0).is_err());
        assert!(ReferenceFrame::new(f64::NAN, 1080.0).is_err());
        assert!(ReferenceFrame::new(640.0, 480.0).is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let frame: ReferenceFrame = serde_json::from_str(r#"{"width": 1280, "height": 720}"#).unwrap();
        assert_eq!(frame.width(), 1280.0);
        assert!(serde_json::from_str::<ReferenceFrame>(r#"{"width": 0, "height": 720}"#).is_err());
    }

    proptest! {
        #[test]
        fn full_frame_box_is_full_overlay(w in 1.0f64..8000.0, h in 1.0f64..8000.0) {
            let frame = ReferenceFrame::new(w, h).unwrap();
            let rect = to_overlay_percent(&BoundingBox::new(0.0, 0.0, w, h), &frame);
            prop_assert!((rect.width_pct - 100.0).abs() < 1e-9);
            prop_assert!((rect.height_pct - 100.0).abs() < 1e-9);
            prop_assert_eq!(rect.left_pct, 0.0);
            prop_assert_eq!(rect.top_pct, 0.0);
        }

        #[test]
        fn overlay_is_linear_in_box(x in -500.0f64..2500.0, y in -500.0f64..1500.0, k in 0.1f64..10.0) {
            let frame = ReferenceFrame::HD;
            let base = to_overlay_percent(&BoundingBox::new(x, y, 10.0, 10.0), &frame);
            let scaled = to_overlay_percent(&BoundingBox::new(x * k, y * k, 10.0 * k, 10.0 * k), &frame);
            prop_assert!((scaled.left_pct - base.left_pct * k).abs() < 1e-6);
            prop_assert!((scaled.top_pct - base.top_pct * k).abs() < 1e-6);
            prop_assert!((scaled.width_pct - base.width_pct * k).abs() < 1e-6);
        }
    }
}
