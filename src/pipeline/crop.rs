//! Geometric cropping: normalised bounding boxes → figure sub-images.
//!
//! The extraction service reports figure regions on a 0–1000 normalised
//! scale regardless of source resolution, so the same box works for any DPI
//! the page happened to be rendered at. Cropping scales each coordinate back
//! to absolute pixels against the page's own dimensions and cuts with
//! [`DynamicImage::crop_imm`]. No rotation or perspective correction is
//! performed.
//!
//! Degenerate boxes (zero width or height after scaling) are clamped to a
//! minimum 1-pixel dimension rather than failing: a sliver crop a human can
//! delete during review beats an aborted batch.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Upper bound of the normalised coordinate scale.
pub const BBOX_SCALE: u32 = 1000;

/// A figure region on a page, normalised to a 0–1000 scale on both axes.
///
/// Stored in `[ymin, xmin, ymax, xmax]` order on the wire (the order vision
/// models conventionally emit for `box_2d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
}

impl BoundingBox {
    pub fn new(ymin: u32, xmin: u32, ymax: u32, xmax: u32) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    /// Clamp every coordinate to the 0–1000 scale and order min ≤ max on
    /// both axes. Model output occasionally arrives inverted or slightly
    /// out of range; normalising here keeps the crop itself branch-free.
    pub fn normalised(&self) -> BoundingBox {
        let ymin = self.ymin.min(BBOX_SCALE);
        let ymax = self.ymax.min(BBOX_SCALE);
        let xmin = self.xmin.min(BBOX_SCALE);
        let xmax = self.xmax.min(BBOX_SCALE);
        BoundingBox {
            ymin: ymin.min(ymax),
            ymax: ymin.max(ymax),
            xmin: xmin.min(xmax),
            xmax: xmin.max(xmax),
        }
    }
}

/// Cut the region described by `bbox` out of `page`.
///
/// Each normalised coordinate is scaled by the corresponding page dimension;
/// a resulting zero-size axis is widened to 1 px, pulled back inside the
/// page if the box sat on the far edge.
pub fn crop_region(page: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let bbox = bbox.normalised();
    let (w, h) = (page.width() as u64, page.height() as u64);
    let scale = BBOX_SCALE as u64;

    let x0 = bbox.xmin as u64 * w / scale;
    let x1 = bbox.xmax as u64 * w / scale;
    let y0 = bbox.ymin as u64 * h / scale;
    let y1 = bbox.ymax as u64 * h / scale;

    let (x0, width) = clamp_axis(x0, x1, w);
    let (y0, height) = clamp_axis(y0, y1, h);

    page.crop_imm(x0 as u32, y0 as u32, width as u32, height as u32)
}

/// Ensure a scaled axis spans at least 1 px and stays inside the page.
fn clamp_axis(lo: u64, hi: u64, dim: u64) -> (u64, u64) {
    debug_assert!(dim >= 1);
    let span = (hi - lo).max(1);
    if lo + span > dim {
        (dim - span.min(dim), span.min(dim))
    } else {
        (lo, span)
    }
}
