//! Overlay rendering: detector-space boxes onto display coordinates.
//!
//! The detector reports boxes in the native resolution of the captured frame;
//! the video is shown at a layout-controlled display size. The renderer maps
//! between the two with per-axis scale factors and repaints a transparent
//! surface stacked over the video on every frame: clear-and-redraw, no
//! incremental diffing. Simplicity over efficiency is acceptable at
//! interactive frame rates.
//!
//! Filtering in `Single` mode uses the same case-insensitive target match as
//! the aggregator, so the drawn boxes and the stats table always agree.

use image::{Rgba, RgbaImage};
use log::debug;

use crate::wire::DetectionBox;
use crate::{matches_target, Mode};

/// Box outline color (cyan) and the tag background at ~80% alpha.
const BOX_COLOR: Rgba<u8> = Rgba([0, 242, 254, 255]);
const TAG_COLOR: Rgba<u8> = Rgba([0, 242, 254, 204]);

/// A rectangle in display coordinates. Coordinates may be negative when a
/// detection box starts off-screen; surfaces clamp at paint time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Per-axis scale factors from native to display space.
///
/// Returns `None` when the video has no decoded size yet (native width 0) or
/// has not been laid out (display width 0); rendering is a no-op then.
pub fn scale_factors(native: (u32, u32), display: (u32, u32)) -> Option<(f32, f32)> {
    if native.0 == 0 || display.0 == 0 {
        return None;
    }
    Some((
        display.0 as f32 / native.0 as f32,
        display.1 as f32 / native.1 as f32,
    ))
}

/// Map one detector-space `[x1, y1, x2, y2]` box into display coordinates.
pub fn project_box(bbox: &[f32; 4], scale: (f32, f32)) -> DisplayRect {
    let [x1, y1, x2, y2] = *bbox;
    DisplayRect {
        x: x1 * scale.0,
        y: y1 * scale.1,
        w: (x2 - x1) * scale.0,
        h: (y2 - y1) * scale.1,
    }
}

// -------------------- Drawing surface --------------------

/// Transparent drawing surface stacked over the video.
///
/// The renderer drives this seam; implementations decide how paint lands
/// (pixel buffer, GUI canvas, test recorder).
pub trait DrawSurface {
    fn size(&self) -> (u32, u32);
    /// Match the surface resolution to the display size. Avoids stretching
    /// artifacts when layout changes.
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: DisplayRect);
    fn fill_rect(&mut self, rect: DisplayRect);
    fn label_text(&mut self, text: &str, x: f32, y: f32);
    /// Approximate rendered width of a label tag text.
    fn text_width(&self, text: &str) -> f32 {
        8.0 * text.chars().count() as f32
    }
}

/// Renderer configuration: outline thickness and label tag height.
#[derive(Clone, Copy, Debug)]
pub struct OverlayRenderer {
    pub stroke_px: u32,
    pub tag_height: f32,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            stroke_px: 3,
            tag_height: 24.0,
        }
    }
}

impl OverlayRenderer {
    /// Repaint the overlay for one frame's detections.
    ///
    /// No-op when native or display width is zero. Resizes the surface only
    /// when the display size actually changed, then clears and redraws every
    /// surviving box plus a filled label tag with confidence percentage above
    /// its top-left corner.
    pub fn render(
        &self,
        surface: &mut dyn DrawSurface,
        detections: &[DetectionBox],
        native: (u32, u32),
        display: (u32, u32),
        mode: Mode,
        target: &str,
    ) {
        let Some(scale) = scale_factors(native, display) else {
            return;
        };

        if surface.size() != display {
            surface.resize(display.0, display.1);
        }
        surface.clear();

        for det in detections {
            if mode == Mode::Single && !matches_target(&det.label, target) {
                continue;
            }

            let rect = project_box(&det.bbox, scale);
            surface.stroke_rect(rect);

            let text = format!("{} {}%", det.label, (det.conf * 100.0).round() as u32);
            let tag = DisplayRect {
                x: rect.x,
                y: rect.y - self.tag_height,
                w: surface.text_width(&text) + 10.0,
                h: self.tag_height,
            };
            surface.fill_rect(tag);
            surface.label_text(&text, rect.x + 5.0, rect.y - 6.0);
        }

        debug!(
            "overlay: drew {} boxes at {}x{} (scale {:.2}x{:.2})",
            detections.len(),
            display.0,
            display.1,
            scale.0,
            scale.1
        );
    }
}

// -------------------- Pixel-buffer surface --------------------

/// Headless RGBA surface. Paints box outlines and tag backgrounds into a
/// pixel buffer; glyph rasterization is the embedding UI's concern, so
/// `label_text` carries geometry only.
pub struct RgbaSurface {
    buffer: RgbaImage,
    stroke_px: u32,
}

impl RgbaSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: RgbaImage::new(width, height),
            stroke_px: 3,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Clamp a display rect to pixel bounds. Tolerates negative coordinates
    /// and rects extending past the surface.
    fn clamp(&self, rect: DisplayRect) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (self.buffer.width() as f32, self.buffer.height() as f32);
        let x0 = rect.x.max(0.0).min(w);
        let y0 = rect.y.max(0.0).min(h);
        let x1 = (rect.x + rect.w).max(0.0).min(w);
        let y1 = (rect.y + rect.h).max(0.0).min(h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    fn fill_region(&mut self, region: (u32, u32, u32, u32), color: Rgba<u8>) {
        let (x0, y0, x1, y1) = region;
        for y in y0..y1 {
            for x in x0..x1 {
                self.buffer.put_pixel(x, y, color);
            }
        }
    }
}

impl DrawSurface for RgbaSurface {
    fn size(&self) -> (u32, u32) {
        (self.buffer.width(), self.buffer.height())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.buffer = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        for pixel in self.buffer.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: DisplayRect) {
        let t = self.stroke_px as f32;
        let edges = [
            DisplayRect { x: rect.x, y: rect.y, w: rect.w, h: t },
            DisplayRect { x: rect.x, y: rect.y + rect.h - t, w: rect.w, h: t },
            DisplayRect { x: rect.x, y: rect.y, w: t, h: rect.h },
            DisplayRect { x: rect.x + rect.w - t, y: rect.y, w: t, h: rect.h },
        ];
        for edge in edges {
            if let Some(region) = self.clamp(edge) {
                self.fill_region(region, BOX_COLOR);
            }
        }
    }

    fn fill_rect(&mut self, rect: DisplayRect) {
        if let Some(region) = self.clamp(rect) {
            self.fill_region(region, TAG_COLOR);
        }
    }

    fn label_text(&mut self, _text: &str, _x: f32, _y: f32) {}
}
