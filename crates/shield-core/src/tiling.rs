//! Visible watermark geometry.
//!
//! [`layout`] is the pure part: it turns a surface size and a
//! [`VisibleWatermark`] into glyph placements. [`render`] feeds those
//! placements to any [`DrawSurface`], so a persisted preview raster and a
//! live video overlay are drawn from the same numbers.
//!
//! Repeated mode lays a grid out in the rotated frame, anchored at the
//! surface center and spanning `-d..=d` with `d` the surface diagonal. Any
//! point of the surface is at most `d / 2` from the center, so every point
//! falls inside some tile cell whatever the aspect ratio or angle.
//!
//! The effective cell is never smaller than [`MIN_CELL_SIZE`] nor than
//! `d / MAX_GRID_STEPS`, so one layout holds at most
//! `(2 * MAX_GRID_STEPS + 1)^2` glyphs however small the requested cell or
//! large the surface.

use serde::{Deserialize, Serialize};

use crate::forensic::PixelBuffer;

pub const DEFAULT_CELL_SIZE: f64 = 300.0;
pub const MIN_CELL_SIZE: f64 = 16.0;
/// Grid steps from the center to either edge of the tiled span.
pub const MAX_GRID_STEPS: i64 = 64;
/// Largest side of a [`MaskSurface`] the tools will allocate.
pub const MAX_MASK_SIDE: u32 = 8192;
/// Average glyph advance as a fraction of the font size.
pub const GLYPH_ADVANCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisibleWatermark {
    pub text: String,
    pub opacity: f64,
    pub rotation_degrees: f64,
    pub repeated: bool,
    pub font_size_px: f64,
    pub cell_size: f64,
}

impl Default for VisibleWatermark {
    fn default() -> Self {
        Self {
            text: "PROTECTED".into(),
            opacity: 0.15,
            rotation_degrees: -30.0,
            repeated: true,
            font_size_px: 24.0,
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn rotated(self, radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }
}

/// Axis-aligned rectangle, edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// The four quadrants, top-left first, clockwise.
    pub fn quadrants(&self) -> [Rect; 4] {
        let c = self.center();
        [
            Rect::new(self.min.x, self.min.y, c.x, c.y),
            Rect::new(c.x, self.min.y, self.max.x, c.y),
            Rect::new(c.x, c.y, self.max.x, self.max.y),
            Rect::new(self.min.x, c.y, c.x, self.max.y),
        ]
    }
}

/// One text instance, positioned by its center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlyphPlacement {
    pub text: String,
    pub center: Point,
    pub rotation_radians: f64,
    pub opacity: f64,
    pub font_size_px: f64,
}

impl GlyphPlacement {
    /// Approximate unrotated text box, width by height.
    pub fn extent(&self) -> (f64, f64) {
        let chars = self.text.chars().count() as f64;
        (chars * self.font_size_px * GLYPH_ADVANCE, self.font_size_px)
    }

    /// Axis-aligned bounds of the rotated text box.
    pub fn bounds(&self) -> Rect {
        let (w, h) = self.extent();
        let (sin, cos) = self.rotation_radians.sin_cos();
        let half_w = (w * cos.abs() + h * sin.abs()) / 2.0;
        let half_h = (w * sin.abs() + h * cos.abs()) / 2.0;
        Rect::new(
            self.center.x - half_w,
            self.center.y - half_h,
            self.center.x + half_w,
            self.center.y + half_h,
        )
    }

    /// Whether `p` lies inside the rotated text box.
    pub fn covers(&self, p: Point) -> bool {
        let (w, h) = self.extent();
        let local = Point::new(p.x - self.center.x, p.y - self.center.y).rotated(-self.rotation_radians);
        local.x.abs() <= w / 2.0 && local.y.abs() <= h / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayout {
    pub width: f64,
    pub height: f64,
    pub cell_size: f64,
    pub rotation_radians: f64,
    pub glyphs: Vec<GlyphPlacement>,
}

impl TileLayout {
    pub fn surface(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    /// The glyph whose tile cell contains `p`.
    pub fn cell_containing(&self, p: Point) -> Option<&GlyphPlacement> {
        let half = self.cell_size / 2.0;
        self.glyphs.iter().find(|glyph| {
            let local = Point::new(p.x - glyph.center.x, p.y - glyph.center.y)
                .rotated(-self.rotation_radians);
            local.x.abs() <= half && local.y.abs() <= half
        })
    }
}

pub fn layout(width: f64, height: f64, watermark: &VisibleWatermark) -> TileLayout {
    let rotation = watermark.rotation_degrees.to_radians();
    let requested = if watermark.cell_size.is_finite() && watermark.cell_size > 0.0 {
        watermark.cell_size
    } else {
        DEFAULT_CELL_SIZE
    };
    let diagonal = width.hypot(height);
    let mut cell_size = requested.max(MIN_CELL_SIZE);
    if diagonal.is_finite() {
        cell_size = cell_size.max(diagonal / MAX_GRID_STEPS as f64);
    }
    let mut tiles = TileLayout {
        width,
        height,
        cell_size,
        rotation_radians: rotation,
        glyphs: Vec::new(),
    };
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0)
        || watermark.text.is_empty()
    {
        return tiles;
    }

    let center = Point::new(width / 2.0, height / 2.0);
    let glyph_at = |offset: Point| {
        let world = offset.rotated(rotation);
        GlyphPlacement {
            text: watermark.text.clone(),
            center: Point::new(center.x + world.x, center.y + world.y),
            rotation_radians: rotation,
            opacity: watermark.opacity.clamp(0.0, 1.0),
            font_size_px: watermark.font_size_px,
        }
    };

    if !watermark.repeated {
        tiles.glyphs.push(glyph_at(Point::new(0.0, 0.0)));
        return tiles;
    }

    let steps = ((diagonal / cell_size).ceil() as i64).min(MAX_GRID_STEPS);
    for i in -steps..=steps {
        for j in -steps..=steps {
            let offset = Point::new(i as f64 * cell_size, j as f64 * cell_size);
            tiles.glyphs.push(glyph_at(offset));
        }
    }
    tiles
}

pub trait DrawSurface {
    fn size(&self) -> (f64, f64);
    fn draw_glyph(&mut self, glyph: &GlyphPlacement);
}

pub fn render(surface: &mut dyn DrawSurface, watermark: &VisibleWatermark) {
    let (width, height) = surface.size();
    for glyph in &layout(width, height, watermark).glyphs {
        surface.draw_glyph(glyph);
    }
}

/// Surface that keeps the placements it is asked to draw.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    pub width: f64,
    pub height: f64,
    pub drawn: Vec<GlyphPlacement>,
}

impl RecordingSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            drawn: Vec::new(),
        }
    }
}

impl DrawSurface for RecordingSurface {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    fn draw_glyph(&mut self, glyph: &GlyphPlacement) {
        self.drawn.push(glyph.clone());
    }
}

/// Static raster of glyph boxes, for persisted previews. Each glyph is a
/// filled rotated box whose alpha is its opacity; overlaps keep the
/// strongest alpha.
#[derive(Debug, Clone)]
pub struct MaskSurface {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
}

impl MaskSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alpha: vec![0; width as usize * height as usize],
        }
    }

    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.alpha[y as usize * self.width as usize + x as usize]
    }

    /// White RGBA raster carrying the mask in its alpha channel.
    pub fn to_pixels(&self) -> PixelBuffer {
        let mut data = Vec::with_capacity(self.alpha.len() * 4);
        for a in &self.alpha {
            data.extend_from_slice(&[255, 255, 255, *a]);
        }
        PixelBuffer::from_rgba(self.width, self.height, data).unwrap_or_else(|_| PixelBuffer::empty())
    }
}

impl DrawSurface for MaskSurface {
    fn size(&self) -> (f64, f64) {
        (f64::from(self.width), f64::from(self.height))
    }

    fn draw_glyph(&mut self, glyph: &GlyphPlacement) {
        let bounds = glyph.bounds();
        let clamp_x = |v: f64| v.clamp(0.0, f64::from(self.width)) as u32;
        let clamp_y = |v: f64| v.clamp(0.0, f64::from(self.height)) as u32;
        let value = (glyph.opacity * 255.0).round() as u8;
        for y in clamp_y(bounds.min.y.floor())..clamp_y(bounds.max.y.ceil()) {
            for x in clamp_x(bounds.min.x.floor())..clamp_x(bounds.max.x.ceil()) {
                let sample = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                if glyph.covers(sample) {
                    let slot = &mut self.alpha[y as usize * self.width as usize + x as usize];
                    *slot = (*slot).max(value);
                }
            }
        }
    }
}
