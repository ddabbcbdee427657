use tiny_skia::{
    Color, ColorU8, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform,
};

use crate::config::{Rgb, StyleConfig};
use crate::dem::{ElevationGrid, GeoTransform};
use crate::error::{MapError, Result};
use crate::render::{Classification, Isoline, Peak};


/// How many label widths apart labels along one line are.
const LABEL_SPACING: f32 = 25.0;

/// Maps between grid cells, map coordinates and canvas pixels. The grid's
/// map extent is fitted into the canvas, centered, north up.
#[derive(Debug, Clone)]
pub struct Viewport {
    transform: GeoTransform,
    inverse: GeoTransform,
    min_x: f64,
    max_y: f64,
    pixels_per_unit: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Viewport {
    pub fn fit(grid: &ElevationGrid, canvas_width: u32, canvas_height: u32) -> Result<Self> {
        let transform = *grid.transform();
        let inverse = transform
            .inverse()
            .ok_or_else(|| MapError::InvalidRaster(format!("transform {} is not invertible", transform)))?;

        let (w, h) = (grid.width() as f64, grid.height() as f64);
        let corners = [
            transform.apply(0.0, 0.0),
            transform.apply(w, 0.0),
            transform.apply(0.0, h),
            transform.apply(w, h),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let (map_w, map_h) = (max_x - min_x, max_y - min_y);
        if !(map_w > 0.0 && map_h > 0.0) {
            return Err(MapError::InvalidRaster("grid covers no area".to_string()));
        }

        let pixels_per_unit = (canvas_width as f64 / map_w).min(canvas_height as f64 / map_h);

        Ok(Viewport {
            transform,
            inverse,
            min_x,
            max_y,
            pixels_per_unit,
            offset_x: (canvas_width as f64 - map_w * pixels_per_unit) / 2.0,
            offset_y: (canvas_height as f64 - map_h * pixels_per_unit) / 2.0,
        })
    }

    pub fn map_to_canvas(&self, x: f64, y: f64) -> (f32, f32) {
        (
            (self.offset_x + (x - self.min_x) * self.pixels_per_unit) as f32,
            (self.offset_y + (self.max_y - y) * self.pixels_per_unit) as f32,
        )
    }

    /// `(col, row)` in cell center coordinates, so `(0, 0)` is the middle
    /// of the first cell.
    pub fn cell_to_canvas(&self, col: f64, row: f64) -> (f32, f32) {
        let (x, y) = self.transform.apply(col + 0.5, row + 0.5);
        self.map_to_canvas(x, y)
    }

    pub fn canvas_to_cell(&self, px: f32, py: f32) -> (f64, f64) {
        let x = self.min_x + (px as f64 - self.offset_x) / self.pixels_per_unit;
        let y = self.max_y - (py as f64 - self.offset_y) / self.pixels_per_unit;
        let (col, row) = self.inverse.apply(x, y);
        (col - 0.5, row - 0.5)
    }
}

/// Everything that ends up on the map, back to front.
pub struct Scene<'a> {
    pub classification: &'a Classification,
    pub max_elevation: f32,
    pub top_margin: f32,
    pub minor: &'a [Isoline],
    pub major: &'a [Isoline],
    pub top: &'a [Isoline],
    pub peaks: &'a [Peak],
}

/// Paints the map. Returns the canvas and the number of contour labels placed.
pub fn draw_map(grid: &ElevationGrid, scene: &Scene, style: &StyleConfig) -> Result<(Pixmap, usize)> {
    let width = (style.width as f32 * style.scale).round().max(1.0) as u32;
    let height = (style.height as f32 * style.scale).round().max(1.0) as u32;
    let scale = style.scale;

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| MapError::Config(format!("cannot allocate a {}x{} canvas", width, height)))?;
    let bg = style.background;
    pixmap.fill(Color::from_rgba8(bg.r, bg.g, bg.b, 255));

    let view = Viewport::fit(grid, width, height)?;

    let fill = classified_fill(grid, &view, scene, width, height)?;
    pixmap.draw_pixmap(
        0,
        0,
        fill.as_ref(),
        &PixmapPaint {
            opacity: style.fill_alpha,
            ..PixmapPaint::default()
        },
        Transform::identity(),
        None,
    );

    let minor = LineStyle::new(style.minor_color, style.minor_alpha, style.minor_width * scale);
    for line in scene.minor {
        stroke_line(&mut pixmap, &view, line, &minor);
    }

    let major = LineStyle::new(style.major_color, style.major_alpha, style.major_width * scale);
    let mut labels = Vec::new();
    let label_size = style.label_size * scale;
    for line in scene.major {
        let canvas = stroke_line(&mut pixmap, &view, line, &major);
        place_labels(
            &canvas,
            &label_text(line.level),
            label_size,
            label_size * LABEL_SPACING,
            (width, height),
            &mut labels,
        );
    }
    for label in &labels {
        draw_label(&mut pixmap, label, label_size, style.label_color, bg);
    }

    let top = LineStyle::new(style.top_color, 1.0, style.top_width * scale);
    for line in scene.top {
        stroke_line(&mut pixmap, &view, line, &top);
    }

    let marker = LineStyle::new(style.peak_color, style.peak_alpha, style.peak_stroke * scale);
    for peak in scene.peaks {
        let (x, y) = view.map_to_canvas(peak.x, peak.y);
        draw_cross(&mut pixmap, x, y, style.peak_size * scale / 2.0, &marker);
    }

    Ok((pixmap, labels.len()))
}

/// One opaque pixel per classified canvas pixel, transparent elsewhere.
/// Elevation between cell centers is interpolated bilinearly, falling back
/// to the nearest cell next to invalid ones.
fn classified_fill(grid: &ElevationGrid, view: &Viewport, scene: &Scene, width: u32, height: u32) -> Result<Pixmap> {
    let mut fill = Pixmap::new(width, height)
        .ok_or_else(|| MapError::Config(format!("cannot allocate a {}x{} canvas", width, height)))?;
    let top = scene.max_elevation + scene.top_margin;

    let colors: Vec<_> = scene
        .classification
        .classes()
        .iter()
        .map(|c| ColorU8::from_rgba(c.color.r, c.color.g, c.color.b, 255).premultiply())
        .collect();

    let pixels = fill.pixels_mut();
    for py in 0..height {
        for px in 0..width {
            let (col, row) = view.canvas_to_cell(px as f32 + 0.5, py as f32 + 0.5);
            let band = sample(grid, col, row)
                .filter(|z| *z < top)
                .and_then(|z| scene.classification.band_of(z));
            if let Some(band) = band {
                pixels[(py * width + px) as usize] = colors[band];
            }
        }
    }

    Ok(fill)
}

fn sample(grid: &ElevationGrid, col: f64, row: f64) -> Option<f32> {
    let (w, h) = (grid.width() as f64, grid.height() as f64);
    if col < -0.5 || row < -0.5 || col >= w - 0.5 || row >= h - 0.5 {
        return None;
    }

    let c0 = col.floor().max(0.0) as usize;
    let r0 = row.floor().max(0.0) as usize;
    let c1 = (c0 + 1).min(grid.width() - 1);
    let r1 = (r0 + 1).min(grid.height() - 1);
    let tx = (col - c0 as f64).clamp(0.0, 1.0);
    let ty = (row - r0 as f64).clamp(0.0, 1.0);

    match (grid.get(c0, r0), grid.get(c1, r0), grid.get(c0, r1), grid.get(c1, r1)) {
        (Some(z00), Some(z10), Some(z01), Some(z11)) => {
            let top = z00 as f64 * (1.0 - tx) + z10 as f64 * tx;
            let bottom = z01 as f64 * (1.0 - tx) + z11 as f64 * tx;
            Some((top * (1.0 - ty) + bottom * ty) as f32)
        }
        _ => {
            let nc = (col.round().max(0.0) as usize).min(grid.width() - 1);
            let nr = (row.round().max(0.0) as usize).min(grid.height() - 1);
            grid.get(nc, nr)
        }
    }
}

struct LineStyle {
    paint: Paint<'static>,
    stroke: Stroke,
}

impl LineStyle {
    fn new(color: Rgb, alpha: f32, width: f32) -> Self {
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.r, color.g, color.b, alpha_u8(alpha));
        paint.anti_alias = true;

        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };

        LineStyle { paint, stroke }
    }
}

fn alpha_u8(alpha: f32) -> u8 {
    (alpha.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Strokes `line` and returns its canvas points.
fn stroke_line(pixmap: &mut Pixmap, view: &Viewport, line: &Isoline, style: &LineStyle) -> Vec<(f32, f32)> {
    let points: Vec<(f32, f32)> = line
        .points
        .iter()
        .map(|&(col, row)| view.cell_to_canvas(col, row))
        .collect();
    if points.len() < 2 {
        return points;
    }

    let mut pb = PathBuilder::new();
    pb.move_to(points[0].0, points[0].1);
    for &(x, y) in &points[1..] {
        pb.line_to(x, y);
    }
    if line.closed {
        pb.close();
    }

    if let Some(path) = pb.finish() {
        pixmap.stroke_path(&path, &style.paint, &style.stroke, Transform::identity(), None);
    }

    points
}

fn draw_cross(pixmap: &mut Pixmap, x: f32, y: f32, half: f32, style: &LineStyle) {
    let mut pb = PathBuilder::new();
    pb.move_to(x - half, y);
    pb.line_to(x + half, y);
    pb.move_to(x, y - half);
    pb.line_to(x, y + half);

    if let Some(path) = pb.finish() {
        pixmap.stroke_path(&path, &style.paint, &style.stroke, Transform::identity(), None);
    }
}

pub(crate) fn label_text(level: f32) -> String {
    format!("{} m", level.round() as i64)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Label {
    pub x: f32,
    pub y: f32,
    /// radians, never upside down
    pub angle: f32,
    pub text: String,
}

/// Spreads labels evenly along `line`, skipping spots near the canvas edge
/// or too close to a label that is already placed.
pub(crate) fn place_labels(
    line: &[(f32, f32)],
    text: &str,
    size: f32,
    spacing: f32,
    canvas: (u32, u32),
    placed: &mut Vec<Label>,
) {
    let lengths: Vec<f32> = line
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
        .collect();
    let total: f32 = lengths.iter().sum();
    if spacing <= 0.0 || total < spacing * 0.5 {
        return;
    }

    let count = ((total / spacing).floor() as usize).max(1);
    let step = total / (count as f32 + 1.0);
    let margin = size * 2.0;
    let min_distance = size * 4.0;

    let mut walked = 0.0;
    let mut next = step;
    let mut segments = line.windows(2).zip(&lengths);
    let mut current = segments.next();

    while let Some((segment, &length)) = current {
        if walked + length < next || length == 0.0 {
            walked += length;
            current = segments.next();
            continue;
        }

        let t = (next - walked) / length;
        let (p, q) = (segment[0], segment[1]);
        let (dx, dy) = (q.0 - p.0, q.1 - p.1);
        let (x, y) = (p.0 + t * dx, p.1 + t * dy);
        next += step;

        let inside = x > margin && x < canvas.0 as f32 - margin && y > margin && y < canvas.1 as f32 - margin;
        let crowded = placed
            .iter()
            .any(|l| (l.x - x).hypot(l.y - y) < min_distance);
        if inside && !crowded {
            let mut angle = dy.atan2(dx);
            if angle.abs() > std::f32::consts::FRAC_PI_2 {
                angle += std::f32::consts::PI;
            }
            placed.push(Label {
                x,
                y,
                angle,
                text: text.to_string(),
            });
        }

        if next > total {
            break;
        }
    }
}

fn draw_label(pixmap: &mut Pixmap, label: &Label, size: f32, color: Rgb, background: Rgb) {
    let char_width = size * 0.6;
    let char_spacing = size * 0.25;
    let text_width = label.text.chars().count() as f32 * (char_width + char_spacing) - char_spacing;
    let (cos_a, sin_a) = (label.angle.cos(), label.angle.sin());
    let rotate = |px: f32, py: f32| (px * cos_a - py * sin_a + label.x, px * sin_a + py * cos_a + label.y);

    // knock the contour line out behind the text
    let half_w = text_width / 2.0 + size * 0.3;
    let half_h = size / 2.0 + size * 0.3;
    let mut pb = PathBuilder::new();
    for (i, (cx, cy)) in [(-half_w, -half_h), (half_w, -half_h), (half_w, half_h), (-half_w, half_h)]
        .iter()
        .enumerate()
    {
        let (rx, ry) = rotate(*cx, *cy);
        if i == 0 {
            pb.move_to(rx, ry);
        } else {
            pb.line_to(rx, ry);
        }
    }
    pb.close();
    if let Some(path) = pb.finish() {
        let mut paint = Paint::default();
        paint.set_color_rgba8(background.r, background.g, background.b, 170);
        paint.anti_alias = true;
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }

    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, 255);
    paint.anti_alias = true;
    let stroke = Stroke {
        width: (size * 0.12).max(1.0),
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };

    let start = -text_width / 2.0 + char_width / 2.0;
    let mut pb = PathBuilder::new();
    for (i, ch) in label.text.chars().enumerate() {
        let center = start + i as f32 * (char_width + char_spacing);
        for ((x1, y1), (x2, y2)) in glyph_segments(ch, char_width / 2.0, size / 2.0) {
            let (ax, ay) = rotate(center + x1, y1);
            let (bx, by) = rotate(center + x2, y2);
            pb.move_to(ax, ay);
            pb.line_to(bx, by);
        }
    }
    if let Some(path) = pb.finish() {
        pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }
}

type Segment = ((f32, f32), (f32, f32));

/// Seven segment strokes of `ch` around its center, `hw`/`hh` being half
/// the glyph width and height. Unknown characters draw nothing.
pub(crate) fn glyph_segments(ch: char, hw: f32, hh: f32) -> Vec<Segment> {
    let top = ((-hw, -hh), (hw, -hh));
    let middle = ((-hw, 0.0), (hw, 0.0));
    let bottom = ((-hw, hh), (hw, hh));
    let upper_left = ((-hw, -hh), (-hw, 0.0));
    let upper_right = ((hw, -hh), (hw, 0.0));
    let lower_left = ((-hw, 0.0), (-hw, hh));
    let lower_right = ((hw, 0.0), (hw, hh));

    match ch {
        '0' => vec![top, upper_right, lower_right, bottom, lower_left, upper_left],
        '1' => vec![upper_right, lower_right],
        '2' => vec![top, upper_right, middle, lower_left, bottom],
        '3' => vec![top, upper_right, middle, lower_right, bottom],
        '4' => vec![upper_left, middle, upper_right, lower_right],
        '5' => vec![top, upper_left, middle, lower_right, bottom],
        '6' => vec![top, upper_left, lower_left, bottom, lower_right, middle],
        '7' => vec![top, upper_right, lower_right],
        '8' => vec![top, upper_right, lower_right, bottom, lower_left, upper_left, middle],
        '9' => vec![middle, upper_left, top, upper_right, lower_right, bottom],
        '-' => vec![middle],
        // lower case m: three legs under a shared bar
        'm' => vec![middle, lower_left, ((0.0, 0.0), (0.0, hh)), lower_right],
        _ => vec![],
    }
}
