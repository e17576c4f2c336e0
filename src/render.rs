use std::{io::Cursor, path::PathBuf};

use anyhow::Context as _;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

const CANVAS_SIZE: u32 = 600;
const CENTER: f32 = 300.0;
const MARKER_LENGTH: f32 = 280.0;
const MARKER_WIDTH: f32 = 15.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerKind {
    /// Where the rotator points now.
    Current,
    /// Where the rotator is heading.
    Target,
}

impl MarkerKind {
    fn color(self) -> Rgba<u8> {
        match self {
            MarkerKind::Current => Rgba([0x33, 0xff, 0x33, 0x80]),
            MarkerKind::Target => Rgba([0xff, 0x33, 0x33, 0x80]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Marker {
    pub degrees: u16,
    pub kind: MarkerKind,
}

/// Composes direction markers onto a base picture (a locator map).
pub trait MarkerRenderer: Send + Sync {
    fn render(&self, template: &str, markers: &[Marker]) -> anyhow::Result<Vec<u8>>;
}

pub struct ImageMarkerRenderer {
    assets_dir: PathBuf,
}

impl ImageMarkerRenderer {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        ImageMarkerRenderer {
            assets_dir: assets_dir.into(),
        }
    }
}

impl MarkerRenderer for ImageMarkerRenderer {
    fn render(&self, template: &str, markers: &[Marker]) -> anyhow::Result<Vec<u8>> {
        let path = self.assets_dir.join(template);
        let base = image::open(&path)
            .with_context(|| format!("loading template {}", path.display()))?
            .to_rgba8();

        let mut canvas = RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba([0, 0, 0, 0xff]));
        image::imageops::overlay(&mut canvas, &base, 0, 0);

        for marker in markers {
            draw_marker(&mut canvas, marker);
        }

        let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut jpeg, ImageOutputFormat::Jpeg(85))
            .context("encoding marker image")?;
        Ok(jpeg.into_inner())
    }
}

/// Outer end of a marker line; 0° points up and angles grow clockwise.
pub fn marker_endpoint(degrees: u16) -> (f32, f32) {
    let radians = (f32::from(degrees) - 90.0).to_radians();
    (
        CENTER + radians.cos() * MARKER_LENGTH,
        CENTER + radians.sin() * MARKER_LENGTH,
    )
}

fn draw_marker(canvas: &mut RgbaImage, marker: &Marker) {
    let (x1, y1) = marker_endpoint(marker.degrees);
    let half_width = MARKER_WIDTH / 2.0;
    let color = marker.kind.color();

    let min_x = (CENTER.min(x1) - half_width).floor().max(0.0) as u32;
    let max_x = (CENTER.max(x1) + half_width).ceil().min((CANVAS_SIZE - 1) as f32) as u32;
    let min_y = (CENTER.min(y1) - half_width).floor().max(0.0) as u32;
    let max_y = (CENTER.max(y1) + half_width).ceil().min((CANVAS_SIZE - 1) as f32) as u32;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let distance = distance_to_segment(x as f32, y as f32, (CENTER, CENTER), (x1, y1));
            if distance <= half_width {
                blend(canvas.get_pixel_mut(x, y), color);
            }
        }
    }
}

fn distance_to_segment(px: f32, py: f32, a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((px - a.0) * dx + (py - a.1) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

fn blend(pixel: &mut Rgba<u8>, color: Rgba<u8>) {
    let alpha = f32::from(color[3]) / 255.0;
    for channel in 0..3 {
        let mixed = f32::from(color[channel]) * alpha + f32::from(pixel[channel]) * (1.0 - alpha);
        pixel[channel] = mixed.round() as u8;
    }
    pixel[3] = 0xff;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 0.01 && (a.1 - b.1).abs() < 0.01
    }

    #[test]
    fn test_marker_endpoint() {
        assert!(close(marker_endpoint(0), (300.0, 20.0)));
        assert!(close(marker_endpoint(90), (580.0, 300.0)));
        assert!(close(marker_endpoint(180), (300.0, 580.0)));
        assert!(close(marker_endpoint(270), (20.0, 300.0)));
    }

    #[test]
    fn test_render_draws_markers() {
        let dir = std::env::temp_dir().join(format!("shack-relay-render-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba([0xff, 0xff, 0xff, 0xff]))
            .save(dir.join("locator.png"))
            .unwrap();

        let renderer = ImageMarkerRenderer::new(&dir);
        let jpeg = renderer
            .render(
                "locator.png",
                &[
                    Marker {
                        degrees: 0,
                        kind: MarkerKind::Current,
                    },
                    Marker {
                        degrees: 90,
                        kind: MarkerKind::Target,
                    },
                ],
            )
            .unwrap();

        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));

        let up = decoded.get_pixel(300, 120);
        assert!(up[1] as i32 - up[0] as i32 > 50, "expected green marker, got {:?}", up);

        let right = decoded.get_pixel(480, 300);
        assert!(right[0] as i32 - right[1] as i32 > 50, "expected red marker, got {:?}", right);

        let corner = decoded.get_pixel(50, 550);
        assert!(corner[0] > 200 && corner[1] > 200 && corner[2] > 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let renderer = ImageMarkerRenderer::new("/nonexistent/shack-relay");
        assert!(renderer.render("locator.png", &[]).is_err());
    }
}
