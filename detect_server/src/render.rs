//! Drawing of detections onto a raster surface.
//!
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use common::detection::{BoundingBox, Detection};
use image::{ImageOutputFormat, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size, Blend},
    rect::Rect,
};
use rusttype::{Font, Scale};
use tokio::sync::Mutex;

/// Box border and label chip color.
pub const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
/// Translucent fill of a box.
pub const FILL_COLOR: Rgba<u8> = Rgba([0, 255, 0, 64]);
const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

const BORDER_WIDTH: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 4;
/// Average glyph advance relative to the font size, used when no font is loaded.
const FALLBACK_ADVANCE: f32 = 0.6;

/// Fonts tried when none is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

/// Font and size of label chip captions.
pub struct LabelStyle {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl LabelStyle {
    /// Style without glyphs: chips are sized as if text was drawn, but stay blank.
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: Scale::uniform(LABEL_FONT_SIZE),
        }
    }

    pub fn from_font_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("cannot read font {}", path.display()))?;
        let font = Font::try_from_vec(data)
            .with_context(|| format!("{} is not a TrueType font", path.display()))?;

        Ok(Self {
            font: Some(font),
            scale: Scale::uniform(LABEL_FONT_SIZE),
        })
    }

    /// Load the configured font, falling back to well-known system fonts.
    pub fn discover(configured: Option<&Path>) -> Self {
        let candidates = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from));

        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match Self::from_font_file(&path) {
                Ok(style) => {
                    log::info!("Label font {}", path.display());
                    return style;
                }
                Err(e) => log::warn!("{e:#}"),
            }
        }

        log::warn!("No usable font found, label chips are drawn without text");
        Self::without_font()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Width and height of `text` in pixels.
    pub fn text_size(&self, text: &str) -> (i32, i32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => (
                (text.chars().count() as f32 * self.scale.x * FALLBACK_ADVANCE).ceil() as i32,
                self.scale.y.ceil() as i32,
            ),
        }
    }
}

/// Pixel rectangle covered by `bbox`, at least one pixel wide and high.
pub fn box_rect(bbox: &BoundingBox) -> Rect {
    let left = bbox.xmin.round() as i32;
    let top = bbox.ymin.round() as i32;
    let width = (bbox.xmax.round() as i32 - left).max(1) as u32;
    let height = (bbox.ymax.round() as i32 - top).max(1) as u32;

    Rect::at(left, top).of_size(width, height)
}

/// Label chip of a box with a caption of `text_size`.
///
/// The chip sits on top of the box; near the top edge it is pushed down so it
/// never starts above row 0.
pub fn label_chip_rect(bbox: &BoundingBox, (text_width, text_height): (i32, i32)) -> Rect {
    let width = (text_width + 2 * LABEL_PADDING).max(1);
    let height = (text_height + 2 * LABEL_PADDING).max(1);
    let left = bbox.xmin.round() as i32;
    let top = (bbox.ymin.round() as i32 - height).max(0);

    Rect::at(left, top).of_size(width as u32, height as u32)
}

/// The drawable surface: a canvas sized after the last rendered image.
pub struct RenderSurface {
    canvas: RgbaImage,
    style: LabelStyle,
}

impl RenderSurface {
    pub fn new(style: LabelStyle) -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            style,
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.canvas
            .write_to(&mut buf, ImageOutputFormat::Png)
            .context("cannot encode overlay")?;

        Ok(buf.into_inner())
    }

    /// Paint `image` and overlay `detections`.
    pub fn draw(&mut self, image: &RgbImage, detections: &[Detection]) {
        let (width, height) = image.dimensions();
        if self.canvas.dimensions() != (width, height) {
            log::debug!("Resizing surface to {width}x{height}");
            self.canvas = RgbaImage::new(width, height);
        }

        for (x, y, Rgb([r, g, b])) in image.enumerate_pixels() {
            self.canvas.put_pixel(x, y, Rgba([*r, *g, *b, 255]));
        }

        for detection in detections {
            self.draw_detection(detection);
        }
    }

    fn draw_detection(&mut self, detection: &Detection) {
        let rect = box_rect(&detection.bbox);

        let mut blended = Blend(std::mem::replace(&mut self.canvas, RgbaImage::new(0, 0)));
        draw_filled_rect_mut(&mut blended, rect, FILL_COLOR);
        self.canvas = blended.0;

        for inset in 0..BORDER_WIDTH {
            let (width, height) = (
                rect.width() as i32 - 2 * inset,
                rect.height() as i32 - 2 * inset,
            );
            if width <= 0 || height <= 0 {
                break;
            }
            let border = Rect::at(rect.left() + inset, rect.top() + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut self.canvas, border, BOX_COLOR);
        }

        let caption = detection.caption();
        let chip = label_chip_rect(&detection.bbox, self.style.text_size(&caption));
        draw_filled_rect_mut(&mut self.canvas, chip, BOX_COLOR);

        if let Some(font) = &self.style.font {
            draw_text_mut(
                &mut self.canvas,
                TEXT_COLOR,
                chip.left() + LABEL_PADDING,
                chip.top() + LABEL_PADDING,
                self.style.scale,
                font,
                &caption,
            );
        }
    }
}

/// Render `detections` over `image` onto `surface`; a missing surface is a no-op.
pub fn render(surface: Option<&mut RenderSurface>, image: &RgbImage, detections: &[Detection]) {
    match surface {
        Some(surface) => surface.draw(image, detections),
        None => log::debug!("No drawable surface, skipping {} detections", detections.len()),
    }
}

/// A surface shared between requests. Drawing and encoding run on the blocking pool.
#[derive(Clone)]
pub struct SharedSurface(Arc<Mutex<RenderSurface>>);

impl SharedSurface {
    pub fn new(surface: RenderSurface) -> Self {
        Self(Arc::new(Mutex::new(surface)))
    }

    /// Render `detections` over `image` and return the overlay as PNG.
    pub async fn paint(&self, image: Arc<RgbImage>, detections: Vec<Detection>) -> Result<Vec<u8>> {
        let mut surface = Arc::clone(&self.0).lock_owned().await;

        tokio::task::spawn_blocking(move || {
            render(Some(&mut *surface), &image, &detections);
            surface.encode_png()
        })
        .await?
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const BACKGROUND: Rgb<u8> = Rgb([100, 100, 100]);

    fn person() -> Detection {
        let bbox = BoundingBox::new(10.0, 20.0, 200.0, 400.0).unwrap();
        Detection::new(0.91, "person", bbox).unwrap()
    }

    fn surface() -> RenderSurface {
        RenderSurface::new(LabelStyle::without_font())
    }

    #[test]
    fn test_renders_person_example() {
        let image = RgbImage::from_pixel(800, 600, BACKGROUND);
        let detection = person();
        let mut surface = surface();

        render(Some(&mut surface), &image, &[detection.clone()]);
        let canvas = surface.canvas();

        assert_eq!(canvas.dimensions(), (800, 600));
        assert_eq!(detection.caption(), "person 91.0%");

        // Border on all four sides, two pixels wide.
        assert_eq!(*canvas.get_pixel(10, 300), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(11, 300), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(199, 300), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(100, 20), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(100, 399), BOX_COLOR);

        // Inside the box the image shows through a green tint.
        let Rgba([r, g, b, a]) = *canvas.get_pixel(100, 200);
        assert!(g > 100 && r < 100 && b < 100);
        assert_eq!(a, 255);

        // Untouched outside.
        assert_eq!(*canvas.get_pixel(500, 500), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_render_is_deterministic() {
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 3, y as u8 * 5, 7]));
        let detections = vec![
            Detection::new(0.5, "cup", BoundingBox::new(4.0, 8.0, 30.0, 40.0).unwrap()).unwrap(),
            Detection::new(0.75, "cat", BoundingBox::new(20.5, 0.0, 63.0, 47.0).unwrap()).unwrap(),
        ];

        let mut first = surface();
        let mut second = surface();
        render(Some(&mut first), &image, &detections);
        render(Some(&mut second), &image, &detections);
        assert_eq!(first.canvas(), second.canvas());

        // Redrawing on a used surface yields the same pixels again.
        let snapshot = first.canvas().clone();
        render(Some(&mut first), &image, &detections);
        assert_eq!(first.canvas(), &snapshot);
    }

    #[test]
    fn test_label_chip_is_clamped_to_top_edge() {
        let bbox = BoundingBox::new(5.0, 0.0, 50.0, 50.0).unwrap();
        let chip = label_chip_rect(&bbox, (40, 16));
        assert_eq!(chip.top(), 0);
        assert_eq!(chip.left(), 5);
        assert_eq!(chip.height(), 24);

        let below = BoundingBox::new(5.0, 100.0, 50.0, 150.0).unwrap();
        let chip = label_chip_rect(&below, (40, 16));
        assert_eq!(chip.top(), 76);
        assert_eq!(chip.bottom(), 99);
    }

    #[test]
    fn test_chip_at_top_edge_is_drawn() {
        let image = RgbImage::from_pixel(100, 100, BACKGROUND);
        let detection =
            Detection::new(0.8, "kite", BoundingBox::new(20.0, 0.0, 80.0, 60.0).unwrap()).unwrap();
        let mut surface = surface();

        render(Some(&mut surface), &image, &[detection]);

        assert_eq!(*surface.canvas().get_pixel(22, 0), BOX_COLOR);
        assert_eq!(*surface.canvas().get_pixel(30, 10), BOX_COLOR);
    }

    #[test]
    fn test_surface_follows_image_size() {
        let mut surface = surface();
        render(Some(&mut surface), &RgbImage::new(32, 16), &[]);
        assert_eq!(surface.canvas().dimensions(), (32, 16));

        render(Some(&mut surface), &RgbImage::from_pixel(8, 4, BACKGROUND), &[]);
        assert_eq!(surface.canvas().dimensions(), (8, 4));
        assert_eq!(*surface.canvas().get_pixel(7, 3), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_missing_surface_is_a_no_op() {
        render(None, &RgbImage::new(4, 4), &[person()]);
    }

    #[test]
    fn test_text_size_without_font() {
        let style = LabelStyle::without_font();
        assert!(!style.has_font());
        let (width, height) = style.text_size("abcde");
        assert!((47..=49).contains(&width));
        assert_eq!(height, 16);
    }

    #[tokio::test]
    async fn test_shared_surface_paints_png() -> Result<()> {
        let surface = SharedSurface::new(surface());
        let image = Arc::new(RgbImage::from_pixel(800, 600, BACKGROUND));

        let png = surface.paint(image, vec![person()]).await?;
        let overlay = image::load_from_memory(&png)?.to_rgba8();

        assert_eq!(overlay.dimensions(), (800, 600));
        assert_eq!(*overlay.get_pixel(10, 300), BOX_COLOR);
        assert_eq!(*overlay.get_pixel(500, 500), Rgba([100, 100, 100, 255]));

        Ok(())
    }

    #[test]
    fn test_missing_font_file() {
        assert!(LabelStyle::from_font_file(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
