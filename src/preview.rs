//! Debug overlay: the page image with every hOCR line box, word box and
//! fitted baseline drawn on top, rasterized to PNG.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;
use tiny_skia::Pixmap;
use tracing::info;
use usvg::{Options, Tree};

use crate::hocr::MarkupPage;

const LINE_STROKE: &str = "#2962ff";
const WORD_STROKE: &str = "#00c853";
const BASELINE_STROKE: &str = "#d50000";

/// Renders the overlay of `image_path` into a PNG at `output`; returns its size.
pub fn write_preview(image_path: &Path, markup: &MarkupPage, output: &Path) -> Result<usize> {
    let image_bytes = std::fs::read(image_path)
        .with_context(|| format!("failed to read image: {}", image_path.display()))?;
    let (width, height) = image::image_dimensions(image_path)
        .with_context(|| format!("failed to decode image: {}", image_path.display()))?;
    let mime = infer::get(&image_bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("image/png");
    let svg = render_overlay_svg(&image_bytes, mime, width, height, markup);
    let png = render_png(&svg)?;
    std::fs::write(output, &png)
        .with_context(|| format!("failed to write preview: {}", output.display()))?;
    info!("create {}", output.display());
    Ok(png.len())
}

pub fn render_overlay_svg(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    markup: &MarkupPage,
) -> String {
    let data_uri = format!("data:{};base64,{}", image_mime, BASE64.encode(image_bytes));
    let stroke = (f64::from(height) / 1000.0).max(1.0);

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    let _ = write!(
        svg,
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    );

    for line in &markup.lines {
        let [x0, y0, x1, y1] = line.bbox;
        push_rect(&mut svg, [x0, y0, x1, y1], LINE_STROKE, stroke);
        for word in &line.words {
            push_rect(&mut svg, word.bbox, WORD_STROKE, stroke);
        }
        // baseline is relative to the line's bottom-left corner
        let start_y = y1 + line.baseline.intercept;
        let end_y = start_y + line.baseline.slope * (x1 - x0);
        let _ = write!(
            svg,
            r#"<line x1="{x0}" y1="{start_y}" x2="{x1}" y2="{end_y}" stroke="{color}" stroke-width="{stroke}"/>"#,
            color = BASELINE_STROKE,
        );
    }

    svg.push_str("</svg>");
    svg
}

fn push_rect(svg: &mut String, [x0, y0, x1, y1]: [f64; 4], color: &str, stroke: f64) {
    let _ = write!(
        svg,
        r#"<rect x="{x0}" y="{y0}" width="{w}" height="{h}" fill="none" stroke="{color}" stroke-width="{stroke}"/>"#,
        w = (x1 - x0).max(0.0),
        h = (y1 - y0).max(0.0),
    );
}

pub fn render_png(svg: &str) -> Result<Vec<u8>> {
    let tree = Tree::from_str(svg, &Options::default()).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode preview PNG")?;
    Ok(bytes)
}
