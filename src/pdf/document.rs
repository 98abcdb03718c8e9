use anyhow::{Context, Result, anyhow};
use printpdf::image_crate::{ColorType, DynamicImage};
use printpdf::{
    Color, ColorBits, ColorSpace, Image, ImageFilter, ImageTransform, ImageXObject,
    IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Px, Rgb,
    TextRenderingMode, lopdf,
};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::hocr::MarkupPage;

use super::compositor::{ComposeStats, PageGeometry, TextLayerOptions, TextRun, TextSink, compose};
use super::font::FontMetrics;

/// Outcome of appending one image.
#[derive(Debug, Clone, Copy)]
pub struct PageReport {
    pub geometry: PageGeometry,
    /// `None` when the page has no markup and only the image was drawn.
    pub text_layer: Option<ComposeStats>,
}

/// One PDF, one page per image, built in call order and written once.
pub struct PdfBook {
    title: String,
    font: FontMetrics,
    options: TextLayerOptions,
    page_height_in: f64,
    doc: Option<PdfDocumentReference>,
    embedded_font: Option<IndirectFontRef>,
    pages: usize,
}

impl PdfBook {
    pub fn new(
        title: impl Into<String>,
        font: FontMetrics,
        options: TextLayerOptions,
        page_height_in: f64,
    ) -> Self {
        Self {
            title: title.into(),
            font,
            options,
            page_height_in,
            doc: None,
            embedded_font: None,
            pages: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub fn add_page(&mut self, image_path: &Path, markup: Option<&MarkupPage>) -> Result<PageReport> {
        let bytes = std::fs::read(image_path)
            .with_context(|| format!("failed to read image: {}", image_path.display()))?;
        let image = page_image(bytes)
            .with_context(|| format!("failed to decode image: {}", image_path.display()))?;
        let (width, height) = (image.width.0 as u32, image.height.0 as u32);
        let geometry = PageGeometry::for_image(width, height, self.page_height_in);
        info!(
            "{} {}x{}px dpi {:.1}",
            image_path.display(),
            width,
            height,
            geometry.dpi
        );

        let layer = self.next_layer(&geometry)?;
        Image::from(image).add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(0.0)),
                translate_y: Some(Mm(0.0)),
                rotate: None,
                scale_x: Some(1.0),
                scale_y: Some(1.0),
                dpi: Some(geometry.dpi as f32),
            },
        );

        let text_layer = match markup {
            Some(markup) => {
                let font = self.font_ref()?;
                let mut sink = LayerSink {
                    layer: &layer,
                    font: &font,
                };
                let stats = compose(markup, &geometry, &self.options, &self.font, &mut sink);
                info!(
                    "{} words drawn, {} skipped",
                    stats.drawn,
                    stats.skipped()
                );
                Some(stats)
            }
            None => {
                warn!("no hOCR for {}, text layer skipped", image_path.display());
                None
            }
        };

        Ok(PageReport {
            geometry,
            text_layer,
        })
    }

    /// Writes the document beside `path` and renames it into place. Every
    /// stream without a filter is deflated on the way out.
    pub fn finish(self, path: &Path) -> Result<usize> {
        let doc = self.doc.ok_or_else(|| anyhow!("no pages to write"))?;
        let bytes = doc
            .save_to_bytes()
            .map_err(|err| anyhow!("failed to render pdf: {}", err))?;
        let mut pdf = lopdf::Document::load_mem(&bytes)
            .map_err(|err| anyhow!("failed to reload rendered pdf: {}", err))?;
        pdf.compress();

        let parent = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            pdf.save_to(&mut writer)
                .map_err(|err| anyhow!("failed to write pdf: {}", err))?;
            writer.flush().with_context(|| "failed to write pdf")?;
        }
        temp.persist(path)
            .with_context(|| format!("failed to write pdf: {}", path.display()))?;
        info!("create {}", path.display());
        Ok(self.pages)
    }

    fn next_layer(&mut self, geometry: &PageGeometry) -> Result<PdfLayerReference> {
        self.pages += 1;
        let width = pt_to_mm(geometry.width_pt);
        let height = pt_to_mm(geometry.height_pt);
        let layer_name = format!("Page {}", self.pages);
        let layer = match self.doc.as_ref() {
            Some(doc) => {
                let (page, layer) = doc.add_page(width, height, layer_name);
                doc.get_page(page).get_layer(layer)
            }
            None => {
                let (doc, page, layer) = PdfDocument::new(&self.title, width, height, layer_name);
                let current = doc.get_page(page).get_layer(layer);
                self.doc = Some(doc);
                current
            }
        };
        Ok(layer)
    }

    fn font_ref(&mut self) -> Result<IndirectFontRef> {
        if let Some(font) = &self.embedded_font {
            return Ok(font.clone());
        }
        let doc = self
            .doc
            .as_ref()
            .ok_or_else(|| anyhow!("font requested before the first page"))?;
        let font = doc
            .add_external_font(Cursor::new(self.font.data().to_vec()))
            .map_err(|err| anyhow!("failed to embed font: {}", err))?;
        self.embedded_font = Some(font.clone());
        Ok(font)
    }
}

struct LayerSink<'a> {
    layer: &'a PdfLayerReference,
    font: &'a IndirectFontRef,
}

impl TextSink for LayerSink<'_> {
    fn draw_text(&mut self, run: &TextRun) {
        let layer = self.layer;
        layer.begin_text_section();
        layer.set_font(self.font, run.font_size as f32);
        layer.set_text_scaling(run.horizontal_scale as f32);
        if run.invisible {
            layer.set_text_rendering_mode(TextRenderingMode::Invisible);
        } else {
            layer.set_text_rendering_mode(TextRenderingMode::Fill);
            layer.set_fill_color(Color::Rgb(Rgb::new(1.0, 0.0, 0.0, None)));
        }
        layer.set_text_cursor(pt_to_mm(run.x), pt_to_mm(run.y));
        layer.write_text(run.text.as_str(), self.font);
        layer.end_text_section();
    }
}

fn pt_to_mm(pt: f64) -> Mm {
    Mm((pt * 25.4 / 72.0) as f32)
}

/// Baseline and progressive JPEGs with one or three components are embedded
/// as they are; everything else is decoded to 8-bit grey or RGB pixels.
fn page_image(bytes: Vec<u8>) -> Result<ImageXObject> {
    if infer::image::is_jpeg(&bytes) {
        match jpeg_frame(&bytes) {
            Some(frame) if frame.width > 0 && frame.height > 0 => {
                let color_space = match frame.components {
                    1 => Some(ColorSpace::Greyscale),
                    3 => Some(ColorSpace::Rgb),
                    _ => None,
                };
                if let Some(color_space) = color_space {
                    return Ok(ImageXObject {
                        width: Px(usize::from(frame.width)),
                        height: Px(usize::from(frame.height)),
                        color_space,
                        bits_per_component: ColorBits::Bit8,
                        interpolate: true,
                        image_data: bytes,
                        image_filter: Some(ImageFilter::DCT),
                        clipping_bbox: None,
                    });
                }
                debug!("{}-component jpeg is re-encoded", frame.components);
            }
            _ => debug!("jpeg frame header not found, re-encoding"),
        }
    }
    let image = printpdf::image_crate::load_from_memory(&bytes)?;
    Ok(pixels(image))
}

fn pixels(image: DynamicImage) -> ImageXObject {
    let image = match image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => {
            DynamicImage::ImageLuma8(image.to_luma8())
        }
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };
    ImageXObject::from_dynamic_image(&image)
}

#[derive(Debug, PartialEq)]
struct JpegFrame {
    width: u16,
    height: u16,
    components: u8,
}

/// First 8-bit SOF0/1/2 segment of a JPEG stream.
fn jpeg_frame(bytes: &[u8]) -> Option<JpegFrame> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]));
        match marker {
            0xC0..=0xC2 => {
                let segment = bytes.get(pos + 4..pos + 10)?;
                if segment[0] != 8 {
                    return None;
                }
                return Some(JpegFrame {
                    height: u16::from_be_bytes([segment[1], segment[2]]),
                    width: u16::from_be_bytes([segment[3], segment[4]]),
                    components: segment[5],
                });
            }
            0x01 | 0xD0..=0xD8 => pos += 2,
            0xD9 | 0xDA => return None,
            _ => pos += 2 + length,
        }
    }
    None
}
