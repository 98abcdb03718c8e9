//! Word placement for the text layer.
//!
//! Every `ocrx_word` of a parsed hOCR page becomes one text run whose font size
//! follows the word height and whose horizontal scale stretches the measured
//! glyph run to the word's box width. Coordinates are PDF points with the
//! origin at the bottom-left of the page.

use tracing::debug;

use crate::hocr::{MarkupLine, MarkupPage, MarkupWord};

use super::font::TextMeasure;

pub const POINTS_PER_INCH: f64 = 72.0;
pub const MIN_FONT_SIZE: f64 = 8.0;
/// Words at least this tall (in points) are treated as detection noise.
pub const MAX_WORD_HEIGHT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayerOptions {
    pub font_size_ratio: f64,
    /// Horizontal scale applied on top of the fitted stretch, in percent.
    pub width_ratio: f64,
    pub skip_single_char: bool,
    pub invisible: bool,
}

impl Default for TextLayerOptions {
    fn default() -> Self {
        Self {
            font_size_ratio: 1.0,
            width_ratio: 100.0,
            skip_single_char: false,
            invisible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
    pub dpi: f64,
}

impl PageGeometry {
    /// Sizes a page so that the image height maps to `page_height_in` inches.
    pub fn for_image(width_px: u32, height_px: u32, page_height_in: f64) -> Self {
        let dpi = f64::from(height_px) / page_height_in;
        Self {
            width_pt: f64::from(width_px) / dpi * POINTS_PER_INCH,
            height_pt: page_height_in * POINTS_PER_INCH,
            dpi,
        }
    }

    pub fn pt_ratio(&self) -> f64 {
        POINTS_PER_INCH / self.dpi
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    /// Percent, as consumed by the PDF `Tz` operator.
    pub horizontal_scale: f64,
    pub invisible: bool,
}

pub trait TextSink {
    fn draw_text(&mut self, run: &TextRun);
}

impl TextSink for Vec<TextRun> {
    fn draw_text(&mut self, run: &TextRun) {
        self.push(run.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Empty,
    SingleChar,
    TooTall,
    ZeroWidth,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeStats {
    pub drawn: usize,
    pub empty: usize,
    pub single_char: usize,
    pub too_tall: usize,
    pub zero_width: usize,
}

impl ComposeStats {
    pub fn skipped(&self) -> usize {
        self.empty + self.single_char + self.too_tall + self.zero_width
    }

    fn count(&mut self, skip: Skip) {
        match skip {
            Skip::Empty => self.empty += 1,
            Skip::SingleChar => self.single_char += 1,
            Skip::TooTall => self.too_tall += 1,
            Skip::ZeroWidth => self.zero_width += 1,
        }
    }
}

pub fn compose<M, S>(
    page: &MarkupPage,
    geometry: &PageGeometry,
    options: &TextLayerOptions,
    measure: &M,
    sink: &mut S,
) -> ComposeStats
where
    M: TextMeasure + ?Sized,
    S: TextSink + ?Sized,
{
    let mut stats = ComposeStats::default();
    for line in &page.lines {
        for word in &line.words {
            match place_word(line, word, geometry, options, measure) {
                Ok(run) => {
                    sink.draw_text(&run);
                    stats.drawn += 1;
                }
                Err(skip) => {
                    debug!("skip word '{}': {:?}", word.text, skip);
                    stats.count(skip);
                }
            }
        }
    }
    stats
}

pub fn place_word<M>(
    line: &MarkupLine,
    word: &MarkupWord,
    geometry: &PageGeometry,
    options: &TextLayerOptions,
    measure: &M,
) -> Result<TextRun, Skip>
where
    M: TextMeasure + ?Sized,
{
    let text = word.text.trim();
    if text.is_empty() {
        return Err(Skip::Empty);
    }
    if options.skip_single_char && text.chars().count() == 1 {
        return Err(Skip::SingleChar);
    }

    let pt_ratio = geometry.pt_ratio();
    let [x0, y0, x1, y1] = word.bbox;
    let word_height = (y1 - y0) * pt_ratio;
    if word_height >= MAX_WORD_HEIGHT {
        return Err(Skip::TooTall);
    }
    let font_size = (word_height * options.font_size_ratio).max(MIN_FONT_SIZE);
    let measured = f64::from(measure.text_width(text, font_size as f32));
    if measured <= 0.0 {
        return Err(Skip::ZeroWidth);
    }

    let [line_x0, _, _, line_y1] = line.bbox;
    let mid_x = (x0 + x1) / 2.0;
    let baseline = line.baseline.slope * (mid_x - line_x0) + line.baseline.intercept + line_y1;
    let box_width = (x1 - x0) * pt_ratio;

    Ok(TextRun {
        text: text.to_string(),
        x: x0 * pt_ratio,
        y: geometry.height_pt - baseline * pt_ratio + (word_height - font_size) / 2.0,
        font_size,
        horizontal_scale: box_width / measured * options.width_ratio,
        invisible: options.invisible,
    })
}
