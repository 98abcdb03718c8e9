//! hOCR + page image → PDF with an aligned text layer.

pub mod compositor;
pub mod document;
pub mod font;

pub use compositor::{
    ComposeStats, PageGeometry, Skip, TextLayerOptions, TextRun, TextSink, compose, place_word,
};
pub use document::{PageReport, PdfBook};
pub use font::{FALLBACK_FAMILIES, FontMetrics, ResolvedFont, TextMeasure, resolve_text_font};
