//! Annotation → hOCR: the typed page model, line reconstruction, bounding box
//! aggregation and the markup written for (and read back by) the text layer.

mod bbox;
mod descriptor;
mod lines;
mod markup;
mod model;
mod parse;

pub use bbox::BBox;
pub use descriptor::{Baseline, TitleProps, format_baseline, format_bbox, parse_title};
pub use lines::{DEFAULT_LINE_TOLERANCE, segment_lines};
pub use markup::{fit_baseline, serialize_annotation, serialize_page};
pub use model::{Block, Line, Page, PageCounters, Paragraph, Word, build_page, build_pages};
pub use parse::{MarkupLine, MarkupPage, MarkupWord, load_markup, parse_markup};

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::annotation;

pub enum HocrOutcome {
    Written,
    NoPages,
}

/// Converts one annotation JSON file into an hOCR file.
pub fn convert_annotation_file(
    json_path: &Path,
    hocr_path: &Path,
    line_tolerance: u32,
) -> Result<HocrOutcome> {
    let raw_pages = annotation::load_raw_pages(json_path)?;
    let pages = build_pages(&raw_pages, line_tolerance);
    let title = hocr_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("page");
    let Some(markup) = serialize_annotation(&pages, title)
        .with_context(|| format!("cannot lay out {}", json_path.display()))?
    else {
        info!("{} no pages", hocr_path.display());
        return Ok(HocrOutcome::NoPages);
    };
    std::fs::write(hocr_path, markup)
        .with_context(|| format!("failed to write hOCR: {}", hocr_path.display()))?;
    info!("create {}", hocr_path.display());
    Ok(HocrOutcome::Written)
}
