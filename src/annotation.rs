//! Serde model of a Cloud Vision `AnnotateImageResponse`.
//!
//! Only the parts of `fullTextAnnotation` the layout pipeline reads are
//! modelled; unknown fields are ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationFile {
    #[serde(default)]
    pub responses: Option<Vec<Option<ImageResponse>>>,
    #[serde(default)]
    pub full_text_annotation: Option<FullTextAnnotation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    #[serde(default)]
    pub full_text_annotation: Option<FullTextAnnotation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FullTextAnnotation {
    #[serde(default)]
    pub pages: Vec<RawPage>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub property: Option<TextProperty>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub blocks: Vec<RawBlock>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextProperty {
    #[serde(default)]
    pub detected_languages: Vec<DetectedLanguage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLanguage {
    #[serde(default)]
    pub language_code: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    #[serde(default)]
    pub bounding_box: BoundingPoly,
    #[serde(default)]
    pub paragraphs: Vec<RawParagraph>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParagraph {
    #[serde(default)]
    pub bounding_box: BoundingPoly,
    #[serde(default)]
    pub words: Vec<RawWord>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWord {
    #[serde(default)]
    pub bounding_box: BoundingPoly,
    #[serde(default)]
    pub symbols: Vec<RawSymbol>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSymbol {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

/// Vision omits a coordinate entirely when it is zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub y: Option<i64>,
}

impl AnnotationFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).with_context(|| "failed to parse OCR annotation JSON")
    }

    /// Pages of the first response, or an empty list when nothing was detected.
    pub fn into_pages(self) -> Vec<RawPage> {
        match self.responses {
            Some(responses) => responses
                .into_iter()
                .next()
                .flatten()
                .and_then(|response| response.full_text_annotation)
                .map(|annotation| annotation.pages)
                .unwrap_or_default(),
            None => self
                .full_text_annotation
                .map(|annotation| annotation.pages)
                .unwrap_or_default(),
        }
    }
}

pub fn load_raw_pages(path: &Path) -> Result<Vec<RawPage>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read annotation: {}", path.display()))?;
    Ok(AnnotationFile::from_json(&json)
        .with_context(|| format!("invalid annotation: {}", path.display()))?
        .into_pages())
}
