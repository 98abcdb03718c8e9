//! The one Unicode font of the text layer: measured here, embedded by
//! [`super::document::PdfBook`]. printpdf embeds the first face of a
//! collection, so that is also the face every width is measured with.

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

/// Families tried in order when no font is configured.
pub const FALLBACK_FAMILIES: &[&str] = &[
    "Noto Sans CJK JP",
    "Source Han Sans",
    "Arial Unicode MS",
    "Noto Sans",
    "DejaVu Sans",
    "sans-serif",
];

/// Width of `text` in points at `font_size`.
pub trait TextMeasure {
    fn text_width(&self, text: &str, font_size: f32) -> f32;
}

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    /// Advance used for spaces and for characters the font has no glyph for.
    default_advance: u16,
    family: Option<String>,
}

impl FontMetrics {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let face = Face::parse(&data, 0).map_err(|err| anyhow!("failed to parse font data: {}", err))?;
        let units_per_em = face.units_per_em().max(1);
        let default_advance = face
            .glyph_index(' ')
            .and_then(|glyph| face.glyph_hor_advance(glyph))
            .unwrap_or(units_per_em / 2);
        let family = family_name(&face);
        Ok(Self {
            units_per_em,
            default_advance,
            family,
            data: Arc::new(data),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("unusable font: {}", path.display()))
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Metrics without font data; widths fall back to the per-script estimate.
    #[cfg(test)]
    pub(crate) fn unparsed() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            units_per_em: 1000,
            default_advance: 250,
            family: None,
        }
    }

    fn advance_units(&self, face: &Face<'_>, ch: char) -> u32 {
        let advance = face
            .glyph_index(ch)
            .and_then(|glyph| face.glyph_hor_advance(glyph))
            .unwrap_or(self.default_advance);
        u32::from(advance)
    }
}

impl TextMeasure for FontMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = Face::parse(&self.data, 0) else {
            return estimated_em_width(text) * font_size;
        };
        let units: u32 = text
            .chars()
            .filter(|ch| !ch.is_control())
            .map(|ch| self.advance_units(&face, ch))
            .sum();
        units as f32 * font_size / f32::from(self.units_per_em)
    }
}

/// Em-width guess by script, for fonts that cannot be parsed.
fn estimated_em_width(text: &str) -> f32 {
    text.chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| match ch {
            ' ' => 0.25,
            _ if ch.is_ascii_alphanumeric() => 0.55,
            _ if ch.is_ascii() => 0.35,
            '\u{3040}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' | '\u{4E00}'..='\u{9FFF}' => 1.0,
            _ => 0.9,
        })
        .sum()
}

pub struct ResolvedFont {
    pub metrics: FontMetrics,
    pub family: String,
}

/// Picks the text layer font: the configured file, else the configured
/// system family, else the first installed fallback family. A configured
/// font that cannot be loaded is an error, not a reason to fall back.
pub fn resolve_text_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[&str],
) -> Result<ResolvedFont> {
    if let Some(path) = font_path {
        let metrics = FontMetrics::from_file(path)?;
        let family = metrics
            .family()
            .or(font_family)
            .unwrap_or("unnamed")
            .to_string();
        return Ok(ResolvedFont { metrics, family });
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(family) = font_family {
        return system_font(&db, family);
    }
    fallback
        .iter()
        .find_map(|family| match system_font(&db, family) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                debug!("{}", err);
                None
            }
        })
        .ok_or_else(|| {
            anyhow!(
                "no text layer font found (tried: {}); set [text_layer] font_path",
                fallback.join(", ")
            )
        })
}

fn system_font(db: &fontdb::Database, family: &str) -> Result<ResolvedFont> {
    let families = [if family.eq_ignore_ascii_case("sans-serif") {
        fontdb::Family::SansSerif
    } else {
        fontdb::Family::Name(family)
    }];
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not installed: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    if index != 0 {
        warn!(
            "'{}' is face {} of a collection; the first face is embedded instead",
            family, index
        );
    }
    let metrics = FontMetrics::from_bytes(data)
        .with_context(|| format!("unusable system font: {}", family))?;
    let resolved = metrics.family().unwrap_or(family).to_string();
    Ok(ResolvedFont {
        metrics,
        family: resolved,
    })
}

/// Typographic family when present, else the legacy family name.
fn family_name(face: &Face<'_>) -> Option<String> {
    let lookup = |id: u16| {
        face.names()
            .into_iter()
            .filter(|name| name.name_id == id)
            .find_map(|name| name.to_string())
    };
    lookup(name_id::TYPOGRAPHIC_FAMILY).or_else(|| lookup(name_id::FAMILY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_font_size() {
        let font = FontMetrics::unparsed();
        let at_ten = font.text_width("OK", 10.0);
        assert!((at_ten - 11.0).abs() < 1e-4);
        assert!((font.text_width("OK", 20.0) - 2.0 * at_ten).abs() < 1e-4);
    }

    #[test]
    fn estimate_gives_kana_and_kanji_full_width() {
        let font = FontMetrics::unparsed();
        assert!((font.text_width("漢字かな", 10.0) - 40.0).abs() < 1e-4);
    }

    #[test]
    fn garbage_font_data_is_rejected() {
        assert!(FontMetrics::from_bytes(b"not a font".to_vec()).is_err());
    }

    #[test]
    fn configured_font_file_must_load() {
        let err = resolve_text_font(Some(Path::new("/nonexistent/font.ttf")), None, &[])
            .err()
            .expect("missing font");
        assert!(err.to_string().contains("failed to read font"));
    }
}
