#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    if let Some(old) = old_home {
        unsafe { std::env::set_var("HOME", old) };
    } else {
        unsafe { std::env::remove_var("HOME") };
    }
    result
}

#[cfg(test)]
pub(crate) use fixtures::*;

#[cfg(test)]
mod fixtures {
    use crate::annotation::{
        BoundingPoly, DetectedLanguage, RawBlock, RawPage, RawParagraph, RawSymbol, RawWord,
        TextProperty, Vertex,
    };

    pub(crate) fn poly(points: &[(i64, i64)]) -> BoundingPoly {
        BoundingPoly {
            vertices: points
                .iter()
                .map(|(x, y)| Vertex {
                    x: Some(*x),
                    y: Some(*y),
                })
                .collect(),
        }
    }

    pub(crate) fn rect(x0: i64, y0: i64, x1: i64, y1: i64) -> BoundingPoly {
        poly(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    /// One symbol per character.
    pub(crate) fn word(text: &str, bbox: (i64, i64, i64, i64)) -> RawWord {
        RawWord {
            bounding_box: rect(bbox.0, bbox.1, bbox.2, bbox.3),
            symbols: text
                .chars()
                .map(|ch| RawSymbol {
                    text: ch.to_string(),
                    confidence: None,
                })
                .collect(),
            confidence: Some(0.9),
        }
    }

    pub(crate) fn paragraph(words: Vec<RawWord>) -> RawParagraph {
        RawParagraph {
            bounding_box: BoundingPoly::default(),
            words,
            confidence: Some(0.9),
        }
    }

    pub(crate) fn block(paragraphs: Vec<RawParagraph>) -> RawBlock {
        RawBlock {
            bounding_box: BoundingPoly::default(),
            paragraphs,
            confidence: None,
        }
    }

    pub(crate) fn page(width: u32, height: u32, blocks: Vec<RawBlock>) -> RawPage {
        RawPage {
            property: Some(TextProperty {
                detected_languages: vec![DetectedLanguage {
                    language_code: "en".to_string(),
                    confidence: Some(1.0),
                }],
            }),
            width,
            height,
            blocks,
            confidence: None,
        }
    }
}
