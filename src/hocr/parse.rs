use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;

use super::descriptor::{Baseline, parse_title};

/// Line geometry and words read back from hOCR markup.
#[derive(Debug, Clone, Default)]
pub struct MarkupPage {
    pub lines: Vec<MarkupLine>,
}

#[derive(Debug, Clone)]
pub struct MarkupLine {
    pub bbox: [f64; 4],
    pub baseline: Baseline,
    pub words: Vec<MarkupWord>,
}

#[derive(Debug, Clone)]
pub struct MarkupWord {
    pub bbox: [f64; 4],
    pub text: String,
    pub conf: Option<f64>,
}

impl MarkupPage {
    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|line| line.words.len()).sum()
    }
}

// Tesseract emits these as siblings of ocr_line.
const LINE_CLASSES: &[&str] = &["ocr_line", "ocr_header", "ocr_caption", "ocr_textfloat"];
const WORD_CLASS: &str = "ocrx_word";

enum Frame {
    Line,
    Word,
    Other,
}

/// Reads an hOCR file; `Ok(None)` when it does not exist.
pub fn load_markup(path: &Path) -> Result<Option<MarkupPage>> {
    if !path.exists() {
        return Ok(None);
    }
    let markup = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read hOCR: {}", path.display()))?;
    parse_markup(&markup)
        .with_context(|| format!("invalid hOCR: {}", path.display()))
        .map(Some)
}

pub fn parse_markup(markup: &str) -> Result<MarkupPage> {
    let mut reader = Reader::from_str(markup);
    reader.trim_text(true);

    let mut page = MarkupPage::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut line: Option<MarkupLine> = None;
    let mut word: Option<MarkupWord> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let frame = classify(&start)?;
                match frame {
                    Frame::Line => {
                        let title = title_of(&start)?;
                        let props = parse_title(&title)?;
                        let bbox = props
                            .bbox
                            .ok_or_else(|| anyhow!("ocr_line without bbox: '{}'", title))?;
                        line = Some(MarkupLine {
                            bbox,
                            baseline: props.baseline.unwrap_or(Baseline::FLAT),
                            words: Vec::new(),
                        });
                    }
                    Frame::Word => {
                        let title = title_of(&start)?;
                        let props = parse_title(&title)?;
                        let bbox = props
                            .bbox
                            .ok_or_else(|| anyhow!("ocrx_word without bbox: '{}'", title))?;
                        word = Some(MarkupWord {
                            bbox,
                            text: String::new(),
                            conf: props.x_wconf,
                        });
                    }
                    Frame::Other => {}
                }
                stack.push(frame);
            }
            Ok(Event::Text(text)) => {
                if let Some(current) = word.as_mut() {
                    let decoded = text
                        .unescape()
                        .with_context(|| "failed to decode hOCR word text")?;
                    current.text.push_str(&decoded);
                }
            }
            Ok(Event::End(_)) => match stack.pop() {
                Some(Frame::Word) => {
                    if let (Some(mut finished), Some(current)) = (word.take(), line.as_mut()) {
                        finished.text = finished.text.trim().to_string();
                        current.words.push(finished);
                    }
                }
                Some(Frame::Line) => {
                    if let Some(finished) = line.take() {
                        page.lines.push(finished);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(anyhow!(
                    "failed to parse hOCR at byte {}: {}",
                    reader.buffer_position(),
                    err
                ));
            }
        }
    }

    Ok(page)
}

fn classify(start: &BytesStart<'_>) -> Result<Frame> {
    let Some(attr) = start
        .try_get_attribute("class")
        .with_context(|| "malformed hOCR attribute")?
    else {
        return Ok(Frame::Other);
    };
    let class = attr
        .unescape_value()
        .with_context(|| "failed to decode hOCR class")?;
    let mut classes = class.split_whitespace();
    if classes.clone().any(|name| name == WORD_CLASS) {
        return Ok(Frame::Word);
    }
    if classes.any(|name| LINE_CLASSES.contains(&name)) {
        return Ok(Frame::Line);
    }
    Ok(Frame::Other)
}

fn title_of(start: &BytesStart<'_>) -> Result<String> {
    match start
        .try_get_attribute("title")
        .with_context(|| "malformed hOCR attribute")?
    {
        Some(attr) => Ok(attr
            .unescape_value()
            .with_context(|| "failed to decode hOCR title")?
            .into_owned()),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const TESSERACT_STYLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
 <head><title></title><meta name="ocr-system" content="tesseract"/></head>
 <body>
  <div class='ocr_page' id='page_1' title='image "a.png"; bbox 0 0 640 480; ppageno 0'>
   <div class='ocr_carea' id='block_1_1' title="bbox 36 92 580 122">
    <p class='ocr_par' id='par_1_1' lang='eng' title="bbox 36 92 580 122">
     <span class='ocr_line' id='line_1_1' title="bbox 36 92 580 122; baseline 0.005 -7; x_size 30">
      <span class='ocrx_word' id='word_1_1' title='bbox 36 92 96 116; x_wconf 96'>The</span>
      <span class='ocrx_word' id='word_1_2' title='bbox 109 92 wide 122'>  <strong>quick</strong> </span>
     </span>
     <span class='ocr_header' id='line_1_2' title="bbox 36 130 200 150">
      <span class='ocrx_word' id='word_1_3' title='bbox 36 130 200 150'>Fox&amp;Co</span>
     </span>
    </p>
   </div>
  </div>
 </body>
</html>
"#;

    #[test]
    fn malformed_word_descriptor_is_reported() {
        let err = parse_markup(TESSERACT_STYLE).expect_err("bad bbox");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Descriptor { property: "bbox", .. })
        ));
    }

    #[test]
    fn reads_lines_words_and_baselines() {
        let markup = TESSERACT_STYLE.replace("bbox 109 92 wide 122", "bbox 109 92 190 122");
        let page = parse_markup(&markup).expect("parse");
        assert_eq!(page.lines.len(), 2);
        let first = &page.lines[0];
        assert_eq!(first.bbox, [36.0, 92.0, 580.0, 122.0]);
        assert_eq!(first.baseline.slope, 0.005);
        assert_eq!(first.baseline.intercept, -7.0);
        let texts: Vec<&str> = first.words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["The", "quick"]);
        assert_eq!(first.words[0].conf, Some(96.0));

        let header = &page.lines[1];
        assert_eq!(header.baseline, Baseline::FLAT);
        assert_eq!(header.words[0].text, "Fox&Co");
        assert_eq!(page.word_count(), 3);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = load_markup(&dir.path().join("absent.hocr")).expect("load");
        assert!(loaded.is_none());
    }
}
