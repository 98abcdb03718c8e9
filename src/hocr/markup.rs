use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::Error;

use super::descriptor::{Baseline, format_baseline, format_bbox};
use super::model::{Line, Page};

const DOCTYPE: &str = r#"html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd""#;
const CAPABILITIES: &str = "ocr_page ocr_carea ocr_par ocr_line ocrx_word";

/// Serializes the single page of an annotation.
///
/// `Ok(None)` when there is nothing to draw (no page, or a page without
/// blocks); more than one page is rejected.
pub fn serialize_annotation(pages: &[Page], title: &str) -> Result<Option<String>> {
    if pages.len() > 1 {
        return Err(Error::MultiPageNotSupported(pages.len()).into());
    }
    match pages.first() {
        Some(page) if !page.blocks.is_empty() => serialize_page(page, title).map(Some),
        _ => Ok(None),
    }
}

pub fn serialize_page(page: &Page, title: &str) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write(&mut writer, Event::DocType(BytesText::from_escaped(DOCTYPE)))?;

    let mut html = BytesStart::new("html");
    html.push_attribute(("xmlns", "http://www.w3.org/1999/xhtml"));
    html.push_attribute(("xml:lang", page.lang.as_str()));
    html.push_attribute(("lang", page.lang.as_str()));
    write(&mut writer, Event::Start(html))?;

    write(&mut writer, Event::Start(BytesStart::new("head")))?;
    write(&mut writer, Event::Start(BytesStart::new("title")))?;
    write(&mut writer, Event::Text(BytesText::new(title)))?;
    write(&mut writer, Event::End(BytesEnd::new("title")))?;
    write_meta(&mut writer, "http-equiv", "Content-Type", "text/html;charset=utf-8")?;
    write_meta(&mut writer, "name", "ocr-system", env!("CARGO_PKG_NAME"))?;
    write_meta(&mut writer, "name", "ocr-capabilities", CAPABILITIES)?;
    write(&mut writer, Event::End(BytesEnd::new("head")))?;

    write(&mut writer, Event::Start(BytesStart::new("body")))?;
    let page_title = format!(
        "image \"{}\"; bbox 0 0 {} {}; ppageno 0",
        title, page.width, page.height
    );
    write(
        &mut writer,
        Event::Start(element("div", "ocr_page", Some("page_1"), &page_title)),
    )?;

    for block in &page.blocks {
        let id = format!("block_{}", block.id);
        write(
            &mut writer,
            Event::Start(element("div", "ocr_carea", Some(&id), &format_bbox(&block.bbox))),
        )?;
        for paragraph in &block.paragraphs {
            let id = format!("par_{}", paragraph.id);
            let par_title = format_bbox(&paragraph.bbox);
            let mut par = element("p", "ocr_par", Some(&id), &par_title);
            par.push_attribute(("lang", page.lang.as_str()));
            write(&mut writer, Event::Start(par))?;
            for (index, line) in paragraph.lines.iter().enumerate() {
                let id = format!("line_{}_{}", paragraph.id, index + 1);
                let line_title = format!(
                    "{}; {}",
                    format_bbox(&line.bbox),
                    format_baseline(&fit_baseline(line))
                );
                write(
                    &mut writer,
                    Event::Start(element("span", "ocr_line", Some(&id), &line_title)),
                )?;
                for word in &line.words {
                    let id = format!("word_{}", word.id);
                    let word_title = format!("{}; x_wconf {}", format_bbox(&word.bbox), word.conf);
                    write(
                        &mut writer,
                        Event::Start(element("span", "ocrx_word", Some(&id), &word_title)),
                    )?;
                    write(&mut writer, Event::Text(BytesText::new(&word.text)))?;
                    write(&mut writer, Event::End(BytesEnd::new("span")))?;
                }
                write(&mut writer, Event::End(BytesEnd::new("span")))?;
            }
            write(&mut writer, Event::End(BytesEnd::new("p")))?;
        }
        write(&mut writer, Event::End(BytesEnd::new("div")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("div")))?;
    write(&mut writer, Event::End(BytesEnd::new("body")))?;
    write(&mut writer, Event::End(BytesEnd::new("html")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).with_context(|| "hOCR output is not UTF-8")
}

/// Least-squares fit of the word bottoms against word mid-x, both relative to
/// the line's bottom-left corner. Flat when fewer than two words or when every
/// word shares the same mid-x.
pub fn fit_baseline(line: &Line) -> Baseline {
    if line.words.len() < 2 {
        return Baseline::FLAT;
    }
    let origin_x = f64::from(line.bbox.x0);
    let origin_y = f64::from(line.bbox.y1);
    let points: Vec<(f64, f64)> = line
        .words
        .iter()
        .map(|word| {
            let mid = (f64::from(word.bbox.x0) + f64::from(word.bbox.x1)) / 2.0;
            (mid - origin_x, f64::from(word.bbox.y1) - origin_y)
        })
        .collect();
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return Baseline::FLAT;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    Baseline {
        slope,
        intercept: mean_y - slope * mean_x,
    }
}

fn element<'a>(name: &'a str, class: &'a str, id: Option<&'a str>, title: &'a str) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    start.push_attribute(("class", class));
    if let Some(id) = id {
        start.push_attribute(("id", id));
    }
    start.push_attribute(("title", title));
    start
}

fn write_meta(writer: &mut Writer<Vec<u8>>, key: &str, value: &str, content: &str) -> Result<()> {
    let mut meta = BytesStart::new("meta");
    meta.push_attribute((key, value));
    meta.push_attribute(("content", content));
    write(writer, Event::Empty(meta))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .with_context(|| "failed to write hOCR markup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hocr::bbox::BBox;
    use crate::hocr::model::{Block, Paragraph, Word};
    use crate::hocr::segment_lines;

    fn word(id: u32, text: &str, bbox: BBox) -> Word {
        Word {
            id,
            bbox,
            conf: 97,
            text: text.to_string(),
        }
    }

    fn sample_page() -> Page {
        let words = vec![
            word(1, "Tom & Jerry", BBox::new(10, 10, 58, 40)),
            word(2, "<b>", BBox::new(70, 12, 120, 41)),
        ];
        let lines = segment_lines(&words, 5);
        Page {
            width: 200,
            height: 300,
            lang: "en".to_string(),
            blocks: vec![Block {
                id: 1,
                bbox: BBox::new(10, 10, 120, 41),
                conf: 0,
                paragraphs: vec![Paragraph {
                    id: 1,
                    bbox: BBox::new(10, 10, 120, 41),
                    conf: 0,
                    words,
                    lines,
                }],
            }],
        }
    }

    #[test]
    fn more_than_one_page_is_rejected() {
        let err = serialize_annotation(&[sample_page(), sample_page()], "p").expect_err("multi");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MultiPageNotSupported(2))
        ));
    }

    #[test]
    fn empty_input_serializes_to_nothing() {
        assert!(serialize_annotation(&[], "p").expect("empty").is_none());
        let mut page = sample_page();
        page.blocks.clear();
        assert!(serialize_annotation(&[page], "p").expect("blank").is_none());
    }

    #[test]
    fn markup_carries_classes_and_descriptors() {
        let markup = serialize_annotation(&[sample_page()], "001.jpg")
            .expect("serialize")
            .expect("markup");
        assert!(markup.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(markup.contains("class=\"ocr_page\""));
        assert!(markup.contains("bbox 0 0 200 300"));
        assert!(markup.contains("class=\"ocr_carea\" id=\"block_1\" title=\"bbox 10 10 120 41\""));
        assert!(markup.contains("class=\"ocr_line\" id=\"line_1_1\""));
        assert!(markup.contains("title=\"bbox 10 10 58 40; x_wconf 97\""));
        assert!(markup.contains("Tom &amp; Jerry"));
        assert!(markup.contains("&lt;b&gt;"));
    }

    #[test]
    fn single_word_line_has_flat_baseline() {
        let line = Line {
            bbox: BBox::new(0, 0, 10, 10),
            words: vec![word(1, "a", BBox::new(0, 0, 10, 10))],
        };
        assert_eq!(fit_baseline(&line), Baseline::FLAT);
    }

    #[test]
    fn sloped_words_fit_a_sloped_baseline() {
        // mid-x 10, 110, 210 with bottoms 100, 101, 102 inside a line ending at 102
        let words = vec![
            word(1, "a", BBox::new(0, 80, 20, 100)),
            word(2, "b", BBox::new(100, 81, 120, 101)),
            word(3, "c", BBox::new(200, 82, 220, 102)),
        ];
        let line = Line {
            bbox: BBox::new(0, 80, 220, 102),
            words,
        };
        let baseline = fit_baseline(&line);
        assert!((baseline.slope - 0.01).abs() < 1e-9);
        assert!((baseline.intercept - (-2.1)).abs() < 1e-9);
    }
}
