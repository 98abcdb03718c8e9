use serde::Serialize;

use crate::annotation::{RawBlock, RawPage, RawParagraph, RawWord};

use super::bbox::BBox;
use super::lines::segment_lines;

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub width: u32,
    pub height: u32,
    pub lang: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub id: u32,
    pub bbox: BBox,
    pub conf: u32,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paragraph {
    pub id: u32,
    pub bbox: BBox,
    pub conf: u32,
    pub words: Vec<Word>,
    pub lines: Vec<Line>,
}

/// Words sharing a baseline band. Derived from the paragraph, never detected.
#[derive(Debug, Clone, Serialize)]
pub struct Line {
    pub bbox: BBox,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Word {
    pub id: u32,
    pub bbox: BBox,
    pub conf: u32,
    pub text: String,
}

/// Per-page id sequences. Each kind counts independently from 1 and is never
/// reset by an enclosing container.
#[derive(Debug, Clone)]
pub struct PageCounters {
    block: u32,
    paragraph: u32,
    word: u32,
}

impl Default for PageCounters {
    fn default() -> Self {
        Self {
            block: 1,
            paragraph: 1,
            word: 1,
        }
    }
}

impl PageCounters {
    fn next_block(&mut self) -> u32 {
        next(&mut self.block)
    }

    fn next_paragraph(&mut self) -> u32 {
        next(&mut self.paragraph)
    }

    fn next_word(&mut self) -> u32 {
        next(&mut self.word)
    }
}

fn next(counter: &mut u32) -> u32 {
    let id = *counter;
    *counter += 1;
    id
}

pub fn build_pages(raw_pages: &[RawPage], line_tolerance: u32) -> Vec<Page> {
    raw_pages
        .iter()
        .map(|page| build_page(page, line_tolerance))
        .collect()
}

pub fn build_page(raw: &RawPage, line_tolerance: u32) -> Page {
    let mut counters = PageCounters::default();
    let lang = raw
        .property
        .as_ref()
        .and_then(|property| property.detected_languages.first())
        .map(|language| language.language_code.trim())
        .filter(|code| !code.is_empty())
        .unwrap_or("en")
        .to_string();
    let blocks = raw
        .blocks
        .iter()
        .map(|block| build_block(block, &mut counters, line_tolerance))
        .collect();
    Page {
        width: raw.width,
        height: raw.height,
        lang,
        blocks,
    }
}

fn build_block(raw: &RawBlock, counters: &mut PageCounters, line_tolerance: u32) -> Block {
    let id = counters.next_block();
    let paragraphs: Vec<Paragraph> = raw
        .paragraphs
        .iter()
        .map(|paragraph| build_paragraph(paragraph, counters, line_tolerance))
        .collect();
    let bbox = BBox::union_all(paragraphs.iter().map(|paragraph| &paragraph.bbox))
        .unwrap_or_else(|| BBox::from_poly(&raw.bounding_box));
    Block {
        id,
        bbox,
        conf: confidence(raw.confidence),
        paragraphs,
    }
}

fn build_paragraph(
    raw: &RawParagraph,
    counters: &mut PageCounters,
    line_tolerance: u32,
) -> Paragraph {
    let id = counters.next_paragraph();
    let words: Vec<Word> = raw
        .words
        .iter()
        .map(|word| build_word(word, counters))
        .collect();
    let lines = segment_lines(&words, line_tolerance);
    // from the words, not the lines
    let bbox = BBox::union_all(words.iter().map(|word| &word.bbox))
        .unwrap_or_else(|| BBox::from_poly(&raw.bounding_box));
    Paragraph {
        id,
        bbox,
        conf: confidence(raw.confidence),
        words,
        lines,
    }
}

fn build_word(raw: &RawWord, counters: &mut PageCounters) -> Word {
    let id = counters.next_word();
    let text = raw
        .symbols
        .iter()
        .map(|symbol| symbol.text.as_str())
        .collect::<String>();
    Word {
        id,
        bbox: BBox::from_poly(&raw.bounding_box),
        conf: confidence(raw.confidence),
        text,
    }
}

fn confidence(fraction: Option<f64>) -> u32 {
    fraction
        .map(|value| (value * 100.0).round().clamp(0.0, 100.0) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{block, page, paragraph, word};

    fn two_block_page() -> RawPage {
        page(
            1000,
            1500,
            vec![
                block(vec![
                    paragraph(vec![
                        word("Hello", (10, 100, 60, 120)),
                        word("world", (70, 101, 130, 122)),
                    ]),
                    paragraph(vec![word("Next", (10, 200, 50, 220))]),
                ]),
                block(vec![paragraph(vec![
                    word("Second", (300, 400, 380, 430)),
                    word("block", (390, 402, 450, 431)),
                    word("here", (10, 500, 60, 530)),
                ])]),
            ],
        )
    }

    #[test]
    fn ids_are_page_scoped_and_continuous() {
        let built = build_page(&two_block_page(), 5);
        let block_ids: Vec<u32> = built.blocks.iter().map(|b| b.id).collect();
        assert_eq!(block_ids, vec![1, 2]);

        let paragraph_ids: Vec<u32> = built
            .blocks
            .iter()
            .flat_map(|b| b.paragraphs.iter().map(|p| p.id))
            .collect();
        assert_eq!(paragraph_ids, vec![1, 2, 3]);

        let word_ids: Vec<u32> = built
            .blocks
            .iter()
            .flat_map(|b| b.paragraphs.iter())
            .flat_map(|p| p.words.iter().map(|w| w.id))
            .collect();
        assert_eq!(word_ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn counters_restart_on_each_page() {
        let pages = build_pages(&[two_block_page(), two_block_page()], 5);
        assert_eq!(pages[1].blocks[0].id, 1);
        assert_eq!(pages[1].blocks[0].paragraphs[0].words[0].id, 1);
    }

    #[test]
    fn word_text_joins_symbols_without_separator() {
        let built = build_page(&two_block_page(), 5);
        let texts: Vec<&str> = built.blocks[0].paragraphs[0]
            .words
            .iter()
            .map(|w| w.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Hello", "world"]);
    }

    #[test]
    fn container_boxes_envelope_their_children() {
        let built = build_page(&two_block_page(), 5);
        let first = &built.blocks[0];
        assert_eq!(first.paragraphs[0].bbox, BBox::new(10, 100, 130, 122));
        assert_eq!(first.paragraphs[1].bbox, BBox::new(10, 200, 50, 220));
        assert_eq!(first.bbox, BBox::new(10, 100, 130, 220));

        for block in &built.blocks {
            let expected = BBox::union_all(block.paragraphs.iter().map(|p| &p.bbox));
            assert_eq!(Some(block.bbox), expected);
            for paragraph in &block.paragraphs {
                let expected = BBox::union_all(paragraph.words.iter().map(|w| &w.bbox));
                assert_eq!(Some(paragraph.bbox), expected);
                for line in &paragraph.lines {
                    let expected = BBox::union_all(line.words.iter().map(|w| &w.bbox));
                    assert_eq!(Some(line.bbox), expected);
                }
            }
        }
    }

    #[test]
    fn lines_are_segmented_per_paragraph() {
        let built = build_page(&two_block_page(), 5);
        let second = &built.blocks[1].paragraphs[0];
        assert_eq!(second.lines.len(), 2);
        assert_eq!(second.lines[0].words.len(), 2);
        assert_eq!(second.lines[1].words[0].text, "here");
    }

    #[test]
    fn confidence_is_rounded_percentage() {
        assert_eq!(confidence(Some(0.987)), 99);
        assert_eq!(confidence(Some(0.5)), 50);
        assert_eq!(confidence(None), 0);
    }

    #[test]
    fn language_falls_back_to_english() {
        let mut raw = two_block_page();
        raw.property = None;
        assert_eq!(build_page(&raw, 5).lang, "en");
    }

    #[test]
    fn single_word_page_tree() {
        let raw = page(200, 100, vec![block(vec![paragraph(vec![word("Hi", (10, 20, 40, 50))])])]);
        insta::assert_json_snapshot!(build_page(&raw, 5), @r#"
        {
          "width": 200,
          "height": 100,
          "lang": "en",
          "blocks": [
            {
              "id": 1,
              "bbox": {
                "x0": 10,
                "y0": 20,
                "x1": 40,
                "y1": 50
              },
              "conf": 0,
              "paragraphs": [
                {
                  "id": 1,
                  "bbox": {
                    "x0": 10,
                    "y0": 20,
                    "x1": 40,
                    "y1": 50
                  },
                  "conf": 90,
                  "words": [
                    {
                      "id": 1,
                      "bbox": {
                        "x0": 10,
                        "y0": 20,
                        "x1": 40,
                        "y1": 50
                      },
                      "conf": 90,
                      "text": "Hi"
                    }
                  ],
                  "lines": [
                    {
                      "bbox": {
                        "x0": 10,
                        "y0": 20,
                        "x1": 40,
                        "y1": 50
                      },
                      "words": [
                        {
                          "id": 1,
                          "bbox": {
                            "x0": 10,
                            "y0": 20,
                            "x1": 40,
                            "y1": 50
                          },
                          "conf": 90,
                          "text": "Hi"
                        }
                      ]
                    }
                  ]
                }
              ]
            }
          ]
        }
        "#);
    }
}
