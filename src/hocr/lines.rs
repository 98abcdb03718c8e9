use super::bbox::BBox;
use super::model::{Line, Word};

pub const DEFAULT_LINE_TOLERANCE: u32 = 5;

/// Groups a paragraph's words into lines by comparing each word's bottom edge
/// with the previous word's. Single pass, detection order, no regrouping.
pub fn segment_lines(words: &[Word], tolerance: u32) -> Vec<Line> {
    let mut groups: Vec<Vec<Word>> = Vec::new();
    // `None` forces a new line, whatever the previous paragraph ended on.
    let mut last_baseline: Option<i64> = None;

    for word in words {
        let baseline = i64::from(word.bbox.y1);
        let starts_line = match last_baseline {
            Some(last) => (last - baseline).abs() >= i64::from(tolerance),
            None => true,
        };
        match groups.last_mut() {
            Some(current) if !starts_line => current.push(word.clone()),
            _ => groups.push(vec![word.clone()]),
        }
        last_baseline = Some(baseline);
    }

    groups
        .into_iter()
        .map(|words| Line {
            bbox: BBox::union_all(words.iter().map(|word| &word.bbox)).unwrap_or_default(),
            words,
        })
        .collect()
}
