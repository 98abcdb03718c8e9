//! `title` attribute descriptors: `bbox X0 Y0 X1 Y1; baseline SLOPE INTERCEPT; x_wconf N`.
//!
//! Properties are `;`-separated, each a keyword followed by whitespace-separated
//! numbers. `bbox` and `baseline` have a fixed arity and must be numeric;
//! properties the layout never reads are skipped.

use crate::error::{Error, Result};

use super::bbox::BBox;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub slope: f64,
    pub intercept: f64,
}

impl Baseline {
    /// Flat line sitting on the bottom edge of the line box.
    pub const FLAT: Baseline = Baseline {
        slope: 0.0,
        intercept: 0.0,
    };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleProps {
    pub bbox: Option<[f64; 4]>,
    pub baseline: Option<Baseline>,
    pub x_wconf: Option<f64>,
}

pub fn parse_title(title: &str) -> Result<TitleProps> {
    let mut props = TitleProps::default();
    for property in title.split(';') {
        let mut tokens = property.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        match keyword {
            "bbox" => {
                let [x0, y0, x1, y1] = numbers::<4>("bbox", title, tokens)?;
                props.bbox = Some([x0, y0, x1, y1]);
            }
            "baseline" => {
                let [slope, intercept] = numbers::<2>("baseline", title, tokens)?;
                props.baseline = Some(Baseline { slope, intercept });
            }
            "x_wconf" => {
                let [conf] = numbers::<1>("x_wconf", title, tokens)?;
                props.x_wconf = Some(conf);
            }
            _ => {}
        }
    }
    Ok(props)
}

fn numbers<const N: usize>(
    property: &'static str,
    title: &str,
    tokens: std::str::SplitWhitespace<'_>,
) -> Result<[f64; N]> {
    let mut values = [0.0; N];
    let mut count = 0usize;
    for token in tokens {
        if count == N {
            return Err(Error::descriptor(
                property,
                title,
                format!("expected {N} numbers, found more"),
            ));
        }
        let value: f64 = token.parse().map_err(|_| {
            Error::descriptor(property, title, format!("'{token}' is not a number"))
        })?;
        if !value.is_finite() {
            return Err(Error::descriptor(
                property,
                title,
                format!("'{token}' is not finite"),
            ));
        }
        values[count] = value;
        count += 1;
    }
    if count != N {
        return Err(Error::descriptor(
            property,
            title,
            format!("expected {N} numbers, found {count}"),
        ));
    }
    Ok(values)
}

pub fn format_bbox(bbox: &BBox) -> String {
    format!("bbox {} {} {} {}", bbox.x0, bbox.y0, bbox.x1, bbox.y1)
}

pub fn format_baseline(baseline: &Baseline) -> String {
    format!(
        "baseline {} {}",
        format_number(baseline.slope),
        format_number(baseline.intercept)
    )
}

/// At most three decimals, no trailing zeros, never `-0`.
pub(crate) fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        return format!("{}", rounded as i64);
    }
    let text = format!("{:.3}", rounded);
    text.trim_end_matches('0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_title() {
        let props = parse_title("bbox 10 20 300 48; baseline 0.012 -3").expect("parse");
        assert_eq!(props.bbox, Some([10.0, 20.0, 300.0, 48.0]));
        assert_eq!(
            props.baseline,
            Some(Baseline {
                slope: 0.012,
                intercept: -3.0
            })
        );
        assert_eq!(props.x_wconf, None);
    }

    #[test]
    fn unknown_properties_are_ignored() {
        let props =
            parse_title("image \"p 1.jpg\"; bbox 0 0 100 200; ppageno 0; x_wconf 93").expect("parse");
        assert_eq!(props.bbox, Some([0.0, 0.0, 100.0, 200.0]));
        assert_eq!(props.x_wconf, Some(93.0));
    }

    #[test]
    fn missing_baseline_is_not_an_error() {
        let props = parse_title("bbox 1 2 3 4").expect("parse");
        assert_eq!(props.baseline, None);
    }

    #[test]
    fn wrong_arity_is_a_format_error() {
        for title in ["bbox 1 2 3", "bbox 1 2 3 4 5", "baseline 0.1", "bbox"] {
            let err = parse_title(title).expect_err(title);
            assert!(matches!(err, Error::Descriptor { .. }), "{title}");
        }
    }

    #[test]
    fn non_numeric_token_is_a_format_error() {
        let err = parse_title("bbox 1 2 x 4").expect_err("non numeric");
        assert!(err.to_string().contains("'x' is not a number"));
        assert!(parse_title("baseline NaN 0").is_err());
    }

    #[test]
    fn descriptors_format_compactly() {
        insta::assert_snapshot!(format_bbox(&BBox::new(10, 20, 300, 48)), @"bbox 10 20 300 48");
        insta::assert_snapshot!(format_baseline(&Baseline::FLAT), @"baseline 0 0");
        insta::assert_snapshot!(
            format_baseline(&Baseline { slope: 0.0126, intercept: -2.5 }),
            @"baseline 0.013 -2.5"
        );
    }

    #[test]
    fn format_number_never_prints_negative_zero() {
        assert_eq!(format_number(-0.0001), "0");
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-1.25), "-1.25");
    }
}
