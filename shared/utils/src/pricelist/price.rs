//! Price cell parsing.
//!
//! Handles the formats seen on Indonesian and international price lists: `Rp 50.000`,
//! `IDR 1,250,000`, `12,50`, `1.234,56`, `Rp 50.000,-`, `15000/kg`, shorthand such as `25rb`
//! or `1.5jt`, and ranges like `5.000 - 7.500`.

use regex::Regex;
use std::sync::OnceLock;

const SHORTHAND: &str = r"(?:\s*(juta|jt|ribu|rb|k)\b)?";

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)(-\s*)?(\d(?:[\d.,]*\d)?){}", SHORTHAND)).expect("valid number regex")
    })
}

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(\d(?:[\d.,]*\d)?){sh}\s*(?:-|–|s/d|sd|sampai|to)\s*(?:rp\.?\s*|idr\s*)?(\d(?:[\d.,]*\d)?){sh}",
            sh = SHORTHAND
        ))
        .expect("valid range regex")
    })
}

/// Parse a numeric run such as `50.000`, `1,250,000.50` or `12,5` into a number.
///
/// With both `.` and `,` present the last one is the decimal separator. A separator repeated
/// more than once is a thousands separator. A single separator followed by exactly three
/// digits is a thousands separator unless the integer part is `0`; otherwise it is decimal.
fn parse_number_run(run: &str) -> Option<f64> {
    let dots = run.matches('.').count();
    let commas = run.matches(',').count();

    let normalized = match (dots, commas) {
        (0, 0) => run.to_string(),
        (d, c) if d > 0 && c > 0 => {
            let last_dot = run.rfind('.')?;
            let last_comma = run.rfind(',')?;
            let (decimal, thousands) = if last_dot > last_comma { ('.', ',') } else { (',', '.') };
            run.replace(thousands, "").replace(decimal, ".")
        }
        (d, c) => {
            let separator = if d > 0 { '.' } else { ',' };
            let count = d.max(c);
            if count > 1 {
                run.replace(separator, "")
            } else {
                let (int_part, frac_part) = run.split_once(separator)?;
                if frac_part.len() == 3 && int_part != "0" {
                    run.replace(separator, "")
                } else {
                    format!("{}.{}", int_part, frac_part)
                }
            }
        }
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn shorthand_multiplier(suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_lowercase()).as_deref() {
        Some("jt") | Some("juta") => 1_000_000.0,
        Some("rb") | Some("ribu") | Some("k") => 1_000.0,
        _ => 1.0,
    }
}

/// A minus is a sign only when nothing but a currency marker precedes it; `Tomat - 5000` is
/// a separator, `Rp -5000` is negative.
fn is_sign_position(prefix: &str) -> bool {
    let prefix = prefix.trim().to_lowercase();
    let prefix = prefix.trim_end_matches('.');
    matches!(prefix, "" | "rp" | "idr" | "$")
}

/// Parse the first price in a cell, without shorthand expansion.
///
/// Returns `None` for empty, non-numeric or negative input, never `0` as a stand-in.
pub fn parse_price(text: &str) -> Option<f64> {
    PriceParser::new(false).parse(text).map(|reading| reading.value)
}

/// Result of reading a price cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceReading {
    pub value: f64,
    /// The cell held a range whose upper bound was lower than its lower bound.
    pub inverted_range: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriceParser {
    expand_shorthand: bool,
}

impl PriceParser {
    pub fn new(expand_shorthand: bool) -> Self {
        Self { expand_shorthand }
    }

    fn amount(&self, run: &str, suffix: Option<&str>) -> Option<f64> {
        let value = parse_number_run(run)?;
        if self.expand_shorthand {
            Some(value * shorthand_multiplier(suffix))
        } else {
            Some(value)
        }
    }

    pub fn parse(&self, text: &str) -> Option<PriceReading> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let first = number_regex().captures(text)?;
        if let Some(minus) = first.get(1) {
            if is_sign_position(&text[..minus.start()]) {
                return None;
            }
        }

        if let Some(range) = range_regex().captures(text) {
            // only treat it as a range when it starts at the first number in the cell
            let starts_at_first = range.get(1).map(|m| m.start()) == first.get(2).map(|m| m.start());
            if starts_at_first {
                let low = self.amount(&range[1], range.get(2).map(|m| m.as_str()));
                let high = self.amount(&range[3], range.get(4).map(|m| m.as_str()));
                if let (Some(low), Some(high)) = (low, high) {
                    return Some(PriceReading {
                        value: low.min(high),
                        inverted_range: high < low,
                    });
                }
            }
        }

        let value = self.amount(&first[2], first.get(3).map(|m| m.as_str()))?;
        Some(PriceReading {
            value,
            inverted_range: false,
        })
    }

    /// Parse and keep only prices greater than zero.
    pub fn parse_positive(&self, text: &str) -> Option<PriceReading> {
        self.parse(text).filter(|reading| reading.value > 0.0)
    }
}
