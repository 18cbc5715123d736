//! Unit normalization into the canonical schema: kW, tonnes, m³, metres.

use std::sync::LazyLock;

use regex::Regex;

static PLAIN_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("static pattern"));

/// Every converted value is rounded to four decimal places.
const PRECISION: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Power,
    Mass,
    Volume,
    Length,
}

/// Parse `literal` and normalize it from `unit` into the canonical unit for `kind`.
pub fn convert(kind: Quantity, literal: &str, unit: &str) -> Option<f64> {
    let value = parse_number(literal)?;
    normalize(kind, value, unit)
}

/// Normalize an already-parsed value. Unknown units yield `None`.
pub fn normalize(kind: Quantity, value: f64, unit: &str) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let factor = factor(kind, &unit_key(unit))?;
    Some(round(value * factor))
}

fn factor(kind: Quantity, unit: &str) -> Option<f64> {
    let f = match kind {
        Quantity::Power => match unit {
            "kw" | "kilowatt" | "kilowatts" => 1.0,
            "hp" | "bhp" | "horsepower" => 0.7457,
            "ps" | "cv" => 0.7355,
            "mw" | "megawatt" | "megawatts" => 1000.0,
            "w" | "watt" | "watts" => 0.001,
            _ => return None,
        },
        Quantity::Mass => match unit {
            "t" | "tonne" | "tonnes" | "ton" | "tons" | "metric ton" | "metric tons" => 1.0,
            "kg" | "kgs" | "kilogram" | "kilograms" => 0.001,
            "lb" | "lbs" | "pound" | "pounds" => 0.000453592,
            "short ton" | "short tons" | "us ton" | "us tons" => 0.907185,
            _ => return None,
        },
        Quantity::Volume => match unit {
            "m³" | "m3" | "m^3" | "cu m" | "cbm" | "cubic meter" | "cubic meters"
            | "cubic metre" | "cubic metres" => 1.0,
            "yd³" | "yd3" | "yd^3" | "cu yd" | "cu yds" | "cubic yard" | "cubic yards" => 0.764555,
            "ft³" | "ft3" | "ft^3" | "cu ft" | "cubic foot" | "cubic feet" => 0.0283168,
            "l" | "liter" | "liters" | "litre" | "litres" => 0.001,
            _ => return None,
        },
        Quantity::Length => match unit {
            "m" | "meter" | "meters" | "metre" | "metres" => 1.0,
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => 0.001,
            "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => 0.01,
            "ft" | "feet" | "foot" | "'" => 0.3048,
            "in" | "inch" | "inches" | "\"" => 0.0254,
            _ => return None,
        },
    };
    Some(f)
}

/// Lower-case, drop dots ("cu. yd."), squeeze inner whitespace.
fn unit_key(unit: &str) -> String {
    unit.to_lowercase()
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn round(v: f64) -> f64 {
    (v * PRECISION).round() / PRECISION
}

/// Parse a numeric literal that may carry thousands separators and either
/// decimal mark. "1,500" and "1.500.000" are grouped, "2,5" is 2.5,
/// "1.234,5" is 1234.5.
pub fn parse_number(literal: &str) -> Option<f64> {
    let compact: String = literal
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{202f}' && *c != '\'')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) | (0, 1) => compact,
        (0, _) => ungroup(&compact, '.')?,
        (1, 0) => {
            let (head, tail) = compact.split_once(',')?;
            if tail.len() == 3 && !head.is_empty() && head.len() <= 3 && !head.starts_with('0') {
                format!("{head}{tail}")
            } else {
                format!("{head}.{tail}")
            }
        }
        (_, 0) => ungroup(&compact, ',')?,
        _ => {
            let last_comma = compact.rfind(',')?;
            let last_dot = compact.rfind('.')?;
            let (mark, group) = if last_comma > last_dot { (last_comma, '.') } else { (last_dot, ',') };
            let int_part = ungroup(&compact[..mark], group)?;
            format!("{}.{}", int_part, &compact[mark + 1..])
        }
    };

    if !PLAIN_NUMBER_RE.is_match(&normalized) {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Strip `sep` used as a thousands separator; every group after the first
/// must hold exactly three digits.
fn ungroup(s: &str, sep: char) -> Option<String> {
    let mut parts = s.split(sep);
    let head = parts.next()?;
    if head.is_empty() || (s.contains(sep) && (head.len() > 3 || head.starts_with('0'))) {
        return None;
    }
    let mut out = head.to_string();
    for part in parts {
        if part.len() != 3 {
            return None;
        }
        out.push_str(part);
    }
    Some(out)
}
