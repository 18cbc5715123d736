//! JSON-LD product metadata (`<script type="application/ld+json">`).

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use super::patterns::PatternLibrary;
use super::units::{self, Quantity};
use super::Finding;

static JSONLD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector")
});

/// Fields recovered from structured metadata. Absent blocks leave it empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredFields {
    pub model_number: Option<Finding<String>>,
    pub engine_power_kw: Option<Finding<f64>>,
    pub operating_mass_t: Option<Finding<f64>>,
    pub bucket_volume_m3: Option<Finding<f64>>,
}

pub fn read(doc: &Html, lib: &PatternLibrary) -> StructuredFields {
    let mut out = StructuredFields::default();
    for script in doc.select(&JSONLD) {
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(json) => visit(&json, lib, &mut out),
            Err(e) => debug!("Skipping malformed JSON-LD block: {}", e),
        }
    }
    out
}

fn visit(node: &Value, lib: &PatternLibrary, out: &mut StructuredFields) {
    match node {
        Value::Array(items) => {
            for item in items {
                visit(item, lib, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                visit(graph, lib, out);
            }
            absorb(map, lib, out);
        }
        _ => {}
    }
}

fn absorb(map: &Map<String, Value>, lib: &PatternLibrary, out: &mut StructuredFields) {
    if out.model_number.is_none() {
        out.model_number = model_of(map, lib);
    }

    if let Some(weight) = map.get("weight") {
        fill(&mut out.operating_mass_t, quantity(weight, "weight", Quantity::Mass, lib));
    }

    let props = match map.get("additionalProperty") {
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };
    for prop in props {
        let Some(prop) = prop.as_object() else { continue };
        let name = prop
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let Some(value) = prop.get("value") else { continue };
        let value_text = scalar_text(value).unwrap_or_default().to_lowercase();

        if name.contains("bucket") || name.contains("capacity") {
            fill(&mut out.bucket_volume_m3, quantity_prop(prop, &name, Quantity::Volume, lib));
        } else if name.contains("power")
            || name.contains("output")
            || name.contains("kw")
            || value_text.contains("kw")
        {
            fill(&mut out.engine_power_kw, quantity_prop(prop, &name, Quantity::Power, lib));
        } else if name.contains("weight") || name.contains("mass") {
            fill(&mut out.operating_mass_t, quantity_prop(prop, &name, Quantity::Mass, lib));
        }
    }
}

/// `model` (string or `{name}`), `mpn`, `sku`, else a model code in `name`.
fn model_of(map: &Map<String, Value>, lib: &PatternLibrary) -> Option<Finding<String>> {
    let direct = map
        .get("model")
        .and_then(|m| match m {
            Value::Object(inner) => inner.get("name").and_then(scalar_text),
            other => scalar_text(other),
        })
        .or_else(|| map.get("mpn").and_then(scalar_text))
        .or_else(|| map.get("sku").and_then(scalar_text))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(model) = direct {
        return Some(Finding::found(model.clone(), model));
    }

    let name = map.get("name").and_then(scalar_text)?;
    lib.model_code(&name)
        .map(|token| Finding::found(token.value, token.evidence))
}

fn quantity_prop(
    prop: &Map<String, Value>,
    name: &str,
    kind: Quantity,
    lib: &PatternLibrary,
) -> Option<Finding<f64>> {
    quantity(&Value::Object(prop.clone()), name, kind, lib)
}

/// A `value` with `unitText`/`unitCode`, a bare string with an embedded
/// unit ("120 kW"), or a QuantitativeValue object.
fn quantity(node: &Value, label: &str, kind: Quantity, lib: &PatternLibrary) -> Option<Finding<f64>> {
    let (value, unit) = match node {
        Value::Object(map) => {
            let value = map.get("value")?;
            let unit = map
                .get("unitText")
                .and_then(scalar_text)
                .or_else(|| map.get("unitCode").and_then(scalar_text).map(|c| unit_from_code(&c)));
            (value, unit)
        }
        other => (other, None),
    };

    let text = scalar_text(value)?;
    let evidence = match &unit {
        Some(u) => format!("{label}: {text} {u}"),
        None => format!("{label}: {text}"),
    };

    let converted = match unit {
        Some(u) => units::convert(kind, &text, &u),
        None => {
            let recognized = match kind {
                Quantity::Power => lib.engine_power(&text),
                Quantity::Mass => lib.operating_mass(&text),
                Quantity::Volume => lib.bucket_volume(&text),
                Quantity::Length => None,
            };
            recognized.and_then(|r| units::convert(kind, &r.literal, &r.unit))
        }
    };

    Some(Finding {
        value: converted,
        evidence,
    })
}

/// UN/CEFACT common codes seen in schema.org `unitCode`.
fn unit_from_code(code: &str) -> String {
    match code.trim().to_uppercase().as_str() {
        "KWT" => "kW",
        "BHP" | "HP" => "hp",
        "TNE" => "t",
        "KGM" => "kg",
        "LBR" => "lb",
        "MTQ" => "m3",
        "YDQ" => "yd3",
        "LTR" => "l",
        "MTR" => "m",
        "MMT" => "mm",
        "CMT" => "cm",
        "FOT" => "ft",
        "INH" => "in",
        other => return other.to_lowercase(),
    }
    .to_string()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fill(slot: &mut Option<Finding<f64>>, candidate: Option<Finding<f64>>) {
    let open = slot.as_ref().map_or(true, |f| f.value.is_none());
    if open {
        if let Some(c) = candidate {
            if slot.is_none() || c.value.is_some() {
                *slot = Some(c);
            }
        }
    }
}
