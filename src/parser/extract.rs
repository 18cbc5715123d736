use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::patterns::{PatternLibrary, Recognized, Token};
use super::units::{self, Quantity};
use super::{collapse_ws, structured, visible_text, Finding};
use crate::record::{EquipmentType, ExtractedFields, Field};

static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3").expect("static selector"));

/// Optional per-source CSS selectors narrowing a field to one DOM region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    pub engine_power_kw: Option<String>,
    pub operating_mass_t: Option<String>,
    pub bucket_volume_m3: Option<String>,
    pub blade: Option<String>,
    pub model_number: Option<String>,
    pub year_of_release: Option<String>,
}

/// First strategy with a value wins. A match that failed conversion only
/// leaves evidence behind until something better comes along.
struct Slot<T> {
    field: Field,
    value: Option<T>,
    evidence: Option<String>,
}

impl<T> Slot<T> {
    fn new(field: Field) -> Self {
        Slot {
            field,
            value: None,
            evidence: None,
        }
    }

    fn is_open(&self) -> bool {
        self.value.is_none()
    }

    fn offer(&mut self, finding: Option<Finding<T>>) {
        let Some(finding) = finding else { return };
        if !self.is_open() {
            return;
        }
        if finding.value.is_some() {
            self.value = finding.value;
            self.evidence = Some(finding.evidence);
        } else if self.evidence.is_none() {
            self.evidence = Some(finding.evidence);
        }
    }

    fn finish(self, evidence: &mut BTreeMap<Field, String>) -> Option<T> {
        if let Some(e) = self.evidence {
            evidence.insert(self.field, e);
        }
        self.value
    }
}

fn numeric(recognized: Option<Recognized>, kind: Quantity) -> Option<Finding<f64>> {
    recognized.map(|r| Finding {
        value: units::convert(kind, &r.literal, &r.unit),
        evidence: r.evidence,
    })
}

fn token(t: Option<Token>) -> Option<Finding<String>> {
    t.map(|t| Finding::found(t.value, t.evidence))
}

/// Extract typed, unit-normalized fields from one HTML document.
///
/// Per field: the configured selector region, then JSON-LD, then the whole
/// page text. Bucket volume is only read for bucket machines and blade
/// dimensions only for graders.
pub fn extract(
    lib: &PatternLibrary,
    html: &str,
    type_hint: Option<EquipmentType>,
    selectors: &FieldSelectors,
) -> ExtractedFields {
    let doc = Html::parse_document(html);
    let text = visible_text(&doc);
    let structured = structured::read(&doc, lib);
    let region = |css: &Option<String>| css.as_deref().and_then(|c| select_text(&doc, c));

    let equipment_type = lib.classify_type(&text, type_hint);
    let mut evidence = BTreeMap::new();

    let mut power = Slot::new(Field::EnginePowerKw);
    if let Some(r) = region(&selectors.engine_power_kw) {
        power.offer(numeric(lib.engine_power(&r), Quantity::Power));
    }
    power.offer(structured.engine_power_kw);
    power.offer(numeric(lib.engine_power(&text), Quantity::Power));

    let mut mass = Slot::new(Field::OperatingMassT);
    if let Some(r) = region(&selectors.operating_mass_t) {
        mass.offer(numeric(lib.operating_mass(&r), Quantity::Mass));
    }
    mass.offer(structured.operating_mass_t);
    mass.offer(numeric(lib.operating_mass(&text), Quantity::Mass));

    let mut bucket = Slot::new(Field::BucketVolumeM3);
    if equipment_type.has_bucket() {
        if let Some(r) = region(&selectors.bucket_volume_m3) {
            bucket.offer(numeric(lib.bucket_volume(&r), Quantity::Volume));
        }
        bucket.offer(structured.bucket_volume_m3);
        bucket.offer(numeric(lib.bucket_volume(&text), Quantity::Volume));
    }

    let mut blade_width = Slot::new(Field::BladeWidthM);
    let mut blade_height = Slot::new(Field::BladeHeightM);
    if equipment_type.has_blade() {
        let regional = region(&selectors.blade).map(|r| lib.blade(&r));
        let page = lib.blade(&text);
        for blade in regional.into_iter().chain(std::iter::once(page)) {
            blade_width.offer(numeric(blade.width, Quantity::Length));
            blade_height.offer(numeric(blade.height, Quantity::Length));
        }
    }

    let mut model = Slot::new(Field::ModelNumber);
    if let Some(r) = region(&selectors.model_number) {
        model.offer(token(lib.model_number(&r).or_else(|| lib.model_code(&r))));
    }
    model.offer(structured.model_number);
    model.offer(token(lib.model_number(&text)));
    if model.is_open() {
        let from_heading = doc
            .select(&HEADINGS)
            .map(|h| collapse_ws(&h.text().collect::<String>()))
            .find_map(|h| lib.model_code(&h));
        model.offer(token(from_heading));
    }

    let mut year = Slot::new(Field::YearOfRelease);
    if let Some(r) = region(&selectors.year_of_release) {
        year.offer(token(lib.year(&r)));
    }
    year.offer(token(lib.year(&text)));

    ExtractedFields {
        power_source: lib.classify_power(&text),
        equipment_type,
        engine_power_kw: power.finish(&mut evidence),
        operating_mass_t: mass.finish(&mut evidence),
        bucket_volume_m3: bucket.finish(&mut evidence),
        blade_width_m: blade_width.finish(&mut evidence),
        blade_height_m: blade_height.finish(&mut evidence),
        model_number: model.finish(&mut evidence),
        year_of_release: year.finish(&mut evidence),
        raw_evidence: evidence,
    }
}

/// Collapsed text of every element matching `css`. Invalid selectors and
/// empty matches yield `None`.
fn select_text(doc: &Html, css: &str) -> Option<String> {
    let selector = match Selector::parse(css) {
        Ok(s) => s,
        Err(e) => {
            warn!(selector = css, "Invalid selector: {:?}", e);
            return None;
        }
    };
    let text = collapse_ws(
        &doc.select(&selector)
            .flat_map(|el| el.text())
            .collect::<Vec<_>>()
            .join(" "),
    );
    if text.is_empty() {
        debug!(selector = css, "Selector matched nothing");
        None
    } else {
        Some(text)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PowerSource;

    fn lib() -> PatternLibrary {
        PatternLibrary::new().unwrap()
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    const LAYERED: &str = r#"<html><head>
        <script type="application/ld+json">
          {"@type":"Product","name":"ZX135","additionalProperty":[{"name":"Engine power","value":"120 kW"}]}
        </script></head>
        <body><h1>Hydraulic excavator</h1>
        <div class="spec-power">Rated output 150 hp</div>
        <p>Peak output 110 kW</p></body></html>"#;

    #[test]
    fn selector_beats_structured_and_text() {
        let selectors = FieldSelectors {
            engine_power_kw: Some(".spec-power".into()),
            ..Default::default()
        };
        let f = extract(&lib(), LAYERED, None, &selectors);
        assert_eq!(f.engine_power_kw, Some(111.855));
        assert_eq!(f.raw_evidence[&Field::EnginePowerKw], "150 hp");
    }

    #[test]
    fn structured_beats_text() {
        let f = extract(&lib(), LAYERED, None, &FieldSelectors::default());
        assert_eq!(f.engine_power_kw, Some(120.0));
        assert_eq!(f.model_number.as_deref(), Some("ZX135"));
    }

    #[test]
    fn selector_that_matches_nothing_falls_through() {
        let selectors = FieldSelectors {
            engine_power_kw: Some("#missing".into()),
            model_number: Some("[[[".into()),
            ..Default::default()
        };
        let f = extract(&lib(), LAYERED, None, &selectors);
        assert_eq!(f.engine_power_kw, Some(120.0));
        assert_eq!(f.model_number.as_deref(), Some("ZX135"));
    }

    #[test]
    fn free_text_sentence() {
        let f = extract(
            &lib(),
            "Model: EX200, 110 kW, Hydrogen drive, operating weight 20 t, released 2023",
            None,
            &FieldSelectors::default(),
        );
        assert_eq!(f.power_source, PowerSource::Hydrogen);
        assert_eq!(f.model_number.as_deref(), Some("EX200"));
        assert_eq!(f.engine_power_kw, Some(110.0));
        assert_eq!(f.operating_mass_t, Some(20.0));
        assert_eq!(f.year_of_release.as_deref(), Some("2023"));
        assert_eq!(f.raw_evidence[&Field::OperatingMassT], "operating weight 20 t");
        assert!(!f.raw_evidence.contains_key(&Field::BucketVolumeM3));
    }

    #[test]
    fn grader_never_reads_bucket_volume() {
        let f = extract(&lib(), &fixture("electric_grader"), None, &FieldSelectors::default());
        assert_eq!(f.equipment_type, EquipmentType::Grader);
        assert_eq!(f.bucket_volume_m3, None);
        assert!(!f.raw_evidence.contains_key(&Field::BucketVolumeM3));
        assert_eq!(f.blade_width_m, Some(3.66));
        assert_eq!(f.blade_height_m, Some(0.61));
        assert_eq!(f.power_source, PowerSource::Battery);
    }

    #[test]
    fn excavator_fixture() {
        let selectors = FieldSelectors {
            operating_mass_t: Some("table.specs".into()),
            ..Default::default()
        };
        let f = extract(&lib(), &fixture("hydrogen_excavator"), None, &selectors);
        assert_eq!(f.equipment_type, EquipmentType::Excavator);
        assert_eq!(f.power_source, PowerSource::Hydrogen);
        assert_eq!(f.model_number.as_deref(), Some("HX220"));
        assert_eq!(f.engine_power_kw, Some(124.0));
        assert_eq!(f.operating_mass_t, Some(22.5));
        assert_eq!(f.bucket_volume_m3, Some(1.2));
        assert_eq!(f.year_of_release.as_deref(), Some("2024"));
    }

    #[test]
    fn hint_enables_bucket_when_page_is_silent() {
        let html = "<p>Bucket 2.1 m³, 190 kW battery drive</p>";
        let none = extract(&lib(), html, None, &FieldSelectors::default());
        assert_eq!(none.bucket_volume_m3, None);
        let loader = extract(&lib(), html, Some(EquipmentType::WheelLoader), &FieldSelectors::default());
        assert_eq!(loader.equipment_type, EquipmentType::WheelLoader);
        assert_eq!(loader.bucket_volume_m3, Some(2.1));
    }

    #[test]
    fn failed_conversion_keeps_evidence() {
        let selectors = FieldSelectors {
            operating_mass_t: Some("#mass".into()),
            ..Default::default()
        };
        let html = r#"<div id="mass">Operating weight 1,23,4 t</div>"#;
        let f = extract(&lib(), html, None, &selectors);
        assert_eq!(f.operating_mass_t, None);
        assert_eq!(f.raw_evidence[&Field::OperatingMassT], "Operating weight 1,23,4 t");
    }

    #[test]
    fn space_grouped_thousands_are_read_whole() {
        let html = "<p>Operating weight 20 500 kg. Engine 1 500 hp</p>";
        let f = extract(&lib(), html, None, &FieldSelectors::default());
        assert_eq!(f.operating_mass_t, Some(20.5));
        assert_eq!(f.engine_power_kw, Some(1118.55));
        assert_eq!(f.raw_evidence[&Field::OperatingMassT], "Operating weight 20 500 kg");
        assert_eq!(f.raw_evidence[&Field::EnginePowerKw], "1 500 hp");
    }

    #[test]
    fn leading_zero_comma_is_a_decimal_mark() {
        let html = "<p>Compact excavator, bucket 0,750 m³</p>";
        let f = extract(&lib(), html, None, &FieldSelectors::default());
        assert_eq!(f.equipment_type, EquipmentType::Excavator);
        assert_eq!(f.bucket_volume_m3, Some(0.75));
    }

    #[test]
    fn heading_supplies_model_last() {
        let html = "<h2>Electric excavator</h2><h2>The new PC30E-6</h2><p>Compact and quiet.</p>";
        let f = extract(&lib(), html, None, &FieldSelectors::default());
        assert_eq!(f.model_number.as_deref(), Some("PC30E-6"));
        assert_eq!(f.raw_evidence[&Field::ModelNumber], "The new PC30E-6");
    }
}
