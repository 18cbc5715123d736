//! Free-text recognizers. Built once per run and shared by reference.

use regex::{Captures, Regex};

use crate::record::{EquipmentType, PowerSource};

/// A number with its unit, as it appeared in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognized {
    pub literal: String,
    pub unit: String,
    pub evidence: String,
}

impl Recognized {
    fn from_caps(caps: &Captures, number: usize, unit: usize) -> Self {
        Recognized {
            literal: caps[number].to_string(),
            unit: caps.get(unit).map(|m| m.as_str()).unwrap_or_default().to_string(),
            evidence: caps[0].trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Blade {
    pub width: Option<Recognized>,
    pub height: Option<Recognized>,
}

/// Labelled text match, e.g. a model code and the span it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub evidence: String,
}

/// Space-grouped thousands ("20 500", narrow no-break space too) before the
/// plain form, so the whole literal is captured.
const NUM: &str = r"(\d{1,3}(?:[ \x{A0}\x{202F}]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)*)";
const MASS_UNIT: &str = r"(tonnes?|tons?|t|kgs?|lbs?)\b";
const LENGTH_UNIT: &str = r"(mm|cm|m|ft|in)";

pub struct PatternLibrary {
    power_rules: Vec<(PowerSource, Regex)>,
    type_rules: Vec<(EquipmentType, Regex)>,
    engine_power: Regex,
    mass_labelled: Regex,
    mass_payload: Regex,
    mass: Regex,
    volume: Regex,
    blade_dims: Regex,
    blade_width: Regex,
    blade_height: Regex,
    model_label: Regex,
    model_code: Regex,
    year_modern: Regex,
    year_old: Regex,
    unit_after: Regex,
}

impl PatternLibrary {
    pub fn new() -> Result<Self, regex::Error> {
        // Priority is declaration order: the first rule that matches wins.
        let power_rules = vec![
            (PowerSource::Hydrogen, r"\b(?:hydrogen|fuel[- ]?cells?|h2)\b"),
            (PowerSource::Hybrid, r"\b(?:hybrid|e[- ]?drive)\b"),
            (
                PowerSource::Battery,
                r"\b(?:battery|batteries|bev|all-?electric|zero[- ]?emissions?)\b",
            ),
            (
                PowerSource::MethanolOther,
                r"\b(?:methanol|ethanol|bio[- ]?fuels?)\b",
            ),
        ];
        let type_rules = vec![
            (EquipmentType::Excavator, r"\bexcavators?\b"),
            (EquipmentType::WheelLoader, r"\bwheel[- ]?loaders?\b"),
            (EquipmentType::Bulldozer, r"\b(?:bulldozers?|dozers?)\b"),
            (EquipmentType::Grader, r"\bgraders?\b"),
            (EquipmentType::DumpTruck, r"\b(?:dump|haul|mining)\s*trucks?\b"),
            (EquipmentType::Backhoe, r"\bbackhoe(?:\s*loaders?)?\b"),
        ];

        Ok(PatternLibrary {
            power_rules: compile_table(power_rules)?,
            type_rules: compile_table(type_rules)?,
            engine_power: Regex::new(&format!(
                r"(?i)\b{NUM}\s?(kw|kilowatts?|bhp|hp|horsepower|ps)\b"
            ))?,
            mass_labelled: Regex::new(&format!(
                r"(?i)\b(?:operating\s+(?:weight|mass)|machine\s+weight|weight\s+class|class|tonnage|payload)\b[^0-9]{{0,24}}?\b{NUM}\s?{MASS_UNIT}"
            ))?,
            mass_payload: Regex::new(&format!(
                r"(?i)\b{NUM}\s?(tonnes?|tons?|t)\s+payload\b"
            ))?,
            mass: Regex::new(&format!(r"(?i)\b{NUM}\s?{MASS_UNIT}"))?,
            volume: Regex::new(&format!(
                r"(?i)\b{NUM}\s?(m³|m\^?3\b|yd³|yd\^?3\b|cu\.?\s?yds?\b|cu\.?\s?m\b|cubic\s+(?:yards?|met(?:er|re)s?)\b|lit(?:er|re)s?\b|l\b)"
            ))?,
            blade_dims: Regex::new(&format!(
                r"(?i)\b{NUM}\s?{LENGTH_UNIT}?\s?[x×]\s?{NUM}\s?{LENGTH_UNIT}\b"
            ))?,
            blade_width: Regex::new(&format!(
                r"(?i)\bblade\s*(?:width|length|size)?\s*[:\-]?\s*{NUM}\s?{LENGTH_UNIT}\b"
            ))?,
            blade_height: Regex::new(&format!(
                r"(?i)\bblade\s+height\s*[:\-]?\s*{NUM}\s?{LENGTH_UNIT}\b"
            ))?,
            model_label: Regex::new(
                r"(?:(?i)\b(?:model|series|type|code)\b|型番|モデル)[:：\s\-]*([A-Za-z0-9][A-Za-z0-9\-]{1,})",
            )?,
            model_code: Regex::new(r"\b([A-Z]{1,5}[0-9]{1,4}[A-Z0-9\-]*)")?,
            year_modern: Regex::new(r"\b(20\d{2})\b")?,
            year_old: Regex::new(r"\b(19\d{2})\b")?,
            unit_after: Regex::new(
                r"(?i)^\s?(?:kw|hp|kg|t\b|tonnes?|tons?|mm|cm|m\b|m³|lbs?|l\b|rpm|nm|cc)",
            )?,
        })
    }

    /// Always one of the five labels; `Unknown` when nothing matches.
    pub fn classify_power(&self, text: &str) -> PowerSource {
        let low = text.to_lowercase();
        self.power_rules
            .iter()
            .find(|(_, rx)| rx.is_match(&low))
            .map(|(label, _)| *label)
            .unwrap_or(PowerSource::Unknown)
    }

    pub fn classify_type(&self, text: &str, hint: Option<EquipmentType>) -> EquipmentType {
        let low = text.to_lowercase();
        self.type_rules
            .iter()
            .find(|(_, rx)| rx.is_match(&low))
            .map(|(label, _)| *label)
            .or(hint)
            .unwrap_or(EquipmentType::Unknown)
    }

    pub fn engine_power(&self, text: &str) -> Option<Recognized> {
        self.engine_power
            .captures(text)
            .map(|c| Recognized::from_caps(&c, 1, 2))
    }

    /// Contextual mentions ("operating weight 20 t", "40 t payload") beat a
    /// bare tonnage anywhere on the page.
    pub fn operating_mass(&self, text: &str) -> Option<Recognized> {
        self.mass_labelled
            .captures(text)
            .or_else(|| self.mass_payload.captures(text))
            .or_else(|| self.mass.captures(text))
            .map(|c| Recognized::from_caps(&c, 1, 2))
    }

    pub fn bucket_volume(&self, text: &str) -> Option<Recognized> {
        self.volume
            .captures(text)
            .map(|c| Recognized::from_caps(&c, 1, 2))
    }

    /// `W x H unit` first, then labelled "blade width" / "blade height".
    pub fn blade(&self, text: &str) -> Blade {
        if let Some(caps) = self.blade_dims.captures(text) {
            let evidence = caps[0].trim().to_string();
            let height_unit = caps[4].to_string();
            let width_unit = caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| height_unit.clone());
            return Blade {
                width: Some(Recognized {
                    literal: caps[1].to_string(),
                    unit: width_unit,
                    evidence: evidence.clone(),
                }),
                height: Some(Recognized {
                    literal: caps[3].to_string(),
                    unit: height_unit,
                    evidence,
                }),
            };
        }
        Blade {
            width: self
                .blade_width
                .captures(text)
                .map(|c| Recognized::from_caps(&c, 1, 2)),
            height: self
                .blade_height
                .captures(text)
                .map(|c| Recognized::from_caps(&c, 1, 2)),
        }
    }

    /// Labelled model code ("Model: EX200"). Tokens without a digit are
    /// skipped so "Type: Excavator" does not count.
    pub fn model_number(&self, text: &str) -> Option<Token> {
        self.model_label.captures_iter(text).find_map(|caps| {
            let value = caps[1].trim_matches('-');
            value.chars().any(|c| c.is_ascii_digit()).then(|| Token {
                value: value.to_string(),
                evidence: caps[0].trim().to_string(),
            })
        })
    }

    /// Bare model-code shaped token, used on headings and structured names.
    pub fn model_code(&self, text: &str) -> Option<Token> {
        self.model_code.captures(text).map(|caps| Token {
            value: caps[1].trim_end_matches('-').to_string(),
            evidence: text.trim().to_string(),
        })
    }

    /// First 20xx year, else first 19xx. Numbers followed by a unit are
    /// measurements, not years.
    pub fn year(&self, text: &str) -> Option<Token> {
        [&self.year_modern, &self.year_old].into_iter().find_map(|rx| {
            rx.find_iter(text)
                .find(|m| !self.unit_after.is_match(&text[m.end()..]))
                .map(|m| Token {
                    value: m.as_str().to_string(),
                    evidence: context_around(text, m.start(), m.end()),
                })
        })
    }
}

fn compile_table<L: Copy>(rules: Vec<(L, &str)>) -> Result<Vec<(L, Regex)>, regex::Error> {
    rules
        .into_iter()
        .map(|(label, pattern)| Ok((label, Regex::new(pattern)?)))
        .collect()
}

/// A few words either side of a match, for provenance.
fn context_around(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .filter(|(_, c)| c.is_whitespace())
        .nth(1)
        .map(|(i, _)| i + 1)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .nth(1)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[from..to].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> PatternLibrary {
        PatternLibrary::new().unwrap()
    }

    #[test]
    fn power_priority_is_declaration_order() {
        let lib = lib();
        assert_eq!(
            lib.classify_power("Battery pack paired with a hybrid drivetrain"),
            PowerSource::Hybrid
        );
        assert_eq!(
            lib.classify_power("battery-powered, later a fuel cell variant"),
            PowerSource::Hydrogen
        );
        assert_eq!(lib.classify_power("Runs on METHANOL"), PowerSource::MethanolOther);
    }

    #[test]
    fn power_defaults_to_unknown() {
        let lib = lib();
        for text in ["", "Tier 4 Final diesel", "h2o cooling", "e-commerce"] {
            assert_eq!(lib.classify_power(text), PowerSource::Unknown, "{text}");
        }
    }

    #[test]
    fn type_falls_back_to_hint() {
        let lib = lib();
        assert_eq!(
            lib.classify_type("Electric WHEEL LOADER L25", None),
            EquipmentType::WheelLoader
        );
        assert_eq!(
            lib.classify_type("Our newest machine", Some(EquipmentType::Grader)),
            EquipmentType::Grader
        );
        assert_eq!(lib.classify_type("Our newest machine", None), EquipmentType::Unknown);
        assert_eq!(
            lib.classify_type("Battery haul truck for mines", None),
            EquipmentType::DumpTruck
        );
    }

    #[test]
    fn first_power_mention_wins() {
        let lib = lib();
        let m = lib.engine_power("Rated 110 kW (147 hp), peak 130 kW").unwrap();
        assert_eq!(m.literal, "110");
        assert_eq!(m.unit, "kW");
        assert_eq!(m.evidence, "110 kW");
        assert!(lib.engine_power("Battery 300 kWh").is_none());
        assert!(lib.engine_power("EX200kW").is_none());
    }

    #[test]
    fn labelled_mass_beats_bare_tonnage() {
        let lib = lib();
        let m = lib
            .operating_mass("Lifts 5 t easily. Operating weight: 20,500 kg")
            .unwrap();
        assert_eq!((m.literal.as_str(), m.unit.as_str()), ("20,500", "kg"));

        let payload = lib.operating_mass("A 91 t payload haul truck").unwrap();
        assert_eq!(payload.literal, "91");

        let bare = lib.operating_mass("Weighs about 14 tonnes").unwrap();
        assert_eq!((bare.literal.as_str(), bare.unit.as_str()), ("14", "tonnes"));
    }

    #[test]
    fn volume_units() {
        let lib = lib();
        assert_eq!(lib.bucket_volume("bucket 0.9 m³ heaped").unwrap().literal, "0.9");
        assert_eq!(lib.bucket_volume("2.5 yd3 bucket").unwrap().unit, "yd3");
        assert_eq!(lib.bucket_volume("capacity 800 liters").unwrap().unit, "liters");
        assert!(lib.bucket_volume("weighs 5 lb").is_none());
    }

    #[test]
    fn blade_dimensions_and_labels() {
        let lib = lib();
        let b = lib.blade("Moldboard 3.7 m x 0.6 m");
        assert_eq!(b.width.unwrap().literal, "3.7");
        assert_eq!(b.height.unwrap().unit, "m");

        let b = lib.blade("Blade 3660×610 mm");
        assert_eq!(b.width.as_ref().unwrap().unit, "mm");
        assert_eq!(b.height.unwrap().literal, "610");

        let b = lib.blade("Blade width: 12 ft, blade height 24 in");
        assert_eq!(b.width.unwrap().literal, "12");
        assert_eq!(b.height.unwrap().unit, "in");
    }

    #[test]
    fn model_labels_need_a_digit() {
        let lib = lib();
        let m = lib.model_number("Type: Excavator. Model: EX200, 110 kW").unwrap();
        assert_eq!(m.value, "EX200");
        assert_eq!(lib.model_number("型番：ZE85-1").unwrap().value, "ZE85-1");
        assert!(lib.model_number("Series: premium").is_none());
        assert_eq!(lib.model_code("The new PC200LCE-11 hybrid").unwrap().value, "PC200LCE-11");
    }

    #[test]
    fn years_prefer_2000s_and_skip_measurements() {
        let lib = lib();
        assert_eq!(lib.year("Since 1998, relaunched 2023").unwrap().value, "2023");
        assert_eq!(lib.year("2050 kg payload, launched 2021").unwrap().value, "2021");
        assert_eq!(lib.year("Introduced 1995").unwrap().value, "1995");
        assert!(lib.year("no dates here").is_none());
    }
}
