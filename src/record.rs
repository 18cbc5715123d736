use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SourceDescriptor;

/// Timestamp layout for `last_seen_utc`.
pub const SEEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerSource {
    Hydrogen,
    Hybrid,
    Battery,
    #[serde(rename = "Methanol/Other")]
    MethanolOther,
    #[default]
    #[serde(alias = "")]
    Unknown,
}

impl PowerSource {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "hydrogen" | "fuel cell" | "h2" => Some(Self::Hydrogen),
            "hybrid" => Some(Self::Hybrid),
            "battery" | "electric" | "bev" => Some(Self::Battery),
            "methanol/other" | "methanol" | "other" | "biofuel" => Some(Self::MethanolOther),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentType {
    Excavator,
    #[serde(rename = "Wheel loader")]
    WheelLoader,
    Bulldozer,
    Grader,
    #[serde(rename = "Dump truck")]
    DumpTruck,
    Backhoe,
    #[default]
    #[serde(alias = "")]
    Unknown,
}

impl EquipmentType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "excavator" => Some(Self::Excavator),
            "wheel loader" | "loader" => Some(Self::WheelLoader),
            "bulldozer" | "dozer" => Some(Self::Bulldozer),
            "grader" | "motor grader" => Some(Self::Grader),
            "dump truck" | "haul truck" | "mining truck" => Some(Self::DumpTruck),
            "backhoe" | "backhoe loader" => Some(Self::Backhoe),
            _ => None,
        }
    }

    /// Machines whose spec sheets carry a bucket capacity.
    pub fn has_bucket(self) -> bool {
        matches!(self, Self::Excavator | Self::WheelLoader | Self::Backhoe)
    }

    pub fn has_blade(self) -> bool {
        self == Self::Grader
    }
}

/// Keys of `raw_evidence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EnginePowerKw,
    OperatingMassT,
    BucketVolumeM3,
    BladeWidthM,
    BladeHeightM,
    ModelNumber,
    YearOfRelease,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedFields {
    pub power_source: PowerSource,
    pub equipment_type: EquipmentType,
    pub engine_power_kw: Option<f64>,
    pub operating_mass_t: Option<f64>,
    pub bucket_volume_m3: Option<f64>,
    pub blade_width_m: Option<f64>,
    pub blade_height_m: Option<f64>,
    pub model_number: Option<String>,
    pub year_of_release: Option<String>,
    pub raw_evidence: BTreeMap<Field, String>,
}

/// One persisted row of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub oem: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub development_status: Option<String>,
    #[serde(flatten)]
    pub fields: ExtractedFields,
    pub link: String,
    #[serde(default)]
    pub link_date: Option<String>,
    pub last_seen_utc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub oem: String,
    pub model_number: String,
    pub link: String,
}

impl Record {
    /// Build a row from one page extraction. Declared static fields from the
    /// source only fill what extraction left empty and never get evidence.
    pub fn assemble(
        source: &SourceDescriptor,
        link: &str,
        mut fields: ExtractedFields,
        seen_at: &str,
    ) -> Record {
        if fields.power_source == PowerSource::Unknown {
            if let Some(declared) = source.declared_power() {
                fields.power_source = declared;
            }
        }
        if fields.model_number.is_none() {
            fields.model_number = non_empty(source.model_number.as_deref());
        }
        if fields.year_of_release.is_none() {
            fields.year_of_release = non_empty(source.year_of_release.as_deref());
        }

        Record {
            oem: source.oem.trim().to_string(),
            country: source.country.trim().to_string(),
            development_status: non_empty(source.development_status.as_deref()),
            fields,
            link: canonical_link(link),
            link_date: None,
            last_seen_utc: seen_at.to_string(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            oem: self.oem.trim().to_string(),
            model_number: self
                .fields
                .model_number
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string(),
            link: canonical_link(&self.link),
        }
    }
}

/// Normalize a link for identity comparison: fragment dropped, host
/// lower-cased, default port removed, trailing slash trimmed off non-root paths.
pub fn canonical_link(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

pub fn now_utc() -> String {
    chrono::Utc::now().format(SEEN_FORMAT).to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceDescriptor {
        SourceDescriptor {
            oem: " Komatsu ".into(),
            country: "Japan".into(),
            power: Some("Battery".into()),
            development_status: Some("Prototype".into()),
            year_of_release: Some("2022".into()),
            model_number: Some("PC30E-6".into()),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_link_variants() {
        assert_eq!(
            canonical_link("HTTPS://Example.com:443/machines/ex200/#specs"),
            "https://example.com/machines/ex200"
        );
        assert_eq!(canonical_link("https://example.com/"), "https://example.com/");
        assert_eq!(canonical_link("  not a url "), "not a url");
    }

    #[test]
    fn declared_fields_fill_gaps_without_evidence() {
        let rec = Record::assemble(
            &source(),
            "https://komatsu.example/pc30e",
            ExtractedFields::default(),
            "2024-01-01T00:00:00Z",
        );
        assert_eq!(rec.oem, "Komatsu");
        assert_eq!(rec.fields.power_source, PowerSource::Battery);
        assert_eq!(rec.fields.model_number.as_deref(), Some("PC30E-6"));
        assert_eq!(rec.fields.year_of_release.as_deref(), Some("2022"));
        assert!(rec.fields.raw_evidence.is_empty());
    }

    #[test]
    fn extracted_values_beat_declared() {
        let fields = ExtractedFields {
            power_source: PowerSource::Hydrogen,
            model_number: Some("HB365".into()),
            ..Default::default()
        };
        let rec = Record::assemble(&source(), "https://komatsu.example/x", fields, "t");
        assert_eq!(rec.fields.power_source, PowerSource::Hydrogen);
        assert_eq!(rec.fields.model_number.as_deref(), Some("HB365"));
    }

    #[test]
    fn key_is_trimmed_and_canonical() {
        let mut a = Record::assemble(&source(), "https://komatsu.example/x/", ExtractedFields::default(), "t");
        let b = Record::assemble(&source(), "https://komatsu.example/x#top", ExtractedFields::default(), "t");
        a.fields.model_number = Some(" PC30E-6 ".into());
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn labels_serialize_like_the_dataset() {
        let json = serde_json::to_string(&PowerSource::MethanolOther).unwrap();
        assert_eq!(json, "\"Methanol/Other\"");
        let t: EquipmentType = serde_json::from_str("\"Wheel loader\"").unwrap();
        assert_eq!(t, EquipmentType::WheelLoader);
        let blank: PowerSource = serde_json::from_str("\"\"").unwrap();
        assert_eq!(blank, PowerSource::Unknown);
    }
}
