use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::record::{EquipmentType, ExtractedFields, PowerSource, Record};

pub const DEFAULT_OUT_DIR: &str = "data";

/// Column order of the CSV table.
pub const COLUMNS: [&str; 16] = [
    "power_source",
    "oem",
    "country",
    "equipment_type",
    "operating_mass_t",
    "engine_power_kw",
    "bucket_volume_m3",
    "blade_width_m",
    "blade_height_m",
    "model_number",
    "year_of_release",
    "development_status",
    "link",
    "link_date",
    "last_seen_utc",
    "raw_evidence",
];

/// Flat CSV row; `raw_evidence` is stored as a JSON object string.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    power_source: PowerSource,
    oem: String,
    country: String,
    equipment_type: EquipmentType,
    operating_mass_t: Option<f64>,
    engine_power_kw: Option<f64>,
    bucket_volume_m3: Option<f64>,
    blade_width_m: Option<f64>,
    blade_height_m: Option<f64>,
    model_number: Option<String>,
    year_of_release: Option<String>,
    development_status: Option<String>,
    link: String,
    link_date: Option<String>,
    last_seen_utc: String,
    raw_evidence: String,
}

/// The persisted dataset: one CSV table and one JSON array with the same rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub csv_path: PathBuf,
    pub json_path: PathBuf,
}

impl Dataset {
    pub fn in_dir(dir: &Path) -> Self {
        Dataset {
            csv_path: dir.join("machines.csv"),
            json_path: dir.join("machines.json"),
        }
    }

    /// Previously persisted records. JSON is preferred; the CSV is read when
    /// the JSON is absent; a first run starts empty.
    pub fn load(&self) -> Result<Vec<Record>, StoreError> {
        let records = if self.json_path.is_file() {
            self.load_json()?
        } else if self.csv_path.is_file() {
            self.load_csv()?
        } else {
            debug!("No existing dataset in {}", self.json_path.display());
            Vec::new()
        };
        info!("Loaded {} existing records", records.len());
        Ok(records)
    }

    /// Rewrite both files in full. Both are staged before either replaces the
    /// existing file, so a failed write leaves the previous pair untouched.
    pub fn save(&self, records: &[Record]) -> Result<(), StoreError> {
        let json = stage(&self.json_path, |file| {
            let mut out = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut out, records).map_err(|source| StoreError::Json {
                path: self.json_path.clone(),
                source,
            })?;
            out.write_all(b"\n")
                .and_then(|_| out.flush())
                .map_err(|source| StoreError::Write {
                    path: self.json_path.clone(),
                    source,
                })
        })?;

        let csv = stage(&self.csv_path, |file| {
            let csv_err = |source| StoreError::Csv {
                path: self.csv_path.clone(),
                source,
            };
            let mut w = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            w.write_record(COLUMNS).map_err(csv_err)?;
            for record in records {
                w.serialize(to_row(record, &self.csv_path)?).map_err(csv_err)?;
            }
            w.flush().map_err(|source| StoreError::Write {
                path: self.csv_path.clone(),
                source,
            })
        })?;

        persist(json, &self.json_path)?;
        persist(csv, &self.csv_path)?;

        debug!(
            "Wrote {} records to {} and {}",
            records.len(),
            self.csv_path.display(),
            self.json_path.display()
        );
        Ok(())
    }

    fn load_json(&self) -> Result<Vec<Record>, StoreError> {
        let raw = fs::read_to_string(&self.json_path).map_err(|source| StoreError::Read {
            path: self.json_path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Json {
            path: self.json_path.clone(),
            source,
        })
    }

    fn load_csv(&self) -> Result<Vec<Record>, StoreError> {
        let csv_err = |source| StoreError::Csv {
            path: self.csv_path.clone(),
            source,
        };
        let mut reader = csv::Reader::from_path(&self.csv_path).map_err(csv_err)?;
        let mut records = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            records.push(from_row(row.map_err(csv_err)?, &self.csv_path)?);
        }
        Ok(records)
    }
}

/// Fill a temp file next to `path`; nothing at `path` changes yet.
fn stage(
    path: &Path,
    fill: impl FnOnce(&mut File) -> Result<(), StoreError>,
) -> Result<NamedTempFile, StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    fill(tmp.as_file_mut())?;
    Ok(tmp)
}

/// Rename a staged file over `path`.
fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), StoreError> {
    tmp.persist(path).map_err(|e| StoreError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

fn to_row(record: &Record, path: &Path) -> Result<CsvRow, StoreError> {
    let f = &record.fields;
    let raw_evidence =
        serde_json::to_string(&f.raw_evidence).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(CsvRow {
        power_source: f.power_source,
        oem: record.oem.clone(),
        country: record.country.clone(),
        equipment_type: f.equipment_type,
        operating_mass_t: f.operating_mass_t,
        engine_power_kw: f.engine_power_kw,
        bucket_volume_m3: f.bucket_volume_m3,
        blade_width_m: f.blade_width_m,
        blade_height_m: f.blade_height_m,
        model_number: f.model_number.clone(),
        year_of_release: f.year_of_release.clone(),
        development_status: record.development_status.clone(),
        link: record.link.clone(),
        link_date: record.link_date.clone(),
        last_seen_utc: record.last_seen_utc.clone(),
        raw_evidence,
    })
}

fn from_row(row: CsvRow, path: &Path) -> Result<Record, StoreError> {
    let raw_evidence = if row.raw_evidence.trim().is_empty() {
        Default::default()
    } else {
        serde_json::from_str(&row.raw_evidence).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };
    Ok(Record {
        oem: row.oem,
        country: row.country,
        development_status: row.development_status,
        fields: ExtractedFields {
            power_source: row.power_source,
            equipment_type: row.equipment_type,
            engine_power_kw: row.engine_power_kw,
            operating_mass_t: row.operating_mass_t,
            bucket_volume_m3: row.bucket_volume_m3,
            blade_width_m: row.blade_width_m,
            blade_height_m: row.blade_height_m,
            model_number: row.model_number,
            year_of_release: row.year_of_release,
            raw_evidence,
        },
        link: row.link,
        link_date: row.link_date,
        last_seen_utc: row.last_seen_utc,
    })
}

// ── Tests ──
