use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{EquipmentType, Field, PowerSource, Record, RecordKey};

/// How a fresh record treats the stored one with the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Full overwrite of the stored row.
    #[default]
    Replace,
    /// Keep stored non-null values where the fresh extraction found nothing.
    KeepExisting,
}

/// Upsert `fresh` into `existing` by identity key. Matched rows are updated in
/// place, new keys are appended in extraction order, untouched rows keep their
/// position.
pub fn merge(existing: Vec<Record>, fresh: Vec<Record>, policy: MergePolicy) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::with_capacity(existing.len() + fresh.len());
    let mut index: HashMap<RecordKey, usize> = HashMap::new();

    for record in existing {
        upsert(&mut out, &mut index, record, MergePolicy::Replace);
    }
    let (before, mut replaced) = (out.len(), 0usize);
    for record in fresh {
        if upsert(&mut out, &mut index, record, policy) {
            replaced += 1;
        }
    }
    debug!(
        "Merged: {} updated, {} appended, {} total",
        replaced,
        out.len() - before,
        out.len()
    );
    out
}

/// Returns true when an existing row was updated.
fn upsert(
    out: &mut Vec<Record>,
    index: &mut HashMap<RecordKey, usize>,
    mut record: Record,
    policy: MergePolicy,
) -> bool {
    let key = record.key();
    match index.get(&key) {
        Some(&pos) => {
            if policy == MergePolicy::KeepExisting {
                keep_known(&mut record, &out[pos]);
            }
            out[pos] = record;
            true
        }
        None => {
            index.insert(key, out.len());
            out.push(record);
            false
        }
    }
}

/// Fill every field `fresh` left empty from `prior`, evidence included.
fn keep_known(fresh: &mut Record, prior: &Record) {
    let (f, p) = (&mut fresh.fields, &prior.fields);

    if f.power_source == PowerSource::Unknown {
        f.power_source = p.power_source;
    }
    if f.equipment_type == EquipmentType::Unknown {
        f.equipment_type = p.equipment_type;
    }

    let numeric = [
        (&mut f.engine_power_kw, p.engine_power_kw, Field::EnginePowerKw),
        (&mut f.operating_mass_t, p.operating_mass_t, Field::OperatingMassT),
        (&mut f.bucket_volume_m3, p.bucket_volume_m3, Field::BucketVolumeM3),
        (&mut f.blade_width_m, p.blade_width_m, Field::BladeWidthM),
        (&mut f.blade_height_m, p.blade_height_m, Field::BladeHeightM),
    ];
    let mut kept = Vec::new();
    for (slot, old, field) in numeric {
        if slot.is_none() && old.is_some() {
            *slot = old;
            kept.push(field);
        }
    }
    if f.year_of_release.is_none() && p.year_of_release.is_some() {
        f.year_of_release = p.year_of_release.clone();
        kept.push(Field::YearOfRelease);
    }
    for field in kept {
        if let Some(e) = p.raw_evidence.get(&field) {
            f.raw_evidence.insert(field, e.clone());
        }
    }

    if fresh.development_status.is_none() {
        fresh.development_status = prior.development_status.clone();
    }
    if fresh.link_date.is_none() {
        fresh.link_date = prior.link_date.clone();
    }
    if fresh.country.is_empty() {
        fresh.country = prior.country.clone();
    }
}
