//! Structures for decoding `--reportformat json` output from `pvs`, `vgs`
//! and `lvs`. LVM reports every field as a JSON string regardless of its
//! logical type, so numeric fields route through [`number_from_string`].

use serde::de::Deserializer;
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

pub fn number_from_string<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr,
    T::Err: Display,
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    T::from_str(&s).map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
pub struct Report<T> {
    pub report: Vec<T>,
}

impl<T> Report<T> {
    pub fn into_first(self, command: &str) -> Result<T, super::LvmError> {
        self.report
            .into_iter()
            .next()
            .ok_or_else(|| super::LvmError::EmptyReport {
                command: command.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct PvSection {
    pub pv: Vec<PvRaw>,
}

#[derive(Debug, Deserialize)]
pub struct VgSection {
    pub vg: Vec<VgRaw>,
}

#[derive(Debug, Deserialize)]
pub struct LvSection {
    pub lv: Vec<LvRaw>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PvRaw {
    pub pv_name: String,
    #[serde(default)]
    pub vg_name: String,
    #[serde(deserialize_with = "number_from_string")]
    pub pv_size: u64,
    #[serde(default)]
    pub pv_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VgRaw {
    pub vg_name: String,
    #[serde(deserialize_with = "number_from_string")]
    pub vg_size: u64,
    #[serde(deserialize_with = "number_from_string")]
    pub vg_free: u64,
    #[serde(deserialize_with = "number_from_string")]
    pub vg_extent_size: u64,
    #[serde(deserialize_with = "number_from_string")]
    pub vg_extent_count: u64,
    #[serde(deserialize_with = "number_from_string")]
    pub vg_free_count: u64,
    #[serde(default)]
    pub vg_tags: String,
    #[serde(default)]
    pub vg_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LvRaw {
    pub lv_name: String,
    pub vg_name: String,
    #[serde(deserialize_with = "number_from_string")]
    pub lv_size: u64,
    #[serde(default)]
    pub lv_path: String,
    #[serde(default)]
    pub lv_tags: String,
    #[serde(default)]
    pub lv_uuid: String,
    #[serde(default)]
    pub lv_layout: String,
}

impl VgRaw {
    pub fn tags(&self) -> Vec<String> {
        split_tags(&self.vg_tags)
    }
}

impl LvRaw {
    pub fn tags(&self) -> Vec<String> {
        split_tags(&self.lv_tags)
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
