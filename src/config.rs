use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::{DetectionGate, DEFAULT_VEHICLE_LABELS};
use crate::events::{EntryDirection, DEFAULT_HISTORY_LEN};
use crate::identity::DEFAULT_PLATE_PREFIX;
use crate::ledger::DEFAULT_SOURCE_ID;
use crate::pipeline::PipelineConfig;
use crate::tracker::TrackerConfig;

const DEFAULT_DB_PATH: &str = "ledger.db";
const DEFAULT_MAX_AGE: u32 = 45;
const DEFAULT_MIN_HITS: u32 = 5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.25;
const DEFAULT_LINE_POSITION: f32 = 400.0;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LedgerdConfigFile {
    db_path: Option<String>,
    plate_prefix: Option<String>,
    tracker: Option<TrackerConfigFile>,
    line: Option<LineConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    max_age: Option<u32>,
    min_hits: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LineConfigFile {
    position: Option<f32>,
    entry_direction: Option<String>,
    history_len: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    min_confidence: Option<f32>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct LedgerdConfig {
    pub db_path: String,
    pub plate_prefix: String,
    pub tracker: TrackerConfig,
    pub line: LineSettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone)]
pub struct LineSettings {
    pub position: f32,
    pub entry_direction: EntryDirection,
    pub history_len: usize,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_confidence: f32,
    pub labels: Vec<String>,
}

impl LedgerdConfig {
    /// Defaults, then the file named by `LEDGER_CONFIG`, then `LEDGER_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LEDGER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LedgerdConfigFile) -> Result<Self> {
        let tracker = file.tracker.unwrap_or_default();
        let line = file.line.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        let entry_direction = match line.entry_direction {
            Some(raw) => raw.parse()?,
            None => EntryDirection::Down,
        };

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            plate_prefix: file
                .plate_prefix
                .unwrap_or_else(|| DEFAULT_PLATE_PREFIX.to_string()),
            tracker: TrackerConfig {
                max_age: tracker.max_age.unwrap_or(DEFAULT_MAX_AGE),
                min_hits: tracker.min_hits.unwrap_or(DEFAULT_MIN_HITS),
                iou_threshold: tracker.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            line: LineSettings {
                position: line.position.unwrap_or(DEFAULT_LINE_POSITION),
                entry_direction,
                history_len: line.history_len.unwrap_or(DEFAULT_HISTORY_LEN),
            },
            detection: DetectionSettings {
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                labels: detection.labels.unwrap_or_else(|| {
                    DEFAULT_VEHICLE_LABELS
                        .iter()
                        .map(|label| label.to_string())
                        .collect()
                }),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("LEDGER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(prefix) = std::env::var("LEDGER_PLATE_PREFIX") {
            if !prefix.trim().is_empty() {
                self.plate_prefix = prefix;
            }
        }
        if let Ok(direction) = std::env::var("LEDGER_ENTRY_DIRECTION") {
            self.line.entry_direction = direction.parse()?;
        }
        if let Some(position) = env_number::<f32>("LEDGER_LINE_POSITION")? {
            self.line.position = position;
        }
        if let Some(max_age) = env_number::<u32>("LEDGER_MAX_AGE")? {
            self.tracker.max_age = max_age;
        }
        if let Some(min_hits) = env_number::<u32>("LEDGER_MIN_HITS")? {
            self.tracker.min_hits = min_hits;
        }
        if let Some(iou) = env_number::<f32>("LEDGER_IOU_THRESHOLD")? {
            self.tracker.iou_threshold = iou;
        }
        if let Some(conf) = env_number::<f32>("LEDGER_MIN_CONFIDENCE")? {
            self.detection.min_confidence = conf;
        }
        if let Ok(labels) = std::env::var("LEDGER_VEHICLE_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detection.labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.plate_prefix.trim().is_empty() {
            return Err(anyhow!("plate_prefix must not be empty"));
        }
        self.plate_prefix = self.plate_prefix.trim().to_string();

        let iou = self.tracker.iou_threshold;
        if !(iou > 0.0 && iou <= 1.0) {
            return Err(anyhow!("iou_threshold must be in (0, 1], got {}", iou));
        }
        if self.tracker.min_hits == 0 {
            return Err(anyhow!("min_hits must be at least 1"));
        }
        let conf = self.detection.min_confidence;
        if !(0.0..=1.0).contains(&conf) {
            return Err(anyhow!("min_confidence must be in [0, 1], got {}", conf));
        }
        if !self.line.position.is_finite() {
            return Err(anyhow!("line position must be finite"));
        }
        if self.line.history_len == 0 {
            return Err(anyhow!("history_len must be at least 1"));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tracker: self.tracker,
            line_position: self.line.position,
            entry_direction: self.line.entry_direction,
            history_len: self.line.history_len,
            plate_prefix: self.plate_prefix.clone(),
            gate: DetectionGate::new(self.detection.min_confidence, self.detection.labels.clone()),
            source_id: DEFAULT_SOURCE_ID.to_string(),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", key, raw)),
        _ => Ok(None),
    }
}

/// TOML by default; `.json` files are read as JSON.
fn read_config_file(path: &Path) -> Result<LedgerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deployment_profile() {
        let mut cfg = LedgerdConfig::from_file(LedgerdConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_path, "ledger.db");
        assert_eq!(cfg.tracker.max_age, 45);
        assert_eq!(cfg.tracker.min_hits, 5);
        assert_eq!(cfg.tracker.iou_threshold, 0.25);
        assert_eq!(cfg.line.position, 400.0);
        assert_eq!(cfg.line.entry_direction, EntryDirection::Down);
        assert_eq!(cfg.detection.labels, vec!["car", "motorcycle", "bus", "truck"]);
        assert_eq!(cfg.pipeline_config().plate_prefix, "TEMP");
    }

    #[test]
    fn toml_sections_parse() {
        let file: LedgerdConfigFile = toml::from_str(
            r#"
            db_path = "lot_a.db"

            [line]
            position = 320.5
            entry_direction = "UP"

            [tracker]
            min_hits = 2
            "#,
        )
        .unwrap();
        let cfg = LedgerdConfig::from_file(file).unwrap();
        assert_eq!(cfg.db_path, "lot_a.db");
        assert_eq!(cfg.line.position, 320.5);
        assert_eq!(cfg.line.entry_direction, EntryDirection::Up);
        assert_eq!(cfg.tracker.min_hits, 2);
        assert_eq!(cfg.tracker.max_age, 45);
    }

    #[test]
    fn bad_direction_is_rejected() {
        let file = LedgerdConfigFile {
            line: Some(LineConfigFile {
                entry_direction: Some("sideways".to_string()),
                ..LineConfigFile::default()
            }),
            ..LedgerdConfigFile::default()
        };
        assert!(LedgerdConfig::from_file(file).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let base = LedgerdConfig::from_file(LedgerdConfigFile::default()).unwrap();

        let mut cfg = base.clone();
        cfg.tracker.iou_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.tracker.min_hits = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.detection.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.plate_prefix = "   ".to_string();
        assert!(cfg.validate().is_err());
    }
}
