use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CamId, Error, Result};

pub const BULL_LOCATION: &str = "bull_location";
pub const BOARD_RADIUS: &str = "board_radius";
pub const BOARD_SURFACE: &str = "board_surface";
pub const ROI_START: &str = "roi_start";
pub const ROI_END: &str = "roi_end";

pub const PARAM_NAMES: [&str; 5] = [BULL_LOCATION, BOARD_RADIUS, BOARD_SURFACE, ROI_START, ROI_END];

/// One calibration parameter: a fallback value plus per-camera overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTable {
    pub default: f64,
    pub per_cam: BTreeMap<CamId, f64>,
}

impl ParamTable {
    fn new(default: f64, per_cam: &[(u8, f64)]) -> Self {
        Self {
            default,
            per_cam: per_cam.iter().map(|&(c, v)| (CamId(c), v)).collect(),
        }
    }

    pub fn get(&self, cam: CamId) -> f64 {
        self.per_cam.get(&cam).copied().unwrap_or(self.default)
    }
}

/// Geometric calibration for the whole rig: relative (0..1) image positions
/// per parameter per camera. Persisted between runs as a single CBOR blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    params: BTreeMap<String, ParamTable>,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        let mut params = BTreeMap::new();
        params.insert(
            BULL_LOCATION.to_string(),
            ParamTable::new(0.5, &[(0, 0.487), (1, 0.50575)]),
        );
        params.insert(
            BOARD_RADIUS.to_string(),
            ParamTable::new(0.26, &[(0, 0.26125), (1, 0.259)]),
        );
        params.insert(
            BOARD_SURFACE.to_string(),
            ParamTable::new(0.3, &[(0, 0.269), (1, 0.3)]),
        );
        params.insert(
            ROI_START.to_string(),
            ParamTable::new(0.32, &[(0, 0.3), (1, 0.31)]),
        );
        params.insert(
            ROI_END.to_string(),
            ParamTable::new(0.4, &[(0, 0.4), (1, 0.4)]),
        );
        Self { params }
    }
}

impl CalibrationRecord {
    pub fn get(&self, param: &str, cam: CamId) -> Option<f64> {
        self.params.get(param).map(|t| t.get(cam))
    }

    pub fn set(&mut self, param: &str, cam: CamId, value: f64) -> Result<()> {
        let table = self
            .params
            .get_mut(param)
            .ok_or_else(|| Error::UnknownCalibrationParam(param.to_string()))?;
        table.per_cam.insert(cam, value);
        Ok(())
    }

    /// Merge a live update into the record. Unknown parameter names are
    /// rejected, leaving the record unchanged for that key.
    pub fn merge(&mut self, update: &CalibrationUpdate) -> Result<()> {
        for (&cam, params) in &update.0 {
            for (name, &value) in params {
                self.set(name, cam, value)?;
                debug!("calibration update: {} cam {} -> {}", name, cam, value);
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let blob = serde_cbor::to_vec(self)?;
        std::fs::write(path, blob)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let blob = std::fs::read(path)?;
        Ok(serde_cbor::from_slice(&blob)?)
    }
}

/// Live calibration message: `{"<cam>": {"<param>": value, ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationUpdate(pub BTreeMap<CamId, BTreeMap<String, f64>>);

impl CalibrationUpdate {
    pub fn from_json(raw: &str) -> Result<Self> {
        let by_cam: BTreeMap<String, BTreeMap<String, f64>> = serde_json::from_str(raw)?;
        let mut result = BTreeMap::new();
        for (cam, params) in by_cam {
            let cam: u8 = cam
                .parse()
                .map_err(|_| Error::UnknownCalibrationParam(cam.clone()))?;
            result.insert(CamId(cam), params);
        }
        Ok(Self(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rig() {
        let rec = CalibrationRecord::default();
        assert_eq!(rec.get(BULL_LOCATION, CamId(0)), Some(0.487));
        assert_eq!(rec.get(BULL_LOCATION, CamId(1)), Some(0.50575));
        // unknown camera falls back to the table default
        assert_eq!(rec.get(BULL_LOCATION, CamId(9)), Some(0.5));
        assert_eq!(rec.get("no_such_param", CamId(0)), None);
    }

    #[test]
    fn merge_and_blob_round_trip() -> eyre::Result<()> {
        let mut rec = CalibrationRecord::default();
        let update = CalibrationUpdate::from_json(r#"{"1": {"board_surface": 0.42}}"#)?;
        rec.merge(&update)?;
        assert_eq!(rec.get(BOARD_SURFACE, CamId(1)), Some(0.42));

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("CALIBRATION");
        rec.save(&path)?;
        let loaded = CalibrationRecord::load(&path)?;
        assert_eq!(rec, loaded);
        Ok(())
    }

    #[test]
    fn merge_rejects_unknown_param() {
        let mut rec = CalibrationRecord::default();
        let update = CalibrationUpdate::from_json(r#"{"0": {"bogus": 1.0}}"#).unwrap();
        assert!(rec.merge(&update).is_err());
    }
}
