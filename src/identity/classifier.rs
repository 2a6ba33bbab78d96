use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::identity::image::Crop;

/// Best-effort attributes read from one vehicle crop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleIdentity {
    pub plate: Option<String>,
    pub brand: Option<String>,
    pub color: Option<String>,
}

/// Result of resolving one track, as recorded by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The classifier returned a readable plate.
    Resolved(VehicleIdentity),
    /// No usable plate; the reason is kept for logs and reports.
    Failed(String),
}

/// External plate/brand/color capability.
///
/// Implementations wrap OCR and visual classifiers. They are called once per
/// track lifetime and must treat the crop as read-only and ephemeral. Errors
/// are isolated to the track being resolved and never abort a frame.
pub trait IdentityClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn classify(&mut self, crop: &Crop<'_>) -> Result<VehicleIdentity>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
