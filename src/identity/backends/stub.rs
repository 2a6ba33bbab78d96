use anyhow::Result;

use crate::identity::classifier::{IdentityClassifier, VehicleIdentity};
use crate::identity::image::Crop;

/// Stub backend for replays and tests. Reads nothing, so every track ends
/// up under a placeholder plate.
pub struct StubClassifier {
    calls: u64,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self { calls: 0 }
    }

    /// Number of crops classified so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, _crop: &Crop<'_>) -> Result<VehicleIdentity> {
        self.calls += 1;
        Ok(VehicleIdentity::default())
    }
}
