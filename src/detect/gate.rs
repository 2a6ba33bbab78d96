use crate::detect::result::Detection;

/// Detector labels treated as vehicles.
pub const DEFAULT_VEHICLE_LABELS: &[&str] = &["car", "motorcycle", "bus", "truck"];

/// Input validation applied before detections reach the tracker.
///
/// The tracker itself never rejects a box, so anything non-finite, outside the
/// frame, below the confidence floor or of a non-vehicle label is filtered here.
#[derive(Clone, Debug)]
pub struct DetectionGate {
    pub min_confidence: f32,
    /// Accepted labels, lowercase. Empty accepts every label.
    pub labels: Vec<String>,
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            labels: DEFAULT_VEHICLE_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

impl DetectionGate {
    pub fn new(min_confidence: f32, labels: Vec<String>) -> Self {
        Self {
            min_confidence,
            labels: labels
                .into_iter()
                .map(|label| label.trim().to_lowercase())
                .filter(|label| !label.is_empty())
                .collect(),
        }
    }

    fn accepts_label(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    /// Returns the detections that pass, with boxes clamped to the frame.
    pub fn filter(&self, detections: &[Detection], width: u32, height: u32) -> Vec<Detection> {
        detections
            .iter()
            .filter(|det| det.confidence.is_finite() && det.confidence >= self.min_confidence)
            .filter(|det| self.accepts_label(&det.label))
            .filter(|det| det.bbox.is_finite())
            .filter_map(|det| {
                let bbox = det.bbox.clamp_to(width, height);
                if bbox.is_degenerate() {
                    log::debug!("dropping degenerate detection {:?}", det.bbox);
                    return None;
                }
                Some(Detection {
                    bbox,
                    confidence: det.confidence,
                    label: det.label.clone(),
                })
            })
            .collect()
    }
}
