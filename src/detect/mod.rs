mod gate;
mod result;

pub use gate::{DetectionGate, DEFAULT_VEHICLE_LABELS};
pub use result::{BBox, Detection};
