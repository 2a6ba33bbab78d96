//! Identity resolution boundary.
//!
//! Plate OCR and brand/color classification are external capabilities. The
//! pipeline calls them at most once per track id through
//! [`IdentityClassifier`], normalises whatever comes back, and memoizes the
//! result in an [`IdentityCache`] until the next `reset()`.

mod backends;
mod cache;
mod classifier;
mod image;
mod plate;

pub use backends::StubClassifier;
pub use cache::{IdentityCache, ResolvedIdentity};
pub use classifier::{IdentityClassifier, IdentityOutcome, VehicleIdentity};
pub use image::{Crop, FrameImage};
pub use plate::{
    new_session_tag, normalize_plate, placeholder_plate, plate_lookup_key, DEFAULT_PLATE_PREFIX,
};
