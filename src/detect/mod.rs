mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{non_max_suppression, BoundingBox, Detection};
