mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, YoloParams};
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{BoundingBox, Detection};
