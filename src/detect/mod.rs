mod backend;
mod backends;
mod registry;
mod result;

pub use backend::InferenceBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{Detection, RawDetection};
