pub mod batch;
pub mod error;
pub mod ffmpeg;
pub mod files;
pub mod logging;
pub mod settings;
pub mod sidecar_api;
#[cfg(feature = "integration-test-api")]
pub mod test_support;

pub use batch::{BatchCoordinator, BatchEvent, ConversionRequest, Outcome};
pub use error::AppError;
