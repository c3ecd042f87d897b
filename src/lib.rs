pub mod config;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod observe;
pub mod render;
pub mod session;
pub mod sidecar_api;
pub mod store;
#[cfg(any(test, feature = "integration-test-api"))]
pub mod test_support;
pub mod transform;

pub use error::AppError;
pub use render::{RenderHandle, RenderState, RenderStatus, Renderer};
pub use session::{EditingSession, EngineStatus, SourceVideo};
pub use store::TransformStore;
pub use transform::{OutputFormat, TransformState};
