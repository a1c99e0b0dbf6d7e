pub mod config;
pub mod decode;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod runner;
pub mod traits;
pub mod vision_ops;

pub mod mocks;

pub use config::{Config, ModelSettings};
pub use decode::decode_image;
pub use errors::{ErrorKind, InferenceError, Result, VisionError};
pub use orchestrator::{ModelLease, Orchestrator};
pub use output::{InferenceMeta, InferenceResponse, OutputValue, ResultMap};
pub use registry::{ModelEntry, ModelInfo, Registry};
pub use runner::{DirectoryRunner, RunSummary};
pub use traits::*;
pub use vision_ops::color::HexColor;
