//! Configuration
//!
//! [`AppConfig`] is read from a JSON file through [`ConfigStore`]; command
//! line flags override individual values.

mod schema;
mod store;

pub use schema::{AppConfig, CaptureConfig, EndpointConfig, SamplingConfig, SourceKind};
pub use store::ConfigStore;
