pub mod client;
pub mod constants;
pub mod conversation;
pub mod envelope;
pub mod execution;
pub mod framing;
pub mod logging;
pub mod partial_json;
pub mod types;

pub use types::*;
