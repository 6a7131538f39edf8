pub mod http;
pub mod scripted;

pub use http::{HttpModel, HttpModelConfig};
pub use scripted::ScriptedModel;
