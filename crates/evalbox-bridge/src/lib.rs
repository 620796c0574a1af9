mod client;
mod error;
pub mod shape;

pub use client::{BridgeClient, BridgeModel, ChatReply};
pub use error::{BridgeError, Result};
pub use shape::{ChatShapeReport, JsonKind};
