#![doc = "Common types shared across the media relay workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod stats;
pub mod time;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use stats::*;
pub use time::*;
