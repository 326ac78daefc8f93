#![doc = "Packet-processing scheduler for the media relay."]

pub mod engine;
pub mod lifecycle;
pub mod locks;
pub mod message;
pub mod netio;
pub mod pacing;
pub mod poll;
pub mod queue;
pub mod realtime;
pub mod scheduler;

pub use engine::*;
pub use lifecycle::*;
pub use locks::*;
pub use message::*;
pub use netio::*;
pub use pacing::*;
pub use poll::*;
pub use queue::*;
pub use realtime::*;
pub use scheduler::*;
