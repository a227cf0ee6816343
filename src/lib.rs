pub mod call;
pub mod config;
pub mod relay;

pub use call::{CallController, CallError, DataPoint, Envelope, Identity, RtcEngine};
pub use config::Config;
pub use relay::{MemoryRelay, Relay, WsRelay};
