//! Response Monitor
//!
//! Watches the outbound calls a chat host makes right after the user triggers
//! a generation, decides whether that round failed, came back empty or
//! succeeded, and raises alerts accordingly.

pub mod alert;
pub mod capability;
pub mod config;
pub mod error;
pub mod heuristic;
pub mod matcher;
pub mod monitor;
pub mod round;
pub mod transport;
pub mod trigger;

pub use alert::{AlertDispatcher, ChannelDispatcher};
pub use capability::{Capabilities, EnvironmentInfo};
pub use config::{MonitorConfig, SharedConfig};
pub use error::{AlertError, FetchError, MonitorError, MonitorResult};
pub use monitor::{Monitor, MonitorBuilder, Verdict};
pub use round::{Classification, RoundId, RoundOutcome};
pub use transport::{install, HostTransports};
pub use trigger::KeyChord;
