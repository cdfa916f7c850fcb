//! SUOTA firmware update engine
//!
//! Drives a software update over the air against a device exposing the SUOTA
//! GATT service: discovers the device, negotiates transfer sizes, streams the
//! image block by block and reboots the device into it. The BLE stack sits
//! behind the [`Transport`] trait.

pub mod config;
pub mod error;
pub mod gatt;
pub mod image;
pub mod params;
pub mod report;
pub mod segment;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod mock;

pub use config::{Config, ConfigError, PatchLengthPolicy};
pub use error::{Step, SuotaError, WriteFailure};
pub use image::Image;
pub use params::TransferParameters;
pub use report::{Milestone, Progress, Report};
pub use transport::{EventQueues, EventSink, Transport, TransportError, TransportEvent, channel};
pub use updater::{AttemptOutcome, Prompt, Question, RunSummary, SessionState, UpdateReport, Updater};
