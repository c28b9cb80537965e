//! cardsweep - unattended body-camera card ingest
//!
//! Finds camera SD cards attached to the host, claims each one under a
//! private mount point, reconciles the device configuration with the config
//! service, uploads recordings and ejects the card. A persisted ledger keeps
//! a card from being processed twice within its cool-down window.

pub mod config;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod remote;
pub mod utils;
pub mod volume;

pub use error::{AppError, Result};
