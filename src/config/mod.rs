//! Program configuration

mod schema;
mod store;

pub use schema::{AppConfig, LayoutConfig, LedgerConfig, RemoteConfig, VolumeConfig};
pub use store::load_config;
