//! Adaptive location beacon: samples positions, keeps day-partitioned tracks,
//! renders daily GeoJSON reports and takes remote commands over a chat bot.

pub mod channel;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod device;
pub mod engine;
pub mod error;
pub mod geo_math;
pub mod lifecycle;
pub mod live_status;
pub mod notifier;
pub mod position;
pub mod report;
pub mod sampling;
pub mod scheduler;
pub mod settings;
pub mod telegram;
pub mod track_store;
pub mod tracker;
pub mod types;

pub use engine::Engine;
pub use error::{BeaconError, BeaconResult};
