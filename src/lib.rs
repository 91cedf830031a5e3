pub mod availability;
pub mod booking;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod market;
pub mod model;
pub mod observability;
pub mod params;
pub mod search;
pub mod store;
pub mod wal;
pub mod wire;
