pub mod config;
pub mod router;
pub mod sink;
pub mod strategy;

pub use config::AppConfig;
pub use router::{ExecutionRouter, LogRouter, OrderIntent};
pub use sink::LoggerSink;
pub use strategy::CrossVenueArb;
