//! Per-venue market-data ingest pipelines and the event distribution
//! fabric.
//!
//! Each venue pipeline couples a reconnecting WebSocket client, an SPSC
//! ring hand-off and a byte-level normalizer on two pinned threads;
//! normalized events fan out synchronously over the typed [`bus`].
//! Level-2 feeds are reconstructed by [`book::BookManager`] under
//! sequence-gap detection with REST snapshot recovery.

pub mod auth;
pub mod book;
pub mod bus;
pub mod clients;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod processors;
pub mod rest;
pub mod ring;
pub mod scan;
pub mod session;

pub use book::BookManager;
pub use bus::EventBus;
pub use pipeline::{Pipeline, VenuePipeline};
pub use session::{ClientControl, ClientState, SessionConfig, VenueClient};
