//! Venue pipeline: one client, one ring, one processor, two threads.
//!
//! `start` spawns the I/O thread (a current-thread reactor driving the
//! client to Closed/Failed) and the parser thread (the processor loop),
//! each pinned to its configured core. Pinning is advisory; a missing
//! core or unsupported platform never fails `start`.
//!
//! `stop` halts the processor first so it drains the ring, joins the
//! parser thread, then closes the WebSocket and joins the I/O thread.
//! Both calls are idempotent.

use std::thread::JoinHandle;

use market_core::VenueId;

use crate::processors::{Normalize, Processor, ProcessorHandle};
use crate::session::{ClientControl, ClientState, Dialect, VenueClient};

/// Object-safe pipeline surface for heterogeneous venue collections.
pub trait Pipeline: Send {
    fn venue(&self) -> &VenueId;
    fn start(&mut self);
    fn stop(&mut self);
    fn client_state(&self) -> ClientState;
}

pub struct VenuePipeline<D: Dialect, N: Normalize> {
    venue: VenueId,
    client: Option<VenueClient<D>>,
    processor: Option<Processor<N>>,
    control: ClientControl,
    processor_handle: ProcessorHandle,
    io_core: Option<usize>,
    parser_core: Option<usize>,
    io_thread: Option<JoinHandle<()>>,
    parser_thread: Option<JoinHandle<()>>,
    running: bool,
}

impl<D: Dialect, N: Normalize> VenuePipeline<D, N> {
    pub fn new(
        client: VenueClient<D>,
        processor: Processor<N>,
        io_core: Option<usize>,
        parser_core: Option<usize>,
    ) -> Self {
        let venue = client.venue();
        let control = client.control();
        let processor_handle = processor.handle();

        VenuePipeline {
            venue,
            client: Some(client),
            processor: Some(processor),
            control,
            processor_handle,
            io_core,
            parser_core,
            io_thread: None,
            parser_thread: None,
            running: false,
        }
    }
}

impl<D: Dialect, N: Normalize> Pipeline for VenuePipeline<D, N> {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn start(&mut self) {
        if self.running {
            tracing::warn!(venue = %self.venue, "pipeline already running");
            return;
        }
        let (Some(mut client), Some(mut processor)) = (self.client.take(), self.processor.take())
        else {
            tracing::warn!(venue = %self.venue, "pipeline cannot be restarted");
            return;
        };
        self.running = true;

        let venue = self.venue;
        let io_core = self.io_core;
        self.io_thread = Some(
            std::thread::Builder::new()
                .name(format!("{}-io", venue))
                .spawn(move || {
                    pin_current_thread(io_core, &venue);
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(reactor) => {
                            let end = reactor.block_on(client.run());
                            tracing::info!(venue = %venue, state = ?end, "io thread exited");
                        }
                        Err(err) => {
                            tracing::error!(venue = %venue, error = %err, "failed to build reactor");
                        }
                    }
                })
                .expect("spawn io thread"),
        );

        let venue = self.venue;
        let parser_core = self.parser_core;
        self.parser_thread = Some(
            std::thread::Builder::new()
                .name(format!("{}-parser", venue))
                .spawn(move || {
                    pin_current_thread(parser_core, &venue);
                    processor.run();
                    tracing::info!(venue = %venue, "parser thread exited");
                })
                .expect("spawn parser thread"),
        );

        tracing::info!(venue = %self.venue, "pipeline started");
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        // Parser first: it drains the remaining frames before exiting.
        self.processor_handle.stop();
        if let Some(thread) = self.parser_thread.take() {
            let _ = thread.join();
        }

        self.control.stop();
        if let Some(thread) = self.io_thread.take() {
            let _ = thread.join();
        }

        tracing::info!(venue = %self.venue, "pipeline stopped");
    }

    fn client_state(&self) -> ClientState {
        self.control.state()
    }
}

impl<D: Dialect, N: Normalize> Drop for VenuePipeline<D, N> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pin_current_thread(core: Option<usize>, venue: &VenueId) {
    let Some(index) = core else {
        return;
    };
    let Some(ids) = core_affinity::get_core_ids() else {
        tracing::debug!(venue = %venue, "cpu pinning unsupported on this platform");
        return;
    };
    match ids.get(index) {
        Some(id) => {
            if core_affinity::set_for_current(*id) {
                tracing::debug!(venue = %venue, core = index, "thread pinned");
            } else {
                tracing::warn!(venue = %venue, core = index, "failed to pin thread");
            }
        }
        None => {
            tracing::warn!(venue = %venue, core = index, "core index out of range, not pinning");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::BinanceDialect;
    use crate::processors::BinanceNormalizer;
    use crate::session::SessionConfig;
    use crate::{bus::EventBus, ring};
    use market_core::FeedStats;
    use std::sync::Arc;
    use std::time::Duration;

    fn unreachable_pipeline() -> VenuePipeline<BinanceDialect, BinanceNormalizer> {
        let stats = Arc::new(FeedStats::new());
        let bus = Arc::new(EventBus::new(Arc::clone(&stats)));
        let (producer, consumer) = ring::with_capacity(64);

        let client = VenueClient::new(
            SessionConfig {
                // Nothing listens on port 1; connects fail immediately
                // and the pipeline sits in backoff until stopped.
                host: "127.0.0.1".to_string(),
                port: 1,
                path: "/ws".to_string(),
                tls_verify: true,
                ping_interval: Duration::from_secs(15),
                close_timeout: Duration::from_secs(5),
            },
            BinanceDialect::new(vec!["btcusdt@trade".to_string()]),
            producer,
            Arc::clone(&stats),
        );
        let processor = Processor::new(consumer, BinanceNormalizer, bus, stats);
        VenuePipeline::new(client, processor, None, None)
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let mut pipeline = unreachable_pipeline();
        assert_eq!(pipeline.client_state(), ClientState::Idle);

        pipeline.start();
        std::thread::sleep(Duration::from_millis(50));

        pipeline.stop();
        assert_eq!(pipeline.client_state(), ClientState::Closed);
        assert!(pipeline.parser_thread.is_none());
        assert!(pipeline.io_thread.is_none());

        // Idempotent.
        pipeline.stop();
    }

    #[test]
    fn test_double_start_is_harmless() {
        let mut pipeline = unreachable_pipeline();
        pipeline.start();
        pipeline.start();
        pipeline.stop();
    }
}
