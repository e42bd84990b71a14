use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use agent::{AppConfig, CrossVenueArb, LogRouter, LoggerSink};
use market_core::{FeedStats, QualifiedSymbol, VenueId};
use market_feed::clients::{BinanceDialect, CoinbaseDialect, KrakenDialect};
use market_feed::config::{LoggingConfig, Subscription, VenueConfig};
use market_feed::processors::{BinanceNormalizer, CoinbaseNormalizer, KrakenNormalizer, Processor};
use market_feed::rest::{BinanceSnapshotFetcher, CoinbaseSnapshotFetcher};
use market_feed::{
    ring, BookManager, EventBus, Pipeline, SessionConfig, VenueClient, VenuePipeline,
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {dir}"))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(format!("{dir}/feed.log"))
                .with_context(|| format!("opening log file under {dir}"))?;
            let writer = Arc::new(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || Arc::clone(&writer))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn session_config(venue: &VenueConfig) -> SessionConfig {
    SessionConfig {
        host: venue.host.clone(),
        port: venue.port,
        path: venue.path.clone(),
        tls_verify: venue.tls_verify,
        ping_interval: venue.ping_interval(),
        close_timeout: CLOSE_TIMEOUT,
    }
}

fn build_pipeline(
    venue: &VenueConfig,
    bus: &Arc<EventBus>,
    stats: &Arc<FeedStats>,
    books: &Arc<BookManager>,
) -> Option<Box<dyn Pipeline>> {
    let (producer, consumer) = ring::with_capacity(venue.ring_capacity);
    let session = session_config(venue);

    match &venue.subscription {
        Subscription::Binance { streams } => {
            if !venue.rest_url.is_empty() {
                books.register_fetcher(
                    VenueId::Binance,
                    Arc::new(BinanceSnapshotFetcher::new(venue.rest_url.clone())),
                );
            }
            let client = VenueClient::new(
                session,
                BinanceDialect::new(streams.clone()),
                producer,
                Arc::clone(stats),
            );
            let processor = Processor::new(
                consumer,
                BinanceNormalizer,
                Arc::clone(bus),
                Arc::clone(stats),
            );
            Some(Box::new(VenuePipeline::new(
                client,
                processor,
                venue.io_core,
                venue.parser_core,
            )))
        }
        Subscription::Coinbase {
            product_ids,
            channels,
        } => {
            if !venue.rest_url.is_empty() {
                books.register_fetcher(
                    VenueId::Coinbase,
                    Arc::new(CoinbaseSnapshotFetcher::new(venue.rest_url.clone())),
                );
            }
            let client = VenueClient::new(
                session,
                CoinbaseDialect::new(product_ids.clone(), channels.clone()),
                producer,
                Arc::clone(stats),
            );
            let processor = Processor::new(
                consumer,
                CoinbaseNormalizer,
                Arc::clone(bus),
                Arc::clone(stats),
            );
            Some(Box::new(VenuePipeline::new(
                client,
                processor,
                venue.io_core,
                venue.parser_core,
            )))
        }
        Subscription::Kraken { method, params } => {
            if method != "subscribe" {
                tracing::warn!(venue = %venue.id, method = %method, "unsupported method, skipping venue");
                return None;
            }
            let mut dialect = KrakenDialect::new(&params.channel, params.symbol.clone());
            dialect.set_tls_verify(venue.tls_verify);
            let client = VenueClient::new(session, dialect, producer, Arc::clone(stats));
            let processor = Processor::new(
                consumer,
                KrakenNormalizer,
                Arc::clone(bus),
                Arc::clone(stats),
            );
            Some(Box::new(VenuePipeline::new(
                client,
                processor,
                venue.io_core,
                venue.parser_core,
            )))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load(&config_path)?;
    init_logging(&config.logging)?;

    tracing::info!(config = %config_path, "starting market-data agent");

    let stats = Arc::new(FeedStats::new());
    let bus = Arc::new(EventBus::new(Arc::clone(&stats)));
    let books = Arc::new(BookManager::new(Arc::clone(&stats)));

    // Subscriber order matters: books first so strategies read current
    // state, then the logger, then strategies.
    books.attach(&bus);
    LoggerSink::subscribe_to(&bus);

    if let Some(cfg) = &config.strategy {
        let venue_a: VenueId = cfg.venue_a.parse().context("strategy venue_a")?;
        let venue_b: VenueId = cfg.venue_b.parse().context("strategy venue_b")?;
        let strategy = Arc::new(CrossVenueArb::new(
            QualifiedSymbol::new(venue_a, cfg.symbol_a.as_str()),
            QualifiedSymbol::new(venue_b, cfg.symbol_b.as_str()),
            cfg.fee,
            cfg.depth,
            Arc::new(LogRouter),
        ));
        strategy.subscribe_to(&bus, Arc::clone(&books));
    }

    let mut pipelines: Vec<Box<dyn Pipeline>> = config
        .enabled_venues()
        .filter_map(|venue| build_pipeline(venue, &bus, &stats, &books))
        .collect();

    if pipelines.is_empty() {
        tracing::warn!("no venues enabled in {}", config_path);
    }

    for pipeline in &mut pipelines {
        pipeline.start();
    }
    let recovery = books.spawn_recovery_thread();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for pipeline in pipelines.iter_mut().rev() {
        pipeline.stop();
    }
    recovery.stop();

    let snapshot = stats.snapshot();
    tracing::info!(?snapshot, "final feed stats");
    Ok(())
}
