
use std::sync::Arc;

use tokio;

use gatepulse_backend::{
    config::settings::Settings,
    services::{
        exchange::{
            api::GateRest,
            session::{ExchangeSession, SessionConfig},
        },
        hub::{server, BroadcastHub},
        indicators::{BookImbalance, EveryNth, Indicator, RollingVolume, TickRate},
        orchestrator::Orchestrator,
        strategies::hold::HoldOnly,
    },
    utils::logport::LogPort,
};

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    println!("Starting gatepulse backend…");

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("Failed to load settings: {e}");
        std::process::exit(1);
    });

    let hub = Arc::new(BroadcastHub::new());

    // --- downstream WS server ----------------------------------------------
    {
        let hub = Arc::clone(&hub);
        let port = settings.server_port;
        tokio::spawn(async move {
            if let Err(e) = server::run(hub, port).await {
                log::error!("hub server: {e}");
            }
        });
    }

    let (log_port, log_rx) = LogPort::channel();
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

    let api = Arc::new(GateRest::new(&settings));
    let cfg = SessionConfig::from_settings(&settings);
    let mut session = ExchangeSession::new(
        settings.clone(),
        cfg,
        api,
        event_tx,
        log_port.clone(),
    );
    // only the initial connect is fatal; everything after self-heals
    if let Err(e) = session.start().await {
        eprintln!("Failed to connect to exchange: {e}");
        std::process::exit(1);
    }

    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(TickRate::new(60_000)),
        Box::new(RollingVolume::default()),
        Box::new(BookImbalance::default()),
    ];
    let orchestrator = Orchestrator::new(
        Arc::clone(&hub),
        event_rx,
        log_rx,
        indicators,
        Box::new(HoldOnly),
        EveryNth::new(settings.indicator_every),
        settings.symbol.clone(),
    );

    tokio::select! {
        _ = orchestrator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
    }

    session.stop();
    hub.shutdown("server shutting down");
}
