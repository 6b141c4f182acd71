// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! RouteWatch - streaming GPS inference
//!
//! Runs the per-fix pipeline over MQTT or a simulated device, and offers
//! one-shot commands for prediction, history queries, statistics and export.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use routewatch::core::{Engine, EventBus};
use routewatch::db::Database;
use routewatch::detection::ActivityLabel;
use routewatch::device::{DeviceSimulator, Fix};
use routewatch::streaming::{DataExporter, ExportFormat, IngestConfig, MqttPublisher, MqttSource};
use routewatch::{Config, VERSION};

/// RouteWatch - next-location forecasting, activity classification and off-route detection
#[derive(Parser, Debug)]
#[command(name = "routewatch")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Streaming GPS inference for a field device")]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long, global = true)]
    trace: bool,

    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline until Ctrl+C
    Run {
        /// Use the simulated device instead of MQTT
        #[arg(long)]
        demo: bool,

        /// MQTT broker address
        #[arg(long)]
        mqtt_broker: Option<String>,

        /// Topic the device publishes fixes on
        #[arg(long)]
        topic: Option<String>,
    },

    /// Run a single fix through the pipeline and print the response
    Predict {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// km/h
        #[arg(long, default_value_t = 0.0)]
        speed: f64,

        /// Unix seconds, defaults to now
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Print stored fixes, most recent first
    History {
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Only fixes with this activity label
        #[arg(long)]
        activity: Option<ActivityLabel>,
    },

    /// Print history statistics
    Stats,

    /// Export stored fixes
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    if let Some(data_dir) = args.data_dir.clone() {
        config.data_dir = data_dir;
    }
    config.database.path = config.database_path();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("RouteWatch v{}", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;

    match args.command.unwrap_or(Command::Run {
        demo: false,
        mqtt_broker: None,
        topic: None,
    }) {
        Command::Run { demo, mqtt_broker, topic } => {
            if demo {
                config.demo_mode = true;
            }
            if let Some(broker) = mqtt_broker {
                config.ingest.mqtt_broker = broker;
            }
            if let Some(topic) = topic {
                config.ingest.topic = topic;
            }
            rt.block_on(run_pipeline(config))
        }
        Command::Predict { lat, lon, speed, timestamp } => {
            let fix = Fix::new(lat, lon, speed, timestamp.unwrap_or_else(|| Utc::now().timestamp()));
            rt.block_on(predict_once(config, fix))
        }
        Command::History { limit, activity } => {
            let db = Database::open(&config.database)?;
            let rows = db.query_history(limit, activity)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Command::Stats => {
            let db = Database::open(&config.database)?;
            let stats = db.stats(Utc::now().timestamp())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Export { format, output, limit } => {
            let db = Database::open(&config.database)?;
            let rows = db.query_history(limit, None)?;
            let count = DataExporter::new(format).export_file(&rows, &output)?;
            info!("Wrote {} fixes", count);
            Ok(())
        }
    }
}

fn build_engine(config: Config) -> Result<(Arc<Engine>, Arc<Database>)> {
    let config = Arc::new(config);
    let db = Arc::new(Database::open(&config.database)?);
    let bus = Arc::new(EventBus::new(1000));
    let engine = Arc::new(Engine::new(config, db.clone(), bus));
    Ok((engine, db))
}

async fn predict_once(config: Config, fix: Fix) -> Result<()> {
    let (engine, _db) = build_engine(config)?;

    match engine.process_with_deadline(fix).await {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        None => anyhow::bail!("pipeline did not produce a response in time"),
    }
}

/// Run the pipeline headless until the source ends or Ctrl+C
async fn run_pipeline(config: Config) -> Result<()> {
    let demo = config.demo_mode;
    let publish = config.pipeline.publish_results;
    let ingest = config.ingest.clone();
    let forecast = config.forecast.clone();
    let retention_days = config.database.retention_days;

    let (engine, db) = build_engine(config)?;

    if retention_days > 0 {
        if let Err(e) = db.cleanup(retention_days) {
            warn!("Startup cleanup failed: {:#}", e);
        }
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, cleaning up...");
            let _ = shutdown_tx.send(());
        }
    });

    info!("Press Ctrl+C to shutdown");

    if demo {
        info!("Demo mode: simulated device");
        let mut source = DeviceSimulator::new(
            "simulator",
            forecast.default_lat,
            forecast.default_lon,
            Utc::now().timestamp(),
        );
        engine.clone().run(&mut source, shutdown_rx).await?;
    } else {
        let mut source = MqttSource::connect(&ingest).await?;
        let publisher = source.publisher();
        if publish {
            spawn_result_forwarder(engine.event_bus(), publisher.clone(), &ingest);
        }
        engine.clone().run(&mut source, shutdown_rx).await?;
        if let Err(e) = publisher.disconnect().await {
            warn!("{:#}", e);
        }
    }

    let state = engine.state();
    info!(
        "Processed {} fixes, {} anomalies, {} store failures, {} timeouts",
        state.fixes_processed, state.anomalies, state.store_failures, state.timeouts
    );
    info!("RouteWatch shutdown complete");
    Ok(())
}

/// Forward responses and alerts from the bus to their MQTT topics.
fn spawn_result_forwarder(bus: &EventBus, publisher: MqttPublisher, ingest: &IngestConfig) {
    let mut responses = bus.subscribe_responses();
    let mut alerts = bus.subscribe_alerts();
    let result_topic = ingest.result_topic.clone();
    let alert_topic = ingest.alert_topic.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = responses.recv() => match msg {
                    Ok(response) => {
                        if let Err(e) = publisher.publish(&result_topic, &response).await {
                            warn!("{:#}", e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Result forwarder skipped {} responses", n),
                    Err(RecvError::Closed) => break,
                },
                msg = alerts.recv() => match msg {
                    Ok(alert) => {
                        if let Err(e) = publisher.publish(&alert_topic, &alert).await {
                            error!("Alert publish failed: {:#}", e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Result forwarder skipped {} alerts", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}
