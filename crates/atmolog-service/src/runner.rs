//! Continuous mode: the single-shot cycle on a timer.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{info, warn};

use crate::orchestrator::CycleReport;

/// Call `cycle` every `period` until `shutdown` resolves or `limit` elapses.
///
/// The first call happens immediately. A cycle that overruns the period
/// delays the next one rather than causing a burst. Returns the report of the
/// last completed cycle.
pub async fn run_every<F, Fut, Sd>(
    period: Duration,
    limit: Option<Duration>,
    shutdown: Sd,
    mut cycle: F,
) -> Option<CycleReport>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CycleReport>,
    Sd: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = limit.map(|l| Instant::now() + l);
    let expired = async {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(shutdown, expired);

    info!("Running every {}s", period.as_secs());
    let mut last = None;
    let mut consecutive_fatal = 0u32;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping");
                break;
            }
            _ = &mut expired => {
                info!("Run duration reached, stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        let report = cycle().await;
        if report.is_fatal() {
            consecutive_fatal += 1;
            warn!("Cycle failed ({} in a row)", consecutive_fatal);
        } else {
            consecutive_fatal = 0;
        }
        last = Some(report);
    }

    last
}
