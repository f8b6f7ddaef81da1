//! Periodic tasks
//!
//! Six cooperative loops share one controller. Every tick runs in its own
//! spawned task so a panic is contained and logged instead of killing the
//! loop; per-tick errors are logged and the loop sleeps until the next
//! tick. All loops observe the shutdown signal between ticks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error};

use gantry_core::ports::AdapterError;

use super::Controller;

const MIN_MAINTAINER_PERIOD: Duration = Duration::from_secs(60);
const RUNTIME_MANAGER_PERIOD: Duration = Duration::from_secs(30);
const RECONCILER_PERIOD: Duration = Duration::from_secs(120);
const DEAD_CLEANER_PERIOD: Duration = Duration::from_secs(300);
const UTILIZATION_PERIOD: Duration = Duration::from_secs(60);

/// Spawns the six periodic loops.
pub fn spawn_all(
    controller: Arc<Controller>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let poll_interval = controller.config().poll_interval;

    vec![
        spawn_loop("queue-monitor", poll_interval, shutdown.clone(), {
            let c = controller.clone();
            move || {
                let c = c.clone();
                async move { c.queue_tick().await }
            }
        }),
        spawn_loop("min-maintainer", MIN_MAINTAINER_PERIOD, shutdown.clone(), {
            let c = controller.clone();
            move || {
                let c = c.clone();
                async move { c.min_tick().await }
            }
        }),
        spawn_loop(
            "runtime-manager",
            RUNTIME_MANAGER_PERIOD,
            shutdown.clone(),
            {
                let c = controller.clone();
                move || {
                    let c = c.clone();
                    async move { c.runtime_refresh_tick().await }
                }
            },
        ),
        spawn_loop("reconciler", RECONCILER_PERIOD, shutdown.clone(), {
            let c = controller.clone();
            move || {
                let c = c.clone();
                async move { c.reconcile_tick().await }
            }
        }),
        spawn_loop("dead-cleaner", DEAD_CLEANER_PERIOD, shutdown.clone(), {
            let c = controller.clone();
            move || {
                let c = c.clone();
                async move { c.reap_dead_tick().await }
            }
        }),
        spawn_loop("utilization-monitor", UTILIZATION_PERIOD, shutdown, {
            let c = controller.clone();
            move || {
                let c = c.clone();
                async move { c.utilization_tick().await }
            }
        }),
    ]
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!(task = name, "tick");
                    match tokio::spawn(tick()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(task = name, error = %e, "tick failed"),
                        Err(e) => error!(task = name, error = %e, "tick panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(task = name, "stopping");
                        break;
                    }
                }
            }
        }
    })
}
