//! Supervised tasks: launch every unit, wait on all of them, relaunch whichever dies.
//!
//! Each unit is a launcher returning a [`JoinHandle`]; the handle resolving (for any
//! reason, panic included) is the unit's death. Units restart independently, with a
//! fixed per-unit delay. There is no backoff and no restart ceiling.

use futures_util::future::select_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

type Launch = Arc<dyn Fn() -> JoinHandle<()> + Send + Sync>;

struct Unit {
    name: String,
    restart_delay: Duration,
    launch: Launch,
}

/// Emitted each time a unit is relaunched. `restart` counts from 1 per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartEvent {
    pub unit: String,
    pub restart: u64,
}

#[derive(Default)]
pub struct Supervisor {
    units: Vec<Unit>,
    events: Option<mpsc::UnboundedSender<RestartEvent>>,
}

/// Running unit handles; aborted when their owner (the supervisor, or a delayed
/// relaunch) goes away.
struct Running(Vec<JoinHandle<()>>);

impl Drop for Running {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. `restart_delay` is waited before every relaunch (not the first launch).
    pub fn unit<F>(mut self, name: impl Into<String>, restart_delay: Duration, launch: F) -> Self
    where
        F: Fn() -> JoinHandle<()> + Send + Sync + 'static,
    {
        self.units.push(Unit {
            name: name.into(),
            restart_delay,
            launch: Arc::new(launch),
        });
        self
    }

    /// Report every restart on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RestartEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }

    /// Launch all units and keep them alive. Only returns when there are no units.
    pub async fn run(self) {
        if self.units.is_empty() {
            log::warn!("supervisor: nothing to supervise");
            return;
        }
        let mut running = Running(
            self.units
                .iter()
                .map(|unit| {
                    log::info!("supervisor: starting {}", unit.name);
                    (unit.launch)()
                })
                .collect(),
        );
        let mut restarts = vec![0u64; self.units.len()];
        loop {
            let (result, index, rest) = select_all(running.0.iter_mut()).await;
            drop(rest);
            let unit = &self.units[index];
            log_death(&unit.name, result);

            restarts[index] += 1;
            if let Some(events) = &self.events {
                let _ = events.send(RestartEvent {
                    unit: unit.name.clone(),
                    restart: restarts[index],
                });
            }
            running.0[index] = relaunch(unit);
        }
    }
}

fn log_death(name: &str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => log::warn!("supervisor: {} exited, restarting", name),
        Err(e) if e.is_panic() => log::error!("supervisor: {} panicked, restarting", name),
        Err(e) => log::warn!("supervisor: {} stopped ({}), restarting", name, e),
    }
}

fn relaunch(unit: &Unit) -> JoinHandle<()> {
    if unit.restart_delay.is_zero() {
        return (unit.launch)();
    }
    let name = unit.name.clone();
    let delay = unit.restart_delay;
    let launch = unit.launch.clone();
    tokio::spawn(async move {
        log::info!("supervisor: restarting {} in {:?}", name, delay);
        tokio::time::sleep(delay).await;
        let mut unit = Running(vec![launch()]);
        if let Err(e) = (&mut unit.0[0]).await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    })
}
