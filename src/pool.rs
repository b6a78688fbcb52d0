//! Worker pool: one OS thread per configured load source.
//!
//! Launch order is fixed: heartbeat, CPU workers, UDP pingers, then the
//! optional raw frame worker.  The desynchronization delay (if any) sits
//! between the CPU workers and the network workers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::config::{Desync, StressConfig};
use crate::engine::{self, heartbeat, Destination, LoadTarget, RawFrameTarget, WorkerContext, WorkerError};
use crate::payload::PayloadGenerator;
use crate::platform::HostProbe;
use crate::schedule::ScheduleSpec;

// ---------------------------------------------------------------------------
// LoadPlan
// ---------------------------------------------------------------------------

/// Descriptor for one worker.
#[derive(Debug, Clone)]
pub enum WorkerSpec {
    Heartbeat(LoadTarget),
    Cpu(ScheduleSpec),
    Udp(LoadTarget),
    Raw(RawFrameTarget),
}

impl WorkerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerSpec::Heartbeat(_) => "heartbeat",
            WorkerSpec::Cpu(_) => "cpu",
            WorkerSpec::Udp(_) => "udp",
            WorkerSpec::Raw(_) => "raw",
        }
    }

    pub fn is_network_load(&self) -> bool {
        matches!(self, WorkerSpec::Udp(_) | WorkerSpec::Raw(_))
    }

    /// Same worker with its active and sleep phases exchanged.
    fn swap_phases(&mut self) {
        match self {
            WorkerSpec::Heartbeat(_) => {}
            WorkerSpec::Cpu(schedule) => *schedule = schedule.swapped(),
            WorkerSpec::Udp(t) => t.schedule = t.schedule.swapped(),
            WorkerSpec::Raw(t) => t.schedule = t.schedule.swapped(),
        }
    }
}

/// Everything the pool will launch, in launch order.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub workers: Vec<WorkerSpec>,
    pub desync: Desync,
    pub schedule: ScheduleSpec,
}

impl LoadPlan {
    /// Build the worker descriptors from the configuration.
    ///
    /// In raw frame mode the host list is ignored: a single raw worker
    /// replaces the UDP pingers.
    pub fn from_config(config: &StressConfig, probe: Arc<dyn HostProbe>) -> Self {
        let schedule = config.schedule();
        let plan = config.packet_plan();
        let mut workers = Vec::new();

        if config.heartbeat.enabled {
            workers.push(WorkerSpec::Heartbeat(heartbeat::target(
                config.heartbeat.master.as_deref(),
                config.heartbeat.port,
                config.heartbeat_interval_micros(),
                probe,
            )));
        }

        workers.extend((0..config.cpu.threads).map(|_| WorkerSpec::Cpu(schedule)));

        if config.net.raw_frames {
            #[cfg(target_os = "linux")]
            workers.push(WorkerSpec::Raw(RawFrameTarget {
                source_mac: engine::raw::SOURCE_MAC,
                target_mac: engine::raw::TARGET_MAC,
                message_size: plan.message_size,
                delay_micros: plan.delay_micros,
                payload: PayloadGenerator::Dummy,
                regenerate_every_packet: false,
                schedule,
            }));
            #[cfg(not(target_os = "linux"))]
            warn!("raw frame mode is only available on Linux; skipped");
        } else {
            workers.extend(config.net.hosts.iter().map(|host| {
                WorkerSpec::Udp(LoadTarget {
                    destination: Destination::Host(host.clone()),
                    port: config.net.port,
                    message_size: plan.message_size,
                    delay_micros: plan.delay_micros,
                    payload: PayloadGenerator::Dummy,
                    regenerate_every_packet: false,
                    schedule,
                })
            }));
        }

        Self {
            workers,
            desync: config.schedule.desync,
            schedule,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Delay before the network workers start, and whether their phases get
    /// swapped.  `None` when no desynchronization applies.
    fn desync_delay(&self, rng: &mut impl Rng) -> Option<(Duration, bool)> {
        if self.schedule.active_secs == 0 || !self.workers.iter().any(WorkerSpec::is_network_load) {
            return None;
        }
        let active = self.schedule.active();
        match self.desync {
            Desync::None => None,
            Desync::Random => Some((active.mul_f64(rng.gen_range(0.0..1.0)), false)),
            Desync::Alternate => Some((active, true)),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A launched worker thread.
pub struct WorkerHandle {
    name: String,
    thread: JoinHandle<Result<(), WorkerError>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of [`WorkerPool::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub completed: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Launch every worker in `plan`.
    ///
    /// Blocks for the desynchronization delay, if any.  A shutdown during
    /// that delay stops further launches.
    pub fn launch(plan: LoadPlan, probe: Arc<dyn HostProbe>, ctx: WorkerContext) -> Self {
        let mut handles = Vec::with_capacity(plan.len());
        let mut pending = plan.desync_delay(&mut rand::thread_rng());
        let mut swap = false;

        for (id, mut spec) in plan.workers.into_iter().enumerate() {
            if spec.is_network_load() {
                if let Some((delay, swap_phases)) = pending.take() {
                    info!(delay_ms = delay.as_millis() as u64, swap_phases, "desynchronizing network load");
                    if ctx.shutdown.sleep(delay) {
                        warn!("shutdown during launch; remaining workers not started");
                        break;
                    }
                    swap = swap_phases;
                }
                if swap {
                    spec.swap_phases();
                }
            }

            let name = format!("stressgen-{}-{}", spec.kind(), id);
            match spawn(name.clone(), id, spec, probe.clone(), ctx.clone()) {
                Ok(thread) => handles.push(WorkerHandle { name, thread }),
                Err(e) => error!(worker = %name, error = %e, "failed to spawn worker thread"),
            }
        }

        info!(workers = handles.len(), "worker pool launched");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(WorkerHandle::name)
    }

    /// Wait for every worker to exit.
    pub fn join(self) -> JoinSummary {
        let mut summary = JoinSummary::default();
        for handle in self.handles {
            match handle.thread.join() {
                Ok(Ok(())) => summary.completed += 1,
                Ok(Err(e)) => {
                    warn!(worker = %handle.name, error = %e, "worker exited early");
                    summary.failed += 1;
                }
                Err(_) => {
                    error!(worker = %handle.name, "worker panicked");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

fn spawn(
    name: String,
    id: usize,
    spec: WorkerSpec,
    probe: Arc<dyn HostProbe>,
    ctx: WorkerContext,
) -> std::io::Result<JoinHandle<Result<(), WorkerError>>> {
    thread::Builder::new().name(name).spawn(move || match spec {
        WorkerSpec::Cpu(schedule) => {
            engine::cpu::run(id, schedule, ctx);
            Ok(())
        }
        WorkerSpec::Heartbeat(target) | WorkerSpec::Udp(target) => engine::udp::run(id, target, ctx),
        #[cfg(target_os = "linux")]
        WorkerSpec::Raw(target) => engine::raw::run(id, target, probe, ctx),
        #[cfg(not(target_os = "linux"))]
        WorkerSpec::Raw(_) => {
            let _ = probe;
            Err(WorkerError::NoInterface)
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
