//! Engine: the public face of the fusion core.
//!
//! Producers and readers talk to a cloneable [`EngineHandle`]. The cycle
//! itself runs either on a dedicated worker thread ticking every
//! `cycle_interval_secs` ([`Engine::spawn`]) or synchronously via
//! [`Engine::run_cycle`] (replay, tests, CLI). A reload that changes
//! `cycle_interval_secs` retunes the worker's ticker as soon as it lands.

use crate::alert::Alert;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::ingest::{IngestQueue, SubmitReport};
use crate::pipeline::FusionPipeline;
use crate::snapshot::{Snapshot, SnapshotPublisher};
use crate::track::TrackDetail;
use crate::trajectory::{TrajectoryPoint, TrajectoryStats};
use crate::types::{Detection, SourceType, TrackId};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

enum Control {
    Reload(Box<EngineConfig>),
}

/// State shared between the cycle owner and every handle.
struct Shared {
    queue: IngestQueue,
    publisher: SnapshotPublisher,
    outbox: ArrayQueue<Alert>,
    control: Sender<Control>,
    /// Nudges a sleeping worker after a reload or shutdown request
    wake: Sender<()>,
    shutdown: AtomicBool,
}

/// Cloneable, `Send + Sync` access point for producers and readers.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Enqueue a batch from one feed; never blocks.
    pub fn submit_detections(&self, source: SourceType, detections: Vec<Detection>) -> SubmitReport {
        self.shared.queue.submit(source, detections)
    }

    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.shared.publisher.load()
    }

    pub fn get_track_detail(&self, id: TrackId) -> Result<TrackDetail> {
        self.get_snapshot().track_detail(id)
    }

    pub fn get_trajectory(&self, id: TrackId, last_n: Option<usize>) -> Result<Vec<TrajectoryPoint>> {
        self.get_snapshot().trajectory(id, last_n)
    }

    pub fn get_trajectory_stats(&self, id: TrackId) -> Result<TrajectoryStats> {
        self.get_snapshot().trajectory_stats(id)
    }

    /// Alerts raised since the previous call, oldest first.
    pub fn get_alerts(&self) -> Vec<Alert> {
        let mut out = Vec::with_capacity(self.shared.outbox.len());
        while let Some(alert) = self.shared.outbox.pop() {
            out.push(alert);
        }
        out
    }

    /// Validate `config` and hand it to the cycle owner; it takes effect at
    /// the start of the next cycle.
    pub fn reload_config(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        // The receiver lives as long as the engine; a closed channel means
        // the engine is gone and there is nothing left to configure.
        let _ = self.shared.control.send(Control::Reload(Box::new(config)));
        self.wake();
        Ok(())
    }

    /// Ask a spawned worker to stop after its current cycle.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.wake();
    }

    fn wake(&self) {
        // A pending wake-up is as good as a second one
        let _ = self.shared.wake.try_send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

/// Owner of the pipeline. Run cycles synchronously, or [`Engine::spawn`] a
/// worker that runs them on a timer.
pub struct Engine {
    pipeline: FusionPipeline,
    shared: Arc<Shared>,
    control: Receiver<Control>,
    wake: Receiver<()>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let pipeline = FusionPipeline::new(config)?;
        let config = pipeline.config();
        let (tx, rx) = channel::unbounded();
        let (wake_tx, wake_rx) = channel::bounded(1);
        let shared = Arc::new(Shared {
            queue: IngestQueue::new(config.queue_capacity),
            publisher: SnapshotPublisher::new(Snapshot::empty(*pipeline.frame())),
            outbox: ArrayQueue::new(config.alerts.outbox_capacity.max(1)),
            control: tx,
            wake: wake_tx,
            shutdown: AtomicBool::new(false),
        });
        Ok(Self {
            pipeline,
            shared,
            control: rx,
            wake: wake_rx,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pipeline(&self) -> &FusionPipeline {
        &self.pipeline
    }

    /// Apply pending reloads, drain the queues, run one cycle at `now` and
    /// publish the result.
    pub fn run_cycle(&mut self, now: f64) -> Arc<Snapshot> {
        self.apply_reloads();

        let batches = self.shared.queue.drain();
        let mut snapshot = self.pipeline.run_cycle(batches, now);
        let (malformed, dropped) = self.shared.queue.take_counters();
        snapshot.cycle.malformed = malformed;
        snapshot.cycle.dropped_batches = dropped;

        for alert in &snapshot.alerts {
            if self.shared.outbox.force_push(alert.clone()).is_some() {
                warn!("alert outbox full, dropped oldest alert");
            }
        }

        self.shared.publisher.publish(snapshot);
        self.shared.publisher.load()
    }

    fn apply_reloads(&mut self) {
        while let Ok(Control::Reload(config)) = self.control.try_recv() {
            if let Err(err) = self.pipeline.apply_config(*config) {
                warn!(%err, "configuration reload rejected");
            }
        }
    }

    /// Move the engine onto a worker thread that runs one cycle per
    /// `cycle_interval_secs`, stamped with wall-clock seconds since the Unix
    /// epoch. Reloads are applied when they arrive, and a changed interval
    /// restarts the ticker. The worker exits once [`EngineHandle::shutdown`]
    /// is called, without waiting for the next tick.
    pub fn spawn(mut self) -> (EngineHandle, JoinHandle<()>) {
        let handle = self.handle();
        let worker = thread::spawn(move || {
            let mut interval = self.pipeline.config().cycle_interval();
            let mut ticker = channel::tick(interval);
            info!(interval_ms = interval.as_millis() as u64, "fusion worker started");
            while !self.shared.shutdown.load(Ordering::Acquire) {
                let tick = select! {
                    recv(ticker) -> tick => tick.is_ok(),
                    recv(self.wake) -> _ => false,
                };
                if self.shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                if tick {
                    self.run_cycle(wall_clock_secs());
                } else {
                    self.apply_reloads();
                }

                let next = self.pipeline.config().cycle_interval();
                if next != interval {
                    info!(
                        from_ms = interval.as_millis() as u64,
                        to_ms = next.as_millis() as u64,
                        "cycle interval changed, retuning ticker"
                    );
                    interval = next;
                    ticker = channel::tick(interval);
                }
            }
            info!("fusion worker stopped");
        });
        (handle, worker)
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ORIGIN;

    fn radar(t: f64) -> Detection {
        Detection::radar("3", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, t)
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<EngineHandle>();
    }

    #[test]
    fn synchronous_cycles_publish_generations() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let handle = engine.handle();
        assert_eq!(handle.get_snapshot().generation, 0);

        handle.submit_detections(SourceType::Radar, vec![radar(0.0)]);
        engine.run_cycle(0.0);
        let snap = handle.get_snapshot();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.radar.len(), 1);

        let id = snap.radar[0].track_id;
        let detail = handle.get_track_detail(id).unwrap();
        assert_eq!(detail.view.track_id, id);
        assert_eq!(detail.trajectory_points, 1);
        assert_eq!(handle.get_trajectory(id, None).unwrap().len(), 1);
        assert_eq!(handle.get_trajectory_stats(id).unwrap().points, 1);
        assert!(handle.get_track_detail(TrackId(999)).is_err());
        assert!(handle.get_trajectory_stats(TrackId(999)).is_err());
    }

    #[test]
    fn malformed_counts_reach_cycle_stats() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let handle = engine.handle();
        let report = handle.submit_detections(SourceType::Radar, vec![radar(f64::NAN)]);
        assert_eq!(report.malformed, 1);
        let snap = engine.run_cycle(1.0);
        assert_eq!(snap.cycle.malformed, 1);
        assert!(snap.radar.is_empty());
    }

    #[test]
    fn reload_applies_on_next_cycle() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let handle = engine.handle();

        let mut bad = EngineConfig::default();
        bad.fusion.defuse_after = 0;
        assert!(handle.reload_config(bad).is_err());

        let mut next = EngineConfig::default();
        next.fusion.defuse_after = 7;
        handle.reload_config(next).unwrap();
        assert_eq!(engine.pipeline().config().fusion.defuse_after, 3);
        engine.run_cycle(0.0);
        assert_eq!(engine.pipeline().config().fusion.defuse_after, 7);
    }

    #[test]
    fn worker_stops_on_shutdown() {
        let config = EngineConfig {
            cycle_interval_secs: 0.01,
            ..EngineConfig::default()
        };
        let (handle, worker) = Engine::new(config).unwrap().spawn();
        while handle.get_snapshot().generation < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();
        worker.join().unwrap();
        assert!(handle.is_shutdown());
    }

    #[test]
    fn reload_retunes_a_sleeping_worker() {
        let slow = EngineConfig {
            cycle_interval_secs: 3600.0,
            ..EngineConfig::default()
        };
        let (handle, worker) = Engine::new(slow).unwrap().spawn();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.get_snapshot().generation, 0);

        let fast = EngineConfig {
            cycle_interval_secs: 0.01,
            ..EngineConfig::default()
        };
        handle.reload_config(fast).unwrap();
        let started = std::time::Instant::now();
        while handle.get_snapshot().generation < 2 {
            assert!(started.elapsed() < Duration::from_secs(5), "ticker was not retuned");
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn shutdown_does_not_wait_for_a_long_tick() {
        let slow = EngineConfig {
            cycle_interval_secs: 3600.0,
            ..EngineConfig::default()
        };
        let (handle, worker) = Engine::new(slow).unwrap().spawn();
        let started = std::time::Instant::now();
        handle.shutdown();
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.get_snapshot().generation, 0);
    }
}
