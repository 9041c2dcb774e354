//! Drive replay records through a fusion engine and score the result.

use crate::replay::ReplayRecord;
use anyhow::bail;
use fusion_core::config::EngineConfig;
use fusion_core::metrics::{FusionMetrics, GroundTruth};
use fusion_core::{Engine, EngineHandle, FusionStats, Snapshot, SourceType};
use sensor_models::RadarSite;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Matches between a published target and a vessel further apart than this
/// do not count.
pub const DEFAULT_MATCH_RADIUS_M: f64 = 150.0;

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub seed: u64,
    pub cycles: u64,
    pub partial_cycles: u64,
    /// Radar plots and AIS reports refused at normalization
    pub rejected_reports: u64,
    /// Detections refused by the engine at ingestion
    pub malformed: u64,
    pub alerts: BTreeMap<String, u64>,
    pub final_stats: FusionStats,
    pub mean_cycle_us: f64,
    pub rmse_position_m: f64,
    pub rmse_velocity_ms: f64,
    pub precision: f64,
    pub recall: f64,
    pub fused_ratio: f64,
    pub id_switches: u64,
}

pub struct Runner {
    engine: Engine,
    handle: EngineHandle,
    site: Option<RadarSite>,
    truths: Vec<GroundTruth>,
    match_radius_m: f64,
    metrics: FusionMetrics,
    summary: RunSummary,
    total_cycle_us: u64,
}

impl Runner {
    pub fn new(config: EngineConfig, match_radius_m: f64) -> anyhow::Result<Self> {
        let engine = Engine::new(config)?;
        let handle = engine.handle();
        Ok(Self {
            engine,
            handle,
            site: None,
            truths: Vec::new(),
            match_radius_m,
            metrics: FusionMetrics::default(),
            summary: RunSummary::default(),
            total_cycle_us: 0,
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Apply one record; a `tick` runs a cycle and returns its snapshot.
    pub fn feed(&mut self, record: ReplayRecord) -> anyhow::Result<Option<Arc<Snapshot>>> {
        match record {
            ReplayRecord::Header { scenario, seed, site } => {
                let origin = self.engine.pipeline().config().origin;
                if site.position != origin {
                    warn!(
                        site_lat = site.position.lat,
                        site_lon = site.position.lon,
                        "radar site differs from the engine origin"
                    );
                }
                info!(%scenario, seed, "replay started");
                self.summary.scenario = scenario;
                self.summary.seed = seed;
                self.site = Some(site);
            }
            ReplayRecord::Radar { plots, .. } => {
                let Some(site) = self.site.as_ref() else {
                    bail!("radar record before header");
                };
                let scan = site.normalize_scan(&plots);
                for err in &scan.rejected {
                    debug!(%err, "radar plot rejected");
                }
                self.summary.rejected_reports += scan.rejected.len() as u64;
                self.handle.submit_detections(SourceType::Radar, scan.detections);
            }
            ReplayRecord::Ais { reports, .. } => {
                let mut detections = Vec::with_capacity(reports.len());
                for report in &reports {
                    match report.normalize() {
                        Ok(det) => detections.push(det),
                        Err(err) => {
                            debug!(%err, "AIS report rejected");
                            self.summary.rejected_reports += 1;
                        }
                    }
                }
                self.handle.submit_detections(SourceType::Ais, detections);
            }
            ReplayRecord::Truth { vessels, .. } => self.truths = vessels,
            ReplayRecord::Tick { time } => {
                let snap = self.engine.run_cycle(time);
                self.summary.cycles += 1;
                self.summary.malformed += snap.cycle.malformed;
                self.summary.partial_cycles += u64::from(snap.partial);
                self.summary.final_stats = snap.stats;
                self.total_cycle_us += snap.cycle.duration_us;
                for alert in self.handle.get_alerts() {
                    *self.summary.alerts.entry(alert.kind.to_string()).or_default() += 1;
                }
                if !self.truths.is_empty() {
                    self.metrics.accumulate(&snap.fused, &self.truths, self.match_radius_m);
                }
                return Ok(Some(snap));
            }
        }
        Ok(None)
    }

    pub fn finish(mut self) -> RunSummary {
        let m = &self.metrics;
        let s = &mut self.summary;
        s.mean_cycle_us = if s.cycles == 0 {
            0.0
        } else {
            self.total_cycle_us as f64 / s.cycles as f64
        };
        s.rmse_position_m = m.rmse_position();
        s.rmse_velocity_ms = m.rmse_velocity();
        s.precision = m.precision();
        s.recall = m.recall();
        s.fused_ratio = m.fused_ratio();
        s.id_switches = m.id_switches;
        info!(cycles = s.cycles, precision = s.precision, recall = s.recall, "replay finished");
        self.summary
    }
}

/// Run a whole record stream through a fresh engine.
pub fn run_records(
    config: EngineConfig,
    records: impl IntoIterator<Item = ReplayRecord>,
    match_radius_m: f64,
) -> anyhow::Result<RunSummary> {
    let mut runner = Runner::new(config, match_radius_m)?;
    for record in records {
        runner.feed(record)?;
    }
    Ok(runner.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_before_header_are_refused() {
        let mut runner = Runner::new(EngineConfig::default(), DEFAULT_MATCH_RADIUS_M).unwrap();
        let err = runner
            .feed(ReplayRecord::Radar { time: 0.0, plots: Vec::new() })
            .unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[test]
    fn tick_runs_a_cycle() {
        let mut runner = Runner::new(EngineConfig::default(), DEFAULT_MATCH_RADIUS_M).unwrap();
        let snap = runner.feed(ReplayRecord::Tick { time: 0.0 }).unwrap().unwrap();
        assert_eq!(snap.generation, 1);
        assert_eq!(runner.finish().cycles, 1);
    }
}
