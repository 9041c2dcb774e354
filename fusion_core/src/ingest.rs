//! Bounded, non-blocking ingestion queues (one per source).
//!
//! Producers never block: when a source's queue is full the oldest unconsumed
//! batch of that source is dropped and counted. Detections are validated
//! here, so nothing malformed reaches the track state machine.

use crate::types::{Detection, DetectionBatch, SourceType};
use crate::error::FusionError;
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Outcome of one `submit` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubmitReport {
    pub accepted: usize,
    pub malformed: usize,
    /// An older batch of the same source was evicted to make room
    pub dropped_oldest: bool,
}

#[derive(Debug)]
pub struct IngestQueue {
    radar: ArrayQueue<DetectionBatch>,
    ais: ArrayQueue<DetectionBatch>,
    dropped_batches: AtomicU64,
    malformed: AtomicU64,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            radar: ArrayQueue::new(capacity.max(1)),
            ais: ArrayQueue::new(capacity.max(1)),
            dropped_batches: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    fn queue(&self, source: SourceType) -> &ArrayQueue<DetectionBatch> {
        match source {
            SourceType::Radar => &self.radar,
            SourceType::Ais => &self.ais,
        }
    }

    /// Validate and enqueue one batch. Empty batches (after validation) are
    /// not queued.
    pub fn submit(&self, source: SourceType, detections: Vec<Detection>) -> SubmitReport {
        let total = detections.len();
        let valid: Vec<Detection> = detections
            .into_iter()
            .filter(|det| match check(source, det) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "dropping malformed detection");
                    false
                }
            })
            .collect();

        let mut report = SubmitReport {
            accepted: valid.len(),
            malformed: total - valid.len(),
            dropped_oldest: false,
        };
        if report.malformed > 0 {
            self.malformed.fetch_add(report.malformed as u64, Ordering::Relaxed);
        }
        if valid.is_empty() {
            return report;
        }

        let received_at = valid.iter().map(|d| d.timestamp).fold(f64::MIN, f64::max);
        let batch = DetectionBatch {
            source_type: source,
            received_at,
            detections: valid,
        };
        if self.queue(source).force_push(batch).is_some() {
            self.dropped_batches.fetch_add(1, Ordering::Relaxed);
            warn!(source = %source, "ingest queue full, dropped oldest batch");
            report.dropped_oldest = true;
        }
        report
    }

    /// Take every queued batch, radar first, each source in arrival order.
    pub fn drain(&self) -> Vec<DetectionBatch> {
        let mut out = Vec::with_capacity(self.radar.len() + self.ais.len());
        for source in SourceType::ALL {
            let q = self.queue(source);
            while let Some(batch) = q.pop() {
                out.push(batch);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.radar.len() + self.ais.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radar.is_empty() && self.ais.is_empty()
    }

    /// (malformed detections, dropped batches) since the previous call.
    pub fn take_counters(&self) -> (u64, u64) {
        (
            self.malformed.swap(0, Ordering::Relaxed),
            self.dropped_batches.swap(0, Ordering::Relaxed),
        )
    }
}

fn check(source: SourceType, det: &Detection) -> Result<(), FusionError> {
    if det.source_type != source {
        return Err(FusionError::MalformedDetection {
            source_type: det.source_type,
            sensor_id: det.sensor_id.clone(),
            reason: format!("submitted on the {source} feed"),
        });
    }
    det.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radar(t: f64) -> Detection {
        Detection::radar("1", 30.0, 122.0, t)
    }

    #[test]
    fn overflow_drops_oldest_batch() {
        let q = IngestQueue::new(2);
        for t in 0..3 {
            q.submit(SourceType::Radar, vec![radar(t as f64)]);
        }
        let batches = q.drain();
        let times: Vec<f64> = batches.iter().map(|b| b.received_at).collect();
        assert_eq!(times, vec![1.0, 2.0]);
        assert_eq!(q.take_counters(), (0, 1));
        assert_eq!(q.take_counters(), (0, 0), "counters reset on take");
    }

    #[test]
    fn malformed_and_mismatched_detections_are_rejected() {
        let q = IngestQueue::new(4);
        let report = q.submit(
            SourceType::Radar,
            vec![
                radar(0.0),
                Detection::radar("2", 95.0, 122.0, 0.0),
                Detection::ais("412000001", 30.0, 122.0, 0.0),
            ],
        );
        assert_eq!(report.accepted, 1);
        assert_eq!(report.malformed, 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.take_counters().0, 2);
    }

    #[test]
    fn sources_queue_independently() {
        let q = IngestQueue::new(1);
        q.submit(SourceType::Radar, vec![radar(0.0)]);
        q.submit(SourceType::Ais, vec![Detection::ais("412000001", 30.0, 122.0, 0.0)]);
        let batches = q.drain();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].source_type, SourceType::Radar);
        assert_eq!(batches[1].source_type, SourceType::Ais);
        assert!(q.is_empty());
    }
}
