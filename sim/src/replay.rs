//! Replay logs: one JSON record per line, in the order they were produced.
//!
//! A log opens with a `header`, then for every simulation step the sensor
//! reports of that step, the ground truth and a `tick` that closes the cycle.

use anyhow::{bail, Context};
use fusion_core::metrics::GroundTruth;
use sensor_models::{AisPositionReport, RadarPlot, RadarSite};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayRecord {
    Header {
        scenario: String,
        seed: u64,
        site: RadarSite,
    },
    Radar {
        time: f64,
        plots: Vec<RadarPlot>,
    },
    Ais {
        time: f64,
        reports: Vec<AisPositionReport>,
    },
    Truth {
        time: f64,
        vessels: Vec<GroundTruth>,
    },
    /// End of a step: run one fusion cycle at `time`.
    Tick { time: f64 },
}

/// Streams records to any writer, one per line.
pub struct ReplayWriter<W: Write> {
    out: W,
    written: usize,
}

impl ReplayWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating replay log {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReplayWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write(&mut self, record: &ReplayRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self) -> anyhow::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Parse a replay log; blank lines are skipped, the first record must be the header.
pub fn read_replay<R: BufRead>(input: R) -> anyhow::Result<Vec<ReplayRecord>> {
    let mut records = Vec::new();
    for (n, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayRecord =
            serde_json::from_str(&line).with_context(|| format!("parsing line {}", n + 1))?;
        if records.is_empty() && !matches!(record, ReplayRecord::Header { .. }) {
            bail!("line {}: replay log must start with a header record", n + 1);
        }
        records.push(record);
    }
    if records.is_empty() {
        bail!("replay log is empty");
    }
    Ok(records)
}

pub fn load_replay(path: &Path) -> anyhow::Result<Vec<ReplayRecord>> {
    let file =
        File::open(path).with_context(|| format!("opening replay log {}", path.display()))?;
    read_replay(BufReader::new(file))
}
