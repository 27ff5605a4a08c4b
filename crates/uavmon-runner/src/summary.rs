use crate::discovery::Instance;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Skipped,
    Solved,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Skipped => "skipped",
            InstanceStatus::Solved => "solved",
            InstanceStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOutcome {
    pub instance: Instance,
    pub status: InstanceStatus,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    /// Solver's last stderr line (or spawn error) for failures.
    pub diagnostics: Option<String>,
}

impl InstanceOutcome {
    pub fn skipped(instance: Instance) -> Self {
        Self {
            instance,
            status: InstanceStatus::Skipped,
            exit_code: None,
            elapsed: Duration::ZERO,
            diagnostics: None,
        }
    }

    pub fn status_line(&self, position: usize, total: usize) -> String {
        let width = total.to_string().len();
        let mut line = format!(
            "[{:>width$}/{}] {} {}",
            position,
            total,
            self.instance.id,
            self.status.as_str(),
            width = width
        );
        if self.status != InstanceStatus::Skipped {
            let _ = write!(line, " ({:.2}s)", self.elapsed.as_secs_f64());
        }
        if let Some(diag) = &self.diagnostics {
            let _ = write!(line, ": {}", diag);
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: usize,
    pub solved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Counts {
    fn add(&mut self, status: InstanceStatus) {
        match status {
            InstanceStatus::Skipped => self.skipped += 1,
            InstanceStatus::Solved => self.solved += 1,
            InstanceStatus::Failed => self.failed += 1,
        }
    }
}

/// End-of-run report. Invariant:
/// `total == solved + skipped + failed + not_started`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub solved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_started: usize,
    pub interrupted: bool,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub by_family: BTreeMap<String, Counts>,
    pub failures: Vec<String>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &InstanceOutcome) {
        match outcome.status {
            InstanceStatus::Skipped => self.skipped += 1,
            InstanceStatus::Solved => self.solved += 1,
            InstanceStatus::Failed => {
                self.failed += 1;
                self.failures.push(outcome.instance.id.clone());
            }
        }
        let family = self.by_family.entry(outcome.instance.family()).or_default();
        family.total += 1;
        family.add(outcome.status);
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
        self.not_started = self.total - self.visited();
    }

    pub fn visited(&self) -> usize {
        self.solved + self.skipped + self.failed
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.visited() + self.not_started
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<12} {:>7} {:>7} {:>7} {:>7}", "family", "total", "solved", "skipped", "failed");
        for (family, c) in &self.by_family {
            let _ = writeln!(
                out,
                "{:<12} {:>7} {:>7} {:>7} {:>7}",
                family, c.total, c.solved, c.skipped, c.failed
            );
        }
        let _ = writeln!(
            out,
            "{:<12} {:>7} {:>7} {:>7} {:>7}",
            "all", self.total, self.solved, self.skipped, self.failed
        );
        if self.interrupted {
            let _ = writeln!(out, "interrupted: {} not started", self.not_started);
        }
        for id in &self.failures {
            let _ = writeln!(out, "failed: {}", id);
        }
        let _ = writeln!(out, "elapsed: {:.2}s", self.elapsed.as_secs_f64());
        out
    }
}
