use std::fs;
use std::time::Instant;

use log::info;
use serde::{Deserialize, Serialize};

/// Memory reading at one labelled point of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub label: String,
    pub elapsed_secs: f64,
    pub resident_mb: Option<f64>,
    pub peak_mb: Option<f64>,
}

/// Resident and peak resident set size in MB from the text of
/// `/proc/self/status`.
pub fn parse_status(status: &str) -> (Option<f64>, Option<f64>) {
    let field = |name: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<f64>().ok())
            .map(|kb| kb / 1024.0)
    };
    (field("VmRSS:"), field("VmHWM:"))
}

fn read_status() -> (Option<f64>, Option<f64>) {
    match fs::read_to_string("/proc/self/status") {
        Ok(status) => parse_status(&status),
        Err(_) => (None, None),
    }
}

/// Diagnostic memory tracker; readings are unavailable outside Linux.
#[derive(Debug)]
pub struct ResourceMonitor {
    started: Instant,
    snapshots: Vec<ResourceSnapshot>,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        ResourceMonitor::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        ResourceMonitor { started: Instant::now(), snapshots: Vec::new() }
    }

    pub fn snapshot(&mut self, label: &str) -> &ResourceSnapshot {
        let (resident_mb, peak_mb) = read_status();
        self.snapshots.push(ResourceSnapshot {
            label: label.to_string(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            resident_mb,
            peak_mb,
        });
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn log_snapshot(&mut self, label: &str) {
        let snapshot = self.snapshot(label);
        match (snapshot.resident_mb, snapshot.peak_mb) {
            (Some(rss), Some(peak)) => info!("[memory] {}: current={:.2} MB, peak={:.2} MB", label, rss, peak),
            _ => info!("[memory] {}: not available", label),
        }
    }

    pub fn snapshots(&self) -> &[ResourceSnapshot] {
        &self.snapshots
    }

    /// Largest peak recorded by any snapshot.
    pub fn max_peak_mb(&self) -> Option<f64> {
        self.snapshots
            .iter()
            .filter_map(|s| s.peak_mb)
            .fold(None, |max, v| Some(max.map_or(v, |m: f64| m.max(v))))
    }

    pub fn log_summary(&self) {
        match self.max_peak_mb() {
            Some(peak) => info!("maximum memory usage: {:.2} MB ({:.3} GB)", peak, peak / 1024.0),
            None => info!("maximum memory usage: not available"),
        }
        for snapshot in &self.snapshots {
            if let Some(peak) = snapshot.peak_mb {
                info!("  {}: peak={:.2} MB", snapshot.label, peak);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = "Name:\tmrm-optimize\nVmHWM:\t   20480 kB\nVmRSS:\t   10240 kB\nThreads:\t4\n";
        let (rss, peak) = parse_status(status);
        assert_eq!(rss, Some(10.0));
        assert_eq!(peak, Some(20.0));
        assert_eq!(parse_status("Name:\tx\n"), (None, None));
    }

    #[test]
    fn test_snapshots_are_recorded() {
        let mut monitor = ResourceMonitor::new();
        monitor.log_snapshot("start");
        monitor.snapshot("end");
        assert_eq!(monitor.snapshots().len(), 2);
        assert_eq!(monitor.snapshots()[1].label, "end");
        if cfg!(target_os = "linux") {
            assert!(monitor.max_peak_mb().is_some());
        }
    }
}
