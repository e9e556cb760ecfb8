//! Host environment seam.
//!
//! Every accessor is optional: a host that cannot provide an attribute
//! returns `None` and callers fall back to a neutral default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outer vs inner window geometry sampled by the inspection-tool detector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetrics {
    pub outer_width: f64,
    pub inner_width: f64,
    pub outer_height: f64,
    pub inner_height: f64,
}

impl FrameMetrics {
    pub fn width_delta(&self) -> f64 {
        self.outer_width - self.inner_width
    }

    pub fn height_delta(&self) -> f64 {
        self.outer_height - self.inner_height
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
}

pub trait HostEnvironment: Send + Sync {
    fn display_geometry(&self) -> Option<DisplayGeometry> {
        None
    }

    fn locale(&self) -> Option<String> {
        None
    }

    /// Minutes west of UTC, the sign convention browsers report.
    fn timezone_offset_minutes(&self) -> Option<i32> {
        None
    }

    fn logical_cores(&self) -> Option<u32> {
        None
    }

    fn frame_metrics(&self) -> Option<FrameMetrics> {
        None
    }

    /// Time taken by a no-op diagnostic call. Inspection tools instrument
    /// such calls, which slows them down.
    fn time_diagnostic_probe(&self) -> Option<Duration> {
        None
    }
}

/// Host with nothing to report.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessHost;

impl HostEnvironment for HeadlessHost {}

/// Attributes of the local process, for native hosts and the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHost;

impl HostEnvironment for ProcessHost {
    fn locale(&self) -> Option<String> {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .map(|value| {
                value
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .replace('_', "-")
            })
    }

    fn timezone_offset_minutes(&self) -> Option<i32> {
        let offset = chrono::Local::now().offset().local_minus_utc();
        Some(-offset / 60)
    }

    fn logical_cores(&self) -> Option<u32> {
        std::thread::available_parallelism()
            .ok()
            .map(|n| n.get() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_host_reports_nothing() {
        let host = HeadlessHost;
        assert!(host.display_geometry().is_none());
        assert!(host.frame_metrics().is_none());
        assert!(host.time_diagnostic_probe().is_none());
    }

    #[test]
    fn process_host_reports_cores() {
        assert!(ProcessHost.logical_cores().unwrap_or(1) >= 1);
    }

    #[test]
    fn frame_deltas() {
        let m = FrameMetrics {
            outer_width: 1440.0,
            inner_width: 1200.0,
            outer_height: 900.0,
            inner_height: 820.0,
        };
        assert_eq!(m.width_delta(), 240.0);
        assert_eq!(m.height_delta(), 80.0);
    }
}
