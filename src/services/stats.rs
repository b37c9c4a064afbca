//! Process-wide counters behind `/ws/stats` and `/metrics`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fmt::Write as _,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Debug)]
pub struct ServerStats {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    uploads: AtomicU64,
    downloads: AtomicU64,
    rate_limited: AtomicU64,
    auth_failures: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Disk usage of the object store at snapshot time.
#[derive(Serialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub objects: i64,
    pub bytes: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub cpu_cores: usize,
    pub uptime_secs: i64,
    pub storage: StorageUsage,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub downloads: u64,
    pub uploads: u64,
    pub requests: u64,
    pub rate_limited: u64,
    pub auth_failures: u64,
    pub start_time: DateTime<Utc>,
    pub system: SystemSnapshot,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, storage: StorageUsage) -> StatsSnapshot {
        StatsSnapshot {
            downloads: self.downloads.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            start_time: self.started_at,
            system: SystemSnapshot {
                cpu_cores: std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
                uptime_secs: (Utc::now() - self.started_at).num_seconds(),
                storage,
            },
        }
    }
}

impl StatsSnapshot {
    /// Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let counters = [
            ("beamdrop_requests_total", "Requests admitted", self.requests),
            ("beamdrop_uploads_total", "Completed uploads", self.uploads),
            ("beamdrop_downloads_total", "Downloads served", self.downloads),
            (
                "beamdrop_rate_limited_total",
                "Requests rejected by the rate limiter",
                self.rate_limited,
            ),
            (
                "beamdrop_auth_failures_total",
                "Failed authentication attempts",
                self.auth_failures,
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let gauges = [
            ("beamdrop_objects", "Objects stored", self.system.storage.objects),
            ("beamdrop_object_bytes", "Bytes stored in objects", self.system.storage.bytes),
            ("beamdrop_uptime_seconds", "Seconds since start", self.system.uptime_secs),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_snapshot_and_metrics() {
        let stats = ServerStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_upload();
        let snap = stats.snapshot(StorageUsage {
            objects: 3,
            bytes: 42,
        });
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.uploads, 1);
        assert_eq!(snap.downloads, 0);

        let text = snap.to_prometheus();
        assert!(text.contains("beamdrop_requests_total 2\n"));
        assert!(text.contains("beamdrop_object_bytes 42\n"));
        assert!(text.contains("# TYPE beamdrop_objects gauge"));
    }
}
