use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

/// Service fingerprint reported by the scanner. Accepted on the wire, never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub banner: String,
}

/// One port observation as posted by the scanner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub proto: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub service: ServiceInfo,
}

/// One entry of an ingestion batch: an IP and the ports seen on it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ip: String,
    pub ports: Vec<PortResult>,
}

/// Persisted observation keyed by `(ip, port, proto)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ip: String,
    pub port: u16,
    pub proto: String,
    pub first_seen: PrimitiveDateTime,
    pub last_seen: PrimitiveDateTime,
}

/// A stored record as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub record: ScanRecord,
    /// Seen in the latest batch of the current (possibly filtered) view.
    pub is_new: bool,
    /// `first_seen == last_seen`: the record has only ever been seen once.
    pub first_sighting: bool,
}

/// Counters for one ingested batch.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: u64,
    pub updated: u64,
    pub ignored_ports: u64,
}
