use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, TransactionBehavior};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::report;
use crate::types::{IngestSummary, PortResult, ReportRow, ScanRecord, ScanResult};

/// On-disk timestamp layout. Minute resolution: two batches in the same
/// minute share a timestamp and count as one batch in the report.
pub const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scan (
    ip        TEXT    NOT NULL,
    port      INTEGER NOT NULL,
    proto     TEXT    NOT NULL,
    firstseen TEXT    NOT NULL,
    lastseen  TEXT    NOT NULL,
    PRIMARY KEY (ip, port, proto)
);
CREATE INDEX IF NOT EXISTS idx_scan_lastseen ON scan(lastseen);
"#;

/// SQLite-backed record of every `(ip, port, proto)` ever reported.
///
/// Holds only the database path. Every operation opens its own connection
/// and closes it when done, so a `Store` is cheap to clone into blocking tasks.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %store.path.display(), journal = %journal, "scan database ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(|source| StoreError::Connection {
            path: self.path.clone(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| StoreError::Connection {
                path: self.path.clone(),
                source,
            })?;
        Ok(conn)
    }

    /// Merge a batch into the store, stamped with the current minute (UTC).
    pub fn ingest(&self, batch: &[ScanResult]) -> Result<IngestSummary, StoreError> {
        self.ingest_at(batch, current_minute()?)
    }

    /// Merge a batch into the store using `now` as the batch timestamp.
    ///
    /// New tuples get `firstseen = lastseen = now`; known tuples only have
    /// `lastseen` moved. The whole batch runs in one transaction: if any row
    /// fails nothing from the batch is kept.
    pub fn ingest_at(
        &self,
        batch: &[ScanResult],
        now: PrimitiveDateTime,
    ) -> Result<IngestSummary, StoreError> {
        let (observations, ignored_ports) = first_ports(batch)?;
        let stamp = format_timestamp(now)?;

        let mut summary = IngestSummary {
            ignored_ports,
            ..IngestSummary::default()
        };

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut exists =
                tx.prepare("SELECT 1 FROM scan WHERE ip = ?1 AND port = ?2 AND proto = ?3")?;
            let mut insert = tx.prepare(
                "INSERT INTO scan (ip, port, proto, firstseen, lastseen) VALUES (?1, ?2, ?3, ?4, ?4)",
            )?;
            let mut update = tx
                .prepare("UPDATE scan SET lastseen = ?1 WHERE ip = ?2 AND port = ?3 AND proto = ?4")?;

            for (ip, port) in observations {
                if exists.exists(params![ip, port.port, port.proto])? {
                    update.execute(params![stamp, ip, port.port, port.proto])?;
                    summary.updated += 1;
                } else {
                    insert.execute(params![ip, port.port, port.proto, stamp])?;
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        info!(
            at = %stamp,
            inserted = summary.inserted,
            updated = summary.updated,
            "batch ingested"
        );
        Ok(summary)
    }

    /// Load stored records, optionally only those whose IP contains `ip_filter`.
    ///
    /// Rows come back ordered by `port, proto, ip, lastseen`. The filter is a
    /// literal substring (`%` and `_` are not wildcards) matched with SQLite's
    /// `LIKE`, so ASCII letters compare case-insensitively. An empty filter
    /// is the same as no filter.
    pub fn load(&self, ip_filter: Option<&str>) -> Result<Vec<ScanRecord>, StoreError> {
        let pattern = ip_filter.filter(|f| !f.is_empty()).map(escape_like);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT ip, port, proto, firstseen, lastseen FROM scan \
             WHERE ?1 IS NULL OR ip LIKE '%' || ?1 || '%' ESCAPE '\\' \
             ORDER BY port, proto, ip, lastseen",
        )?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u16>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (ip, port, proto, first, last) = row?;
            out.push(ScanRecord {
                ip,
                port,
                proto,
                first_seen: parse_timestamp(&first)?,
                last_seen: parse_timestamp(&last)?,
            });
        }
        debug!(filter = ?ip_filter, rows = out.len(), "records loaded");
        Ok(out)
    }

    /// Load records and flag the ones belonging to the latest batch of this view.
    pub fn query(&self, ip_filter: Option<&str>) -> Result<Vec<ReportRow>, StoreError> {
        Ok(report::mark_latest_batch(self.load(ip_filter)?))
    }

    /// Every stored IP once, in report order.
    pub fn distinct_ips(&self) -> Result<Vec<String>, StoreError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in self.load(None)? {
            if seen.insert(record.ip.clone()) {
                out.push(record.ip);
            }
        }
        Ok(out)
    }
}

/// Pick `ports[0]` of every entry. Returns the observations plus the number
/// of extra ports that were dropped.
fn first_ports(batch: &[ScanResult]) -> Result<(Vec<(&str, &PortResult)>, u64), StoreError> {
    let mut observations = Vec::with_capacity(batch.len());
    let mut ignored = 0u64;
    for (idx, entry) in batch.iter().enumerate() {
        let (first, rest) = entry.ports.split_first().ok_or_else(|| {
            StoreError::MalformedInput(format!("entry {idx} ({}) has no ports", entry.ip))
        })?;
        if !rest.is_empty() {
            // Only the first port of an entry is recorded; scanners normally send one.
            warn!(ip = %entry.ip, ignored = rest.len(), "entry carries several ports, keeping the first");
            ignored += rest.len() as u64;
        }
        observations.push((entry.ip.as_str(), first));
    }
    Ok((observations, ignored))
}

/// The current UTC time truncated to the minute.
pub fn current_minute() -> Result<PrimitiveDateTime, StoreError> {
    let now = OffsetDateTime::now_utc()
        .replace_second(0)?
        .replace_nanosecond(0)?;
    Ok(PrimitiveDateTime::new(now.date(), now.time()))
}

pub fn format_timestamp(ts: PrimitiveDateTime) -> Result<String, StoreError> {
    Ok(ts.format(TIMESTAMP_FORMAT)?)
}

pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, StoreError> {
    PrimitiveDateTime::parse(value, TIMESTAMP_FORMAT).map_err(|source| StoreError::Timestamp {
        value: value.to_string(),
        source,
    })
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceInfo;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn entry(ip: &str, ports: &[(u16, &str)]) -> ScanResult {
        ScanResult {
            ip: ip.into(),
            ports: ports
                .iter()
                .map(|(port, proto)| PortResult {
                    port: *port,
                    proto: (*proto).into(),
                    status: "open".into(),
                    service: ServiceInfo::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn timestamp_format_is_minute_resolution() {
        let s = format_timestamp(datetime!(2024-03-05 07:09:59)).unwrap();
        assert_eq!(s, "2024-03-05 07:09");
        assert_eq!(parse_timestamp(&s).unwrap(), datetime!(2024-03-05 07:09));
    }

    #[test]
    fn parse_rejects_other_layouts() {
        assert!(matches!(
            parse_timestamp("2024-03-05T07:09:00Z"),
            Err(StoreError::Timestamp { .. })
        ));
    }

    #[test]
    fn current_minute_has_no_seconds() {
        let now = current_minute().unwrap();
        assert_eq!(now.second(), 0);
        assert_eq!(now.nanosecond(), 0);
    }

    #[test]
    fn escape_like_neutralises_wildcards() {
        assert_eq!(escape_like("10.0.0.1"), "10.0.0.1");
        assert_eq!(escape_like("a%b_c\\"), "a\\%b\\_c\\\\");
    }

    #[test]
    fn first_ports_counts_ignored_and_rejects_empty() {
        let batch = vec![entry("10.0.0.1", &[(22, "tcp"), (80, "tcp"), (443, "tcp")])];
        let (obs, ignored) = first_ports(&batch).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].1.port, 22);
        assert_eq!(ignored, 2);

        let bad = vec![entry("10.0.0.1", &[(22, "tcp")]), entry("10.0.0.2", &[])];
        assert!(matches!(first_ports(&bad), Err(StoreError::MalformedInput(_))));
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.db");
        let store = Store::open(&path).unwrap();
        store
            .ingest_at(&[entry("10.0.0.1", &[(22, "tcp")])], datetime!(2024-01-01 10:00))
            .unwrap();
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.load(None).unwrap().len(), 1);
    }

    #[test]
    fn unopenable_path_is_connection_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("scan.db");
        assert!(matches!(
            Store::open(&path),
            Err(StoreError::Connection { .. })
        ));
    }

    #[test]
    fn percent_in_filter_is_literal() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("scan.db")).unwrap();
        store
            .ingest_at(&[entry("10.0.0.1", &[(22, "tcp")])], datetime!(2024-01-01 10:00))
            .unwrap();
        assert!(store.load(Some("%")).unwrap().is_empty());
        assert_eq!(store.load(Some("")).unwrap().len(), 1);
    }
}
