use time::PrimitiveDateTime;

use crate::types::{ReportRow, ScanRecord};

/// Flag every record whose `last_seen` equals the newest `last_seen` in `records`.
///
/// The maximum is taken over the slice handed in, so a filtered view has its
/// own latest batch. Order is preserved.
pub fn mark_latest_batch(records: Vec<ScanRecord>) -> Vec<ReportRow> {
    let latest = latest_seen(&records);
    records
        .into_iter()
        .map(|record| ReportRow {
            is_new: Some(record.last_seen) == latest,
            first_sighting: record.first_seen == record.last_seen,
            record,
        })
        .collect()
}

fn latest_seen(records: &[ScanRecord]) -> Option<PrimitiveDateTime> {
    records.iter().map(|r| r.last_seen).max()
}

/// Everything the report page shows.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub total: usize,
    /// Rows seen in the latest batch.
    pub latest: usize,
    pub latest_seen: Option<PrimitiveDateTime>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn from_rows(rows: Vec<ReportRow>) -> Self {
        let latest_seen = rows
            .iter()
            .find(|r| r.is_new)
            .map(|r| r.record.last_seen);
        Self {
            total: rows.len(),
            latest: rows.iter().filter(|r| r.is_new).count(),
            latest_seen,
            rows,
        }
    }
}
