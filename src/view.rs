use std::fmt::Write;

use time::PrimitiveDateTime;

use crate::report::Report;
use crate::store::TIMESTAMP_FORMAT;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 2rem; color: #222; }
table { border-collapse: collapse; width: 100%; }
th, td { padding: .3rem .6rem; border-bottom: 1px solid #ddd; text-align: left; }
th { background: #f4f4f4; }
tr.latest { background: #fff6d5; font-weight: 600; }
.tag { font-size: .75rem; padding: 0 .4rem; border-radius: 3px; background: #2a7; color: #fff; }
.summary span { margin-right: 1.5rem; }
"#;

// Fills the filter's datalist from /ips.json once the page is loaded.
const AUTOCOMPLETE: &str = r#"
fetch('/ips.json').then(r => r.json()).then(ips => {
  const list = document.getElementById('ips');
  (ips || []).forEach(ip => { const o = document.createElement('option'); o.value = ip; list.appendChild(o); });
});
"#;

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Timestamp as shown on the page, same layout as stored.
pub fn display_timestamp(ts: PrimitiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| ts.to_string())
}

/// Render the full report page.
pub fn render_index(report: &Report, filter: Option<&str>) -> String {
    let mut out = String::with_capacity(4096 + report.rows.len() * 160);
    // Writing into a String cannot fail.
    let _ = write_index(&mut out, report, filter.unwrap_or(""));
    out
}

fn write_index(out: &mut String, report: &Report, filter: &str) -> std::fmt::Result {
    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
    writeln!(out, "<title>Scan results</title>")?;
    writeln!(out, "<style>{STYLE}</style></head><body>")?;

    writeln!(out, "<h1>Scan results</h1>")?;
    writeln!(
        out,
        "<form method=\"get\" action=\"/\"><input name=\"ip\" list=\"ips\" placeholder=\"filter by IP\" value=\"{}\"><datalist id=\"ips\"></datalist> <button type=\"submit\">Filter</button></form>",
        html_escape(filter)
    )?;

    write!(out, "<p class=\"summary\"><span>Total: <b>{}</b></span>", report.total)?;
    write!(out, "<span>Latest: <b>{}</b></span>", report.latest)?;
    if let Some(ts) = report.latest_seen {
        write!(out, "<span>Latest batch: {}</span>", display_timestamp(ts))?;
    }
    writeln!(out, "</p>")?;

    if report.rows.is_empty() {
        writeln!(out, "<p>No results.</p>")?;
    } else {
        writeln!(out, "<table><thead><tr><th>IP</th><th>Port</th><th>Proto</th><th>First seen</th><th>Last seen</th><th></th></tr></thead><tbody>")?;
        for row in &report.rows {
            let r = &row.record;
            let class = if row.is_new { " class=\"latest\"" } else { "" };
            write!(
                out,
                "<tr{class}><td><a href=\"/?ip={ip}\">{ip}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>",
                r.port,
                html_escape(&r.proto),
                display_timestamp(r.first_seen),
                display_timestamp(r.last_seen),
                ip = html_escape(&r.ip),
            )?;
            if row.first_sighting {
                write!(out, "<span class=\"tag\">first seen</span>")?;
            }
            writeln!(out, "</td></tr>")?;
        }
        writeln!(out, "</tbody></table>")?;
    }

    writeln!(out, "<script>{AUTOCOMPLETE}</script>")?;
    writeln!(out, "</body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{mark_latest_batch, Report};
    use crate::types::ScanRecord;
    use time::macros::datetime;

    #[test]
    fn escapes_markup() {
        assert_eq!(html_escape("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn renders_counts_and_highlights_latest() {
        let t1 = datetime!(2024-05-01 12:00);
        let t2 = datetime!(2024-05-01 13:00);
        let report = Report::from_rows(mark_latest_batch(vec![
            ScanRecord {
                ip: "10.0.0.1".into(),
                port: 22,
                proto: "tcp".into(),
                first_seen: t1,
                last_seen: t1,
            },
            ScanRecord {
                ip: "10.0.0.2".into(),
                port: 443,
                proto: "tcp".into(),
                first_seen: t1,
                last_seen: t2,
            },
        ]));
        let html = render_index(&report, Some("10.0.0"));
        assert!(html.contains("Total: <b>2</b>"));
        assert!(html.contains("Latest: <b>1</b>"));
        assert!(html.contains("Latest batch: 2024-05-01 13:00"));
        assert!(html.contains("<tr class=\"latest\"><td><a href=\"/?ip=10.0.0.2\">"));
        assert!(html.contains("value=\"10.0.0\""));
        assert_eq!(html.matches("class=\"latest\"").count(), 1);
    }

    #[test]
    fn empty_report_says_so() {
        let html = render_index(&Report::default(), None);
        assert!(html.contains("Total: <b>0</b>"));
        assert!(html.contains("No results."));
    }

    #[test]
    fn filter_value_is_escaped() {
        let html = render_index(&Report::default(), Some("\"><script>"));
        assert!(html.contains("value=\"&quot;&gt;&lt;script&gt;\""));
    }
}
