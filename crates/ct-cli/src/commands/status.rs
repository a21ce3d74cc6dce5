//! Status command: where the store lives and what it holds.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use ct_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let marker = db
        .outgoing_marker()
        .context("failed to read outgoing marker")?;
    let rows = db.call_log_count().context("failed to count call records")?;

    writeln!(writer, "Call tracker status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    match marker {
        Some(marker) => writeln!(
            writer,
            "Outgoing marker: {} placed {}",
            marker.number,
            marker.placed_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?,
        None => writeln!(writer, "Outgoing marker: none")?,
    }
    writeln!(writer, "Call records: {rows}")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use ct_core::{CallLogRow, CallType, OutgoingMarker};
    use insta::assert_snapshot;

    #[test]
    fn status_reports_marker_and_row_count() {
        let mut db = Database::open_in_memory().unwrap();
        let placed_at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        db.set_outgoing_marker(&OutgoingMarker {
            number: "+15551234567".to_string(),
            placed_at,
        })
        .unwrap();
        for duration in [0, 42] {
            db.insert_call_log(&CallLogRow {
                number: Some("+15551234567".to_string()),
                call_type: CallType::Outgoing,
                timestamp: placed_at,
                duration_seconds: duration,
            })
            .unwrap();
        }

        let mut output = Vec::new();
        run(&mut output, &db, Path::new("/data/calltrace.db")).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Call tracker status
        Database: /data/calltrace.db
        Outgoing marker: +15551234567 placed 2025-01-01T09:00:00.000Z
        Call records: 2
        ");
    }

    #[test]
    fn status_on_empty_database() {
        let db = Database::open_in_memory().unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, Path::new("/data/calltrace.db")).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Call tracker status
        Database: /data/calltrace.db
        Outgoing marker: none
        Call records: 0
        ");
    }
}
