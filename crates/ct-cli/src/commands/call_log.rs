//! Call-record store editing, standing in for the platform's call log.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ct_core::CallLogRow;
use ct_db::Database;

pub fn add<W: Write>(writer: &mut W, db: &mut Database, row: &CallLogRow) -> Result<()> {
    let id = db
        .insert_call_log(row)
        .context("failed to insert call record")?;
    writeln!(writer, "Added call record {id}")?;
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database, limit: usize) -> Result<()> {
    let rows = db
        .recent_calls(DateTime::<Utc>::UNIX_EPOCH, limit)
        .context("failed to query call records")?;

    if rows.is_empty() {
        writeln!(writer, "No call records.")?;
        return Ok(());
    }

    for row in rows {
        writeln!(
            writer,
            "{}  {:<16} {:<20} {:>5}s",
            row.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            row.number.as_deref().unwrap_or("(private)"),
            row.call_type.to_string(),
            row.duration_seconds
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use ct_core::CallType;
    use insta::assert_snapshot;

    fn row(number: Option<&str>, call_type: CallType, minute: u32, duration: i64) -> CallLogRow {
        CallLogRow {
            number: number.map(str::to_string),
            call_type,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 9, minute, 0).unwrap(),
            duration_seconds: duration,
        }
    }

    #[test]
    fn list_shows_newest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let mut sink = Vec::new();
        add(&mut sink, &mut db, &row(Some("+15551234567"), CallType::Outgoing, 0, 240)).unwrap();
        add(&mut sink, &mut db, &row(None, CallType::Missed, 5, 0)).unwrap();
        add(&mut sink, &mut db, &row(Some("5559876543"), CallType::AnsweredExternally, 9, 12))
            .unwrap();
        assert_eq!(
            String::from_utf8(sink).unwrap(),
            "Added call record 1\nAdded call record 2\nAdded call record 3\n"
        );

        let mut output = Vec::new();
        list(&mut output, &db, 10).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        2025-01-01T09:09:00Z  5559876543       answered_externally     12s
        2025-01-01T09:05:00Z  (private)        missed                   0s
        2025-01-01T09:00:00Z  +15551234567     outgoing               240s
        ");
    }

    #[test]
    fn list_respects_limit_and_empty_store() {
        let mut db = Database::open_in_memory().unwrap();

        let mut output = Vec::new();
        list(&mut output, &db, 10).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "No call records.\n");

        for minute in 0..3 {
            db.insert_call_log(&row(Some("+15551234567"), CallType::Incoming, minute, 1))
                .unwrap();
        }
        let mut output = Vec::new();
        list(&mut output, &db, 2).unwrap();
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
    }
}
