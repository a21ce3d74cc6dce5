//! Manual outgoing-marker edits, as a placement hook would make them.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ct_core::{OutgoingMarker, normalize};
use ct_db::Database;

pub fn set<W: Write>(
    writer: &mut W,
    db: &mut Database,
    number: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    normalize(number).with_context(|| format!("cannot mark {number:?} as dialed"))?;
    db.set_outgoing_marker(&OutgoingMarker {
        number: number.to_string(),
        placed_at: now,
    })
    .context("failed to store outgoing marker")?;
    writeln!(writer, "Outgoing marker set: {number}")?;
    Ok(())
}

pub fn clear<W: Write>(writer: &mut W, db: &mut Database) -> Result<()> {
    db.clear_outgoing_marker()
        .context("failed to clear outgoing marker")?;
    writeln!(writer, "Outgoing marker cleared")?;
    Ok(())
}
