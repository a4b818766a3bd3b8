//! Listing and exporting logged transfers
//!
//! `list` prints one summary line per matching entry; `save` concatenates
//! the payload bytes of matching entries into a file, with no framing. The
//! export file is only created once the first match is found.

use crate::arena::Arena;
use crate::filter::Filter;
use crate::transfer_log::{TransferDetails, TransferEntry, TransferLog};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// `%#x`-style hex: `0` for zero, `0x..` otherwise
fn hex(value: impl Into<u64>) -> String {
    match value.into() {
        0 => "0".to_string(),
        v => format!("{:#x}", v),
    }
}

fn push_bytes(line: &mut String, bytes: &[u8]) {
    for b in bytes {
        let _ = write!(line, "{:02x} ", b);
    }
}

/// One-line summary of `entry`
pub fn format_entry(entry: &TransferEntry, arena: &Arena) -> String {
    let mut line = format!("{:5} - type = {}, ", entry.id, entry.kind());

    match entry.details {
        TransferDetails::Control {
            request_type,
            request,
            value,
            index,
        } => {
            let _ = write!(
                line,
                "req type = {}, req = {}, value = {}, index = {}, data = ",
                hex(request_type),
                hex(request),
                hex(value),
                hex(index)
            );
            push_bytes(&mut line, arena.bytes(entry.saved_region()));
        }
        TransferDetails::Interrupt { endpoint } | TransferDetails::Bulk { endpoint } => {
            let _ = write!(line, "endpoint = {}, data = ", hex(endpoint));
            push_bytes(&mut line, arena.bytes(entry.saved_region()));
        }
        TransferDetails::Isochronous {
            endpoint,
            packets,
            packet_size,
            errors,
            ..
        } => {
            let _ = write!(
                line,
                "endpoint = {}, max size = {}, actual size = {}, packets = {}, errors = {}",
                hex(endpoint),
                packets * packet_size,
                entry.size,
                packets,
                errors
            );
        }
    }

    let mut line = line.trim_end().to_string();
    if let Err(e) = &entry.result {
        let _ = write!(line, ", status = {} ({})", e, e.code());
    }
    line
}

/// Write a summary line for every entry matching `filter`
///
/// Returns the number of lines written.
pub fn list_matches<W: Write>(
    out: &mut W,
    log: &TransferLog,
    arena: &Arena,
    filter: &Filter,
) -> io::Result<usize> {
    let mut count = 0;
    for entry in log.iter().filter(|e| filter.matches(e)) {
        writeln!(out, "{}", format_entry(entry, arena))?;
        count += 1;
    }
    Ok(count)
}

/// Append the payloads of every entry matching `filter` to a new file at
/// `path`
///
/// The file is created on the first match; with no matches nothing touches
/// the filesystem. Returns the number of entries written.
pub fn save_matches(
    path: &Path,
    log: &TransferLog,
    arena: &Arena,
    filter: &Filter,
) -> io::Result<usize> {
    let mut file: Option<File> = None;
    let mut count = 0;

    for entry in log.iter().filter(|e| filter.matches(e)) {
        if file.is_none() {
            file = Some(File::create(path)?);
        }
        if let Some(out) = file.as_mut() {
            out.write_all(arena.bytes(entry.saved_region()))?;
        }
        count += 1;
    }

    if let Some(mut f) = file {
        f.flush()?;
        debug!("Saved {} transfer(s) to {}", count, path.display());
    }
    Ok(count)
}
