//! Rendering of finished tallies.

use std::io::{self, Write};

use crate::policy::DisplayMode;
use crate::types::MemoryStats;

/// Write `stats` in the requested display form.
pub fn write_report<W: Write>(out: &mut W, stats: &MemoryStats, mode: DisplayMode) -> io::Result<()> {
    match mode {
        DisplayMode::Summary => writeln!(
            out,
            "{} objects, {} bytes retained",
            stats.object_count, stats.memory_use
        ),
        DisplayMode::Count => write_by_class(out, stats.count_by_class.iter()),
        DisplayMode::Bytes => write_by_class(out, stats.bytes_by_class.iter()),
    }
}

/// Render `stats` to a string.
pub fn render(stats: &MemoryStats, mode: DisplayMode) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_report(&mut buf, stats, mode);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Per-class entries, descending by value. The sort is stable, so ties keep
/// the map's key order.
pub fn sorted_by_value<'a, I>(entries: I) -> Vec<(&'a str, u64)>
where
    I: Iterator<Item = (&'a String, &'a u64)>,
{
    let mut sorted: Vec<(&str, u64)> = entries.map(|(k, v)| (k.as_str(), *v)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
}

fn write_by_class<'a, W, I>(out: &mut W, entries: I) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = (&'a String, &'a u64)>,
{
    for (class, value) in sorted_by_value(entries) {
        writeln!(out, "{}: {}", class, value)?;
    }
    Ok(())
}
