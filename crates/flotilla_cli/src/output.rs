//! Table and CSV rendering for command output.
//!
//! Listing commands share one shape: a table of grouped rows
//! (`COUNT | <KEY> | HOSTS | CACHED`), a totals block, and a trailing error
//! report. Commands with richer columns build their tables through
//! [`table`] directly.

use std::sync::Arc;

use tabled::builder::Builder;
use tabled::settings::Style;

use flotilla::limiter::Limiter;
use flotilla::pipeline::ResultRow;

/// Render rows with arbitrary columns as a compact table.
pub fn table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut builder = Builder::default();
    builder.push_record(headers.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row);
    }
    builder.build().with(Style::blank()).to_string()
}

/// The standard grouped listing: one line per result row.
pub fn print_grouped<T>(label: &str, rows: &[ResultRow<T>], show_all: bool) {
    let body = rows
        .iter()
        .map(|row| {
            vec![
                format!("[{}]", row.count),
                row.key.clone(),
                format!("[{}]", row.host_projects(show_all).join(", ")),
                format!("[{}]", cached_str(row.cached)),
            ]
        })
        .collect();
    println!("{}", table(&["COUNT", label, "HOSTS", "CACHED"], body));
}

/// `yes`/`no` rendering of a cached flag.
pub fn cached_str(cached: bool) -> &'static str {
    if cached {
        "yes"
    } else {
        "no"
    }
}

/// The `Unique/Total/Errors` style trailer.
pub fn print_totals(pairs: &[(&str, usize)]) {
    for (label, value) in pairs {
        println!("{label}: {value}");
    }
}

/// Log every collected per-host error. Listing commands call this after the
/// table; the errors never change the exit code on their own.
pub fn report_errors(limiter: &Arc<Limiter>) -> usize {
    let errors = limiter.errors();
    let count = errors.len();
    for err in &errors {
        tracing::error!(host = %err.host.url, "{}", err.error);
    }
    count
}

/// Write rows as CSV to stdout.
pub fn write_csv(headers: &[&str], rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Human rendering of a byte count, used by the registry listing.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_renders_headers_and_rows() {
        let out = table(
            &["COUNT", "USER", "HOSTS", "CACHED"],
            vec![vec![
                "[1]".to_string(),
                "testuser2".to_string(),
                "[main.alpha]".to_string(),
                "[no]".to_string(),
            ]],
        );
        assert!(out.contains("COUNT"));
        assert!(out.contains("testuser2"));
        assert!(out.contains("main.alpha"));
    }

    #[test]
    fn cached_rendering() {
        assert_eq!(cached_str(true), "yes");
        assert_eq!(cached_str(false), "no");
    }

    #[test]
    fn bytes_render_with_units() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(1500), "1.5KB");
        assert_eq!(human_bytes(2_300_000), "2.3MB");
        assert_eq!(human_bytes(5_000_000_000), "5.0GB");
    }
}
