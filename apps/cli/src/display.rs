use std::io::Write;

use quickshare_transfer::TransferProgress;

/// Human-readable byte count (`1.5 MiB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second.max(0.0) as u64))
}

/// Redraws a single progress line on stderr.
pub fn progress(p: &TransferProgress) {
    let mut err = std::io::stderr();
    let _ = write!(
        err,
        "\r  [{}/{}] {}: {:>3}% {} / {} ({})   ",
        p.file_index + 1,
        p.total_files,
        p.file_name,
        p.percent,
        format_bytes(p.bytes),
        format_bytes(p.total),
        format_rate(p.bytes_per_second)
    );
    let _ = err.flush();
}

/// Ends the progress line.
pub fn progress_done() {
    eprintln!();
}
