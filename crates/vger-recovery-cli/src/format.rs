use chrono::{DateTime, Local, Utc};

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Backup time in local time, or `-` for volumes without one.
pub(crate) fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

/// Print collected `(item, error)` pairs under a heading.
pub(crate) fn print_errors(errors: &[(String, String)]) {
    if errors.is_empty() {
        return;
    }
    eprintln!("Errors:");
    for (item, error) in errors {
        eprintln!("  {item}: {error}");
    }
}
