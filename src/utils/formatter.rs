// Formatters - entry size, date and permission rendering for frontends

use crate::models::entry::{ArchiveEntry, EntryKind};
use chrono::{DateTime, Local};

/// Formats a byte count in a human-readable form (space between number and
/// unit).
///
/// # Examples
/// ```
/// use arcflow::utils::formatter::format_file_size;
///
/// assert_eq!(format_file_size(0), "0 B");
/// assert_eq!(format_file_size(512), "512 B");
/// assert_eq!(format_file_size(1536), "1.5 KB");
/// assert_eq!(format_file_size(1_048_576), "1.0 MB");
/// ```
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes == 0 {
        "0 B".to_string()
    } else if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        let kb = bytes as f64 / KB as f64;
        format!("{:.1} KB", kb)
    } else if bytes < GB {
        let mb = bytes as f64 / MB as f64;
        format!("{:.1} MB", mb)
    } else {
        let gb = bytes as f64 / GB as f64;
        format!("{:.1} GB", gb)
    }
}

/// Formats an entry timestamp (Unix seconds, 0 = unset) as
/// "YYYY-MM-DD HH:MM" in local time, or "-" when unset.
pub fn format_entry_date(secs: i64) -> String {
    if secs == 0 {
        return "-".to_string();
    }
    match DateTime::from_timestamp(secs, 0) {
        Some(utc) => {
            let local: DateTime<Local> = utc.into();
            local.format("%Y-%m-%d %H:%M").to_string()
        }
        None => "-".to_string(),
    }
}

/// Renders an entry's mode in `ls -l` style: type character plus nine
/// permission characters.
pub fn format_entry_mode(entry: &ArchiveEntry) -> String {
    let type_char = match entry.kind {
        EntryKind::Regular => '-',
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::CharDevice => 'c',
        EntryKind::BlockDevice => 'b',
        EntryKind::Fifo => 'p',
        EntryKind::Socket => 's',
        EntryKind::Unknown => '?',
    };
    let mut out = String::with_capacity(10);
    out.push(type_char);
    out.push_str(&permission_string(entry.permission));
    out
}

fn permission_string(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
