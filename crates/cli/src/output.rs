//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use janitor_lib::models::OrphanKind;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" | "not ready" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color an orphan kind by severity
pub fn color_kind(kind: OrphanKind) -> String {
    match kind {
        OrphanKind::Healthy => kind.as_str().green().to_string(),
        OrphanKind::OrphanApi => kind.as_str().red().to_string(),
        OrphanKind::OrphanPause | OrphanKind::OrphanBusiness => {
            kind.as_str().yellow().to_string()
        }
    }
}

/// Shorten a runtime container id to the 12 characters operators recognise
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Format a timestamp relative to now, e.g. "3h ago"
pub fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "running".to_string();
    };

    let secs = (now - at).num_seconds().max(0);
    if secs >= 86_400 {
        format!("{}d ago", secs / 86_400)
    } else if secs >= 3_600 {
        format!("{}h ago", secs / 3_600)
    } else if secs >= 60 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}s ago", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(None, now), "running");
        assert_eq!(format_age(Some(now - Duration::seconds(30)), now), "30s ago");
        assert_eq!(format_age(Some(now - Duration::minutes(5)), now), "5m ago");
        assert_eq!(format_age(Some(now - Duration::hours(25)), now), "1d ago");
        assert_eq!(format_age(Some(now + Duration::minutes(1)), now), "0s ago");
    }
}
