//! Output formatting utilities for the CLI
//!
//! Tables for sessions and profiles, plus colored status messages.

use std::collections::BTreeMap;

use tabled::{settings::Style, Table, Tabled};

use hs_core::config::Profile;
use hs_session::SessionSnapshot;

fn join_counts(counts: &BTreeMap<String, usize>) -> String {
    if counts.is_empty() {
        return "-".to_string();
    }
    counts
        .iter()
        .map(|(name, n)| format!("{} ({})", name, n))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format live shared sessions as a table
///
/// Returns "No open sessions" when the registry holds none.
pub fn format_sessions(snapshots: &[SessionSnapshot]) -> String {
    if snapshots.is_empty() {
        return "No open sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "DESTINATION")]
        destination: String,
        #[tabled(rename = "SHARED")]
        shared: &'static str,
        #[tabled(rename = "CONSUMERS")]
        consumers: String,
        #[tabled(rename = "FORWARDS")]
        forwards: String,
    }

    let rows: Vec<SessionRow> = snapshots
        .iter()
        .map(|s| SessionRow {
            destination: s.destination.clone(),
            shared: if s.shared { "yes" } else { "no" },
            consumers: join_counts(&s.consumers),
            forwards: join_counts(&s.forwards),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format configured profiles as a table
pub fn format_profiles(profiles: &BTreeMap<String, Profile>) -> String {
    if profiles.is_empty() {
        return "No profiles configured".to_string();
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "PROFILE")]
        name: String,
        #[tabled(rename = "CONSUMER")]
        consumer: String,
        #[tabled(rename = "HOPS")]
        hops: String,
        #[tabled(rename = "FORWARD")]
        forward: String,
        #[tabled(rename = "SHARED")]
        shared: &'static str,
    }

    let rows: Vec<ProfileRow> = profiles
        .iter()
        .map(|(name, p)| ProfileRow {
            name: name.clone(),
            consumer: p.consumer.clone().unwrap_or_else(|| name.clone()),
            hops: p
                .hops
                .iter()
                .map(|h| format!("{}@{}:{}", h.username, h.host, h.port))
                .collect::<Vec<_>>()
                .join(" -> "),
            forward: p
                .forward_spec()
                .map(|f| f.to_display_string())
                .unwrap_or_else(|| "-".to_string()),
            shared: if p.share_tunnels { "yes" } else { "no" },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
