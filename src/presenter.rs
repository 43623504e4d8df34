//! Display facts derived from stored preferences.

use chrono::{DateTime, Days, Local, TimeDelta, TimeZone, Utc};
use humantime_serde::re::humantime::format_duration;
use serde::Serialize;
use std::{fmt::Display, time::Duration};

use crate::preferences::{Destination, Preferences};

/// The destination the display reports on. There is deliberately no fallback
/// to another destination when Time Machine names none.
pub fn selected_destination(preferences: Option<&Preferences>) -> Option<&Destination> {
    preferences?.last_destination()
}

/// Time elapsed since the destination's most recent snapshot.
pub fn last_snapshot_age(destination: &Destination, now: DateTime<Utc>) -> Option<TimeDelta> {
    destination.last_snapshot().map(|last| now - last)
}

/// Coarse relative label, e.g. `2h 10m ago` or `1day 3h ago`.
pub fn relative_label(age: TimeDelta) -> String {
    if age < TimeDelta::minutes(1) {
        return "just now".to_string();
    }

    let granularity = if age < TimeDelta::days(1) { 60 } else { 3600 };
    let seconds = age.num_seconds() / granularity * granularity;
    format!("{} ago", format_duration(Duration::from_secs(seconds as u64)))
}

/// Formats bytes with decimal units, the way Finder reports volume sizes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1000.0 && unit_idx < UNITS.len() - 1 {
        size /= 1000.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit_idx])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub used: u64,
    pub available: u64,
}

impl Capacity {
    pub fn of(destination: &Destination) -> Self {
        Self {
            used: destination.bytes_used,
            available: destination.bytes_available,
        }
    }

    pub fn total(&self) -> u64 {
        self.used.saturating_add(self.available)
    }

    /// `false` when the destination reports no space at all.
    pub fn is_known(&self) -> bool {
        self.total() > 0
    }

    /// Share of the destination in use, `0.0` when unknown.
    pub fn usage_fraction(&self) -> f64 {
        if !self.is_known() {
            return 0.0;
        }

        self.used as f64 / self.total() as f64
    }
}

/// When the display should be re-evaluated: now, at the start of the next
/// day and at the start of the day after that, so relative labels stay right.
pub fn next_refresh_points<Tz: TimeZone>(now: &DateTime<Tz>) -> [DateTime<Tz>; 3] {
    [
        now.clone(),
        start_of_day_after(now, 1),
        start_of_day_after(now, 2),
    ]
}

fn start_of_day_after<Tz: TimeZone>(now: &DateTime<Tz>, days: u64) -> DateTime<Tz> {
    let tz = now.timezone();

    // midnight can fall into a DST gap, take the first hour that exists
    now.date_naive()
        .checked_add_days(Days::new(days))
        .and_then(|date| {
            (0..24).find_map(|hour| {
                let local = date.and_hms_opt(hour, 0, 0)?;
                tz.from_local_datetime(&local).earliest()
            })
        })
        .or_else(|| now.clone().checked_add_days(Days::new(days)))
        .unwrap_or_else(|| now.clone())
}

/// Everything the display shows for the selected destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationFacts {
    pub id: String,
    pub volume_name: String,
    pub is_encrypted: bool,
    pub is_network: bool,
    pub last_snapshot: Option<DateTime<Utc>>,
    pub last_snapshot_age: String,
    pub snapshot_count: usize,
    pub bytes_used: u64,
    pub bytes_available: u64,
    pub usage_fraction: Option<f64>,
}

impl DestinationFacts {
    pub fn new(destination: &Destination, now: DateTime<Utc>) -> Self {
        let capacity = Capacity::of(destination);

        Self {
            id: destination.id.clone(),
            volume_name: destination.volume_name.clone(),
            is_encrypted: destination.is_encrypted,
            is_network: destination.is_network,
            last_snapshot: destination.last_snapshot(),
            last_snapshot_age: last_snapshot_age(destination, now)
                .map(relative_label)
                .unwrap_or_else(|| "never".to_string()),
            snapshot_count: destination.snapshots.len(),
            bytes_used: capacity.used,
            bytes_available: capacity.available,
            usage_fraction: capacity.is_known().then(|| capacity.usage_fraction()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StatusView {
    /// Nothing has been synced yet.
    Unconfigured,
    /// Preferences exist but name no usable destination.
    NoDestination { destinations: usize },
    Destination(DestinationFacts),
}

impl StatusView {
    pub fn build(preferences: Option<&Preferences>, now: DateTime<Utc>) -> Self {
        let Some(prefs) = preferences else {
            return Self::Unconfigured;
        };

        match selected_destination(Some(prefs)) {
            Some(destination) => Self::Destination(DestinationFacts::new(destination, now)),
            None => Self::NoDestination {
                destinations: prefs.destinations().len(),
            },
        }
    }
}

impl Display for StatusView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let facts = match self {
            Self::Unconfigured => {
                return write!(
                    f,
                    "Backup Status is not configured, run `backup-status grant` first"
                );
            }
            Self::NoDestination { destinations } => {
                return write!(
                    f,
                    "No Time Machine destination ({} configured, none used yet)",
                    destinations
                );
            }
            Self::Destination(facts) => facts,
        };

        let name = if facts.volume_name.is_empty() {
            "Unnamed volume"
        } else {
            facts.volume_name.as_str()
        };
        writeln!(
            f,
            "{} ({}, {})",
            name,
            if facts.is_encrypted { "encrypted" } else { "not encrypted" },
            if facts.is_network { "network" } else { "local" },
        )?;

        match facts.last_snapshot {
            Some(last) => writeln!(
                f,
                "• Last backup: {} ({})",
                facts.last_snapshot_age,
                last.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            )?,
            None => writeln!(f, "• Last backup: never")?,
        }

        match facts.usage_fraction {
            Some(fraction) => writeln!(
                f,
                "• Used: {} of {} ({:.1}%)",
                format_bytes(facts.bytes_used),
                format_bytes(facts.bytes_used.saturating_add(facts.bytes_available)),
                fraction * 100.0
            )?,
            None => writeln!(f, "• Used: unknown")?,
        }

        write!(f, "• Snapshots: {}", facts.snapshot_count)
    }
}
