use chrono::{DateTime, TimeDelta, Utc};
use plist::{Dictionary, Value};
use serde::{Deserialize, Serialize};
use std::{io::Cursor, time::SystemTime};

use crate::{
    access::{AccessGuard, ScopedResource},
    error::{FieldProblem, StatusError},
};

const DESTINATIONS_KEY: &str = "Destinations";
const LAST_DESTINATION_ID_KEY: &str = "LastDestinationID";
const DESTINATION_ID_KEY: &str = "DestinationID";
const ENCRYPTION_STATE_KEY: &str = "LastKnownEncryptionState";
const ENCRYPTED_STATE: &str = "Encrypted";
const NETWORK_URL_KEY: &str = "NetworkURL";
const BYTES_AVAILABLE_KEY: &str = "BytesAvailable";
const BYTES_USED_KEY: &str = "BytesUsed";
const VOLUME_NAME_KEY: &str = "LastKnownVolumeName";
const SNAPSHOT_DATES_KEY: &str = "SnapshotDates";

/// One Time Machine backup target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: String,
    pub is_encrypted: bool,
    pub is_network: bool,
    pub bytes_available: u64,
    pub bytes_used: u64,
    pub volume_name: String,
    pub snapshots: Vec<DateTime<Utc>>,
}

impl Destination {
    /// Maps one entry of the `Destinations` array. Missing or mistyped fields
    /// fall back to zero, empty or `false`.
    pub fn from_dictionary(dictionary: &Dictionary) -> Self {
        let string = |key: &str| {
            dictionary
                .get(key)
                .and_then(Value::as_string)
                .map(str::to_owned)
        };
        let bytes = |key: &str| {
            dictionary
                .get(key)
                .and_then(Value::as_unsigned_integer)
                .unwrap_or(0)
        };

        Self {
            id: string(DESTINATION_ID_KEY).unwrap_or_default(),
            is_encrypted: string(ENCRYPTION_STATE_KEY).as_deref() == Some(ENCRYPTED_STATE),
            is_network: dictionary.contains_key(NETWORK_URL_KEY),
            bytes_available: bytes(BYTES_AVAILABLE_KEY),
            bytes_used: bytes(BYTES_USED_KEY),
            volume_name: string(VOLUME_NAME_KEY).unwrap_or_default(),
            snapshots: dictionary
                .get(SNAPSHOT_DATES_KEY)
                .and_then(snapshot_dates)
                .unwrap_or_default(),
        }
    }

    /// Most recent snapshot, if any was taken.
    pub fn last_snapshot(&self) -> Option<DateTime<Utc>> {
        self.snapshots.iter().max().copied()
    }
}

/// All dates of a `SnapshotDates` array, or `None` if it holds anything else.
fn snapshot_dates(value: &Value) -> Option<Vec<DateTime<Utc>>> {
    value
        .as_array()?
        .iter()
        .map(|date| {
            date.as_date()
                .map(|date| DateTime::<Utc>::from(SystemTime::from(date)))
        })
        .collect()
}

/// Typed view of the Time Machine preferences file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    destinations: Vec<Destination>,
    last_destination_id: Option<String>,
}

impl Preferences {
    /// Builds preferences, dropping a last-used id that matches no destination.
    pub fn new(destinations: Vec<Destination>, last_destination_id: Option<String>) -> Self {
        let last_destination_id = last_destination_id
            .filter(|id| destinations.iter().any(|destination| &destination.id == id));

        Self {
            destinations,
            last_destination_id,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn last_destination(&self) -> Option<&Destination> {
        let id = self.last_destination_id.as_ref()?;
        self.destinations
            .iter()
            .find(|destination| &destination.id == id)
    }

    /// Reads the preferences file behind `resource`.
    ///
    /// Every failure is logged and reported as `None`; a partially read file
    /// never produces a value. Access to the resource is released on all paths.
    pub fn read<R: ScopedResource + ?Sized>(resource: &R) -> Option<Self> {
        match Self::try_read(resource) {
            Ok(preferences) => {
                log::info!(
                    "Preferences read with {} destination(s)",
                    preferences.destinations.len()
                );
                Some(preferences)
            }
            Err(e) => {
                log::error!("{}", e);
                None
            }
        }
    }

    fn try_read<R: ScopedResource + ?Sized>(resource: &R) -> Result<Self, StatusError> {
        let guard = AccessGuard::acquire(resource)?;
        let bytes = guard.contents()?;
        Self::decode(&bytes)
    }

    /// Decodes an XML or binary property list.
    pub fn decode(bytes: &[u8]) -> Result<Self, StatusError> {
        let value = Value::from_reader(Cursor::new(bytes)).map_err(StatusError::Decode)?;
        Self::from_value(&value)
    }

    /// Maps an already decoded property list tree.
    pub fn from_value(value: &Value) -> Result<Self, StatusError> {
        let root = value.as_dictionary().ok_or(StatusError::NotADictionary)?;

        let entries = root
            .get(DESTINATIONS_KEY)
            .ok_or(StatusError::StructuralInvalid {
                field: DESTINATIONS_KEY,
                problem: FieldProblem::Missing,
            })?
            .as_array()
            .ok_or(StatusError::StructuralInvalid {
                field: DESTINATIONS_KEY,
                problem: FieldProblem::InvalidType,
            })?;

        let destinations = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry.as_dictionary() {
                Some(dictionary) => Some(Destination::from_dictionary(dictionary)),
                None => {
                    log::warn!("Skipping destination #{} which is not a dictionary", index);
                    None
                }
            })
            .collect();

        let last_destination_id = root
            .get(LAST_DESTINATION_ID_KEY)
            .and_then(Value::as_string)
            .map(str::to_owned);

        Ok(Self::new(destinations, last_destination_id))
    }

    /// Sample data for previewing the display without a configured grant.
    pub fn demo(now: DateTime<Utc>) -> Self {
        // (minutes, seconds) before `now`
        const OFFSETS: [(i64, i64); 25] = [
            (130, 31),
            (590, 15),
            (150, 18),
            (904, 27),
            (200, 45),
            (360, 10),
            (480, 55),
            (720, 30),
            (210, 20),
            (320, 40),
            (430, 50),
            (540, 60),
            (650, 35),
            (760, 45),
            (870, 55),
            (980, 25),
            (1030, 30),
            (1100, 40),
            (1170, 50),
            (1240, 60),
            (1310, 35),
            (1380, 45),
            (1450, 55),
            (1520, 25),
            (1590, 30),
        ];

        let snapshots = OFFSETS
            .iter()
            .map(|&(minutes, seconds)| {
                now - TimeDelta::minutes(minutes) + TimeDelta::seconds(seconds)
            })
            .collect();

        let destination = Destination {
            id: "0F051871-0C44-4856-83C6-4852661B2BF7".to_string(),
            is_encrypted: true,
            is_network: false,
            bytes_available: 1_311_960_657_920,
            bytes_used: 454_036_393_984,
            volume_name: "Time Machine".to_string(),
            snapshots,
        };
        let id = destination.id.clone();

        Self::new(vec![destination], Some(id))
    }
}
