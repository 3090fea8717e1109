//! Business-hours schedule, evaluated in the tenant's own timezone.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Opening window for one weekday. `open` is inclusive, `close` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

impl DayHours {
    /// Build a window from whole hours. Returns `None` for out-of-range hours.
    pub fn from_hours(open: u32, close: u32) -> Option<Self> {
        Some(Self {
            open: NaiveTime::from_hms_opt(open, 0, 0)?,
            close: NaiveTime::from_hms_opt(close, 0, 0)?,
        })
    }

    fn contains(&self, t: NaiveTime) -> bool {
        t >= self.open && t < self.close
    }
}

/// Where a moment falls relative to the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoursStatus {
    Open,
    /// Outside hours on a weekday.
    AfterHours,
    /// Outside hours on Saturday or Sunday.
    Weekend,
}

/// Timezone plus per-weekday open/close times. Days absent from `days` are closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessHours {
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default = "default_days")]
    pub days: HashMap<Weekday, DayHours>,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_days() -> HashMap<Weekday, DayHours> {
    let Some(nine_to_five) = DayHours::from_hours(9, 17) else {
        return HashMap::new();
    };
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
    .into_iter()
    .map(|d| (d, nine_to_five))
    .collect()
}

impl Default for BusinessHours {
    /// Monday to Friday, 09:00-17:00 UTC.
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            days: default_days(),
        }
    }
}

impl BusinessHours {
    /// Classify `now` against the schedule.
    pub fn status_at(&self, now: DateTime<Utc>) -> HoursStatus {
        let local = now.with_timezone(&self.timezone);
        let weekday = local.weekday();

        if self
            .days
            .get(&weekday)
            .is_some_and(|hours| hours.contains(local.time()))
        {
            return HoursStatus::Open;
        }

        match weekday {
            Weekday::Sat | Weekday::Sun => HoursStatus::Weekend,
            _ => HoursStatus::AfterHours,
        }
    }

    /// Problems with the schedule, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems: Vec<String> = self
            .days
            .iter()
            .filter(|(_, h)| h.open >= h.close)
            .map(|(day, h)| {
                format!(
                    "business hours for {day}: open {} is not before close {}",
                    h.open.format("%H:%M"),
                    h.close.format("%H:%M")
                )
            })
            .collect();
        problems.sort();
        problems
    }
}

/// `HH:MM` (or `HH:MM:SS`) serde format for `NaiveTime`.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{raw}': {e}")))
    }
}
