//! Status, date, and text filtering over a message set.
//!
//! Pure functions: the caller supplies `now`, so results depend only on
//! the inputs.

use chrono::{DateTime, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TempboxError};
use crate::model::message::Message;

/// Read-state criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Read,
    Unread,
}

/// Date criterion. `Custom` reads `FilterSpec::date_from` / `date_to`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFilter {
    #[default]
    All,
    /// Same local calendar day as now.
    Today,
    /// Within the last 7 days.
    Week,
    /// Within the last calendar month.
    Month,
    /// Inclusive local-date range; either bound may be absent.
    Custom,
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "read" => Ok(Self::Read),
            "unread" => Ok(Self::Unread),
            other => Err(format!("unknown status '{other}' (expected all, read, unread)")),
        }
    }
}

impl std::str::FromStr for DateFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown date filter '{other}'")),
        }
    }
}

/// Combined criteria producing a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub status: StatusFilter,
    pub date: DateFilter,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Free text; trimmed, case-insensitive, empty disables.
    pub search: String,
}

impl FilterSpec {
    /// Reject a custom range whose start lies after its end.
    pub fn validate(&self) -> Result<()> {
        if self.date == DateFilter::Custom {
            if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
                if from > to {
                    return Err(TempboxError::Validation(format!(
                        "date range start {from} is after end {to}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drop custom bounds unless the date filter is `Custom`.
    pub fn normalized(mut self) -> Self {
        if self.date != DateFilter::Custom {
            self.date_from = None;
            self.date_to = None;
        }
        self
    }
}

/// Keep the messages matching `spec`, preserving input order.
pub fn apply_filter(messages: &[Message], spec: &FilterSpec, now: DateTime<Local>) -> Vec<Message> {
    let needle = spec.search.trim().to_lowercase();
    messages
        .iter()
        .filter(|m| message_matches(m, spec, &needle, now))
        .cloned()
        .collect()
}

/// Check whether a single message matches. Cheapest checks first.
fn message_matches(msg: &Message, spec: &FilterSpec, needle: &str, now: DateTime<Local>) -> bool {
    // 1. Status
    match spec.status {
        StatusFilter::Unread if msg.is_read => return false,
        StatusFilter::Read if !msg.is_read => return false,
        _ => {}
    }

    // 2. Date
    if !matches_date(msg, spec, now) {
        return false;
    }

    // 3. Text
    if needle.is_empty() {
        return true;
    }
    matches_text(&msg.from, needle) || matches_text(&msg.subject, needle) || matches_text(&msg.body, needle)
}

/// Case-insensitive substring match; `needle` is already lowercase.
fn matches_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Check the message date against the date criterion, in local time.
fn matches_date(msg: &Message, spec: &FilterSpec, now: DateTime<Local>) -> bool {
    let created = msg.created_at.with_timezone(&Local);
    match spec.date {
        DateFilter::All => true,
        DateFilter::Today => created.date_naive() == now.date_naive(),
        DateFilter::Week => created >= now - Duration::days(7),
        DateFilter::Month => match now.checked_sub_months(Months::new(1)) {
            Some(cutoff) => created >= cutoff,
            None => true,
        },
        DateFilter::Custom => {
            let local = created.naive_local();
            if let Some(from) = spec.date_from {
                if local < start_of_day(from) {
                    return false;
                }
            }
            if let Some(to) = spec.date_to {
                if local > end_of_day(to) {
                    return false;
                }
            }
            true
        }
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    // 23:59:59.999 always exists
    date.and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::identity::derive_id;
    use chrono::{TimeZone, Utc};

    fn make(from: &str, subject: &str, body: &str, at: DateTime<Utc>, read: bool) -> Message {
        let mut m = Message::new_unread(
            derive_id(&at, from),
            "default",
            from,
            Some(subject),
            Some(body),
            at,
        );
        m.is_read = read;
        m
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    fn ago(days: i64) -> DateTime<Utc> {
        (fixed_now() - Duration::days(days)).with_timezone(&Utc)
    }

    fn ids(ms: &[Message]) -> Vec<&str> {
        ms.iter().map(|m| m.from.as_str()).collect()
    }

    #[test]
    fn test_status_filters_partition_all() {
        let msgs = vec![
            make("a@x.com", "A", "", ago(0), true),
            make("b@x.com", "B", "", ago(1), false),
            make("c@x.com", "C", "", ago(2), true),
        ];
        let spec = |status| FilterSpec {
            status,
            ..Default::default()
        };
        let all = apply_filter(&msgs, &spec(StatusFilter::All), fixed_now());
        let read = apply_filter(&msgs, &spec(StatusFilter::Read), fixed_now());
        let unread = apply_filter(&msgs, &spec(StatusFilter::Unread), fixed_now());
        assert_eq!(read.len() + unread.len(), all.len());
        assert!(read.iter().all(|m| !unread.contains(m)));
        assert_eq!(ids(&read), vec!["a@x.com", "c@x.com"]);
        assert_eq!(ids(&unread), vec!["b@x.com"]);
    }

    #[test]
    fn test_search_is_trimmed_and_case_insensitive() {
        let msgs = vec![
            make("alice@x.com", "Budget Report", "numbers", ago(0), false),
            make("bob@x.com", "Lunch", "Your BUDGET is fine", ago(0), false),
            make("carol@x.com", "Other", "nothing", ago(0), false),
        ];
        let spec = FilterSpec {
            search: "  budget ".into(),
            ..Default::default()
        };
        assert_eq!(ids(&apply_filter(&msgs, &spec, fixed_now())), vec!["alice@x.com", "bob@x.com"]);

        let blank = FilterSpec {
            search: "   ".into(),
            ..Default::default()
        };
        assert_eq!(apply_filter(&msgs, &blank, fixed_now()).len(), 3);
    }

    #[test]
    fn test_today_and_week() {
        let msgs = vec![
            make("today@x.com", "", "", ago(0), false),
            make("three@x.com", "", "", ago(3), false),
            make("ten@x.com", "", "", ago(10), false),
        ];
        let today = FilterSpec {
            date: DateFilter::Today,
            ..Default::default()
        };
        assert_eq!(ids(&apply_filter(&msgs, &today, fixed_now())), vec!["today@x.com"]);

        let week = FilterSpec {
            date: DateFilter::Week,
            ..Default::default()
        };
        assert_eq!(
            ids(&apply_filter(&msgs, &week, fixed_now())),
            vec!["today@x.com", "three@x.com"]
        );
    }

    #[test]
    fn test_month_uses_calendar_months() {
        // now = March 31; one calendar month back clamps to Feb 29 (2024),
        // 31 days earlier, so a fixed 30-day cutoff would drop "edge".
        let msgs = vec![
            make("in@x.com", "", "", ago(30), false),
            make("edge@x.com", "", "", ago(31) + Duration::hours(2), false),
            make("out@x.com", "", "", ago(32), false),
        ];
        let month = FilterSpec {
            date: DateFilter::Month,
            ..Default::default()
        };
        assert_eq!(
            ids(&apply_filter(&msgs, &month, fixed_now())),
            vec!["in@x.com", "edge@x.com"]
        );
    }

    #[test]
    fn test_custom_range_is_inclusive() {
        let day = |d: u32, h: u32, m: u32, s: u32| {
            Local
                .with_ymd_and_hms(2024, 6, d, h, m, s)
                .unwrap()
                .with_timezone(&Utc)
        };
        let msgs = vec![
            make("before@x.com", "", "", day(9, 23, 59, 59), false),
            make("start@x.com", "", "", day(10, 0, 0, 0), false),
            make("end@x.com", "", "", day(12, 23, 59, 59), false),
            make("after@x.com", "", "", day(13, 0, 0, 0), false),
        ];
        let spec = FilterSpec {
            date: DateFilter::Custom,
            date_from: NaiveDate::from_ymd_opt(2024, 6, 10),
            date_to: NaiveDate::from_ymd_opt(2024, 6, 12),
            ..Default::default()
        };
        assert_eq!(
            ids(&apply_filter(&msgs, &spec, fixed_now())),
            vec!["start@x.com", "end@x.com"]
        );

        let open_end = FilterSpec {
            date_to: None,
            ..spec.clone()
        };
        assert_eq!(apply_filter(&msgs, &open_end, fixed_now()).len(), 3);
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let spec = FilterSpec {
            date: DateFilter::Custom,
            date_from: NaiveDate::from_ymd_opt(2024, 3, 12),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 10),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
        // Same bounds are ignored for non-custom filters
        assert!(FilterSpec { date: DateFilter::Week, ..spec }.validate().is_ok());
    }

    #[test]
    fn test_normalized_drops_unused_bounds() {
        let spec = FilterSpec {
            date: DateFilter::Today,
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        }
        .normalized();
        assert!(spec.date_from.is_none());
    }
}
