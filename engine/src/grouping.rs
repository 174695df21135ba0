//! Day buckets over an already ordered message sequence, plus the labels the
//! chat window renders on top of them.

use chatsync_messaging::Message;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayGroup {
    /// Calendar day in the grouping time zone.
    pub day: NaiveDate,
    pub messages: Vec<Message>,
}

/// Starts a new group whenever the local calendar day differs from the
/// previous group's day. Never reorders: input order is assumed chronological.
pub fn group_by_day<Tz: TimeZone>(messages: &[Message], tz: &Tz) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for message in messages {
        let day = message.timestamp.with_timezone(tz).date_naive();
        match groups.last_mut() {
            Some(group) if group.day == day => group.messages.push(message.clone()),
            _ => groups.push(DayGroup {
                day,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    Date(NaiveDate),
}

impl DayLabel {
    pub fn for_day(day: NaiveDate, today: NaiveDate) -> Self {
        if day == today {
            Self::Today
        } else if today.pred_opt() == Some(day) {
            Self::Yesterday
        } else {
            Self::Date(day)
        }
    }
}

impl Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Today => f.write_str("Today"),
            Self::Yesterday => f.write_str("Yesterday"),
            Self::Date(day) => write!(f, "{}", day.format("%B %d, %Y")),
        }
    }
}

/// Bubble timestamp: "HH:mm" today, "Yesterday HH:mm", else "Mon dd, HH:mm".
pub fn format_message_time<Tz>(timestamp: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = timestamp.with_timezone(tz);
    let today = now.with_timezone(tz).date_naive();
    match DayLabel::for_day(local.date_naive(), today) {
        DayLabel::Today => local.format("%H:%M").to_string(),
        DayLabel::Yesterday => format!("Yesterday {}", local.format("%H:%M")),
        DayLabel::Date(_) => local.format("%b %d, %H:%M").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_messaging::{MessageId, UserId};
    use chrono::FixedOffset;

    fn message(id: &str, timestamp: DateTime<Utc>) -> Message {
        Message::new(
            MessageId::new(id),
            UserId::new("me"),
            UserId::new("peer"),
            "text",
            timestamp,
        )
        .unwrap()
    }

    fn utc(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn two_days_make_two_groups_in_order() {
        let messages = vec![
            message("a", utc(1, 9)),
            message("b", utc(1, 10)),
            message("c", utc(2, 9)),
        ];

        let groups = group_by_day(&messages, &Utc);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].day, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let first: Vec<&str> = groups[0].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(groups[1].messages[0].id.as_str(), "c");
    }

    #[test]
    fn grouping_uses_local_calendar_day() {
        // 23:30 UTC on the 1st is already the 2nd at UTC+2.
        let messages = vec![
            message("a", Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap()),
            message("b", utc(2, 8)),
        ];

        assert_eq!(group_by_day(&messages, &Utc).len(), 2);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let groups = group_by_day(&messages, &plus_two);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].day, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_day(&[], &Utc).is_empty());
    }

    #[test]
    fn day_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let older = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();

        assert_eq!(DayLabel::for_day(today, today).to_string(), "Today");
        assert_eq!(DayLabel::for_day(yesterday, today).to_string(), "Yesterday");
        assert_eq!(
            DayLabel::for_day(older, today).to_string(),
            "February 05, 2024"
        );
    }

    #[test]
    fn message_times() {
        let now = utc(10, 18);

        assert_eq!(format_message_time(utc(10, 9), now, &Utc), "09:00");
        assert_eq!(format_message_time(utc(9, 21), now, &Utc), "Yesterday 21:00");
        assert_eq!(format_message_time(utc(3, 7), now, &Utc), "May 03, 07:00");
    }
}
