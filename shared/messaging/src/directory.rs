//! Directory entries describing the counterparty of a conversation.
//!
//! The directory itself is owned elsewhere; conversations only read these.

use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user the local account can chat with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "isOnline", default)]
    pub is_online: bool,
    /// Only meaningful while `is_online` is false.
    #[serde(rename = "lastSeen", default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Peer {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_online: false,
            last_seen_at: None,
        }
    }

    pub fn online(mut self) -> Self {
        self.is_online = true;
        self
    }

    pub fn last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.is_online = false;
        self.last_seen_at = Some(at);
        self
    }

    pub fn presence(&self) -> Presence {
        match (self.is_online, self.last_seen_at) {
            (true, _) => Presence::Online,
            (false, Some(at)) => Presence::LastSeen(at),
            (false, None) => Presence::Offline,
        }
    }

    /// Avatar letter: uppercased first character of the display name.
    pub fn initial(&self) -> Option<char> {
        self.display_name
            .chars()
            .next()
            .and_then(|c| c.to_uppercase().next())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    LastSeen(DateTime<Utc>),
    Offline,
}

impl Presence {
    pub fn label(&self, now: DateTime<Utc>) -> String {
        match self {
            Self::Online => "Online".to_string(),
            Self::LastSeen(at) => format!("Last seen {} ago", distance_words(now - *at)),
            Self::Offline => "Offline".to_string(),
        }
    }
}

/// Coarse, human-readable distance ("5 minutes", "about 2 hours").
pub fn distance_words(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let mins = (secs + 30) / 60;
    let hours = (mins + 30) / 60;
    let days = (hours + 12) / 24;

    if secs < 30 {
        "less than a minute".to_string()
    } else if secs < 90 {
        "1 minute".to_string()
    } else if mins < 45 {
        format!("{mins} minutes")
    } else if mins < 90 {
        "about 1 hour".to_string()
    } else if hours < 24 {
        format!("about {hours} hours")
    } else if hours < 42 {
        "1 day".to_string()
    } else if days < 30 {
        format!("{days} days")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
