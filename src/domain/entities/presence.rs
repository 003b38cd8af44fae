//! Outbound presence for the connected bot user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Idle,
    #[serde(rename = "dnd")]
    DoNotDisturb,
    Invisible,
    Offline,
}

impl PresenceStatus {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "dnd" => Some(Self::DoNotDisturb),
            "invisible" => Some(Self::Invisible),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::DoNotDisturb => "dnd",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityKind {
    #[default]
    Playing = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
    Competing = 5,
}

impl ActivityKind {
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Streaming,
            2 => Self::Listening,
            3 => Self::Watching,
            4 => Self::Custom,
            5 => Self::Competing,
            _ => Self::Playing,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Serialize for ActivityKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ActivityKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u8::deserialize(deserializer).map(Self::from_u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    #[must_use]
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            state: None,
            url: None,
        }
    }

    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self::new(ActivityKind::Playing, name)
    }

    #[must_use]
    pub fn listening(name: impl Into<String>) -> Self {
        Self::new(ActivityKind::Listening, name)
    }

    #[must_use]
    pub fn watching(name: impl Into<String>) -> Self {
        Self::new(ActivityKind::Watching, name)
    }

    /// Custom status; the gateway displays `state`, `name` is ignored.
    #[must_use]
    pub fn custom(text: impl Into<String>) -> Self {
        Self {
            state: Some(text.into()),
            ..Self::new(ActivityKind::Custom, "Custom Status")
        }
    }

    #[must_use]
    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(ActivityKind::Streaming, name)
        }
    }
}

/// Presence sent with opcode 3 and embedded in Identify.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PresenceUpdate {
    #[serde(serialize_with = "serialize_since")]
    pub since: Option<DateTime<Utc>>,
    pub activities: Vec<Activity>,
    pub status: PresenceStatus,
    pub afk: bool,
}

impl PresenceUpdate {
    #[must_use]
    pub fn new(status: PresenceStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    /// Marks the user idle since `since`, as the gateway expects for `afk`.
    #[must_use]
    pub fn with_afk(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.afk = true;
        self
    }
}

fn serialize_since<S>(since: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match since {
        Some(at) => serializer.serialize_i64(at.timestamp_millis()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_presence_status() {
        assert_eq!(PresenceStatus::parse("online"), Some(PresenceStatus::Online));
        assert_eq!(PresenceStatus::parse("DND"), Some(PresenceStatus::DoNotDisturb));
        assert_eq!(PresenceStatus::parse("busy"), None);
        assert_eq!(PresenceStatus::Idle.as_str(), "idle");
    }

    #[test]
    fn test_activity_kind() {
        assert_eq!(ActivityKind::from_u8(0), ActivityKind::Playing);
        assert_eq!(ActivityKind::from_u8(42), ActivityKind::Playing);
        assert_eq!(ActivityKind::Competing.as_u8(), 5);
    }

    #[test]
    fn test_presence_wire_shape() {
        let presence = PresenceUpdate::new(PresenceStatus::DoNotDisturb)
            .with_activity(Activity::listening("the gateway"));
        let value = serde_json::to_value(&presence).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "since": null,
                "activities": [{"name": "the gateway", "type": 2}],
                "status": "dnd",
                "afk": false
            })
        );
    }

    #[test]
    fn test_afk_since_in_unix_millis() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let presence = PresenceUpdate::new(PresenceStatus::Idle).with_afk(since);
        let value = serde_json::to_value(&presence).unwrap();

        assert_eq!(value["since"], 1_704_067_200_000_i64);
        assert_eq!(value["afk"], true);
    }

    #[test]
    fn test_custom_status_uses_state() {
        let activity = Activity::custom("shipping");
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], 4);
        assert_eq!(value["state"], "shipping");
    }
}
