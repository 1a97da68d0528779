use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    OrderPlaced,
    OrderConfirmed,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    ProductApproved,
    ProductRejected,
    NewProduct,
    ShopApproved,
    ShopRejected,
    #[serde(other)]
    Other,
}

/// Coarse grouping used by consumers to pick an icon and a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    Order,
    Product,
    Shop,
    Other,
}

impl NotificationType {
    pub fn category(self) -> NotificationCategory {
        match self {
            NotificationType::OrderPlaced
            | NotificationType::OrderConfirmed
            | NotificationType::OrderShipped
            | NotificationType::OrderDelivered
            | NotificationType::OrderCancelled => NotificationCategory::Order,
            NotificationType::ProductApproved
            | NotificationType::ProductRejected
            | NotificationType::NewProduct => NotificationCategory::Product,
            NotificationType::ShopApproved | NotificationType::ShopRejected => {
                NotificationCategory::Shop
            }
            NotificationType::Other => NotificationCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(deserialize_with = "opaque_id")]
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Returns what a click on this notification should open, if anything.
    pub fn link_target(&self) -> Option<(NotificationCategory, &str)> {
        self.reference_id
            .as_deref()
            .map(|reference| (self.notification_type.category(), reference))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn opaque_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    EpochMillis(i64),
}

// Backends disagree on timestamp shape: RFC 3339, zone-less local time
// (taken as UTC) and epoch milliseconds are all accepted.
fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Utc.from_utc_datetime(&naive))
                .map_err(|e| D::Error::custom(format!("invalid createdAt '{}': {}", text, e)))
        }
        RawTimestamp::EpochMillis(millis) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| D::Error::custom(format!("createdAt out of range: {}", millis))),
    }
}
