use serde::{Deserialize, Serialize};

// --- Tenants ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tenant {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub name: String,
    pub created_at: String,
}

/// Per-tenant configuration blob stored on the tenant row. Missing fields
/// fall back to the defaults below.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TenantConfig {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: i64,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_durable_notifications")]
    pub durable_notifications: bool,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            retry_limit: default_retry_limit(),
            rate_limit_rps: default_rate_limit_rps(),
            durable_notifications: default_durable_notifications(),
        }
    }
}

fn default_max_message_size() -> usize {
    4096
}

fn default_retry_limit() -> i64 {
    5
}

fn default_rate_limit_rps() -> u32 {
    100
}

fn default_durable_notifications() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub name: String,
}

// --- Rooms ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: String,
    pub tenant_id: String,
    pub room_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub last_seq: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomMember {
    pub tenant_id: String,
    pub room_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomWithStats {
    pub id: String,
    pub room_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub last_seq: i64,
    pub message_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoom {
    #[serde(rename = "type")]
    pub room_type: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

// --- Messages ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub seq: i64,
    pub content: String,
    pub meta: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub seq: i64,
    pub created_at: String,
}

// --- Delivery ---

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub room_id: String,
    pub seq: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliveryState {
    pub tenant_id: String,
    pub user_id: String,
    pub room_id: String,
    pub last_ack: i64,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UndeliveredMessage {
    pub id: i64,
    pub tenant_id: String,
    pub user_id: String,
    pub room_id: String,
    pub message_id: String,
    pub seq: i64,
    pub attempts: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<String>,
}

// --- Notifications ---

/// Notification status machine states. `delivered` and `dead` are terminal;
/// `failed` transitions straight back to `pending` (or to `dead`) inside the
/// same statement, so it is never observed at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    Dead,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("invalid notification status: {s}")),
        }
    }
}

// Database mapping: NotificationStatus <-> TEXT
impl rusqlite::types::ToSql for NotificationStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.to_string().into())
    }
}

impl rusqlite::types::FromSql for NotificationStatus {
    fn column_result(
        value: rusqlite::types::ValueRef<'_>,
    ) -> rusqlite::types::FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub id: String,
    pub tenant_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub attempts: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<String>,
}

/// Recipient selector stored with the notification row. Precedence:
/// explicit user ids, then a room's current members, then every online
/// user of the tenant.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NotificationTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNotification {
    pub topic: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub targets: Option<NotificationTargets>,
}

// --- Admin ---

#[derive(Debug, Serialize)]
pub struct DeadLettersResponse {
    pub failed_messages: Vec<UndeliveredMessage>,
    pub failed_notifications: Vec<Notification>,
}

// --- Presence ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PresenceEntry {
    pub user_id: String,
    pub connections: usize,
    pub last_seen: String,
}
