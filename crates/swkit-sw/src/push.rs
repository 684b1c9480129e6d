//! Push payloads and the notifications they produce.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ServiceWorkerError;

pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

const ICON: &str = "/images/icon-192x192.png";
const BADGE: &str = "/images/badge-72x72.png";
const VIBRATE: [u32; 3] = [100, 50, 100];

/// JSON body of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushPayload {
    /// Parse a push body.
    pub fn from_slice(data: &[u8]) -> Result<Self, ServiceWorkerError> {
        serde_json::from_slice(data).map_err(|e| ServiceWorkerError::Push(e.to_string()))
    }
}

/// A notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Milliseconds since the Unix epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// A notification to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: Option<String>,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// The site's notification for `payload`.
    pub fn from_payload(payload: PushPayload) -> Self {
        Self {
            title: payload.title,
            body: payload.body,
            icon: ICON.to_string(),
            badge: BADGE.to_string(),
            vibrate: VIBRATE.to_vec(),
            data: NotificationData {
                date_of_arrival: now_millis(),
                primary_key: 1,
            },
            actions: vec![
                NotificationAction {
                    action: EXPLORE_ACTION.to_string(),
                    title: "Ver más".to_string(),
                    icon: "/images/checkmark.png".to_string(),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: "Cerrar".to_string(),
                    icon: "/images/xmark.png".to_string(),
                },
            ],
        }
    }
}

/// Notification for a push. No data means nothing to show.
pub fn notification_for_push(
    data: Option<&[u8]>,
) -> Result<Option<Notification>, ServiceWorkerError> {
    match data {
        None => Ok(None),
        Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Some(bytes) => {
            PushPayload::from_slice(bytes).map(|payload| Some(Notification::from_payload(payload)))
        }
    }
}

/// Path to open when `action` is clicked.
pub fn click_target(action: Option<&str>) -> Option<&'static str> {
    match action {
        Some(EXPLORE_ACTION) => Some("/"),
        _ => None,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
