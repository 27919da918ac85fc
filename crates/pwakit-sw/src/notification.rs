//! Push notification descriptions and click handling.

use pwakit_common::SiteConfig;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_BODY: &str = "A new update is available";
const VIBRATION_PATTERN: [u32; 3] = [100, 50, 100];

/// Action identifier that opens the site.
pub const ACTION_EXPLORE: &str = "explore";
/// Action identifier that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// What the worker asks the platform to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Milliseconds since epoch.
    pub arrived_at: i64,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the notification for a push payload.
    pub fn for_push(site: &SiteConfig, payload: Option<&str>, arrived_at: i64) -> Self {
        let body = payload
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_BODY)
            .to_string();

        let action = |id: &str, title: &str| NotificationAction {
            action: id.to_string(),
            title: title.to_string(),
            icon: site.icon.clone(),
        };

        Self {
            title: site.name.clone(),
            body,
            icon: site.icon.clone(),
            badge: site.icon.clone(),
            vibrate: VIBRATION_PATTERN.to_vec(),
            arrived_at,
            actions: vec![action(ACTION_EXPLORE, "Explore"), action(ACTION_CLOSE, "Close")],
        }
    }
}

/// Effect of a notification click on the page clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a new window at this URL.
    OpenWindow(Url),
    /// Just close the notification.
    None,
}

impl ClientAction {
    pub fn for_click(site: &SiteConfig, action: Option<&str>) -> Self {
        match action {
            Some(ACTION_EXPLORE) => ClientAction::OpenWindow(site.origin.clone()),
            _ => ClientAction::None,
        }
    }
}
