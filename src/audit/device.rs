//! Coarse device fingerprint parsed from a `User-Agent` string.
//!
//! Only the families an admin needs to recognise a session are detected;
//! everything else reports `"Unknown"`. Order matters: several browsers
//! embed each other's tokens (Edge and Opera carry `Chrome/`, Chrome carries
//! `Safari/`), so the more specific token is checked first.

use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

/// Parsed device summary stored on every activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Unknown,
            os: UNKNOWN.to_string(),
            browser: UNKNOWN.to_string(),
        }
    }
}

const BOT_TOKENS: [&str; 6] = ["bot", "crawler", "spider", "curl/", "wget/", "python-requests"];

// (token, name); first match wins
const OS_TOKENS: [(&str, &str); 8] = [
    ("windows phone", "Windows Phone"),
    ("windows", "Windows"),
    ("iphone", "iOS"),
    ("ipad", "iPadOS"),
    ("android", "Android"),
    ("cros ", "ChromeOS"),
    ("mac os x", "macOS"),
    ("linux", "Linux"),
];

const BROWSER_TOKENS: [(&str, &str); 8] = [
    ("edg/", "Edge"),
    ("edge/", "Edge"),
    ("opr/", "Opera"),
    ("opera", "Opera"),
    ("firefox/", "Firefox"),
    ("fxios/", "Firefox"),
    ("crios/", "Chrome"),
    ("chrome/", "Chrome"),
];

impl DeviceInfo {
    /// Parse `user_agent`. Never fails; unrecognised parts are `"Unknown"`.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.trim().to_ascii_lowercase();
        if ua.is_empty() {
            return Self::default();
        }

        let os = OS_TOKENS
            .iter()
            .find(|(token, _)| ua.contains(token))
            .map_or(UNKNOWN, |(_, name)| *name);

        let browser = BROWSER_TOKENS
            .iter()
            .find(|(token, _)| ua.contains(token))
            .map(|(_, name)| *name)
            .or_else(|| {
                if ua.contains("safari/") {
                    Some("Safari")
                } else if ua.contains("trident/") || ua.contains("msie ") {
                    Some("Internet Explorer")
                } else {
                    None
                }
            })
            .unwrap_or(UNKNOWN);

        let device_type = if BOT_TOKENS.iter().any(|token| ua.contains(token)) {
            DeviceType::Bot
        } else if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
            DeviceType::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") {
            DeviceType::Mobile
        } else if os != UNKNOWN {
            DeviceType::Desktop
        } else {
            DeviceType::Unknown
        };

        Self {
            device_type,
            os: os.to_string(),
            browser: browser.to_string(),
        }
    }
}
