// --- File: crates/meetsync_config/src/models.rs ---

use serde::{Deserialize, Serialize};

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const MICROSOFT_LOGIN_BASE: &str = "https://login.microsoftonline.com";
pub const ICLOUD_CALDAV_URL: &str = "https://caldav.icloud.com";

// --- Google Calendar Config ---
// Client secret is usually provided through MEETSYNC__GOOGLE__CLIENT_SECRET.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_google_api_base")]
    pub api_base_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
}

// --- Office 365 / Microsoft Graph Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Office365Config {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_graph_base")]
    pub graph_base_url: String,
    /// Overrides the token endpoint derived from `tenant`.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_office_scope")]
    pub scope: String,
}

impl Office365Config {
    pub fn token_endpoint(&self) -> String {
        self.token_url.clone().unwrap_or_else(|| {
            format!("{}/{}/oauth2/v2.0/token", MICROSOFT_LOGIN_BASE, self.tenant)
        })
    }
}

// --- CalDAV / iCloud / WebDAV Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CalDavConfig {
    #[serde(default = "default_icloud_url")]
    pub default_url: String,
    /// Base64 encoded 32 byte key used to decrypt stored CalDAV passwords.
    #[serde(default)]
    pub credential_key: Option<String>,
}

impl Default for CalDavConfig {
    fn default() -> Self {
        Self {
            default_url: default_icloud_url(),
            credential_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    /// A token expiring within this many seconds is refreshed before use.
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: default_refresh_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_google_channel_ttl")]
    pub google_channel_ttl_hours: i64,
    /// Graph caps calendar subscriptions at 4230 minutes.
    #[serde(default = "default_graph_subscription_ttl")]
    pub graph_subscription_ttl_minutes: i64,
    #[serde(default)]
    pub client_state: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            google_channel_ttl_hours: default_google_channel_ttl(),
            graph_subscription_ttl_minutes: default_graph_subscription_ttl(),
            client_state: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WeeklyRangeConfig {
    /// Weekday as `Mon`..`Sun`.
    pub weekday: String,
    /// Wall clock `HH:MM`.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AvailabilityConfig {
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
    #[serde(default = "default_weekly_schedule")]
    pub default_weekly_schedule: Vec<WeeklyRangeConfig>,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            default_time_zone: default_time_zone(),
            default_weekly_schedule: default_weekly_schedule(),
        }
    }
}

// --- Unified Engine Configuration ---
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub office365: Option<Office365Config>,
    #[serde(default)]
    pub caldav: CalDavConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
}

fn default_google_api_base() -> String {
    GOOGLE_CALENDAR_API_BASE.to_string()
}

fn default_google_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_tenant() -> String {
    "common".to_string()
}

fn default_graph_base() -> String {
    GRAPH_API_BASE.to_string()
}

fn default_office_scope() -> String {
    "offline_access User.Read Calendars.ReadWrite".to_string()
}

fn default_icloud_url() -> String {
    ICLOUD_CALDAV_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_refresh_threshold() -> i64 {
    300
}

fn default_google_channel_ttl() -> i64 {
    168
}

fn default_graph_subscription_ttl() -> i64 {
    4200
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_weekly_schedule() -> Vec<WeeklyRangeConfig> {
    ["Mon", "Tue", "Wed", "Thu", "Fri"]
        .iter()
        .map(|day| WeeklyRangeConfig {
            weekday: day.to_string(),
            start: "09:00".to_string(),
            end: "17:00".to_string(),
        })
        .collect()
}
