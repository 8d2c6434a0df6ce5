//! Well-known storage keys.

/// Auth credential (JWT) issued by the login flow.
pub const AUTH_TOKEN: &str = "shoptalk.auth_token";

/// Previously selected tenant, JSON-encoded `SelectedTenant`.
pub const SELECTED_TENANT: &str = "shoptalk.selected_tenant";

/// Notification preferences, JSON-encoded `NotificationSettings`.
pub const NOTIFICATION_SETTINGS: &str = "shoptalk.notification_settings";
