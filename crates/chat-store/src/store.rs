//! Typed accessors over the raw settings store.

use crate::{keys, SettingsStore, StoreError, StoreResult};
use chat_types::TenantId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The tenant the user last selected in the hosting application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTenant {
    pub tenant_id: TenantId,
    pub tenant_name: String,
}

/// User-configurable notification preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub sound: bool,
    pub desktop: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            desktop: false,
        }
    }
}

/// Typed facade over a host-provided `SettingsStore`.
pub struct EngineStore {
    backend: Box<dyn SettingsStore>,
}

impl EngineStore {
    /// Wrap a storage backend.
    pub fn new(backend: Box<dyn SettingsStore>) -> Self {
        Self { backend }
    }

    /// The stored auth credential, if any. The engine never writes this key.
    pub fn auth_token(&self) -> StoreResult<Option<String>> {
        self.backend.get(keys::AUTH_TOKEN)
    }

    /// Clear the stored credential after a terminal auth failure.
    pub fn clear_auth_token(&self) -> StoreResult<bool> {
        let existed = self.backend.delete(keys::AUTH_TOKEN)?;
        if existed {
            info!("cleared stored auth credential");
        }
        Ok(existed)
    }

    /// The previously selected tenant, if any.
    pub fn selected_tenant(&self) -> StoreResult<Option<SelectedTenant>> {
        match self.backend.get(keys::SELECTED_TENANT)? {
            Some(raw) => {
                let tenant = serde_json::from_str(&raw).map_err(|source| {
                    StoreError::Malformed {
                        key: keys::SELECTED_TENANT,
                        source,
                    }
                })?;
                Ok(Some(tenant))
            }
            None => Ok(None),
        }
    }

    /// Stored notification preferences, defaulting when absent or malformed.
    ///
    /// A corrupt preferences blob should not break chat, so it degrades to the
    /// defaults rather than erroring.
    pub fn notification_settings(&self) -> StoreResult<NotificationSettings> {
        match self.backend.get(keys::NOTIFICATION_SETTINGS)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    debug!(error = %e, "malformed notification settings, using defaults");
                    Ok(NotificationSettings::default())
                }
            },
            None => Ok(NotificationSettings::default()),
        }
    }

    /// Persist notification preferences.
    pub fn set_notification_settings(&self, settings: &NotificationSettings) -> StoreResult<()> {
        let raw = serde_json::to_string(settings).expect("settings are always serializable");
        self.backend.set(keys::NOTIFICATION_SETTINGS, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn store() -> (MemoryStore, EngineStore) {
        let mem = MemoryStore::new();
        let engine = EngineStore::new(Box::new(mem.clone()));
        (mem, engine)
    }

    #[test]
    fn auth_token_reads_through() {
        let (mem, engine) = store();
        assert_eq!(engine.auth_token().unwrap(), None);

        mem.set(keys::AUTH_TOKEN, "tok-123").unwrap();
        assert_eq!(engine.auth_token().unwrap().as_deref(), Some("tok-123"));
    }

    #[test]
    fn clear_auth_token_is_idempotent() {
        let (mem, engine) = store();
        mem.set(keys::AUTH_TOKEN, "tok").unwrap();

        assert!(engine.clear_auth_token().unwrap());
        assert!(!engine.clear_auth_token().unwrap());
        assert_eq!(engine.auth_token().unwrap(), None);
    }

    #[test]
    fn selected_tenant_round_trips() {
        let (mem, engine) = store();
        let selected = SelectedTenant {
            tenant_id: TenantId::new("5f1a2b3c4d5e6f7a8b9c0d1e").unwrap(),
            tenant_name: "Acme Traders".to_string(),
        };
        mem.set(
            keys::SELECTED_TENANT,
            &serde_json::to_string(&selected).unwrap(),
        )
        .unwrap();

        assert_eq!(engine.selected_tenant().unwrap(), Some(selected));
    }

    #[test]
    fn malformed_selected_tenant_is_an_error() {
        let (mem, engine) = store();
        mem.set(keys::SELECTED_TENANT, "{not json").unwrap();
        assert!(matches!(
            engine.selected_tenant(),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn notification_settings_default_when_absent() {
        let (_mem, engine) = store();
        assert_eq!(
            engine.notification_settings().unwrap(),
            NotificationSettings::default()
        );
    }

    #[test]
    fn notification_settings_degrade_on_corruption() {
        let (mem, engine) = store();
        mem.set(keys::NOTIFICATION_SETTINGS, "garbage").unwrap();
        assert_eq!(
            engine.notification_settings().unwrap(),
            NotificationSettings::default()
        );
    }

    #[test]
    fn notification_settings_round_trip() {
        let (_mem, engine) = store();
        let settings = NotificationSettings {
            enabled: true,
            sound: false,
            desktop: true,
        };
        engine.set_notification_settings(&settings).unwrap();
        assert_eq!(engine.notification_settings().unwrap(), settings);
    }
}
