//! Immutable audit trail for channel state transitions.
//!
//! Every observed or commanded flip lands in the state log exactly once,
//! tagged with who (or what) caused it. The log is append-only; nothing
//! in the service updates or deletes rows.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::model::{ChangeSource, ChannelKind, StateLogEntry};
use crate::store::{DeviceStore, NewLogEntry};

pub struct AuditLogger {
    store: Arc<dyn DeviceStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Record a transition commanded through the control surface
    pub async fn log_user_change(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        previous: bool,
        new: bool,
        username: &str,
        reason: Option<String>,
    ) -> Result<StateLogEntry> {
        self.append(NewLogEntry {
            device_id,
            kind,
            number,
            previous,
            new,
            source: ChangeSource::User,
            username: Some(username.to_string()),
            reason,
        })
        .await
    }

    /// Record a transition detected by the poll loop
    pub async fn log_system_change(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        previous: bool,
        new: bool,
    ) -> Result<StateLogEntry> {
        self.append(NewLogEntry {
            device_id,
            kind,
            number,
            previous,
            new,
            source: ChangeSource::System,
            username: None,
            reason: None,
        })
        .await
    }

    async fn append(&self, entry: NewLogEntry) -> Result<StateLogEntry> {
        info!(
            device_id = entry.device_id,
            kind = entry.kind.as_str(),
            number = entry.number,
            previous = entry.previous,
            new = entry.new,
            source = entry.source.as_str(),
            username = entry.username.as_deref().unwrap_or(""),
            "Channel state change"
        );
        self.store.insert_log(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn user_and_system_entries_carry_their_source() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone());

        logger
            .log_user_change(
                7,
                ChannelKind::Output,
                2,
                false,
                true,
                "alice",
                Some("maintenance".to_string()),
            )
            .await
            .unwrap();
        logger
            .log_system_change(7, ChannelKind::Input, 5, true, false)
            .await
            .unwrap();

        let entries = store.log_entries();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].source, ChangeSource::User);
        assert_eq!(entries[0].username.as_deref(), Some("alice"));
        assert_eq!(entries[0].reason.as_deref(), Some("maintenance"));
        assert!(!entries[0].previous && entries[0].new);

        assert_eq!(entries[1].source, ChangeSource::System);
        assert!(entries[1].username.is_none());
        assert_eq!(entries[1].kind, ChannelKind::Input);
    }
}
