use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::store::{CollabStore, StoreError};
use crate::models::{
    ChatEvent, ChatIntent, DocumentUser, DocumentUsersEvent, LockDeniedEvent, PresenceEvent, PresenceIntent,
    ReceivedMessage, SectionEditIntent, SectionLockIntent, SectionLockedEvent, SectionUnlockIntent,
    SectionUnlockedEvent, SectionUpdateEvent, SendMessage,
};
use crate::services::lease_service::{LeaseError, LeaseManager};
use crate::services::presence_service::PresenceTracker;
use crate::utils::clock::Clock;
use crate::ws::permissions::PermissionCache;
use crate::ws::room::{ConnectionHandle, RoomBroadcaster};

const MISSING_PRESENCE_IDS: &str = "Missing document_id or user_id";
const MISSING_DATA: &str = "Missing required data";

/// Turns client intents into presence, lease and room operations.
///
/// Every failure is answered to the originating connection only, either as an `error`
/// event or as `lock_denied`; the room never hears about it.
pub struct Coordinator {
    store: Arc<dyn CollabStore>,
    presence: PresenceTracker,
    leases: Arc<LeaseManager>,
    rooms: Arc<dyn RoomBroadcaster>,
    permissions: PermissionCache,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn CollabStore>,
        leases: Arc<LeaseManager>,
        rooms: Arc<dyn RoomBroadcaster>,
        permissions: PermissionCache,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        let presence = PresenceTracker::new(store.clone(), clock.clone());
        Self { store, presence, leases, rooms, permissions, clock, config }
    }

    pub async fn handle(&self, conn: &ConnectionHandle, msg: ReceivedMessage) {
        debug!("Connection {} sent {}", conn.id, msg.kind());
        match msg {
            ReceivedMessage::JoinDocument(intent) => self.join(conn, intent).await,
            ReceivedMessage::LeaveDocument(intent) => self.leave(conn, intent).await,
            ReceivedMessage::SectionEdit(intent) => self.edit(conn, intent).await,
            ReceivedMessage::SectionLock(intent) => self.lock(conn, intent).await,
            ReceivedMessage::SectionUnlock(intent) => self.unlock(conn, intent).await,
            ReceivedMessage::ChatMessage(intent) => self.chat(conn, intent),
        }
    }

    /// Drop the connection from its rooms. With auto-leave enabled, the presence session of
    /// every room the user no longer has a connection in is closed and the room told.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        let documents = self.rooms.unsubscribe_all(conn.id);
        if !self.config.auto_leave_on_disconnect {
            return;
        }

        for document_id in documents {
            if self.rooms.has_user(document_id, conn.user_id, Some(conn.id)) {
                continue;
            }
            match self.presence.leave(document_id, conn.user_id).await {
                Ok(()) => {
                    self.rooms.publish(document_id, &self.presence_event(conn.user_id, false), None);
                }
                Err(e) => {
                    error!(
                        "Failed to close session of user {} on document {} after disconnect: {}",
                        conn.user_id, document_id, e
                    );
                }
            }
        }
    }

    async fn join(&self, conn: &ConnectionHandle, intent: PresenceIntent) {
        let (Some(document_id), Some(user_id)) = (intent.document_id, intent.user_id) else {
            conn.send(SendMessage::error(MISSING_PRESENCE_IDS));
            return;
        };
        if !self.is_connection_user(conn, user_id) {
            return;
        }

        match self.permissions.access(document_id, user_id).await {
            Ok(access) if access.can_view() => {}
            Ok(_) => {
                conn.send(SendMessage::error("You do not have access to this document"));
                return;
            }
            Err(e) => {
                self.storage_error(conn, "join", e);
                return;
            }
        }

        let outcome = match self.presence.join(document_id, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.storage_error(conn, "join", e);
                return;
            }
        };

        self.rooms.subscribe(document_id, conn);
        self.rooms
            .publish(document_id, &self.presence_event(user_id, true), Some(conn.id));

        let users = outcome
            .active_users
            .into_iter()
            .map(|u| DocumentUser { user_id: u.user_id, full_name: u.full_name, joined_at: u.joined_at })
            .collect();
        conn.send(SendMessage::DocumentUsers(DocumentUsersEvent { users }));
        info!("User {} joined document {} on connection {}", user_id, document_id, conn.id);
    }

    async fn leave(&self, conn: &ConnectionHandle, intent: PresenceIntent) {
        let (Some(document_id), Some(user_id)) = (intent.document_id, intent.user_id) else {
            conn.send(SendMessage::error(MISSING_PRESENCE_IDS));
            return;
        };
        if !self.is_connection_user(conn, user_id) {
            return;
        }

        if let Err(e) = self.presence.leave(document_id, user_id).await {
            self.storage_error(conn, "leave", e);
            return;
        }

        self.rooms.unsubscribe(document_id, conn.id);
        self.rooms.publish(document_id, &self.presence_event(user_id, false), None);
        info!("User {} left document {}", user_id, document_id);
    }

    async fn edit(&self, conn: &ConnectionHandle, intent: SectionEditIntent) {
        let (Some(document_id), Some(section_id), Some(user_id)) =
            (intent.document_id, intent.section_id, intent.user_id)
        else {
            conn.send(SendMessage::error(MISSING_DATA));
            return;
        };
        if !self.is_connection_user(conn, user_id) || !self.can_edit_section(conn, document_id, section_id, user_id).await {
            return;
        }

        match self.leases.holds(section_id, user_id).await {
            Ok(true) => {}
            Ok(false) => {
                conn.send(SendMessage::error("You do not have a lock on this section"));
                return;
            }
            Err(e) => {
                error!("Failed to check lock of section {} for an edit: {}", section_id, e);
                conn.send(SendMessage::error("Error processing edit"));
                return;
            }
        }

        let event = SendMessage::SectionUpdate(SectionUpdateEvent {
            section_id,
            user_id,
            content: intent.content,
            cursor_position: intent.cursor_position,
            timestamp: self.clock.now(),
        });
        self.rooms.publish(document_id, &event, Some(conn.id));
    }

    async fn lock(&self, conn: &ConnectionHandle, intent: SectionLockIntent) {
        let (Some(document_id), Some(section_id), Some(user_id)) =
            (intent.document_id, intent.section_id, intent.user_id)
        else {
            conn.send(SendMessage::error(MISSING_DATA));
            return;
        };
        if !self.is_connection_user(conn, user_id) {
            return;
        }
        let Some(minutes) = self.config.lease_minutes(intent.duration_minutes) else {
            conn.send(SendMessage::error("duration_minutes must be positive"));
            return;
        };
        if !self.can_edit_section(conn, document_id, section_id, user_id).await {
            return;
        }

        match self
            .leases
            .acquire(document_id, section_id, user_id, Some(Duration::minutes(minutes)))
            .await
        {
            Ok(lease) => {
                let event = SendMessage::SectionLocked(SectionLockedEvent {
                    section_id,
                    user_id,
                    expires_at: lease.expires_at,
                });
                self.rooms.publish(document_id, &event, None);
                // A client locking from outside the room still gets its confirmation
                if !self.rooms.is_member(document_id, conn.id) {
                    conn.send(event);
                }
            }
            Err(LeaseError::Conflict { held_by, expires_at }) => {
                conn.send(SendMessage::LockDenied(LockDeniedEvent { section_id, locked_by: held_by, expires_at }));
            }
            Err(LeaseError::Storage(e)) => self.storage_error(conn, "lock", e),
        }
    }

    async fn unlock(&self, conn: &ConnectionHandle, intent: SectionUnlockIntent) {
        let (Some(document_id), Some(section_id), Some(user_id)) =
            (intent.document_id, intent.section_id, intent.user_id)
        else {
            conn.send(SendMessage::error(MISSING_DATA));
            return;
        };
        if !self.is_connection_user(conn, user_id) || !self.can_edit_section(conn, document_id, section_id, user_id).await {
            return;
        }

        match self.leases.release(section_id, user_id).await {
            Ok(true) => {
                let event = SendMessage::SectionUnlocked(SectionUnlockedEvent { section_id, user_id });
                self.rooms.publish(document_id, &event, None);
            }
            Ok(false) => debug!("User {} held no lock on section {}", user_id, section_id),
            Err(e) => self.storage_error(conn, "unlock", e),
        }
    }

    fn chat(&self, conn: &ConnectionHandle, intent: ChatIntent) {
        let (Some(document_id), Some(user_id), Some(message)) = (intent.document_id, intent.user_id, intent.message)
        else {
            conn.send(SendMessage::error(MISSING_DATA));
            return;
        };
        if message.is_empty() {
            conn.send(SendMessage::error(MISSING_DATA));
            return;
        }
        if !self.is_connection_user(conn, user_id) {
            return;
        }

        let event = SendMessage::NewMessage(ChatEvent { user_id, message, timestamp: self.clock.now() });
        self.rooms.publish(document_id, &event, None);
    }

    fn is_connection_user(&self, conn: &ConnectionHandle, user_id: i64) -> bool {
        if conn.user_id != user_id {
            warn!("Connection {} of user {} sent an intent as user {}", conn.id, conn.user_id, user_id);
            conn.send(SendMessage::error("user_id does not match the authenticated user"));
            return false;
        }
        true
    }

    /// Edit access on the document plus membership of the section in that document
    async fn can_edit_section(&self, conn: &ConnectionHandle, document_id: i64, section_id: i64, user_id: i64) -> bool {
        match self.permissions.access(document_id, user_id).await {
            Ok(access) if access.can_edit() => {}
            Ok(_) => {
                conn.send(SendMessage::error("You do not have permission to edit this document"));
                return false;
            }
            Err(e) => {
                self.storage_error(conn, "permission check", e);
                return false;
            }
        }

        match self.store.get_section(section_id).await {
            Ok(Some(section)) if section.document_id == document_id => true,
            Ok(_) => {
                conn.send(SendMessage::error("Section not found in this document"));
                false
            }
            Err(e) => {
                self.storage_error(conn, "section lookup", e);
                false
            }
        }
    }

    fn storage_error(&self, conn: &ConnectionHandle, operation: &str, e: StoreError) {
        error!("Storage error during {} for connection {}: {}", operation, conn.id, e);
        let message = match e {
            StoreError::NotFound(what) => format!("{} not found", what),
            _ => "Database error".to_string(),
        };
        conn.send(SendMessage::error(message));
    }

    fn presence_event(&self, user_id: i64, joined: bool) -> SendMessage {
        let event = PresenceEvent { user_id, timestamp: self.clock.now() };
        if joined {
            SendMessage::UserJoined(event)
        } else {
            SendMessage::UserLeft(event)
        }
    }
}
