use chrono::Duration;
use std::sync::Arc;

use crate::config::Config;
use crate::db::store::CollabStore;
use crate::services::lease_service::LeaseManager;
use crate::services::revision_service::RevisionRecorder;
use crate::services::section_service::SectionService;
use crate::utils::clock::Clock;
use crate::ws::coordinator::Coordinator;
use crate::ws::permissions::PermissionCache;
use crate::ws::room::{LocalRooms, RoomBroadcaster};

/// Everything the HTTP and WebSocket handlers share, created once at start-up
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CollabStore>,
    pub leases: Arc<LeaseManager>,
    pub sections: SectionService,
    pub revisions: RevisionRecorder,
    pub permissions: PermissionCache,
    pub rooms: Arc<dyn RoomBroadcaster>,
    pub coordinator: Coordinator,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn CollabStore>, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);
        let leases = Arc::new(LeaseManager::new(
            store.clone(),
            clock.clone(),
            Duration::minutes(config.lock_duration_minutes),
        ));
        let rooms: Arc<dyn RoomBroadcaster> = Arc::new(LocalRooms::new());
        let permissions = PermissionCache::new(
            store.clone(),
            std::time::Duration::from_secs(config.permission_cache_ttl_secs),
        );
        let coordinator = Coordinator::new(
            store.clone(),
            leases.clone(),
            rooms.clone(),
            permissions.clone(),
            clock.clone(),
            config.clone(),
        );

        Self {
            sections: SectionService::new(store.clone(), leases.clone(), clock),
            revisions: RevisionRecorder::new(store.clone()),
            config,
            store,
            leases,
            permissions,
            rooms,
            coordinator,
        }
    }
}
