//! Shared API state

use std::sync::Arc;

use calmesh_queue::Queue;
use calmesh_reconcile::ReconcileWorker;
use calmesh_registry::ActorRouter;
use calmesh_types::SyncMessage;

pub struct AppState {
    pub router: Arc<ActorRouter>,
    pub sync_queue: Queue<SyncMessage>,
    pub reconcile: Arc<ReconcileWorker>,
}
