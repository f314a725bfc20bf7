//! Application state shared across handlers.

use std::sync::Arc;

use crate::nodes::NodeSelector;
use crate::reconcile::Reconciler;
use crate::service::ServiceProvisioner;
use crate::volume::EditorVolume;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Session service lifecycle.
    pub provisioner: Arc<ServiceProvisioner>,
    /// Storage node listing and placement.
    pub selector: Arc<NodeSelector>,
    /// Orphan volume detection and removal.
    pub reconciler: Arc<Reconciler>,
    /// Shared editor volume fan-out.
    pub editor: Arc<EditorVolume>,
    /// Bearer token required on every route but `/health`. `None` disables auth.
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(
        provisioner: ServiceProvisioner,
        selector: Arc<NodeSelector>,
        reconciler: Reconciler,
        editor: EditorVolume,
        api_token: Option<String>,
    ) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            selector,
            reconciler: Arc::new(reconciler),
            editor: Arc::new(editor),
            api_token: api_token.filter(|t| !t.is_empty()),
        }
    }
}
