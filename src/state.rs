use crate::callback::CallbackClient;
use crate::reconciler::Reconciler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub(crate) reconciler: Arc<Reconciler>,
    /// Set when registry callbacks are enabled
    pub(crate) callback_client: Option<CallbackClient>,
}
