//! Shared Application State

use convai_realtime::SignedUrlIssuer;
use std::sync::Arc;

/// Created once at startup and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Issues signed URLs with the server-side credential.
    pub issuer: Arc<dyn SignedUrlIssuer>,
}
