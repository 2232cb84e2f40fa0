use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod claims;
pub mod config;
pub mod flow;
pub mod realtime;
pub mod session;
pub mod transport;

pub use auth::{AuthContext, AuthError, AuthOperations, AuthSnapshot};
pub use config::{BuildProfile, ClientSettings};
pub use flow::{SignInFlow, SignInState, SignInStep};
pub use transport::{Delivery, TransportError};

use api::Api;
use realtime::{MissingRealtimeAuth, RealtimeAuth, ReticulumAuth};
use session::SessionStore;
use transport::RequestTransport;

/// Wires settings, session store, transport, API bindings and the auth
/// context together. Without a socket url every realtime call is rejected.
pub struct SignInClient {
    settings: ClientSettings,
    api: Api,
    auth: Arc<AuthContext>,
}

impl SignInClient {
    pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
        let realtime: Arc<dyn RealtimeAuth> = match &settings.socket_url {
            Some(socket_url) => Arc::new(ReticulumAuth::new(
                socket_url.clone(),
                settings.auth_origin.clone(),
            )),
            None => Arc::new(MissingRealtimeAuth),
        };
        Self::new_with_dependencies(settings, Arc::new(SessionStore::default()), realtime)
    }

    pub fn new_with_dependencies(
        settings: ClientSettings,
        session: Arc<SessionStore>,
        realtime: Arc<dyn RealtimeAuth>,
    ) -> Result<Self, TransportError> {
        let transport = Arc::new(RequestTransport::new(&settings, session)?);
        let api = Api::new(transport);
        let auth = AuthContext::new(api.clone(), realtime);
        Ok(Self {
            settings,
            api,
            auth,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        self.auth.session()
    }

    pub fn auth(&self) -> &Arc<AuthContext> {
        &self.auth
    }

    /// Fresh wizard state; nothing carries over from a previous flow.
    pub fn sign_in_flow(&self, destination: Option<String>) -> Arc<SignInFlow> {
        let auth: Arc<dyn AuthOperations> = self.auth.clone();
        SignInFlow::new(auth, destination)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
