//! Auth context: binds member/seller accounts through the REST API, signs in
//! through the realtime channel and publishes a derived [`AuthSnapshot`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use shared::{
    domain::{EntityId, StoreSummary},
    error::ApiError,
    protocol::{
        ApiResponse, LoginRequest, MemberProfile, SellerProfile, StoreDetails, StoreLookupRequest,
    },
};
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    api::Api,
    claims::{decode_unverified, PermsClaims},
    realtime::{RealtimeAuth, RealtimeError, VerifyParams},
    session::{Credentials, SessionState, SessionStore, SessionUpdate, UserInfo, UserInfoPatch},
    transport::{Delivery, TransportError},
};

pub const NO_STORE_MESSAGE: &str = "No Store";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Rejected(#[from] ApiError),
    #[error("No Store")]
    NoStore,
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("sign-in channel failed: {0}")]
    Realtime(#[from] RealtimeError),
    #[error("unreadable token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub is_signed_in: bool,
    pub is_admin: bool,
    pub email: Option<String>,
    pub user_id: Option<String>,
    pub user_info: UserInfo,
}

/// Operations the sign-in flow drives. Bind calls resolve with
/// [`Delivery::Superseded`] when a newer identical call replaced them.
#[async_trait]
pub trait AuthOperations: Send + Sync {
    async fn sign_in(&self, email: &str) -> Result<(), AuthError>;
    async fn verify(&self, params: &VerifyParams) -> Result<(), AuthError>;
    fn sign_out(&self);
    async fn bind_member(&self, email: &str, password: &str) -> Result<Delivery<()>, AuthError>;
    async fn bind_seller(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Delivery<Vec<StoreSummary>>, AuthError>;
    async fn bind_store(&self, store_id: EntityId) -> Result<Delivery<()>, AuthError>;
    fn cancel_bind(&self);
}

pub struct AuthContext {
    api: Api,
    session: Arc<SessionStore>,
    realtime: Arc<dyn RealtimeAuth>,
    admin: AtomicBool,
    snapshot: watch::Sender<AuthSnapshot>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AuthContext {
    pub fn new(api: Api, realtime: Arc<dyn RealtimeAuth>) -> Arc<Self> {
        Self::new_with_cached_admin(api, realtime, false)
    }

    /// `cached_admin` is reported until the first permission check resolves.
    pub fn new_with_cached_admin(
        api: Api,
        realtime: Arc<dyn RealtimeAuth>,
        cached_admin: bool,
    ) -> Arc<Self> {
        let session = Arc::clone(api.transport().session());
        let (snapshot, _) = watch::channel(AuthSnapshot::default());
        let context = Arc::new(Self {
            api,
            session,
            realtime,
            admin: AtomicBool::new(cached_admin),
            snapshot,
            watcher: Mutex::new(None),
        });
        context.publish();
        context
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn is_admin(&self) -> bool {
        self.admin.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        let state = self.session.snapshot();
        AuthSnapshot {
            is_signed_in: state.is_signed_in(),
            is_admin: self.is_admin(),
            email: state.credentials.email,
            user_id: self.session.credentials_account_id(),
            user_info: state.userinfo,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }

    /// Starts following the session: every change is re-published and a new
    /// credentials token triggers a permission check. Runs one check right away.
    pub async fn mount(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return;
        }

        let context = Arc::downgrade(self);
        let changes = self.session.subscribe();
        *watcher = Some(tokio::spawn(watch_session(context, changes)));
    }

    pub async fn unmount(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
    }

    /// Re-derives the admin flag from the current credentials. Failures count
    /// as not admin.
    pub async fn refresh_admin(&self) -> bool {
        let Some(token) = self.credentials_token() else {
            self.admin.store(false, Ordering::Relaxed);
            self.publish();
            return false;
        };

        let is_admin = match self.check_admin(&token).await {
            Ok(is_admin) => is_admin,
            Err(err) => {
                warn!("auth: admin check failed: {err}");
                false
            }
        };

        if self.credentials_token().as_deref() == Some(token.as_str()) {
            self.admin.store(is_admin, Ordering::Relaxed);
            self.publish();
        } else {
            debug!("auth: credentials changed during admin check, result dropped");
        }
        is_admin
    }

    async fn check_admin(&self, credentials_token: &str) -> Result<bool, AuthError> {
        let perms_token = self.realtime.refresh_perms_token(credentials_token).await?;
        let claims = decode_unverified::<PermsClaims>(&perms_token)?;
        Ok(claims.is_admin())
    }

    fn credentials_token(&self) -> Option<String> {
        self.session
            .snapshot()
            .credentials
            .token
            .filter(|token| !token.is_empty())
    }

    /// Unwraps a bind response; a `success == false` envelope clears the bound
    /// profile and rejects with the server's message.
    fn accept(&self, response: ApiResponse) -> Result<ApiResponse, AuthError> {
        if response.success {
            Ok(response)
        } else {
            self.session.clear_user_info();
            self.publish();
            Err(ApiError::rejected(&response).into())
        }
    }

    fn merge(&self, patch: UserInfoPatch) {
        self.session.update(SessionUpdate::MergeUserInfo(patch));
        self.publish();
    }
}

async fn watch_session(context: Weak<AuthContext>, mut changes: watch::Receiver<SessionState>) {
    let Some(mounted) = context.upgrade() else {
        return;
    };
    let mut last_token = mounted.credentials_token();
    mounted.refresh_admin().await;
    drop(mounted);

    while changes.changed().await.is_ok() {
        let Some(mounted) = context.upgrade() else {
            break;
        };
        let token = changes
            .borrow_and_update()
            .credentials
            .token
            .clone()
            .filter(|token| !token.is_empty());
        mounted.publish();

        if token != last_token {
            last_token = token;
            mounted.refresh_admin().await;
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

#[async_trait]
impl AuthOperations for AuthContext {
    async fn sign_in(&self, email: &str) -> Result<(), AuthError> {
        let pending = self.realtime.start_authentication(email).await?;
        let token = pending.complete().await?;

        self.session.update(SessionUpdate::SetCredentials(Credentials {
            token: Some(token),
            email: Some(email.to_string()),
        }));
        self.publish();
        info!("auth: signed in");

        self.refresh_admin().await;
        Ok(())
    }

    async fn verify(&self, params: &VerifyParams) -> Result<(), AuthError> {
        self.realtime.verify_authentication(params).await?;
        Ok(())
    }

    fn sign_out(&self) {
        self.admin.store(false, Ordering::Relaxed);
        self.session.update(SessionUpdate::ClearCredentials);
        self.session.clear_user_info();
        self.session.reset_to_random_default_avatar();
        self.publish();
        info!("auth: signed out");
    }

    async fn bind_member(&self, email: &str, password: &str) -> Result<Delivery<()>, AuthError> {
        let Delivery::Completed(response) = self
            .api
            .login_member(&LoginRequest::new(email, password))
            .await?
        else {
            return Ok(Delivery::Superseded);
        };

        let profile = self.accept(response)?.data_as::<MemberProfile>()?;
        info!(member_id = %profile.id, "auth: member bound");
        self.merge(UserInfoPatch::member(profile));
        Ok(Delivery::Completed(()))
    }

    async fn bind_seller(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Delivery<Vec<StoreSummary>>, AuthError> {
        let Delivery::Completed(response) = self
            .api
            .login_seller(&LoginRequest::new(email, password))
            .await?
        else {
            return Ok(Delivery::Superseded);
        };

        let profile = self.accept(response)?.data_as::<SellerProfile>()?;
        self.merge(UserInfoPatch::seller(&profile));

        if profile.stores.is_empty() {
            warn!(seller_id = %profile.id, "auth: seller has no store");
            return Err(AuthError::NoStore);
        }
        info!(seller_id = %profile.id, stores = profile.stores.len(), "auth: seller bound");
        Ok(Delivery::Completed(profile.stores))
    }

    async fn bind_store(&self, store_id: EntityId) -> Result<Delivery<()>, AuthError> {
        let Delivery::Completed(response) = self
            .api
            .find_store(&StoreLookupRequest {
                param: store_id.clone(),
            })
            .await?
        else {
            return Ok(Delivery::Superseded);
        };

        let details = self.accept(response)?.data_as::<StoreDetails>()?;
        self.merge(UserInfoPatch::store(store_id.clone(), details.seller));
        info!(store_id = %store_id, "auth: store bound");
        Ok(Delivery::Completed(()))
    }

    fn cancel_bind(&self) {
        self.session.clear_user_info();
        self.publish();
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
