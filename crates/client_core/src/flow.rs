//! Sign-in wizard: `bind -> submit -> wait for verification -> complete`.
//!
//! [`reduce`] is the whole state machine; [`SignInFlow`] runs the auth calls
//! and turns their outcomes into actions.

use std::sync::Arc;

use shared::domain::{BindType, EntityId, StoreSummary};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthError, AuthOperations},
    transport::Delivery,
};

pub const DEFAULT_DESTINATION: &str = "/";
const SIGN_IN_FAILED_MESSAGE: &str = "Sign in failed";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignInStep {
    #[default]
    Bind,
    Submit,
    WaitForVerification,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignInState {
    pub step: SignInStep,
    pub email: String,
    pub bind_type: BindType,
    pub stores: Vec<StoreSummary>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignInAction {
    /// Member or store bind succeeded.
    Bound { email: String, bind_type: BindType },
    /// Seller bind succeeded; a store must be picked next.
    StoresLoaded {
        email: String,
        stores: Vec<StoreSummary>,
    },
    BindFailed { message: String, bind_type: BindType },
    CancelBind,
    SubmitEmail(String),
    VerificationReceived,
    SignInFailed(String),
    Cancel,
}

pub fn reduce(state: &SignInState, action: SignInAction) -> SignInState {
    use SignInStep::*;

    match (state.step, action) {
        (Bind, SignInAction::Bound { email, bind_type }) => SignInState {
            step: Submit,
            email,
            bind_type,
            stores: Vec::new(),
            message: String::new(),
        },
        (Bind, SignInAction::StoresLoaded { email, stores }) => SignInState {
            step: Bind,
            email,
            bind_type: BindType::Seller,
            stores,
            message: String::new(),
        },
        (_, SignInAction::BindFailed { message, bind_type }) => SignInState {
            step: Bind,
            email: state.email.clone(),
            bind_type,
            stores: Vec::new(),
            message,
        },
        (_, SignInAction::CancelBind) => SignInState {
            step: Bind,
            email: state.email.clone(),
            bind_type: state.bind_type,
            stores: Vec::new(),
            message: String::new(),
        },
        (Submit, SignInAction::SubmitEmail(email)) => SignInState {
            step: WaitForVerification,
            email,
            message: String::new(),
            ..state.clone()
        },
        (WaitForVerification, SignInAction::VerificationReceived) => SignInState {
            step: Complete,
            ..state.clone()
        },
        (WaitForVerification, SignInAction::SignInFailed(message)) => SignInState {
            message,
            ..state.clone()
        },
        (WaitForVerification | Complete, SignInAction::Cancel) => SignInState {
            step: Submit,
            message: String::new(),
            ..state.clone()
        },
        _ => state.clone(),
    }
}

/// Inline text for a failed bind or sign-in.
pub fn failure_message(err: &AuthError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        SIGN_IN_FAILED_MESSAGE.to_string()
    } else {
        message
    }
}

pub struct SignInFlow {
    auth: Arc<dyn AuthOperations>,
    state: watch::Sender<SignInState>,
    verification: Mutex<Option<JoinHandle<()>>>,
    destination: String,
}

impl SignInFlow {
    /// `destination` is where a completed sign-in redirects; defaults to `/`.
    pub fn new(auth: Arc<dyn AuthOperations>, destination: Option<String>) -> Arc<Self> {
        let (state, _) = watch::channel(SignInState::default());
        Arc::new(Self {
            auth,
            state,
            verification: Mutex::new(None),
            destination: destination
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_DESTINATION.to_string()),
        })
    }

    pub fn state(&self) -> SignInState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SignInState> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: SignInAction) {
        debug!(?action, "flow: dispatch");
        self.state.send_modify(|state| *state = reduce(state, action));
    }

    /// Redirect target once the flow is complete.
    pub fn redirect_url(&self) -> Option<&str> {
        (self.state.borrow().step == SignInStep::Complete).then_some(self.destination.as_str())
    }

    pub async fn bind_member(self: &Arc<Self>, email: &str, password: &str) {
        match self.auth.bind_member(email, password).await {
            Ok(Delivery::Completed(())) => {
                self.dispatch(SignInAction::Bound {
                    email: email.to_string(),
                    bind_type: BindType::Member,
                });
                self.submit_email(email).await;
            }
            Ok(Delivery::Superseded) => debug!("flow: member bind superseded"),
            Err(err) => self.dispatch(SignInAction::BindFailed {
                message: failure_message(&err),
                bind_type: BindType::Member,
            }),
        }
    }

    pub async fn bind_seller(&self, email: &str, password: &str) {
        match self.auth.bind_seller(email, password).await {
            Ok(Delivery::Completed(stores)) => self.dispatch(SignInAction::StoresLoaded {
                email: email.to_string(),
                stores,
            }),
            Ok(Delivery::Superseded) => debug!("flow: seller bind superseded"),
            Err(err) => self.dispatch(SignInAction::BindFailed {
                message: failure_message(&err),
                bind_type: BindType::Seller,
            }),
        }
    }

    pub async fn bind_store(self: &Arc<Self>, email: &str, store_id: EntityId) {
        match self.auth.bind_store(store_id).await {
            Ok(Delivery::Completed(())) => {
                self.dispatch(SignInAction::Bound {
                    email: email.to_string(),
                    bind_type: BindType::Seller,
                });
                self.submit_email(email).await;
            }
            Ok(Delivery::Superseded) => debug!("flow: store bind superseded"),
            Err(err) => self.dispatch(SignInAction::BindFailed {
                message: failure_message(&err),
                bind_type: BindType::Seller,
            }),
        }
    }

    pub fn cancel_bind(&self) {
        self.auth.cancel_bind();
        self.dispatch(SignInAction::CancelBind);
    }

    /// Moves to the verification step and waits for the emailed link in the
    /// background. Only valid from the submit step.
    pub async fn submit_email(self: &Arc<Self>, email: &str) {
        if self.state.borrow().step != SignInStep::Submit {
            debug!("flow: submit ignored outside the submit step");
            return;
        }
        self.dispatch(SignInAction::SubmitEmail(email.to_string()));

        let auth = Arc::clone(&self.auth);
        let flow = Arc::downgrade(self);
        let email = email.to_string();
        let task = tokio::spawn(async move {
            let outcome = auth.sign_in(&email).await;
            let Some(flow) = flow.upgrade() else {
                return;
            };
            match outcome {
                Ok(()) => {
                    info!("flow: verification received");
                    flow.dispatch(SignInAction::VerificationReceived);
                }
                Err(err) => {
                    warn!("flow: sign-in failed: {err}");
                    flow.dispatch(SignInAction::SignInFailed(failure_message(&err)));
                }
            }
        });

        if let Some(previous) = self.verification.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Stops waiting for verification and returns to the submit step.
    pub async fn cancel(&self) {
        if let Some(task) = self.verification.lock().await.take() {
            task.abort();
        }
        self.dispatch(SignInAction::Cancel);
    }
}

impl Drop for SignInFlow {
    fn drop(&mut self) {
        if let Some(task) = self.verification.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
