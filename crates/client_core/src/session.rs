//! Signed-in user tracking and the route guard built on it.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::CurrentUser,
    protocol::{LoginRequest, LOGIN_PATH, LOGOUT_PATH, ME_PATH},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, RwLock},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::transport::{AuthSignal, AuthSignals, Transport, TransportError};

pub const DEFAULT_LOGIN_ROUTE: &str = "Login";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected session payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    user: Arc<RwLock<Option<CurrentUser>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user(&self) -> Option<CurrentUser> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.user.read().await.is_some()
    }

    pub async fn set_user(&self, user: CurrentUser) {
        *self.user.write().await = Some(user);
    }

    pub async fn clear_user(&self) {
        *self.user.write().await = None;
    }

    /// Forgets the user whenever the transport reports an unauthenticated response.
    pub fn follow(&self, signals: &AuthSignals) -> JoinHandle<()> {
        let mut rx = signals.subscribe();
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AuthSignal::Unauthenticated { url }) => {
                        info!(url = %url, "session: cleared after unauthenticated response");
                        store.clear_user().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: auth signals lagged; clearing user");
                        store.clear_user().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: SessionStore,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>, store: SessionStore) -> Self {
        Self { transport, store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The service answers login with a session cookie only, so the user is
    /// fetched right after.
    pub async fn login(
        &self,
        employee_id: &str,
        password: &str,
    ) -> Result<CurrentUser, SessionError> {
        let request = LoginRequest {
            employee_id: employee_id.to_string(),
            password: password.to_string(),
        };
        self.transport
            .post_json(LOGIN_PATH, &serde_json::to_value(&request)?)
            .await?;
        info!(employee_id, "session: logged in");
        self.me().await
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.store.clear_user().await;
        self.transport.post_json(LOGOUT_PATH, &json!({})).await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<CurrentUser, SessionError> {
        let body = self.transport.get_json(ME_PATH).await?;
        let user: CurrentUser = serde_json::from_value(body)?;
        self.store.set_user(user.clone()).await;
        Ok(user)
    }
}

/// Per-route access requirements, as declared in the menu description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub redirect_if_fail: Option<String>,
}

impl RouteMeta {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn protected() -> Self {
        Self {
            requires_auth: true,
            redirect_if_fail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

pub struct RouteGuard {
    session: SessionClient,
}

impl RouteGuard {
    pub fn new(session: SessionClient) -> Self {
        Self { session }
    }

    pub async fn authorize(&self, route: &RouteMeta) -> Navigation {
        if !route.requires_auth || self.session.store().is_authenticated().await {
            return Navigation::Proceed;
        }

        match self.session.me().await {
            Ok(_) => Navigation::Proceed,
            Err(err) => {
                warn!(error = %err, "session: route guard probe failed");
                self.session.store().clear_user().await;
                Navigation::Redirect(
                    route
                        .redirect_if_fail
                        .clone()
                        .unwrap_or_else(|| DEFAULT_LOGIN_ROUTE.to_string()),
                )
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
