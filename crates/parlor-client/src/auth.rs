use tracing::{info, warn};

use parlor_types::api::{GraphQlRequest, LoginData};
use parlor_types::models::User;

use crate::credential::Credential;
use crate::error::{CredentialError, SyncError};
use crate::transport::{RequestOperation, TransportRouter};

/// The login/logout flow: the only writer of the credential store.
#[derive(Clone)]
pub struct Authenticator {
    router: TransportRouter,
}

impl Authenticator {
    pub fn new(router: TransportRouter) -> Self {
        Self { router }
    }

    pub fn is_logged_in(&self) -> bool {
        self.router.credentials().get().is_some()
    }

    /// Exchange email and password for a token and store it. The store is
    /// untouched unless the server returns both a token and a user.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, SyncError> {
        let op = RequestOperation::mutation(GraphQlRequest::login(email, password)).public();
        let data: LoginData = self.router.request_typed(op).await?;

        let (Some(token), Some(user)) = (data.auth_login.access_token, data.auth_login.user) else {
            return Err(SyncError::Unauthorized {
                reason: "login rejected".into(),
            });
        };

        // The in-process credential is set even when persisting fails.
        if let Err(e) = self.router.credentials().set(Credential::new(token)) {
            warn!("{}", e);
        }

        info!("Logged in as {} ({})", user.name, user.id);
        Ok(user)
    }

    /// Drop the credential. Streams that are already open keep the
    /// authorization they connected with until they reconnect.
    pub fn logout(&self) -> Result<(), CredentialError> {
        self.router.credentials().clear()?;
        info!("Logged out");
        Ok(())
    }
}
