//! Password acquisition and the per-run credential cache.
//!
//! Passwords are asked for lazily, once per server, and only when a target
//! assigned to that server actually needs to log in. Prompts are serialized
//! so two workers never interleave on the console.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{CoreError, CoreResult, Credentials, Server};

/// Source of passwords. Implementations may block (e.g. a console prompt).
pub trait PasswordProvider: Send + Sync {
    fn password(&self, user: &str, address: &str) -> CoreResult<String>;
}

/// Prompts on the controlling terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl PasswordProvider for ConsolePrompt {
    fn password(&self, user: &str, address: &str) -> CoreResult<String> {
        rpassword::prompt_password(format!("Password for {user}@{address}: ")).map_err(|e| {
            CoreError::Password {
                user: user.to_string(),
                address: address.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// In-memory password cache keyed by [`Server::key`].
pub struct CredentialCache {
    passwords: Mutex<HashMap<String, String>>,
    provider: Arc<dyn PasswordProvider>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache").finish_non_exhaustive()
    }
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn PasswordProvider>) -> Self {
        Self {
            passwords: Mutex::new(HashMap::new()),
            provider,
        }
    }

    /// Credentials for `server`, prompting if no password is cached yet.
    ///
    /// The cache lock is held across the prompt, so concurrent callers for
    /// the same server wait and then reuse the answer.
    pub async fn credentials_for(&self, server: &Server) -> CoreResult<Credentials> {
        let key = server.key();
        let mut passwords = self.passwords.lock().await;
        if let Some(password) = passwords.get(&key) {
            debug!(server = %key, "using cached password");
            return Ok(server.credentials().with_password(password.clone()));
        }

        let provider = Arc::clone(&self.provider);
        let user = server.user.clone();
        let address = server.address.clone();
        let password = tokio::task::spawn_blocking(move || provider.password(&user, &address))
            .await
            .map_err(|e| CoreError::Password {
                user: server.user.clone(),
                address: server.address.clone(),
                reason: e.to_string(),
            })??;

        info!(server = %key, "password acquired");
        passwords.insert(key, password.clone());
        Ok(server.credentials().with_password(password))
    }

    /// Drop the cached password, e.g. after the server rejected it.
    pub async fn invalidate(&self, server: &Server) {
        if self.passwords.lock().await.remove(&server.key()).is_some() {
            debug!(server = %server.key(), "cached password cleared");
        }
    }

    pub async fn is_cached(&self, server: &Server) -> bool {
        self.passwords.lock().await.contains_key(&server.key())
    }
}
