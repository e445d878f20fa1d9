//! Credentials and the stores that hold the current ones.

use parking_lot::RwLock;

/// A user or app access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token_string: String,
    pub app_id: String,
    pub user_id: String,
}

impl AccessToken {
    pub fn new(token_string: impl Into<String>, app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token_string: token_string.into(),
            app_id: app_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// An identity token. Only `graph_domain` matters to the request engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationToken {
    pub token_string: String,
    pub nonce: String,
    /// `"gaming"` for tokens issued by the gaming domain.
    pub graph_domain: Option<String>,
}

impl AuthenticationToken {
    pub fn is_gaming(&self) -> bool {
        self.graph_domain.as_deref() == Some("gaming")
    }
}

/// Holder of the process's current access token.
pub trait TokenStore: Send + Sync {
    fn current(&self) -> Option<AccessToken>;
    fn set_current(&self, token: Option<AccessToken>);

    fn clear(&self) {
        self.set_current(None);
    }

    fn current_token_string(&self) -> Option<String> {
        self.current().map(|token| token.token_string)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    current: RwLock<Option<AccessToken>>,
}

impl InMemoryTokenStore {
    pub fn with_token(token: AccessToken) -> Self {
        Self {
            current: RwLock::new(Some(token)),
        }
    }
}

impl TokenStore for InMemoryTokenStore {
    fn current(&self) -> Option<AccessToken> {
        self.current.read().clone()
    }

    fn set_current(&self, token: Option<AccessToken>) {
        *self.current.write() = token;
    }
}

pub trait AuthenticationTokenProvider: Send + Sync {
    fn current_authentication_token(&self) -> Option<AuthenticationToken>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuthenticationTokenStore {
    current: RwLock<Option<AuthenticationToken>>,
}

impl InMemoryAuthenticationTokenStore {
    pub fn set_current(&self, token: Option<AuthenticationToken>) {
        *self.current.write() = token;
    }
}

impl AuthenticationTokenProvider for InMemoryAuthenticationTokenStore {
    fn current_authentication_token(&self) -> Option<AuthenticationToken> {
        self.current.read().clone()
    }
}
