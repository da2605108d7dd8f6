//! Session state model

use gateway::AuthSession;

use super::user::CurrentUser;

/// What the provider currently knows about the signed-in user
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session: Option<AuthSession>,
    pub user: Option<CurrentUser>,
    /// True until the first session lookup has finished
    pub loading: bool,
}

impl SessionState {
    /// State before any lookup
    pub fn initial() -> Self {
        Self {
            session: None,
            user: None,
            loading: true,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}
