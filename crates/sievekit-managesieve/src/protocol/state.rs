//! Session state types.
//!
//! A ManageSieve session moves through a small, monotonic state machine
//! (RFC 5804 section 1): after the greeting the connection is
//! unauthenticated, `AUTHENTICATE` promotes it, `LOGOUT` ends it. Fatal
//! transport errors poison the session until it is reconnected.

/// Protocol state of a [`Client`](crate::Client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection established yet (or after a `BYE`).
    ///
    /// Only `connect` is valid here.
    #[default]
    Disconnected,

    /// Greeting received, capabilities known, not authenticated.
    ///
    /// Valid commands: CAPABILITY, STARTTLS, AUTHENTICATE, NOOP, LOGOUT.
    Greeted,

    /// Authentication completed.
    ///
    /// All script-management commands are valid. `UNAUTHENTICATE` (when
    /// advertised) drops back to [`Greeted`](Self::Greeted).
    Authenticated,

    /// `LOGOUT` completed; the connection is closed.
    LoggedOut,

    /// A transport, protocol or timeout error poisoned the session.
    ///
    /// No further commands succeed until a new connection is made.
    Failed,
}

impl SessionState {
    /// Returns true if a connection is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Greeted | Self::Authenticated)
    }

    /// Returns true once `AUTHENTICATE` has succeeded.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Returns true if the session is unusable.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }

    #[test]
    fn test_predicates() {
        assert!(!SessionState::Disconnected.is_connected());
        assert!(SessionState::Greeted.is_connected());
        assert!(SessionState::Authenticated.is_connected());
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(!SessionState::Greeted.is_authenticated());
        assert!(SessionState::LoggedOut.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Greeted.is_terminal());
    }
}
