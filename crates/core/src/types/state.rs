//! Session protocol state machine.
//!
//! Only the state *name* is persisted on a session. The transition table is
//! static, so a stored session is rebuilt into a machine just by reading its
//! [`SessionState`] back.
//!
//! | Event | From | To |
//! |---|---|---|
//! | `StartRegistration` | `Null` | `Registration` |
//! | `FinishRegistration` | `Registration` | `Null` |
//! | `StartLogin` | `Null` | `Login` |
//! | `LoginSuccess` | `Login` | `Authenticated` |
//! | `LoginFail` | `Login` | `Null` |
//! | `Logout` | `Authenticated` | `Null` |
//! | `AddRegistration` | `Authenticated` | `AuthRegistration` |
//! | `FinishAuthRegistration` | `AuthRegistration` | `Authenticated` |

use core::fmt;

use serde::{Deserialize, Serialize};

/// Where a session currently sits in the passkey protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No ceremony in flight, not authenticated.
    #[default]
    Null,
    /// Credential-creation ceremony in flight.
    Registration,
    /// Assertion ceremony in flight.
    Login,
    /// Bound to a verified user.
    Authenticated,
    /// Authenticated and adding another credential.
    AuthRegistration,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEvent {
    StartRegistration,
    FinishRegistration,
    StartLogin,
    LoginSuccess,
    LoginFail,
    Logout,
    AddRegistration,
    FinishAuthRegistration,
}

/// An event was fired from a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event {event} is not allowed in state {from}")]
pub struct TransitionError {
    /// The rejected event.
    pub event: SessionEvent,
    /// The state the session was in.
    pub from: SessionState,
}

impl SessionEvent {
    /// Every event, in table order.
    pub const ALL: [Self; 8] = [
        Self::StartRegistration,
        Self::FinishRegistration,
        Self::StartLogin,
        Self::LoginSuccess,
        Self::LoginFail,
        Self::Logout,
        Self::AddRegistration,
        Self::FinishAuthRegistration,
    ];

    /// The only state this event may be fired from.
    #[must_use]
    pub const fn source(self) -> SessionState {
        match self {
            Self::StartRegistration | Self::StartLogin => SessionState::Null,
            Self::FinishRegistration => SessionState::Registration,
            Self::LoginSuccess | Self::LoginFail => SessionState::Login,
            Self::Logout | Self::AddRegistration => SessionState::Authenticated,
            Self::FinishAuthRegistration => SessionState::AuthRegistration,
        }
    }

    /// The state this event moves the session into.
    #[must_use]
    pub const fn target(self) -> SessionState {
        match self {
            Self::FinishRegistration | Self::LoginFail | Self::Logout => SessionState::Null,
            Self::StartRegistration => SessionState::Registration,
            Self::StartLogin => SessionState::Login,
            Self::LoginSuccess | Self::FinishAuthRegistration => SessionState::Authenticated,
            Self::AddRegistration => SessionState::AuthRegistration,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::StartRegistration => "startRegistration",
            Self::FinishRegistration => "finishRegistration",
            Self::StartLogin => "startLogin",
            Self::LoginSuccess => "loginSuccess",
            Self::LoginFail => "loginFail",
            Self::Logout => "logout",
            Self::AddRegistration => "addRegistration",
            Self::FinishAuthRegistration => "finishAuthRegistration",
        }
    }
}

impl SessionState {
    /// Whether `event` may be fired from this state.
    #[must_use]
    pub fn can(self, event: SessionEvent) -> bool {
        event.source() == self
    }

    /// Fire `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the event is not accepted from this
    /// state. The caller's state is left untouched in that case since this
    /// function takes `self` by value and returns a new one.
    pub fn apply(self, event: SessionEvent) -> Result<Self, TransitionError> {
        if self.can(event) {
            Ok(event.target())
        } else {
            Err(TransitionError { event, from: self })
        }
    }

    /// Whether the session is bound to a verified user.
    ///
    /// Adding a second credential keeps the caller authenticated.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::AuthRegistration)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Registration => "registration",
            Self::Login => "login",
            Self::Authenticated => "authenticated",
            Self::AuthRegistration => "authRegistration",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(Self::Null),
            "registration" => Ok(Self::Registration),
            "login" => Ok(Self::Login),
            "authenticated" => Ok(Self::Authenticated),
            "authRegistration" => Ok(Self::AuthRegistration),
            _ => Err(format!("invalid session state: {s}")),
        }
    }
}
