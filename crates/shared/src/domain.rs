use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(Jid);
string_newtype!(MessageId);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    #[default]
    None,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Poll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

/// Why the transport closed a socket, decoded from its status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    MultideviceMismatch,
    Forbidden,
    LoggedOut,
    BadSession,
    RestartRequired,
    UnavailableService,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(428) => Self::ConnectionClosed,
            Some(408) => Self::ConnectionLost,
            Some(440) => Self::ConnectionReplaced,
            Some(411) => Self::MultideviceMismatch,
            Some(403) => Self::Forbidden,
            Some(401) => Self::LoggedOut,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            Some(503) => Self::UnavailableService,
            Some(other) => Self::Unknown(other),
            None => Self::Unknown(0),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::UnavailableService => 503,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_logged_out(self) -> bool {
        self == Self::LoggedOut
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(DisconnectReason),
    LoggedOut,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Identity the socket is bound to once the connection opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub phone: String,
}

impl HostIdentity {
    /// `"34600111222:12@s.whatsapp.net"` binds to phone `"34600111222"`.
    pub fn from_user_id(id: impl Into<String>, name: Option<String>) -> Self {
        let id = id.into();
        let phone = id
            .split([':', '@'])
            .next()
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        Self { id, name, phone }
    }
}
