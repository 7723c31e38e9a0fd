// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Detailed error types.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::str::Utf8Error;

use sasl::client::MechanismError as SaslMechanismError;

/// Why a session or transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local user asked for the disconnect.
    User,
    /// The remote side closed the connection.
    RemoteClosed,
    /// An I/O error broke the connection.
    IoError,
    /// TLS was requested but no TLS layer is available.
    TlsNotAvailable,
    /// The TLS handshake failed, or the TLS listener vetoed the
    /// certificate.
    TlsFailed,
    /// An operation required a connection but none was established.
    NotConnected,
    /// The stream (or BOSH session) was closed by the peer.
    StreamClosed,
    /// The peer reported a stream-level error.
    StreamError,
    /// The server offered no authentication mechanism we support.
    NoSupportedAuth,
    /// Authentication was attempted and failed.
    AuthenticationFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match self {
            DisconnectReason::User => "user-initiated disconnect",
            DisconnectReason::RemoteClosed => "connection closed by peer",
            DisconnectReason::IoError => "transport I/O error",
            DisconnectReason::TlsNotAvailable => "TLS not available",
            DisconnectReason::TlsFailed => "TLS handshake failed",
            DisconnectReason::NotConnected => "not connected",
            DisconnectReason::StreamClosed => "stream closed",
            DisconnectReason::StreamError => "stream error",
            DisconnectReason::NoSupportedAuth => "no supported authentication mechanism",
            DisconnectReason::AuthenticationFailed => "authentication failed",
        })
    }
}

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(IoError),
    /// Error parsing a Jabber-Id.
    JidParse(jid::Error),
    /// Protocol-level error.
    Protocol(ProtocolError),
    /// Authentication error.
    Auth(AuthError),
    /// Connection closed.
    Disconnected(DisconnectReason),
    /// Operation not valid in the current state.
    InvalidState,
    /// Received bytes which are not valid UTF-8.
    Utf8(Utf8Error),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Disconnected(reason) => write!(fmt, "disconnected: {}", reason),
            Error::InvalidState => write!(fmt, "invalid state"),
            Error::Utf8(e) => write!(fmt, "Utf8 error: {}", e),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<Utf8Error> for Error {
    fn from(e: Utf8Error) -> Self {
        Error::Utf8(e)
    }
}

impl From<minitag::Error> for Error {
    fn from(e: minitag::Error) -> Self {
        ProtocolError::Parser(e).into()
    }
}

/// XMPP protocol-level error.
#[derive(Debug)]
pub enum ProtocolError {
    /// XML parser error.
    Parser(minitag::Error),
    /// The server-sent stream header carried no id attribute.
    NoStreamId,
    /// Invalid response to resource binding.
    InvalidBindResponse,
    /// The peer reported a stream error condition.
    StreamError(String),
    /// An HTTP response of the BOSH gateway could not be understood.
    InvalidHttp,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parser(e) => write!(fmt, "XML parser error: {}", e),
            ProtocolError::NoStreamId => write!(fmt, "no id attribute in <stream:stream>"),
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::StreamError(condition) => {
                write!(fmt, "stream error: {}", condition)
            }
            ProtocolError::InvalidHttp => write!(fmt, "malformed HTTP response"),
        }
    }
}

impl StdError for ProtocolError {}

impl From<minitag::Error> for ProtocolError {
    fn from(e: minitag::Error) -> Self {
        ProtocolError::Parser(e)
    }
}

/// SASL failure conditions reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslCondition {
    /// The exchange was aborted.
    Aborted,
    /// A response was incorrectly encoded.
    IncorrectEncoding,
    /// The authorization identity was rejected.
    InvalidAuthzid,
    /// The requested mechanism is not supported.
    InvalidMechanism,
    /// The mechanism is weaker than server policy permits.
    MechanismTooWeak,
    /// The credentials were rejected.
    NotAuthorized,
    /// A temporary server-side failure.
    TemporaryAuthFailure,
    /// A condition this library does not know.
    Unknown,
}

impl SaslCondition {
    /// Maps a `<failure/>` child element name to a condition.
    pub fn from_element_name(name: &str) -> SaslCondition {
        match name {
            "aborted" => SaslCondition::Aborted,
            "incorrect-encoding" => SaslCondition::IncorrectEncoding,
            "invalid-authzid" => SaslCondition::InvalidAuthzid,
            "invalid-mechanism" => SaslCondition::InvalidMechanism,
            "mechanism-too-weak" => SaslCondition::MechanismTooWeak,
            "not-authorized" => SaslCondition::NotAuthorized,
            "temporary-auth-failure" => SaslCondition::TemporaryAuthFailure,
            _ => SaslCondition::Unknown,
        }
    }
}

/// Legacy (`jabber:iq:auth`) failure conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonSaslCondition {
    /// The resource is already in use.
    Conflict,
    /// Required fields were not provided.
    NotAcceptable,
    /// The credentials were rejected.
    NotAuthorized,
    /// A condition this library does not know.
    Unknown,
}

/// Authentication error.
#[derive(Debug)]
pub enum AuthError {
    /// No matching SASL mechanism available.
    NoMechanism,
    /// Local SASL implementation error.
    Sasl(SaslMechanismError),
    /// Failure reported by the server during SASL.
    Fail(SaslCondition),
    /// Failure reported by the server during legacy IQ auth.
    NonSasl(NonSaslCondition),
    /// Component handshake failure.
    ComponentFail,
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Sasl(e) => write!(fmt, "local SASL implementation error: {}", e),
            AuthError::Fail(c) => write!(fmt, "failure from the server: {:?}", c),
            AuthError::NonSasl(c) => write!(fmt, "legacy authentication failure: {:?}", c),
            AuthError::ComponentFail => write!(fmt, "component authentication failure"),
        }
    }
}

impl StdError for AuthError {}

impl From<SaslMechanismError> for AuthError {
    fn from(e: SaslMechanismError) -> Self {
        AuthError::Sasl(e)
    }
}

/// Resource binding failures, reported through
/// [`ConnectionListener::on_resource_bind_error`][`crate::ConnectionListener::on_resource_bind_error`]
/// without tearing down the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// The request was malformed.
    BadRequest,
    /// The server does not allow binding this resource.
    NotAllowed,
    /// The resource is already bound by another session.
    Conflict,
    /// Any other error condition.
    Unknown,
}

/// Session establishment failures, reported through
/// [`ConnectionListener::on_session_create_error`][`crate::ConnectionListener::on_session_create_error`]
/// without tearing down the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The server failed internally.
    InternalServerError,
    /// The server forbids session establishment.
    Forbidden,
    /// A conflicting session exists.
    Conflict,
    /// Any other error condition.
    Unknown,
}
