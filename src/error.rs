use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category, for callers that branch on the failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Authentication,
    Proxy,
    Protocol,
    Io,
    Validation,
    Crypto,
    NotFound,
    SessionState,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid profile: {0}")]
    Validation(String),

    #[error("Decryption failed: wrong password or corrupted data{}", fmt_detail(.0))]
    Crypto(Option<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Session {0}")]
    SessionState(String),
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({})", d),
        None => String::new(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Proxy(_) => ErrorKind::Proxy,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Io(_) => ErrorKind::Io,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SessionState(_) => ErrorKind::SessionState,
        }
    }

    pub(crate) fn crypto(detail: impl Into<String>) -> Self {
        Error::Crypto(Some(detail.into()))
    }

    pub(crate) fn not_connected(session_id: &str) -> Self {
        Error::SessionState(format!("'{}' is not connected", session_id))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(format!("malformed data: {}", e))
    }
}

impl From<russh::Error> for Error {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::IO(io) => Error::Connection(io.to_string()),
            russh::Error::ConnectionTimeout => Error::Connection(e.to_string()),
            russh::Error::Disconnect | russh::Error::HUP => Error::Connection(e.to_string()),
            russh::Error::NotAuthenticated => Error::Authentication(e.to_string()),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<russh_keys::Error> for Error {
    fn from(e: russh_keys::Error) -> Self {
        Error::Authentication(format!("unusable private key: {}", e))
    }
}

impl From<russh_sftp::client::error::Error> for Error {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        use russh_sftp::client::error::Error as SftpError;

        let message = e.to_string();
        match e {
            SftpError::Status(_) => Error::Io(message),
            SftpError::IO(_) | SftpError::Timeout => Error::Connection(message),
            _ => Error::Protocol(message),
        }
    }
}
