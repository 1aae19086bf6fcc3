use std::fmt;

/// Why a response was rejected even though it reached us and (maybe) parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The endpoint answered with something other than `200 OK`.
    Status(u16),
    /// Chat completion reply had an empty `choices` list.
    NoChoices,
    /// Weather reply had an empty `current.weather` list.
    NoWeather,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Status(code) => write!(f, "unexpected HTTP status {code}"),
            InvalidReason::NoChoices => f.write_str("response contained no choices"),
            InvalidReason::NoWeather => f.write_str("response contained no weather entries"),
        }
    }
}

/// Failure returned by every API client.
///
/// The set of kinds is closed (see [`ClientErrorKind`]); variants may carry
/// the underlying cause for diagnostics, but [`ClientError::title`] only
/// depends on the kind.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(InvalidReason),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unknown error")]
    Unknown,
}

/// Fieldless classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    Network,
    InvalidResponse,
    Decode,
    Unknown,
}

impl ClientErrorKind {
    /// Short string shown to the user.
    pub fn title(&self) -> &'static str {
        match self {
            ClientErrorKind::Network => "NETWORK",
            ClientErrorKind::InvalidResponse => "INVALID",
            ClientErrorKind::Decode => "DECODE",
            ClientErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl ClientError {
    pub fn kind(&self) -> ClientErrorKind {
        match self {
            ClientError::Network(_) => ClientErrorKind::Network,
            ClientError::InvalidResponse(_) => ClientErrorKind::InvalidResponse,
            ClientError::Decode(_) => ClientErrorKind::Decode,
            ClientError::Unknown => ClientErrorKind::Unknown,
        }
    }

    pub fn title(&self) -> &'static str {
        self.kind().title()
    }

    /// Wrap a transport error. The request URL is dropped: query strings
    /// carry API keys.
    pub fn network(err: reqwest::Error) -> Self {
        ClientError::Network(err.without_url())
    }

    /// HTTP status carried by a non-200 rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::InvalidResponse(InvalidReason::Status(code)) => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::network(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err)
    }
}
