//! Error taxonomy shared by the session, progression and service layers.
//!
//! Failures of external collaborators are split into recoverable ones
//! (transport errors, timeouts, throttling, optimistic-concurrency conflicts)
//! and fatal ones (bad input, malformed replies). Best-effort lookups that
//! substitute a default report it through [`Resolved`] instead of hiding it.

use crate::progression::Progression;
use std::fmt;
use thiserror::Error;

/// External collaborator an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Identity,
    ProfileStore,
    DisposalStore,
    Classifier,
    Geocoder,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity provider",
            Self::ProfileStore => "profile store",
            Self::DisposalStore => "disposal store",
            Self::Classifier => "classifier",
            Self::Geocoder => "geocoder",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: Service, message: String },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: Service,
        status: u16,
        body: String,
    },

    #[error("malformed reply from {service}: {message}")]
    Decode { service: Service, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("profile {0} was modified concurrently")]
    Conflict(String),

    #[error("no active session")]
    NoSession,

    /// The profile update committed but the history write after it failed
    #[error("progress saved but disposal history was not updated: {source}")]
    HistoryNotSaved {
        progression: Box<Progression>,
        source: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Convert a `ureq` failure into the taxonomy, reading the body of
    /// non-2xx replies for the message.
    pub fn from_http(service: Service, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, resp) => Error::Status {
                service,
                status,
                body: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => Error::Unavailable {
                service,
                message: t.to_string(),
            },
        }
    }

    pub fn decode(service: Service, err: impl fmt::Display) -> Self {
        Error::Decode {
            service,
            message: err.to_string(),
        }
    }

    /// True when retrying later (or re-reading and resubmitting) may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Unavailable { .. } | Error::Conflict(_) => true,
            Error::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of a best-effort lookup: either the real value or a substitute
/// plus the reason the real one could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    Fresh(T),
    Fallback { value: T, cause: String },
}

impl<T> Resolved<T> {
    pub fn fallback(value: T, cause: impl Into<String>) -> Self {
        Resolved::Fallback {
            value,
            cause: cause.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Resolved::Fresh(v) => v,
            Resolved::Fallback { value, .. } => value,
        }
    }

    #[cfg(test)]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolved::Fallback { .. })
    }
}
