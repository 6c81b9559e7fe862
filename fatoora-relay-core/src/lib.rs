//! ZATCA e-invoicing relay: CSR generation, CSID onboarding, compliance checks,
//! invoice signing and the clearance/reporting submission state machine.
//!
//! # Examples
//! ```rust
//! use fatoora_relay_core::config::{Config, PortalType};
//! use fatoora_relay_core::identity::IdentityRef;
//!
//! let config = Config::default();
//! let identity: IdentityRef = "company:ACME".parse()?;
//! assert_eq!(config.base_url(PortalType::Sandbox), PortalType::Sandbox.default_endpoint_url());
//! assert_eq!(identity.id(), "ACME");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod api;
pub mod batch;
pub mod compliance;
pub mod config;
pub mod csr;
pub mod identity;
pub mod invoice;
pub mod lease;
pub mod onboarding;
pub mod relay;
pub mod response_text;
pub mod status;
pub mod store;
pub mod submission;
pub mod validation;

pub use relay::Relay;
pub use validation::{ValidationError, ValidationIssue, ValidationKind};

use api::ZatcaError;
use thiserror::Error;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Precondition,
    Authority,
    Transport,
    Internal,
}

/// Top-level error for relay operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("rejected by authority: {0}")]
    Authority(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Csr(#[from] csr::CsrError),
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Qr(#[from] invoice::QrCodeError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::InvoiceXmlError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Lock(#[from] lease::LockError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Api(#[from] ZatcaError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Csr(csr::CsrError::Validation(_)) | Error::Invoice(_) => {
                ErrorKind::Validation
            }
            Error::Authentication(_) | Error::Api(ZatcaError::Unauthorized(_)) => {
                ErrorKind::Authentication
            }
            Error::Precondition(_) | Error::Api(ZatcaError::ClientState(_)) => {
                ErrorKind::Precondition
            }
            Error::Authority(_) | Error::Api(ZatcaError::Rejected { .. }) => ErrorKind::Authority,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Api(err) if err.is_transport() => ErrorKind::Transport,
            _ => ErrorKind::Internal,
        }
    }

    /// Maps an authority failure onto the relay taxonomy.
    ///
    /// `auth_statuses` lists the HTTP codes that mean the caller's OTP or
    /// credentials were refused.
    pub(crate) fn from_authority(err: ZatcaError, auth_statuses: &[u16], what: &str) -> Self {
        let refused = err
            .http_status()
            .is_some_and(|status| auth_statuses.contains(&status));
        match err {
            ZatcaError::Unauthorized(reply) => Error::Authentication(format!(
                "{what}: {}",
                reply.message().unwrap_or("no message")
            )),
            ZatcaError::Rejected { body, .. } if refused => {
                Error::Authentication(format!("{what}: {body}"))
            }
            ZatcaError::Rejected { status, body } => {
                Error::Authority(format!("status {status}: {body}"))
            }
            ZatcaError::ClientState(message) => Error::Precondition(message),
            ZatcaError::InvalidResponse(message) => Error::Authority(message),
            other if other.is_transport() => Error::Transport(other.to_string()),
            other => Error::Api(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
