//! Onboarding targets: a company, or an offline POS device that holds its own CSID.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Company or device that owns a CSR, credentials and an invoice hash chain.
///
/// The text form is `company:<id>` or `device:<id>`.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::identity::IdentityRef;
///
/// let id: IdentityRef = "device:POS-7".parse()?;
/// assert_eq!(id, IdentityRef::device("POS-7"));
/// assert_eq!(id.to_string(), "device:POS-7");
/// # Ok::<(), fatoora_relay_core::identity::IdentityParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum IdentityRef {
    Company(String),
    Device(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityParseError {
    #[error("identity must look like 'company:<id>' or 'device:<id>', got '{0}'")]
    Malformed(String),
    #[error("unknown identity kind '{0}'")]
    UnknownKind(String),
}

impl IdentityRef {
    pub fn company(id: impl Into<String>) -> Self {
        IdentityRef::Company(id.into())
    }

    pub fn device(id: impl Into<String>) -> Self {
        IdentityRef::Device(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            IdentityRef::Company(id) | IdentityRef::Device(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IdentityRef::Company(_) => "company",
            IdentityRef::Device(_) => "device",
        }
    }

    /// File-system and map key.
    pub fn storage_key(&self) -> String {
        let safe: String = self
            .id()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{}", self.kind(), safe)
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

impl FromStr for IdentityRef {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| IdentityParseError::Malformed(s.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(IdentityParseError::Malformed(s.to_string()));
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "company" => Ok(IdentityRef::company(id)),
            "device" | "machine" => Ok(IdentityRef::device(id)),
            other => Err(IdentityParseError::UnknownKind(other.to_string())),
        }
    }
}
