//! Persistence for identities (keys, credentials, hash chain) and invoice records.
use crate::api::{Compliance, CsidCredentials, Production, ValidationMessage};
use crate::config::PortalType;
use crate::identity::IdentityRef;
use crate::invoice::{SourceInvoice, INITIAL_PREVIOUS_INVOICE_HASH};
use crate::status::{EndpointKind, SubmissionStatus, ValidationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt store document '{path}': {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Onboarding progress of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingState {
    #[default]
    NoCsr,
    CsrCreated,
    ComplianceIssued,
    ProductionIssued,
}

impl OnboardingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingState::NoCsr => "NO_CSR",
            OnboardingState::CsrCreated => "CSR_CREATED",
            OnboardingState::ComplianceIssued => "COMPLIANCE_ISSUED",
            OnboardingState::ProductionIssued => "PRODUCTION_ISSUED",
        }
    }
}

impl fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the relay keeps for one company or device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: IdentityRef,
    #[serde(default)]
    pub state: OnboardingState,
    /// Portal the current CSR was generated for.
    #[serde(default)]
    pub portal: Option<PortalType>,
    #[serde(default)]
    pub csr_config: Option<String>,
    #[serde(default)]
    pub csr_pem: Option<String>,
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub staged_otp: Option<String>,
    #[serde(default)]
    pub compliance: Option<CsidCredentials<Compliance>>,
    #[serde(default)]
    pub production: Option<CsidCredentials<Production>>,
    #[serde(default = "initial_hash")]
    pub previous_invoice_hash: String,
    #[serde(default)]
    pub invoice_counter: u64,
}

fn initial_hash() -> String {
    INITIAL_PREVIOUS_INVOICE_HASH.to_string()
}

impl IdentityRecord {
    pub fn new(identity: IdentityRef) -> Self {
        Self {
            identity,
            state: OnboardingState::NoCsr,
            portal: None,
            csr_config: None,
            csr_pem: None,
            private_key_pem: None,
            staged_otp: None,
            compliance: None,
            production: None,
            previous_invoice_hash: initial_hash(),
            invoice_counter: 0,
        }
    }

    /// Moves the chain head to an accepted invoice.
    pub fn advance_chain(&mut self, invoice_hash: &str, invoice_counter: u64) {
        self.previous_invoice_hash = invoice_hash.to_string();
        self.invoice_counter = invoice_counter;
    }
}

/// One signing/submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSubmission {
    pub invoice_number: String,
    pub attempted_at: DateTime<Utc>,
    #[serde(default)]
    pub endpoint: Option<EndpointKind>,
    #[serde(default)]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default)]
    pub errors: Vec<ValidationMessage>,
    #[serde(default)]
    pub warnings: Vec<ValidationMessage>,
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Authority body, verbatim.
    #[serde(default)]
    pub raw_response: Option<String>,
    pub status: SubmissionStatus,
}

impl InvoiceSubmission {
    /// Attempt that never got a parsed authority reply.
    pub fn failed_attempt(
        invoice_number: &str,
        attempted_at: DateTime<Utc>,
        message: impl Into<String>,
        http_status: Option<u16>,
    ) -> Self {
        Self {
            invoice_number: invoice_number.to_string(),
            attempted_at,
            endpoint: None,
            validation_status: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            http_status,
            raw_response: None,
            status: SubmissionStatus::error(message),
        }
    }
}

/// An invoice the relay has seen, with its submission history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    pub identity: IdentityRef,
    /// Stable across attempts.
    pub uuid: String,
    pub source: SourceInvoice,
    pub status: SubmissionStatus,
    pub status_text: String,
    #[serde(default)]
    pub history: Vec<InvoiceSubmission>,
    #[serde(default)]
    pub cleared_xml: Option<String>,
    #[serde(default)]
    pub invoice_hash: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InvoiceRecord {
    pub fn new(source: SourceInvoice, created_at: DateTime<Utc>) -> Self {
        Self {
            invoice_number: source.invoice_number.clone(),
            identity: source.identity.clone(),
            uuid: Uuid::new_v4().to_string(),
            source,
            status: SubmissionStatus::NotSubmitted,
            status_text: SubmissionStatus::NotSubmitted.to_string(),
            history: Vec::new(),
            cleared_xml: None,
            invoice_hash: None,
            qr_code: None,
            created_at,
        }
    }

    /// Appends an attempt and makes its status the current one.
    pub fn record_attempt(&mut self, attempt: InvoiceSubmission, status_text: String) {
        self.status = attempt.status.clone();
        self.status_text = status_text;
        self.history.push(attempt);
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_identity(
        &self,
        identity: &IdentityRef,
    ) -> Result<Option<IdentityRecord>, StoreError>;

    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    async fn load_invoice(&self, invoice_number: &str) -> Result<Option<InvoiceRecord>, StoreError>;

    async fn save_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError>;

    async fn list_invoices(&self) -> Result<Vec<InvoiceRecord>, StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<IdentityRef, IdentityRecord>>,
    invoices: RwLock<HashMap<String, InvoiceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_identity(
        &self,
        identity: &IdentityRef,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.identities.read().get(identity).cloned())
    }

    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.identities
            .write()
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn load_invoice(&self, invoice_number: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        Ok(self.invoices.read().get(invoice_number).cloned())
    }

    async fn save_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        self.invoices
            .write()
            .insert(record.invoice_number.clone(), record.clone());
        Ok(())
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceRecord>, StoreError> {
        let mut records: Vec<InvoiceRecord> = self.invoices.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

/// One JSON document per identity and per invoice.
///
/// Layout: `{root}/identities/{kind}-{id}.json` and
/// `{root}/invoices/{invoice}.json`. Writes go to a temp file first and are
/// renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

/// `key` with everything but `[A-Za-z0-9._-]` replaced by `_`.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_name(key: &str) -> String {
    format!("{}.json", sanitize_key(key))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_path(&self, identity: &IdentityRef) -> PathBuf {
        self.root
            .join("identities")
            .join(format!("{}.json", identity.storage_key()))
    }

    fn invoice_dir(&self) -> PathBuf {
        self.root.join("invoices")
    }

    fn invoice_path(&self, invoice_number: &str) -> PathBuf {
        self.invoice_dir().join(file_name(invoice_number))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(path)(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, path).await.map_err(io_error(path))?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load_identity(
        &self,
        identity: &IdentityRef,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        Self::read_json(&self.identity_path(identity)).await
    }

    async fn save_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        Self::write_json(&self.identity_path(&record.identity), record).await
    }

    async fn load_invoice(&self, invoice_number: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        Self::read_json(&self.invoice_path(invoice_number)).await
    }

    async fn save_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        Self::write_json(&self.invoice_path(&record.invoice_number), record).await
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceRecord>, StoreError> {
        let dir = self.invoice_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir)(err)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_json::<InvoiceRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
