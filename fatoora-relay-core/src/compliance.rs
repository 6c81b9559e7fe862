//! The six compliance checks an identity runs before production onboarding.
use crate::api::{Authority, ValidationMessage};
use crate::identity::IdentityRef;
use crate::invoice::{DocumentKind, InvoiceSubType};
use crate::lease::KeyedMutex;
use crate::onboarding::invoice_signer;
use crate::status::{classify, ValidationStatus};
use crate::store::Store;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sample document kinds, numbered as the onboarding wizard numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ComplianceType {
    SimplifiedInvoice = 1,
    StandardInvoice = 2,
    SimplifiedCreditNote = 3,
    StandardCreditNote = 4,
    SimplifiedDebitNote = 5,
    StandardDebitNote = 6,
}

impl ComplianceType {
    /// Run order for [`ComplianceRunner::check_all`].
    pub const ALL: [ComplianceType; 6] = [
        ComplianceType::SimplifiedInvoice,
        ComplianceType::StandardInvoice,
        ComplianceType::SimplifiedCreditNote,
        ComplianceType::StandardCreditNote,
        ComplianceType::SimplifiedDebitNote,
        ComplianceType::StandardDebitNote,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn document(self) -> DocumentKind {
        match self {
            ComplianceType::SimplifiedInvoice | ComplianceType::StandardInvoice => {
                DocumentKind::Invoice
            }
            ComplianceType::SimplifiedCreditNote | ComplianceType::StandardCreditNote => {
                DocumentKind::CreditNote
            }
            ComplianceType::SimplifiedDebitNote | ComplianceType::StandardDebitNote => {
                DocumentKind::DebitNote
            }
        }
    }

    pub fn subtype(self) -> InvoiceSubType {
        match self.number() % 2 {
            1 => InvoiceSubType::Simplified,
            _ => InvoiceSubType::Standard,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ComplianceType::SimplifiedInvoice => "simplified invoice",
            ComplianceType::StandardInvoice => "standard invoice",
            ComplianceType::SimplifiedCreditNote => "simplified credit note",
            ComplianceType::StandardCreditNote => "standard credit note",
            ComplianceType::SimplifiedDebitNote => "simplified debit note",
            ComplianceType::StandardDebitNote => "standard debit note",
        }
    }
}

impl TryFrom<u8> for ComplianceType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ComplianceType::ALL
            .into_iter()
            .find(|kind| kind.number() == value)
            .ok_or_else(|| format!("compliance type must be 1-6, got {value}"))
    }
}

impl From<ComplianceType> for u8 {
    fn from(kind: ComplianceType) -> u8 {
        kind.number()
    }
}

impl FromStr for ComplianceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let number: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("compliance type must be 1-6, got '{s}'"))?;
        ComplianceType::try_from(number)
    }
}

impl fmt::Display for ComplianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

/// Result of one compliance check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceResult {
    pub compliance_type: ComplianceType,
    pub passed: bool,
    /// `validationResults.status` as the authority sent it.
    pub validation_status: Option<String>,
    pub reporting_status: Option<String>,
    pub clearance_status: Option<String>,
    pub errors: Vec<ValidationMessage>,
    pub warnings: Vec<ValidationMessage>,
    pub http_status: Option<u16>,
    /// Failure text when no authority reply was obtained.
    pub message: Option<String>,
}

impl ComplianceResult {
    fn failed(compliance_type: ComplianceType, message: String) -> Self {
        Self {
            compliance_type,
            passed: false,
            validation_status: None,
            reporting_status: None,
            clearance_status: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            http_status: None,
            message: Some(message),
        }
    }

    /// Classification of the reply's messages, FAILED when there was none.
    pub fn classification(&self) -> ValidationStatus {
        if self.message.is_some() {
            ValidationStatus::Failed
        } else {
            classify(&self.errors, &self.warnings)
        }
    }
}

/// Runs compliance samples against `compliance/invoices`.
#[derive(Clone)]
pub struct ComplianceRunner {
    store: Arc<dyn Store>,
    authority: Arc<dyn Authority>,
    identity_locks: KeyedMutex,
}

impl ComplianceRunner {
    pub fn new(
        store: Arc<dyn Store>,
        authority: Arc<dyn Authority>,
        identity_locks: KeyedMutex,
    ) -> Self {
        Self {
            store,
            authority,
            identity_locks,
        }
    }

    pub async fn check(
        &self,
        invoice_number: &str,
        compliance_type: ComplianceType,
        identity: &IdentityRef,
    ) -> Result<ComplianceResult> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut results = self.run(invoice_number, &[compliance_type], identity).await?;
        results
            .pop()
            .ok_or_else(|| Error::Precondition("compliance check produced no result".into()))
    }

    /// All six checks in order, one at a time. A failing check does not stop
    /// the ones after it.
    pub async fn check_all(
        &self,
        invoice_number: &str,
        identity: &IdentityRef,
    ) -> Result<Vec<ComplianceResult>> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        self.run(invoice_number, &ComplianceType::ALL, identity).await
    }

    async fn run(
        &self,
        invoice_number: &str,
        kinds: &[ComplianceType],
        identity: &IdentityRef,
    ) -> Result<Vec<ComplianceResult>> {
        let invoice = self
            .store
            .load_invoice(invoice_number)
            .await?
            .ok_or_else(|| Error::Precondition(format!("invoice {invoice_number} is not stored")))?;
        let record = self
            .store
            .load_identity(identity)
            .await?
            .ok_or_else(|| Error::Precondition(format!("identity {identity} is not onboarded")))?;
        let ccsid = record.compliance.as_ref().ok_or_else(|| {
            Error::Precondition(format!("no compliance CSID for {identity}"))
        })?;
        let signer = invoice_signer(&record, ccsid)?;

        let mut results = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let sample = invoice.source.retyped(kind.document(), kind.subtype());
            let uuid = Uuid::new_v4().to_string();
            let signed = sample
                .to_finalized(&uuid, record.invoice_counter + 1, &record.previous_invoice_hash)
                .map_err(Error::from)
                .and_then(|finalized| signer.sign(finalized).map_err(Error::from));
            let signed = match signed {
                Ok(signed) => signed,
                Err(err) => {
                    warn!(identity = %identity, invoice = invoice_number, check = kind.number(), error = %err, "compliance sample could not be built");
                    results.push(ComplianceResult::failed(kind, err.to_string()));
                    continue;
                }
            };

            debug!(identity = %identity, check = kind.number(), "submitting compliance sample");
            let result = match self.authority.check_compliance(&signed, ccsid).await {
                Ok(reply) => {
                    let response = reply.response;
                    let results_block = response.validation_results();
                    let reporting = response.reporting_status().map(str::to_string);
                    let clearance = response.clearance_status().map(str::to_string);
                    let passed = clearance.as_deref() == Some("CLEARED")
                        || reporting.as_deref() == Some("REPORTED");
                    ComplianceResult {
                        compliance_type: kind,
                        passed,
                        validation_status: results_block.status().map(str::to_string),
                        reporting_status: reporting,
                        clearance_status: clearance,
                        errors: results_block.error_messages().to_vec(),
                        warnings: results_block.warning_messages().to_vec(),
                        http_status: Some(reply.http_status),
                        message: None,
                    }
                }
                Err(err) => {
                    let mut failed = ComplianceResult::failed(kind, err.to_string());
                    failed.http_status = err.http_status();
                    failed
                }
            };

            if result.passed {
                info!(identity = %identity, check = kind.number(), "compliance check passed");
            } else {
                warn!(
                    identity = %identity,
                    check = kind.number(),
                    reporting = result.reporting_status.as_deref().unwrap_or("-"),
                    clearance = result.clearance_status.as_deref().unwrap_or("-"),
                    "compliance check failed"
                );
            }
            results.push(result);
        }
        Ok(results)
    }
}
