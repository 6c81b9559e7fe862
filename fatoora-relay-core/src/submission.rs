//! Per-invoice submission: build, sign, send to reporting or clearance and
//! persist the outcome.
//!
//! One call is one attempt. The attempt runs under the invoice's lease, and
//! its chain step (read PIH/ICV, sign, submit, advance) under the identity's
//! lock. Whatever goes wrong inside the attempt is recorded on the invoice as
//! an `Error: ...` status rather than returned. An accepted reply is stored
//! before the chain moves and is never downgraded afterwards.
use crate::api::{Authority, AuthorityReply};
use crate::config::{Config, SubmissionMode};
use crate::identity::IdentityRef;
use crate::invoice::{qr_value_from_xml, SourceInvoice};
use crate::lease::{KeyedMutex, LeaseRegistry};
use crate::onboarding::invoice_signer;
use crate::response_text;
use crate::status::{classify_results, EndpointKind, SubmissionStatus, ValidationStatus};
use crate::store::{InvoiceRecord, InvoiceSubmission, Store};
use crate::{Error, Result, ValidationError, ValidationIssue, ValidationKind};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Statuses on invoice endpoints that mean the production CSID was refused.
const CREDENTIAL_REFUSED: &[u16] = &[401, 403];

/// What a submission call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// An attempt ran; `status` is what was persisted.
    Attempted {
        status: SubmissionStatus,
        status_text: String,
    },
    AlreadySubmitted { status: SubmissionStatus },
    /// Another call holds the invoice's lease.
    InFlight,
    /// Deferred to the background sweep.
    Queued,
    UnknownInvoice,
}

impl SubmissionOutcome {
    /// Accepted by the authority, now or before.
    pub fn is_success(&self) -> bool {
        match self {
            SubmissionOutcome::Attempted { status, .. } => status.is_accepted(),
            SubmissionOutcome::AlreadySubmitted { .. } => true,
            _ => false,
        }
    }

    /// One-line message for the ERP side.
    pub fn message(&self) -> String {
        match self {
            SubmissionOutcome::Attempted { status, .. } => status.to_string(),
            SubmissionOutcome::AlreadySubmitted { .. } => "Already submitted".to_string(),
            SubmissionOutcome::InFlight => "Submission already in progress".to_string(),
            SubmissionOutcome::Queued => "Queued for background submission".to_string(),
            SubmissionOutcome::UnknownInvoice => "Invoice not found".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    authority: Arc<dyn Authority>,
    leases: LeaseRegistry,
    identity_locks: KeyedMutex,
}

impl Submitter {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        authority: Arc<dyn Authority>,
        leases: LeaseRegistry,
        identity_locks: KeyedMutex,
    ) -> Self {
        Self {
            config,
            store,
            authority,
            leases,
            identity_locks,
        }
    }

    /// Submits `invoice_number`.
    ///
    /// `source` replaces the stored document when given; without it the stored
    /// one is used. `bypass_background` skips the background-mode deferral but
    /// never the lease.
    ///
    /// # Errors
    /// Only store or lock failures and a `source` whose number does not match
    /// are returned. Attempt failures are persisted as an `Error:` status. A
    /// store failure after acceptance is returned with the accepted status
    /// already persisted where the store allowed it.
    pub async fn submit(
        &self,
        invoice_number: &str,
        source: Option<SourceInvoice>,
        bypass_background: bool,
    ) -> Result<SubmissionOutcome> {
        if let Some(source) = &source {
            if source.invoice_number != invoice_number {
                return Err(ValidationError::single(ValidationIssue::new(
                    "invoice_number",
                    ValidationKind::Mismatch,
                    format!("document is {}, not {invoice_number}", source.invoice_number),
                ))
                .into());
            }
        }

        let Some(_lease) = self.leases.try_acquire(invoice_number)? else {
            debug!(invoice = invoice_number, "submission already in flight");
            return Ok(SubmissionOutcome::InFlight);
        };

        let stored = self.store.load_invoice(invoice_number).await?;
        let mut record = match (stored, source) {
            (Some(record), _) if record.status.is_accepted() => {
                return Ok(SubmissionOutcome::AlreadySubmitted {
                    status: record.status,
                });
            }
            (Some(mut record), Some(source)) => {
                record.identity = source.identity.clone();
                record.source = source;
                record
            }
            (Some(record), None) => record,
            (None, Some(source)) => InvoiceRecord::new(source, Utc::now()),
            (None, None) => return Ok(SubmissionOutcome::UnknownInvoice),
        };

        if self.config.submission_mode == SubmissionMode::Background && !bypass_background {
            self.store.save_invoice(&record).await?;
            debug!(invoice = invoice_number, "queued for background submission");
            return Ok(SubmissionOutcome::Queued);
        }

        let attempted_at = Utc::now();
        let _guard = self
            .identity_locks
            .lock(&record.identity.storage_key())
            .await?;
        match self.attempt(&mut record, attempted_at).await {
            Ok(Some(step)) => {
                // the accepted status reaches the store even if the chain cannot move
                let saved = self.store.save_invoice(&record).await;
                let advanced = self.advance_chain(&record.identity, &step).await;
                if let Err(err) = &advanced {
                    error!(invoice = invoice_number, identity = %record.identity, error = %err, "accepted invoice did not advance the chain");
                }
                saved?;
                advanced?;
                return Ok(attempted(&record));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(invoice = invoice_number, identity = %record.identity, error = %err, "submission attempt failed");
                let http_status = match &err {
                    Error::Api(api) => api.http_status(),
                    _ => None,
                };
                let entry = InvoiceSubmission::failed_attempt(
                    invoice_number,
                    attempted_at,
                    err.to_string(),
                    http_status,
                );
                let status_text = entry.status.to_string();
                record.record_attempt(entry, status_text);
            }
        }

        self.store.save_invoice(&record).await?;
        Ok(attempted(&record))
    }

    /// Signs and sends the invoice on the identity's current chain head.
    ///
    /// Returns the chain step to commit when the authority accepted it.
    async fn attempt(
        &self,
        record: &mut InvoiceRecord,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<ChainStep>> {
        let identity = self
            .store
            .load_identity(&record.identity)
            .await?
            .ok_or_else(|| {
                Error::Precondition(format!("identity {} is not onboarded", record.identity))
            })?;
        record.source.validate()?;
        let pcsid = identity.production.clone().ok_or_else(|| {
            Error::Precondition(format!("no production CSID for {}", record.identity))
        })?;

        let counter = identity.invoice_counter + 1;
        let finalized = record.source.to_finalized(
            &record.uuid,
            counter,
            &identity.previous_invoice_hash,
        )?;
        let signed = invoice_signer(&identity, &pcsid)?.sign(finalized)?;
        let endpoint = EndpointKind::for_simplified(signed.data().invoice_type().is_simplified());
        record.invoice_hash = Some(signed.invoice_hash().to_string());
        record.qr_code = Some(signed.qr_code().to_string());

        debug!(invoice = %record.invoice_number, icv = counter, ?endpoint, "submitting");
        let reply = match endpoint {
            EndpointKind::Clearance => self.authority.clear(&signed, &pcsid).await,
            EndpointKind::Reporting => self.authority.report(&signed, &pcsid).await,
        }
        .map_err(|err| Error::from_authority(err, CREDENTIAL_REFUSED, "production CSID refused"))?;

        let status = self.record_reply(record, endpoint, &reply, attempted_at);
        if status.is_accepted() {
            info!(invoice = %record.invoice_number, identity = %record.identity, status = %status, "invoice accepted");
            Ok(Some(ChainStep {
                invoice_hash: signed.invoice_hash().to_string(),
                counter,
            }))
        } else {
            warn!(invoice = %record.invoice_number, identity = %record.identity, status = %status, "invoice rejected");
            Ok(None)
        }
    }

    /// Moves the chain head on a fresh read, leaving the rest of the identity
    /// as the store has it.
    async fn advance_chain(&self, identity: &IdentityRef, step: &ChainStep) -> Result<()> {
        let mut record = self.store.load_identity(identity).await?.ok_or_else(|| {
            Error::Precondition(format!("identity {identity} disappeared during submission"))
        })?;
        record.advance_chain(&step.invoice_hash, step.counter);
        self.store.save_identity(&record).await?;
        Ok(())
    }

    /// Appends the reply to the record's history and returns the new status.
    fn record_reply(
        &self,
        record: &mut InvoiceRecord,
        endpoint: EndpointKind,
        reply: &AuthorityReply,
        attempted_at: DateTime<Utc>,
    ) -> SubmissionStatus {
        let results = reply.response.validation_results();
        let validation = classify_results(results);
        let status = SubmissionStatus::from_outcome(endpoint, validation);
        let headline = match validation {
            ValidationStatus::Pass => "SUCCESS".to_string(),
            _ => status.to_string(),
        };
        let status_text = response_text::compose(&headline, reply.http_status, &reply.body);

        if status.is_accepted() && endpoint == EndpointKind::Clearance {
            record.cleared_xml = reply
                .response
                .cleared_invoice()
                .and_then(|encoded| decode_cleared(&record.invoice_number, encoded));
            let stamped = record
                .cleared_xml
                .as_deref()
                .and_then(|xml| stamped_qr(&record.invoice_number, xml));
            if let Some(qr) = stamped {
                record.qr_code = Some(qr);
            }
        }

        let entry = InvoiceSubmission {
            invoice_number: record.invoice_number.clone(),
            attempted_at,
            endpoint: Some(endpoint),
            validation_status: Some(validation),
            errors: results.error_messages().to_vec(),
            warnings: results.warning_messages().to_vec(),
            http_status: Some(reply.http_status),
            raw_response: Some(reply.body.clone()),
            status: status.clone(),
        };
        record.record_attempt(entry, status_text);
        status
    }
}

/// What the caller gets back once an attempt ran.
fn attempted(record: &InvoiceRecord) -> SubmissionOutcome {
    SubmissionOutcome::Attempted {
        status: record.status.clone(),
        status_text: record.status_text.clone(),
    }
}

/// Chain head after an accepted invoice.
struct ChainStep {
    invoice_hash: String,
    counter: u64,
}

/// QR value of the authority-stamped invoice, kept only when it decodes.
fn stamped_qr(invoice_number: &str, xml: &str) -> Option<String> {
    match qr_value_from_xml(xml) {
        Ok(value) => value,
        Err(err) => {
            warn!(invoice = invoice_number, error = %err, "cleared invoice carries an unreadable QR code");
            None
        }
    }
}

fn decode_cleared(invoice_number: &str, encoded: &str) -> Option<String> {
    let decoded = Base64::decode_vec(encoded.trim())
        .map_err(|err| err.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|err| err.to_string()));
    match decoded {
        Ok(xml) => Some(xml),
        Err(err) => {
            warn!(invoice = invoice_number, error = %err, "cleared invoice is not base64 XML");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_messages() {
        let accepted = SubmissionOutcome::Attempted {
            status: SubmissionStatus::ClearedWithWarnings,
            status_text: String::new(),
        };
        assert!(accepted.is_success());
        assert_eq!(accepted.message(), "CLEARED WITH WARNINGS");

        let already = SubmissionOutcome::AlreadySubmitted {
            status: SubmissionStatus::Reported,
        };
        assert!(already.is_success());
        assert_eq!(already.message(), "Already submitted");

        for outcome in [
            SubmissionOutcome::InFlight,
            SubmissionOutcome::Queued,
            SubmissionOutcome::UnknownInvoice,
            SubmissionOutcome::Attempted {
                status: SubmissionStatus::error("boom"),
                status_text: "Error: boom".into(),
            },
        ] {
            assert!(!outcome.is_success());
        }
    }

    #[test]
    fn cleared_xml_is_decoded() {
        let encoded = Base64::encode_string(b"<Invoice/>");
        assert_eq!(decode_cleared("INV-1", &encoded).as_deref(), Some("<Invoice/>"));
        assert_eq!(decode_cleared("INV-1", "%%%"), None);
    }
}
