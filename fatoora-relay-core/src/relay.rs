//! The remote operation surface: one value wiring store, authority client and
//! the coordinators together.
use crate::api::{Authority, ZatcaClient};
use crate::batch::{BatchCoordinator, BatchReport, SweepOutcome};
use crate::compliance::{ComplianceResult, ComplianceRunner, ComplianceType};
use crate::config::{Config, PortalType};
use crate::csr::{CompanyProfile, CsrProperties};
use crate::identity::IdentityRef;
use crate::invoice::SourceInvoice;
use crate::lease::{KeyedMutex, LeaseRegistry, LockDir};
use crate::onboarding::Onboarding;
use crate::store::{FileStore, InvoiceRecord, OnboardingState, Store};
use crate::submission::{SubmissionOutcome, Submitter};
use crate::Result;
use chrono::{DateTime, FixedOffset};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// ZATCA relay.
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use fatoora_relay_core::api::ZatcaClient;
/// use fatoora_relay_core::config::Config;
/// use fatoora_relay_core::store::MemoryStore;
/// use fatoora_relay_core::Relay;
///
/// let config = Config::default();
/// let client = ZatcaClient::new(config.clone())?;
/// let relay = Relay::new(config, Arc::new(MemoryStore::new()), Arc::new(client));
/// # let _ = relay;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Relay {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    onboarding: Onboarding,
    compliance: ComplianceRunner,
    submitter: Submitter,
    batch: BatchCoordinator,
}

impl Relay {
    /// Relay whose leases and identity locks only exclude calls made through
    /// clones of this value.
    pub fn new(config: Config, store: Arc<dyn Store>, authority: Arc<dyn Authority>) -> Self {
        Self::assemble(
            config,
            store,
            authority,
            LeaseRegistry::new(),
            KeyedMutex::new(),
        )
    }

    /// Like [`Relay::new`], with leases and identity locks also held as
    /// files under `lock_root`. Relays in separate processes that share a
    /// store must share `lock_root` too.
    pub fn with_lock_dir(
        config: Config,
        store: Arc<dyn Store>,
        authority: Arc<dyn Authority>,
        lock_root: impl Into<PathBuf>,
    ) -> Self {
        let lock_root = lock_root.into();
        // longer than any single submission or CSID exchange can hold a lock
        let stale_after = config.invoice_timeout() * 2;
        Self::assemble(
            config,
            store,
            authority,
            LeaseRegistry::with_lock_dir(LockDir::new(lock_root.join("invoices"), stale_after)),
            KeyedMutex::with_lock_dir(LockDir::new(lock_root.join("identities"), stale_after)),
        )
    }

    fn assemble(
        config: Config,
        store: Arc<dyn Store>,
        authority: Arc<dyn Authority>,
        leases: LeaseRegistry,
        identity_locks: KeyedMutex,
    ) -> Self {
        let config = Arc::new(config);
        let submitter = Submitter::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&authority),
            leases,
            identity_locks.clone(),
        );
        Self {
            onboarding: Onboarding::new(
                Arc::clone(&store),
                Arc::clone(&authority),
                identity_locks.clone(),
            ),
            compliance: ComplianceRunner::new(Arc::clone(&store), authority, identity_locks),
            batch: BatchCoordinator::new(
                submitter.clone(),
                Arc::clone(&store),
                config.batch.clone(),
                config.sweep.clone(),
            ),
            submitter,
            store,
            config,
        }
    }

    /// Relay over a [`FileStore`] at `config.store_dir` and the HTTP client,
    /// locking through `{store_dir}/locks`.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(FileStore::new(config.store_dir.clone()));
        let client = Arc::new(ZatcaClient::new(config.clone())?);
        let lock_root = config.store_dir.join("locks");
        Ok(Self::with_lock_dir(config, store, client, lock_root))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn configure_csr(
        &self,
        identity: &IdentityRef,
        profile: &CompanyProfile,
    ) -> Result<CsrProperties> {
        self.onboarding.configure_csr(identity, profile).await
    }

    pub async fn import_csr_config(
        &self,
        identity: &IdentityRef,
        path: &Path,
    ) -> Result<CsrProperties> {
        self.onboarding.import_csr_config(identity, path).await
    }

    pub async fn create_csr(&self, portal: PortalType, identity: &IdentityRef) -> Result<String> {
        self.onboarding.create_csr(portal, identity).await
    }

    pub async fn stage_otp(&self, identity: &IdentityRef, otp: &str) -> Result<()> {
        self.onboarding.stage_otp(identity, otp).await
    }

    pub async fn create_csid(
        &self,
        portal: PortalType,
        identity: &IdentityRef,
        otp: Option<&str>,
    ) -> Result<String> {
        self.onboarding.create_csid(portal, identity, otp).await
    }

    pub async fn production_csid(&self, identity: &IdentityRef) -> Result<String> {
        self.onboarding.production_csid(identity).await
    }

    pub async fn onboarding_state(&self, identity: &IdentityRef) -> Result<OnboardingState> {
        self.onboarding.state(identity).await
    }

    /// Stores `source` so compliance samples can be built from it.
    pub async fn store_source(&self, source: SourceInvoice) -> Result<InvoiceRecord> {
        let record = match self.store.load_invoice(&source.invoice_number).await? {
            Some(mut existing) => {
                existing.identity = source.identity.clone();
                existing.source = source;
                existing
            }
            None => InvoiceRecord::new(source, chrono::Utc::now()),
        };
        self.store.save_invoice(&record).await?;
        Ok(record)
    }

    pub async fn zatca_call_compliance(
        &self,
        invoice_number: &str,
        compliance_type: ComplianceType,
        identity: &IdentityRef,
    ) -> Result<ComplianceResult> {
        self.compliance
            .check(invoice_number, compliance_type, identity)
            .await
    }

    pub async fn compliance_all(
        &self,
        invoice_number: &str,
        identity: &IdentityRef,
    ) -> Result<Vec<ComplianceResult>> {
        self.compliance.check_all(invoice_number, identity).await
    }

    /// Submits one invoice, honouring the configured submission mode.
    pub async fn zatca_background(
        &self,
        invoice_number: &str,
        source: Option<SourceInvoice>,
    ) -> Result<SubmissionOutcome> {
        self.submitter.submit(invoice_number, source, false).await
    }

    pub async fn resubmit_invoices(
        &self,
        invoice_numbers: &[String],
        bypass_background_check: bool,
    ) -> BatchReport {
        self.batch
            .resubmit_invoices(invoice_numbers, bypass_background_check)
            .await
    }

    pub async fn invoice_status(&self, invoice_number: &str) -> Result<Option<InvoiceRecord>> {
        Ok(self.store.load_invoice(invoice_number).await?)
    }

    pub async fn sweep_pending(&self, now: DateTime<FixedOffset>) -> Result<SweepOutcome> {
        self.batch.sweep_pending(now).await
    }
}
