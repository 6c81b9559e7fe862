//! CSID onboarding: CSR configuration, CSR generation, OTP exchange for the
//! compliance CSID and the production CSID exchange.
//!
//! Each identity moves through [`OnboardingState`] one step at a time:
//!
//! ```text
//! NO_CSR -> CSR_CREATED -> COMPLIANCE_ISSUED -> PRODUCTION_ISSUED
//! ```
//!
//! Regenerating the CSR restarts the chain from `CSR_CREATED`.
use crate::api::{Authority, CsidCredentials};
use crate::config::PortalType;
use crate::csr::{CompanyProfile, CsrError, CsrProperties};
use crate::identity::IdentityRef;
use crate::invoice::sign::InvoiceSigner;
use crate::lease::KeyedMutex;
use crate::store::{IdentityRecord, OnboardingState, Store};
use crate::{Error, Result, ValidationError, ValidationIssue};
use base64ct::{Base64, Encoding};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Statuses on the compliance exchange that mean the OTP was refused.
const OTP_REFUSED: &[u16] = &[400, 401, 403];
/// Statuses on the production exchange that mean the CCSID was refused.
const CREDENTIAL_REFUSED: &[u16] = &[401, 403];

#[derive(Clone)]
pub struct Onboarding {
    store: Arc<dyn Store>,
    authority: Arc<dyn Authority>,
    identity_locks: KeyedMutex,
}

fn csr_error(err: CsrError) -> Error {
    match err {
        CsrError::Validation(issues) => Error::Validation(issues),
        other => Error::Csr(other),
    }
}

/// Signer for the certificate in `credentials` and the identity's CSR key.
pub(crate) fn invoice_signer<T>(
    record: &IdentityRecord,
    credentials: &CsidCredentials<T>,
) -> Result<InvoiceSigner> {
    let key_pem = record.private_key_pem.as_deref().ok_or_else(|| {
        Error::Precondition(format!("no private key stored for {}", record.identity))
    })?;
    let cert_der = credentials.certificate_der()?;
    Ok(InvoiceSigner::from_certificate_der_and_key_pem(&cert_der, key_pem)?)
}

impl Onboarding {
    /// `identity_locks` must be the ones submissions use, so the two never
    /// write the same identity record at once.
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

    async fn load(&self, identity: &IdentityRef) -> Result<IdentityRecord> {
        Ok(self
            .store
            .load_identity(identity)
            .await?
            .unwrap_or_else(|| IdentityRecord::new(identity.clone())))
    }

    /// Current onboarding state, `NO_CSR` for unknown identities.
    pub async fn state(&self, identity: &IdentityRef) -> Result<OnboardingState> {
        Ok(self.load(identity).await?.state)
    }

    /// Derives and stores the CSR configuration for `identity`.
    pub async fn configure_csr(
        &self,
        identity: &IdentityRef,
        profile: &CompanyProfile,
    ) -> Result<CsrProperties> {
        let properties = profile.to_csr_properties().map_err(csr_error)?;
        self.store_csr_config(identity, &properties).await?;
        Ok(properties)
    }

    /// Stores a hand-written `csr-config.properties` file for `identity`.
    pub async fn import_csr_config(
        &self,
        identity: &IdentityRef,
        path: &Path,
    ) -> Result<CsrProperties> {
        let properties = CsrProperties::parse_csr_config(path).map_err(csr_error)?;
        self.store_csr_config(identity, &properties).await?;
        Ok(properties)
    }

    async fn store_csr_config(
        &self,
        identity: &IdentityRef,
        properties: &CsrProperties,
    ) -> Result<()> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut record = self.load(identity).await?;
        record.csr_config = Some(properties.to_properties_string()?);
        self.store.save_identity(&record).await?;
        info!(identity = %identity, "CSR configuration stored");
        Ok(())
    }

    /// Generates a CSR and key pair from the stored configuration.
    ///
    /// Returns the base64 of the PEM request. Any credentials and staged OTP
    /// belonging to the previous CSR are dropped.
    pub async fn create_csr(&self, portal: PortalType, identity: &IdentityRef) -> Result<String> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut record = self.load(identity).await?;
        let config = record.csr_config.as_deref().ok_or_else(|| {
            Error::Precondition(format!(
                "no CSR configuration for {identity}; configure the CSR first"
            ))
        })?;
        let properties = CsrProperties::from_properties_str(config).map_err(csr_error)?;
        let generated = properties.generate(portal)?;
        let pem = generated.to_pem()?;

        record.portal = Some(portal);
        record.private_key_pem = Some(generated.private_key_pem()?);
        record.csr_pem = Some(pem.clone());
        record.staged_otp = None;
        record.compliance = None;
        record.production = None;
        record.state = OnboardingState::CsrCreated;
        self.store.save_identity(&record).await?;

        info!(identity = %identity, %portal, "CSR generated");
        Ok(generated.to_pem_base64()?)
    }

    /// Keeps an OTP for a later [`Onboarding::create_csid`] call without one.
    pub async fn stage_otp(&self, identity: &IdentityRef, otp: &str) -> Result<()> {
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(ValidationError::single(ValidationIssue::missing("otp")).into());
        }
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut record = self.load(identity).await?;
        record.staged_otp = Some(otp.to_string());
        self.store.save_identity(&record).await?;
        info!(identity = %identity, "OTP staged");
        Ok(())
    }

    /// Exchanges the CSR and an OTP for a compliance CSID.
    ///
    /// Returns `base64("{binarySecurityToken}:{secret}")`.
    pub async fn create_csid(
        &self,
        portal: PortalType,
        identity: &IdentityRef,
        otp: Option<&str>,
    ) -> Result<String> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut record = self.load(identity).await?;
        let otp = otp
            .map(str::trim)
            .filter(|otp| !otp.is_empty())
            .map(str::to_string)
            .or_else(|| record.staged_otp.clone())
            .ok_or_else(|| Error::from(ValidationError::single(ValidationIssue::missing("otp"))))?;

        let csr_pem = record.csr_pem.as_deref().ok_or_else(|| {
            Error::Precondition(format!("no CSR for {identity}; create the CSR first"))
        })?;
        match record.portal {
            Some(generated_for) if generated_for != portal => {
                return Err(Error::Precondition(format!(
                    "CSR for {identity} was generated for {generated_for}, not {portal}"
                )));
            }
            _ => {}
        }

        let csr_base64 = Base64::encode_string(csr_pem.as_bytes());
        let ccsid = self
            .authority
            .request_compliance_csid(portal, &csr_base64, &otp)
            .await
            .map_err(|err| {
                warn!(identity = %identity, %portal, error = %err, "compliance CSID request failed");
                Error::from_authority(err, OTP_REFUSED, "OTP invalid or expired")
            })?;

        let blob = ccsid.basic_auth_blob();
        record.compliance = Some(ccsid);
        record.staged_otp = None;
        record.state = OnboardingState::ComplianceIssued;
        self.store.save_identity(&record).await?;

        info!(identity = %identity, %portal, "compliance CSID issued");
        Ok(blob)
    }

    /// Exchanges the compliance CSID for a production CSID.
    pub async fn production_csid(&self, identity: &IdentityRef) -> Result<String> {
        let _guard = self.identity_locks.lock(&identity.storage_key()).await?;
        let mut record = self.load(identity).await?;
        let ccsid = record.compliance.as_ref().ok_or_else(|| {
            Error::Precondition(format!(
                "no compliance CSID for {identity}; complete the OTP exchange first"
            ))
        })?;

        let pcsid = self
            .authority
            .request_production_csid(ccsid)
            .await
            .map_err(|err| {
                warn!(identity = %identity, error = %err, "production CSID request failed");
                Error::from_authority(err, CREDENTIAL_REFUSED, "compliance CSID refused")
            })?;

        let blob = pcsid.basic_auth_blob();
        let portal = pcsid.portal();
        record.production = Some(pcsid);
        record.state = OnboardingState::ProductionIssued;
        self.store.save_identity(&record).await?;

        info!(identity = %identity, %portal, "production CSID issued");
        Ok(blob)
    }
}
