#![allow(dead_code)]

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{TimeZone, Utc};
use fatoora_relay_core::{
    api::{
        Authority, AuthorityReply, Compliance, CsidCredentials, Production, ValidationResponse,
        ZatcaError,
    },
    config::{Config, PortalType},
    identity::IdentityRef,
    invoice::{
        DocumentKind, InvoiceSubType, SignedInvoice, SourceAddress, SourceFlags, SourceInvoice,
        SourceLine, SourceParty, VatCategory,
    },
    store::{IdentityRecord, MemoryStore, OnboardingState, Store},
    Relay,
};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::pkcs8::EncodePrivateKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

pub const PASS_BODY: &str = r#"{"validationResults":{"status":"PASS","infoMessages":[],"warningMessages":[],"errorMessages":[]},"reportingStatus":"REPORTED","clearanceStatus":null}"#;
pub const CLEARED_BODY: &str = r#"{"validationResults":{"status":"PASS","infoMessages":[],"warningMessages":[],"errorMessages":[]},"reportingStatus":null,"clearanceStatus":"CLEARED","clearedInvoice":"PEludm9pY2UvPg=="}"#;
pub const WARNING_BODY: &str = r#"{"validationResults":{"status":"WARNING","infoMessages":[],"warningMessages":[{"type":"WARNING","code":"BR-KSA-08","category":"KSA","message":"seller id","status":"WARNING"}],"errorMessages":[]},"reportingStatus":null,"clearanceStatus":"CLEARED"}"#;
pub const FAILED_BODY: &str = r#"{"validationResults":{"status":"ERROR","infoMessages":[],"warningMessages":[],"errorMessages":[{"type":"ERROR","code":"BR-KSA-37","category":"KSA","message":"seller address","status":"ERROR"}]},"reportingStatus":"NOT_REPORTED","clearanceStatus":null}"#;
pub const DUPLICATE_BODY: &str = r#"{"validationResults":{"status":"ERROR","infoMessages":[],"warningMessages":[],"errorMessages":[{"type":"ERROR","code":"Invoice-Errors","category":"Duplicate-Invoice","message":"already submitted","status":"ERROR"}]},"reportingStatus":"REPORTED","clearanceStatus":null}"#;

/// Self-signed test certificate and the PKCS#8 PEM of its key.
pub struct TestCredentials {
    pub certificate_der: Vec<u8>,
    pub key_pem: String,
}

impl TestCredentials {
    pub fn generate() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let subject = Name::from_str("CN=Relay Test,O=Acme,C=SA").expect("subject");
        let spki = SubjectPublicKeyInfoOwned::from_key(VerifyingKey::from(&key)).expect("spki");
        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(77u32),
            Validity::from_now(Duration::from_secs(3600)).expect("validity"),
            subject,
            spki,
            &key,
        )
        .expect("builder");
        let certificate_der = builder
            .build::<k256::ecdsa::DerSignature>()
            .expect("certificate")
            .to_der()
            .expect("der");
        let key_pem = key
            .to_pkcs8_pem(Default::default())
            .expect("key pem")
            .to_string();
        Self {
            certificate_der,
            key_pem,
        }
    }

    /// `binarySecurityToken` form: base64 of the base64 DER.
    pub fn token(&self) -> String {
        let inner = Base64::encode_string(&self.certificate_der);
        Base64::encode_string(inner.as_bytes())
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply { status: u16, body: String },
    Network(String),
    Rejected { status: u16, body: String },
}

impl Scripted {
    pub fn reply(status: u16, body: &str) -> Self {
        Scripted::Reply {
            status,
            body: body.to_string(),
        }
    }

    fn into_result(self) -> Result<AuthorityReply, ZatcaError> {
        match self {
            Scripted::Reply { status, body } => {
                let response: ValidationResponse =
                    serde_json::from_str(&body).expect("scripted body is a validation response");
                Ok(AuthorityReply {
                    http_status: status,
                    body,
                    response,
                })
            }
            Scripted::Network(message) => Err(ZatcaError::Network(message)),
            Scripted::Rejected { status, body } => Err(ZatcaError::Rejected { status, body }),
        }
    }
}

/// One document call the fake saw.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCall {
    pub endpoint: &'static str,
    pub invoice: String,
    pub type_code: String,
    pub icv: u64,
    pub pih: String,
    pub invoice_hash: String,
}

/// Scripted in-process authority.
///
/// Document replies are taken per invoice number from a queue; an empty queue
/// answers PASS (REPORTED or CLEARED by endpoint).
pub struct FakeAuthority {
    credentials: TestCredentials,
    documents: Mutex<HashMap<String, VecDeque<Scripted>>>,
    compliance_replies: Mutex<VecDeque<Scripted>>,
    ccsid_failure: Mutex<Option<Scripted>>,
    calls: Mutex<Vec<DocumentCall>>,
    otps: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self {
            credentials: TestCredentials::generate(),
            documents: Mutex::new(HashMap::new()),
            compliance_replies: Mutex::new(VecDeque::new()),
            ccsid_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            otps: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn script(&self, invoice: &str, reply: Scripted) {
        self.documents
            .lock()
            .entry(invoice.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn script_compliance(&self, reply: Scripted) {
        self.compliance_replies.lock().push_back(reply);
    }

    pub fn fail_ccsid(&self, reply: Scripted) {
        *self.ccsid_failure.lock() = Some(reply);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<DocumentCall> {
        self.calls.lock().clone()
    }

    pub fn otps(&self) -> Vec<String> {
        self.otps.lock().clone()
    }

    fn record(&self, endpoint: &'static str, invoice: &SignedInvoice) {
        let data = invoice.data();
        self.calls.lock().push(DocumentCall {
            endpoint,
            invoice: data.id().to_string(),
            type_code: data.invoice_type().code().to_string(),
            icv: data.invoice_counter(),
            pih: data.previous_invoice_hash().to_string(),
            invoice_hash: invoice.invoice_hash().to_string(),
        });
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_document(&self, invoice: &SignedInvoice, default: &str) -> Scripted {
        self.documents
            .lock()
            .get_mut(invoice.data().id())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Scripted::reply(200, default))
    }
}

#[async_trait]
impl Authority for FakeAuthority {
    async fn request_compliance_csid(
        &self,
        portal: PortalType,
        _csr_pem_base64: &str,
        otp: &str,
    ) -> Result<CsidCredentials<Compliance>, ZatcaError> {
        self.otps.lock().push(otp.to_string());
        let failure = self.ccsid_failure.lock().clone();
        if let Some(failure) = failure {
            return Err(failure
                .into_result()
                .err()
                .unwrap_or_else(|| ZatcaError::ClientState("scripted".into())));
        }
        Ok(CsidCredentials::new(
            portal,
            Some(1234567890123),
            self.credentials.token(),
            "compliance-secret",
        ))
    }

    async fn request_production_csid(
        &self,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<CsidCredentials<Production>, ZatcaError> {
        Ok(CsidCredentials::new(
            ccsid.portal(),
            Some(987),
            self.credentials.token(),
            "production-secret",
        ))
    }

    async fn check_compliance(
        &self,
        invoice: &SignedInvoice,
        _ccsid: &CsidCredentials<Compliance>,
    ) -> Result<AuthorityReply, ZatcaError> {
        let simplified = invoice.data().invoice_type().is_simplified();
        self.record("compliance", invoice);
        let scripted = self.compliance_replies.lock().pop_front();
        scripted
            .unwrap_or_else(|| {
                Scripted::reply(200, if simplified { PASS_BODY } else { CLEARED_BODY })
            })
            .into_result()
    }

    async fn report(
        &self,
        invoice: &SignedInvoice,
        _pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        self.pause().await;
        self.record("reporting", invoice);
        self.next_document(invoice, PASS_BODY).into_result()
    }

    async fn clear(
        &self,
        invoice: &SignedInvoice,
        _pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        self.pause().await;
        self.record("clearance", invoice);
        self.next_document(invoice, CLEARED_BODY).into_result()
    }
}

pub fn company() -> IdentityRef {
    IdentityRef::company("ACME")
}

pub fn party(vat: &str) -> SourceParty {
    SourceParty {
        name: "Acme Trading".into(),
        vat_number: Some(vat.into()),
        other_id: Some("1010010000".into()),
        other_id_scheme: Some("CRN".into()),
        address: SourceAddress {
            street: "Prince Sultan".into(),
            additional_street: None,
            building_number: "2322".into(),
            additional_number: None,
            city: "Riyadh".into(),
            postal_code: "23333".into(),
            district: Some("Al-Murabba".into()),
            country_code: "SA".into(),
        },
    }
}

pub fn source(number: &str, subtype: InvoiceSubType) -> SourceInvoice {
    SourceInvoice {
        invoice_number: number.into(),
        identity: company(),
        issue_datetime: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        currency: "SAR".into(),
        document: DocumentKind::Invoice,
        subtype,
        billing_reference: None,
        reason: None,
        seller: party("399999999900003"),
        buyer: Some(party("300000000000003")),
        lines: vec![SourceLine {
            name: "Coffee".into(),
            quantity: 2.0,
            unit_code: "PCE".into(),
            unit_price: 10.0,
            vat_rate: 15.0,
            vat_category: VatCategory::Standard,
        }],
        payment_means_code: "10".into(),
        note: None,
        discount: 0.0,
        allowance_reason: None,
        flags: SourceFlags::default(),
    }
}

/// Identity that already holds a key and both credentials.
pub async fn onboarded_identity(store: &dyn Store, authority: &FakeAuthority) {
    let mut record = IdentityRecord::new(company());
    record.state = OnboardingState::ProductionIssued;
    record.portal = Some(PortalType::Sandbox);
    record.private_key_pem = Some(authority.credentials.key_pem.clone());
    record.compliance = Some(CsidCredentials::new(
        PortalType::Sandbox,
        Some(1),
        authority.credentials.token(),
        "c",
    ));
    record.production = Some(CsidCredentials::new(
        PortalType::Sandbox,
        Some(2),
        authority.credentials.token(),
        "p",
    ));
    store.save_identity(&record).await.expect("save identity");
}

pub struct Harness {
    pub relay: Relay,
    pub store: Arc<MemoryStore>,
    pub authority: Arc<FakeAuthority>,
}

pub async fn harness(config: Config) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let authority = Arc::new(FakeAuthority::new());
    onboarded_identity(store.as_ref(), &authority).await;
    let relay = Relay::new(config, store.clone(), authority.clone());
    Harness {
        relay,
        store,
        authority,
    }
}
