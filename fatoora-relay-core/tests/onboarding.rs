mod common;

use common::{company, source, FakeAuthority, Scripted};
use fatoora_relay_core::{
    config::{Config, PortalType},
    csr::{CompanyProfile, InvoiceCapabilities},
    identity::IdentityRef,
    invoice::InvoiceSubType,
    store::{MemoryStore, OnboardingState, Store},
    ErrorKind, Relay,
};
use std::sync::Arc;

fn profile() -> CompanyProfile {
    CompanyProfile {
        vat_number: "399999999900003".into(),
        company_name: "Acme Trading".into(),
        city: "Riyadh".into(),
        business_category: "Retail".into(),
        capabilities: InvoiceCapabilities::STANDARD | InvoiceCapabilities::SIMPLIFIED,
    }
}

fn relay() -> (Relay, Arc<MemoryStore>, Arc<FakeAuthority>) {
    let store = Arc::new(MemoryStore::new());
    let authority = Arc::new(FakeAuthority::new());
    let relay = Relay::new(Config::default(), store.clone(), authority.clone());
    (relay, store, authority)
}

#[tokio::test]
async fn full_onboarding_flow_then_submission() {
    let (relay, store, authority) = relay();
    let identity = company();
    assert_eq!(
        relay.onboarding_state(&identity).await.unwrap(),
        OnboardingState::NoCsr
    );

    relay.configure_csr(&identity, &profile()).await.unwrap();
    let csr = relay
        .create_csr(PortalType::Simulation, &identity)
        .await
        .unwrap();
    assert!(!csr.is_empty());
    assert_eq!(
        relay.onboarding_state(&identity).await.unwrap(),
        OnboardingState::CsrCreated
    );

    relay.stage_otp(&identity, " 123345 ").await.unwrap();
    let ccsid = relay
        .create_csid(PortalType::Simulation, &identity, None)
        .await
        .unwrap();
    assert!(!ccsid.is_empty());
    assert_eq!(authority.otps(), vec!["123345".to_string()]);
    assert_eq!(
        relay.onboarding_state(&identity).await.unwrap(),
        OnboardingState::ComplianceIssued
    );
    let record = store.load_identity(&identity).await.unwrap().unwrap();
    assert_eq!(record.staged_otp, None);

    relay.production_csid(&identity).await.unwrap();
    assert_eq!(
        relay.onboarding_state(&identity).await.unwrap(),
        OnboardingState::ProductionIssued
    );

    let outcome = relay
        .zatca_background("INV-1", Some(source("INV-1", InvoiceSubType::Simplified)))
        .await
        .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn explicit_otp_wins_over_staged_one() {
    let (relay, _, authority) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    relay.stage_otp(&identity, "111111").await.unwrap();

    relay
        .create_csid(PortalType::Sandbox, &identity, Some("222222"))
        .await
        .unwrap();
    assert_eq!(authority.otps(), vec!["222222".to_string()]);
}

#[tokio::test]
async fn create_csr_requires_configuration() {
    let (relay, _, _) = relay();
    let err = relay
        .create_csr(PortalType::Sandbox, &IdentityRef::device("POS-1"))
        .await
        .expect_err("no configuration");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn invalid_profile_is_a_validation_error() {
    let (relay, _, _) = relay();
    let mut bad = profile();
    bad.vat_number = "39999".into();
    bad.company_name.clear();
    let err = relay
        .configure_csr(&company(), &bad)
        .await
        .expect_err("invalid profile");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn empty_otp_is_rejected() {
    let (relay, _, _) = relay();
    let err = relay.stage_otp(&company(), "   ").await.expect_err("empty");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("otp"));
}

#[tokio::test]
async fn create_csid_without_csr_is_a_precondition_failure() {
    let (relay, _, _) = relay();
    let err = relay
        .create_csid(PortalType::Sandbox, &company(), Some("123345"))
        .await
        .expect_err("no CSR");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn create_csid_for_other_portal_is_refused() {
    let (relay, _, authority) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();

    let err = relay
        .create_csid(PortalType::Production, &identity, Some("123345"))
        .await
        .expect_err("portal mismatch");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(authority.otps().is_empty());
}

#[tokio::test]
async fn refused_otp_is_an_authentication_failure() {
    let (relay, _, authority) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    authority.fail_ccsid(Scripted::Rejected {
        status: 400,
        body: "Invalid OTP".into(),
    });

    let err = relay
        .create_csid(PortalType::Sandbox, &identity, Some("000000"))
        .await
        .expect_err("refused");
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("OTP invalid or expired"));
    assert_eq!(
        relay.onboarding_state(&identity).await.unwrap(),
        OnboardingState::CsrCreated
    );
}

#[tokio::test]
async fn transport_failure_during_csid_exchange() {
    let (relay, _, authority) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    authority.fail_ccsid(Scripted::Network("dns failure".into()));

    let err = relay
        .create_csid(PortalType::Sandbox, &identity, Some("123345"))
        .await
        .expect_err("transport");
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn production_csid_requires_compliance_csid() {
    let (relay, _, _) = relay();
    let err = relay
        .production_csid(&company())
        .await
        .expect_err("no CCSID");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn regenerating_csr_drops_credentials() {
    let (relay, store, _) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    relay
        .create_csid(PortalType::Sandbox, &identity, Some("123345"))
        .await
        .unwrap();
    relay.production_csid(&identity).await.unwrap();

    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    let record = store.load_identity(&identity).await.unwrap().unwrap();
    assert_eq!(record.state, OnboardingState::CsrCreated);
    assert!(record.compliance.is_none());
    assert!(record.production.is_none());
}

#[tokio::test]
async fn regenerating_csr_discards_staged_otp() {
    let (relay, store, authority) = relay();
    let identity = company();
    relay.configure_csr(&identity, &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    relay.stage_otp(&identity, "123345").await.unwrap();

    relay.create_csr(PortalType::Sandbox, &identity).await.unwrap();
    let record = store.load_identity(&identity).await.unwrap().unwrap();
    assert_eq!(record.staged_otp, None);

    let err = relay
        .create_csid(PortalType::Sandbox, &identity, None)
        .await
        .expect_err("staged OTP belonged to the old CSR");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(authority.otps().is_empty());
}

#[tokio::test]
async fn identities_are_independent() {
    let (relay, _, _) = relay();
    let device = IdentityRef::device("POS-1");
    relay.configure_csr(&company(), &profile()).await.unwrap();
    relay.create_csr(PortalType::Sandbox, &company()).await.unwrap();

    assert_eq!(
        relay.onboarding_state(&device).await.unwrap(),
        OnboardingState::NoCsr
    );
}
