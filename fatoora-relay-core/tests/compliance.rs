mod common;

use common::{company, harness, source, Scripted, FAILED_BODY};
use fatoora_relay_core::{
    compliance::ComplianceType, config::Config, invoice::InvoiceSubType, store::Store, ErrorKind,
};

#[tokio::test]
async fn all_six_checks_run_in_order() {
    let h = harness(Config::default()).await;
    h.relay
        .store_source(source("INV-1", InvoiceSubType::Standard))
        .await
        .unwrap();

    let results = h.relay.compliance_all("INV-1", &company()).await.unwrap();

    assert_eq!(
        results
            .iter()
            .map(|result| result.compliance_type.number())
            .collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
    assert!(results.iter().all(|result| result.passed));

    let calls = h.authority.calls();
    let codes: Vec<&str> = calls.iter().map(|call| call.type_code.as_str()).collect();
    assert_eq!(codes, vec!["388", "388", "381", "381", "383", "383"]);
    assert!(calls.iter().all(|call| call.endpoint == "compliance"));
    // each sample gets its own UUID but all sit on the current chain head
    assert!(calls.iter().all(|call| call.icv == 1));
}

#[tokio::test]
async fn compliance_never_moves_the_chain() {
    let h = harness(Config::default()).await;
    h.relay
        .store_source(source("INV-1", InvoiceSubType::Simplified))
        .await
        .unwrap();
    h.relay.compliance_all("INV-1", &company()).await.unwrap();

    let identity = h.store.load_identity(&company()).await.unwrap().unwrap();
    assert_eq!(identity.invoice_counter, 0);
    let invoice = h.relay.invoice_status("INV-1").await.unwrap().unwrap();
    assert!(invoice.history.is_empty());
}

#[tokio::test]
async fn failing_check_does_not_stop_the_rest() {
    let h = harness(Config::default()).await;
    h.relay
        .store_source(source("INV-1", InvoiceSubType::Standard))
        .await
        .unwrap();
    h.authority.script_compliance(Scripted::reply(200, common::PASS_BODY));
    h.authority.script_compliance(Scripted::reply(400, FAILED_BODY));
    h.authority
        .script_compliance(Scripted::Network("connection refused".into()));

    let results = h.relay.compliance_all("INV-1", &company()).await.unwrap();

    assert_eq!(results.len(), 6);
    assert!(results[0].passed);
    assert!(!results[1].passed);
    assert_eq!(results[1].errors.len(), 1);
    assert_eq!(results[1].http_status, Some(400));
    assert!(!results[2].passed);
    assert!(results[2]
        .message
        .as_deref()
        .is_some_and(|message| message.contains("connection refused")));
    assert!(results[3..].iter().all(|result| result.passed));
}

#[tokio::test]
async fn single_check_uses_requested_type() {
    let h = harness(Config::default()).await;
    h.relay
        .store_source(source("INV-1", InvoiceSubType::Standard))
        .await
        .unwrap();

    let result = h
        .relay
        .zatca_call_compliance("INV-1", ComplianceType::SimplifiedDebitNote, &company())
        .await
        .unwrap();

    assert_eq!(result.compliance_type, ComplianceType::SimplifiedDebitNote);
    assert!(result.passed);
    assert_eq!(result.reporting_status.as_deref(), Some("REPORTED"));
    let calls = h.authority.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].type_code, "383");
}

#[tokio::test]
async fn unknown_invoice_is_a_precondition_failure() {
    let h = harness(Config::default()).await;
    let err = h
        .relay
        .compliance_all("MISSING", &company())
        .await
        .expect_err("no stored invoice");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn compliance_requires_compliance_credential() {
    let h = harness(Config::default()).await;
    let mut identity = h.store.load_identity(&company()).await.unwrap().unwrap();
    identity.compliance = None;
    h.store.save_identity(&identity).await.unwrap();
    h.relay
        .store_source(source("INV-1", InvoiceSubType::Standard))
        .await
        .unwrap();

    let err = h
        .relay
        .zatca_call_compliance("INV-1", ComplianceType::StandardInvoice, &company())
        .await
        .expect_err("no compliance CSID");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("compliance CSID"));
}
