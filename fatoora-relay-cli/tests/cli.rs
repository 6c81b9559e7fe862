use httpmock::prelude::*;
use std::path::Path;
use std::process::{Command, Output};

fn cli_exe() -> &'static str {
    env!("CARGO_BIN_EXE_fatoora-relay")
}

fn run(store: &Path, base_url: Option<&str>, args: &[&str]) -> Output {
    let mut command = Command::new(cli_exe());
    command
        .arg("--store-dir")
        .arg(store)
        .args(args)
        .env_remove("FATOORA_RELAY_CONFIG")
        .env_remove("FATOORA_RELAY_STORE_DIR")
        .env("RUST_LOG", "warn");
    match base_url {
        Some(url) => command.env("FATOORA_RELAY_BASE_URL", url),
        None => command.env_remove("FATOORA_RELAY_BASE_URL"),
    };
    command.output().expect("run fatoora-relay")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn configure(store: &Path) {
    let output = run(
        store,
        None,
        &[
            "configure-csr",
            "--identity",
            "company:ACME",
            "--vat",
            "399999999900003",
            "--company-name",
            "Acme Trading",
            "--city",
            "Riyadh",
            "--business-category",
            "Retail",
            "--standard",
            "--simplified",
        ],
    );
    assert_success(&output, "configure-csr");
    assert!(stdout(&output).contains("TST-886431145-399999999900003"));
}

#[test]
fn onboarding_state_follows_csr_generation() {
    let store = tempfile::tempdir().expect("tempdir");

    let output = run(store.path(), None, &["state", "--identity", "company:ACME"]);
    assert_success(&output, "state");
    assert_eq!(stdout(&output).trim(), "NO_CSR");

    configure(store.path());

    let output = run(
        store.path(),
        None,
        &["create-csr", "--portal", "simulation", "--identity", "company:ACME"],
    );
    assert_success(&output, "create-csr");
    assert!(!stdout(&output).trim().is_empty());

    let output = run(store.path(), None, &["state", "--identity", "company:ACME"]);
    assert_eq!(stdout(&output).trim(), "CSR_CREATED");
}

#[test]
fn imported_csr_config_is_used_for_generation() {
    let store = tempfile::tempdir().expect("tempdir");
    let config = store.path().join("csr-config.properties");
    std::fs::write(
        &config,
        "csr.common.name=TST-886431145-399999999900003\n\
         csr.serial.number=1-TST|2-TST|3-ed22f1d8-e6a2-1118-9b58-d9a8f11e445f\n\
         csr.organization.identifier=399999999900003\n\
         csr.organization.unit.name=Riyadh Branch\n\
         csr.organization.name=Maximum Speed Tech Supply LTD\n\
         csr.country.name=SA\n\
         csr.invoice.type=1100\n\
         csr.location.address=RRRD2929\n\
         csr.industry.business.category=Supply activities\n",
    )
    .expect("write properties");

    let output = run(
        store.path(),
        None,
        &[
            "import-csr-config",
            "--identity",
            "device:POS-9",
            "--file",
            config.to_str().expect("utf-8 path"),
        ],
    );
    assert_success(&output, "import-csr-config");
    assert!(stdout(&output).contains("RRRD2929"));

    let output = run(
        store.path(),
        None,
        &["create-csr", "--portal", "sandbox", "--identity", "device:POS-9"],
    );
    assert_success(&output, "create-csr");
}

#[test]
fn create_csr_without_configuration_fails() {
    let store = tempfile::tempdir().expect("tempdir");
    let output = run(
        store.path(),
        None,
        &["create-csr", "--portal", "sandbox", "--identity", "device:POS-1"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no CSR configuration"));
}

#[test]
fn create_csid_exchanges_staged_otp() {
    let server = MockServer::start();
    let compliance = server.mock(|when, then| {
        when.method(POST)
            .path("/compliance")
            .header("OTP", "123345")
            .header("Accept-Version", "V2");
        then.status(200).json_body(serde_json::json!({
            "requestID": 1234567890123u64,
            "dispositionMessage": "ISSUED",
            "binarySecurityToken": "VE9LRU4=",
            "secret": "s3cret"
        }));
    });

    let store = tempfile::tempdir().expect("tempdir");
    configure(store.path());
    let base = server.base_url();
    let output = run(
        store.path(),
        Some(&base),
        &["create-csr", "--portal", "sandbox", "--identity", "company:ACME"],
    );
    assert_success(&output, "create-csr");

    let output = run(
        store.path(),
        Some(&base),
        &["stage-otp", "--identity", "company:ACME", "--otp", "123345"],
    );
    assert_success(&output, "stage-otp");

    let output = run(
        store.path(),
        Some(&base),
        &["create-csid", "--portal", "sandbox", "--identity", "company:ACME"],
    );
    assert_success(&output, "create-csid");
    // base64("VE9LRU4=:s3cret")
    assert_eq!(stdout(&output).trim(), "VkU5TFJVND06czNjcmV0");
    compliance.assert();

    let output = run(store.path(), None, &["state", "--identity", "company:ACME"]);
    assert_eq!(stdout(&output).trim(), "COMPLIANCE_ISSUED");
}

#[test]
fn create_csid_without_otp_is_a_validation_error() {
    let store = tempfile::tempdir().expect("tempdir");
    configure(store.path());
    let output = run(
        store.path(),
        None,
        &["create-csid", "--portal", "sandbox", "--identity", "company:ACME"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("otp"));
}

#[test]
fn status_of_unknown_invoice_fails() {
    let store = tempfile::tempdir().expect("tempdir");
    let output = run(store.path(), None, &["status", "--invoice", "INV-404"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("INV-404"));
}

#[test]
fn resubmitting_unknown_invoices_reports_failures() {
    let store = tempfile::tempdir().expect("tempdir");
    let output = run(store.path(), None, &["resubmit", "A", "B", "A"]);
    assert_success(&output, "resubmit");
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json report");
    assert_eq!(report["success_count"], 0);
    assert_eq!(report["failed_count"], 2);
    assert_eq!(report["results"][0]["message"], "Invoice not found");
}
