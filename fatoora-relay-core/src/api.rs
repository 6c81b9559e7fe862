//! ZATCA HTTP API client and response types.
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Deserializer, Serialize};
use std::{marker::PhantomData, time::Duration};
use thiserror::Error;

use crate::{
    config::{Config, PortalType},
    invoice::SignedInvoice,
};

/// Errors returned by the ZATCA API client.
#[derive(Error, Debug)]
pub enum ZatcaError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response from ZATCA: {0}")]
    InvalidResponse(String),
    #[error("unauthorized (status {}): {}", .0.status().unwrap_or(401), .0.message().unwrap_or("no message"))]
    Unauthorized(UnauthorizedResponse),
    #[error("server error (status {status}): {}", .body.message().unwrap_or("no message"))]
    ServerError {
        status: u16,
        body: ServerErrorResponse,
    },
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("client state error: {0}")]
    ClientState(String),
}

impl ZatcaError {
    /// Failures that a later resubmission may get past.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ZatcaError::Network(_) | ZatcaError::ServerError { .. } | ZatcaError::Http(_)
        )
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ZatcaError::Unauthorized(body) => body.status().or(Some(401)),
            ZatcaError::ServerError { status, .. } | ZatcaError::Rejected { status, .. } => {
                Some(*status)
            }
            ZatcaError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Marker trait for API token scope, either Compliance (CCSID) or Production (PCSID).
pub trait TokenScope {}
/// Compliance (CCSID) token scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Compliance;
/// Production (PCSID) token scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Production;
impl TokenScope for Compliance {}
impl TokenScope for Production {}

/// API validation response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationResponse {
    #[serde(rename = "validationResults", default)]
    validation_results: ValidationResults,
    #[serde(rename = "reportingStatus", default)]
    reporting_status: Option<String>,
    #[serde(rename = "clearanceStatus", default)]
    clearance_status: Option<String>,
    #[serde(rename = "clearedInvoice", default, skip_serializing_if = "Option::is_none")]
    cleared_invoice: Option<String>,
    #[serde(rename = "qrSellertStatus", default)]
    qr_seller_status: Option<String>,
    #[serde(rename = "qrBuyertStatus", default)]
    qr_buyer_status: Option<String>,
}

impl ValidationResponse {
    pub fn validation_results(&self) -> &ValidationResults {
        &self.validation_results
    }

    pub fn reporting_status(&self) -> Option<&str> {
        self.reporting_status.as_deref()
    }

    pub fn clearance_status(&self) -> Option<&str> {
        self.clearance_status.as_deref()
    }

    /// Base64 XML stamped by the authority, clearance only.
    pub fn cleared_invoice(&self) -> Option<&str> {
        self.cleared_invoice.as_deref()
    }

    pub fn qr_seller_status(&self) -> Option<&str> {
        self.qr_seller_status.as_deref()
    }

    pub fn qr_buyer_status(&self) -> Option<&str> {
        self.qr_buyer_status.as_deref()
    }
}

/// Validation results container.
///
/// The message lists may be absent or `null`; both read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationResults {
    #[serde(rename = "infoMessages", default, deserialize_with = "null_as_default")]
    info_messages: MessageList,
    #[serde(rename = "warningMessages", default, deserialize_with = "null_as_default")]
    warning_messages: Vec<ValidationMessage>,
    #[serde(rename = "errorMessages", default, deserialize_with = "null_as_default")]
    error_messages: Vec<ValidationMessage>,
    #[serde(default)]
    status: Option<String>,
}

impl ValidationResults {
    pub fn new(
        status: Option<String>,
        error_messages: Vec<ValidationMessage>,
        warning_messages: Vec<ValidationMessage>,
    ) -> Self {
        Self {
            info_messages: MessageList::Empty,
            warning_messages,
            error_messages,
            status,
        }
    }

    pub fn info_messages(&self) -> &MessageList {
        &self.info_messages
    }

    pub fn warning_messages(&self) -> &[ValidationMessage] {
        &self.warning_messages
    }

    pub fn error_messages(&self) -> &[ValidationMessage] {
        &self.error_messages
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Validation message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationMessage {
    #[serde(rename = "type", default)]
    message_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl ValidationMessage {
    pub fn new(code: &str, category: Option<&str>, message: &str) -> Self {
        Self {
            message_type: None,
            code: Some(code.to_string()),
            category: category.map(str::to_string),
            message: Some(message.to_string()),
            status: None,
        }
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

/// Message list returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum MessageList {
    One(ValidationMessage),
    Many(Vec<ValidationMessage>),
    #[default]
    Empty,
}

/// Unauthorized response body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnauthorizedResponse {
    timestamp: Option<i64>,
    status: Option<u16>,
    error: Option<String>,
    message: Option<String>,
}

impl UnauthorizedResponse {
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        let mut parsed: UnauthorizedResponse =
            serde_json::from_str(body).unwrap_or_else(|_| UnauthorizedResponse {
                timestamp: None,
                status: Some(status),
                error: Some("Unauthorized".into()),
                message: None,
            });
        if parsed.message.is_none() && !body.trim().is_empty() {
            parsed.message = Some(body.to_string());
        }
        parsed.status.get_or_insert(status);
        parsed
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Server error response body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerErrorResponse {
    category: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

impl ServerErrorResponse {
    pub(crate) fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ServerErrorResponse {
            category: None,
            code: Some("ServerError".into()),
            message: Some(body.to_string()),
        })
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// CSID credentials used for API calls.
///
/// Obtained from [`ZatcaClient::post_csr_for_ccsid`] or
/// [`ZatcaClient::post_ccsid_for_pcsid`], and persisted per identity.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::api::{CsidCredentials, Compliance};
/// use fatoora_relay_core::config::PortalType;
///
/// let creds = CsidCredentials::<Compliance>::new(
///     PortalType::Sandbox,
///     Some(1234567890123),
///     "TUlJQ1BUQ0NBZU9nQXdJQkFnS",
///     "Dehvg1fc8GF6Jwt5bOxXwC6en",
/// );
/// assert_eq!(creds.basic_auth_blob(), "VFVsSlExQlVRME5CWlU5blFYZEpRa0ZuUzpEZWh2ZzFmYzhHRjZKd3Q1Yk94WHdDNmVu");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsidCredentials<T> {
    portal: PortalType,
    request_id: Option<u64>,
    binary_security_token: String,
    secret: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for CsidCredentials<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsidCredentials")
            .field("portal", &self.portal)
            .field("request_id", &self.request_id)
            .field("binary_security_token", &self.binary_security_token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl<T> CsidCredentials<T> {
    pub fn new(
        portal: PortalType,
        request_id: Option<u64>,
        binary_security_token: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            portal,
            request_id,
            binary_security_token: binary_security_token.into(),
            secret: secret.into(),
            _marker: PhantomData,
        }
    }

    pub fn portal(&self) -> PortalType {
        self.portal
    }

    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    pub fn binary_security_token(&self) -> &str {
        &self.binary_security_token
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `base64("{binarySecurityToken}:{secret}")`, the HTTP basic-auth payload.
    pub fn basic_auth_blob(&self) -> String {
        Base64::encode_string(format!("{}:{}", self.binary_security_token, self.secret).as_bytes())
    }

    /// DER certificate carried in the token (base64 of base64 DER).
    pub fn certificate_der(&self) -> Result<Vec<u8>, ZatcaError> {
        let inner = Base64::decode_vec(self.binary_security_token.trim())
            .map_err(|e| ZatcaError::InvalidResponse(format!("token is not base64: {e}")))?;
        let inner = String::from_utf8(inner)
            .map_err(|e| ZatcaError::InvalidResponse(format!("token is not UTF-8: {e}")))?;
        Base64::decode_vec(inner.trim())
            .map_err(|e| ZatcaError::InvalidResponse(format!("certificate is not base64: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct CsidResponseBody {
    #[serde(rename = "requestID")]
    request_id: Option<u64>,
    #[serde(rename = "binarySecurityToken")]
    binary_security_token: String,
    secret: String,
    #[allow(dead_code)]
    #[serde(rename = "tokenType")]
    token_type: Option<String>,
    #[serde(rename = "dispositionMessage")]
    disposition_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CsidResponseEnvelope {
    Direct(CsidResponseBody),
    Wrapped { value: CsidResponseBody },
}

impl CsidResponseEnvelope {
    fn into_body(self) -> CsidResponseBody {
        match self {
            CsidResponseEnvelope::Direct(body) | CsidResponseEnvelope::Wrapped { value: body } => body,
        }
    }
}

/// A document reply: HTTP status, raw body, and the parsed validation response.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityReply {
    pub http_status: u16,
    pub body: String,
    pub response: ValidationResponse,
}

/// The authority endpoints the relay depends on.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn request_compliance_csid(
        &self,
        portal: PortalType,
        csr_pem_base64: &str,
        otp: &str,
    ) -> Result<CsidCredentials<Compliance>, ZatcaError>;

    async fn request_production_csid(
        &self,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<CsidCredentials<Production>, ZatcaError>;

    async fn check_compliance(
        &self,
        invoice: &SignedInvoice,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<AuthorityReply, ZatcaError>;

    async fn report(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError>;

    async fn clear(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError>;
}

/// ZATCA API client.
///
/// # Examples
/// ```rust,no_run
/// use fatoora_relay_core::api::ZatcaClient;
/// use fatoora_relay_core::config::Config;
///
/// let client = ZatcaClient::new(Config::default())?;
/// # let _ = client;
/// # Ok::<(), fatoora_relay_core::api::ZatcaError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ZatcaClient {
    config: Config,
    client: Client,
}

impl ZatcaClient {
    /// # Errors
    /// Returns [`ZatcaError::Http`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, ZatcaError> {
        let client = Client::builder().build().map_err(ZatcaError::Http)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Exchange a CSR and OTP for a compliance CSID.
    pub async fn post_csr_for_ccsid(
        &self,
        portal: PortalType,
        csr_pem_base64: &str,
        otp: &str,
    ) -> Result<CsidCredentials<Compliance>, ZatcaError> {
        let payload = serde_json::json!({ "csr": csr_pem_base64 });
        let request = self
            .post(portal, "compliance", self.config.onboarding_timeout())
            .header("OTP", otp)
            .json(&payload);
        let (status, body) = send(request).await?;
        tracing::debug!(%portal, status, "compliance CSID reply");
        csid_from_reply(portal, status, &body)
    }

    /// Exchange a compliance CSID for a production CSID.
    pub async fn post_ccsid_for_pcsid(
        &self,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<CsidCredentials<Production>, ZatcaError> {
        let request_id = ccsid.request_id().ok_or_else(|| {
            ZatcaError::ClientState("missing compliance request_id for production CSID".into())
        })?;
        let payload = serde_json::json!({ "compliance_request_id": request_id.to_string() });
        let request = self
            .post(ccsid.portal(), "production/csids", self.config.onboarding_timeout())
            .basic_auth(ccsid.binary_security_token(), Some(ccsid.secret()))
            .json(&payload);
        let (status, body) = send(request).await?;
        tracing::debug!(portal = %ccsid.portal(), status, "production CSID reply");
        csid_from_reply(ccsid.portal(), status, &body)
    }

    /// Submit a sample invoice to the compliance checker.
    pub async fn check_invoice_compliance(
        &self,
        invoice: &SignedInvoice,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<AuthorityReply, ZatcaError> {
        let request = self
            .post(ccsid.portal(), "compliance/invoices", self.config.invoice_timeout())
            .basic_auth(ccsid.binary_security_token(), Some(ccsid.secret()))
            .json(&invoice_payload(invoice));
        let (status, body) = send(request).await?;
        tracing::debug!(uuid = invoice.uuid(), status, "compliance check reply");
        document_reply(status, body)
    }

    /// Report a simplified invoice.
    pub async fn report_simplified_invoice(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        if !invoice.data().invoice_type().is_simplified() {
            return Err(ZatcaError::ClientState(
                "reporting only supports simplified invoices".into(),
            ));
        }
        let request = self
            .post(pcsid.portal(), "invoices/reporting/single", self.config.invoice_timeout())
            .header("Clearance-Status", "0")
            .basic_auth(pcsid.binary_security_token(), Some(pcsid.secret()))
            .json(&invoice_payload(invoice));
        let (status, body) = send(request).await?;
        tracing::debug!(uuid = invoice.uuid(), status, "reporting reply");
        document_reply(status, body)
    }

    /// Clear a standard invoice.
    pub async fn clear_standard_invoice(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        if invoice.data().invoice_type().is_simplified() {
            return Err(ZatcaError::ClientState(
                "clearance only supports standard invoices".into(),
            ));
        }
        let request = self
            .post(pcsid.portal(), "invoices/clearance/single", self.config.invoice_timeout())
            .header("Clearance-Status", "1")
            .basic_auth(pcsid.binary_security_token(), Some(pcsid.secret()))
            .json(&invoice_payload(invoice));
        let (status, body) = send(request).await?;
        tracing::debug!(uuid = invoice.uuid(), status, "clearance reply");
        document_reply(status, body)
    }

    fn post(&self, portal: PortalType, path: &str, timeout: Duration) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url(portal), path);
        tracing::debug!(%portal, %url, "POST");
        let language = if self.config.accept_language == "ar" { "ar" } else { "en" };
        self.client
            .post(url)
            .timeout(timeout)
            .header("Accept", "application/json")
            .header("Accept-Version", "V2")
            .header("accept-language", language)
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Authority for ZatcaClient {
    async fn request_compliance_csid(
        &self,
        portal: PortalType,
        csr_pem_base64: &str,
        otp: &str,
    ) -> Result<CsidCredentials<Compliance>, ZatcaError> {
        self.post_csr_for_ccsid(portal, csr_pem_base64, otp).await
    }

    async fn request_production_csid(
        &self,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<CsidCredentials<Production>, ZatcaError> {
        self.post_ccsid_for_pcsid(ccsid).await
    }

    async fn check_compliance(
        &self,
        invoice: &SignedInvoice,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<AuthorityReply, ZatcaError> {
        self.check_invoice_compliance(invoice, ccsid).await
    }

    async fn report(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        self.report_simplified_invoice(invoice, pcsid).await
    }

    async fn clear(
        &self,
        invoice: &SignedInvoice,
        pcsid: &CsidCredentials<Production>,
    ) -> Result<AuthorityReply, ZatcaError> {
        self.clear_standard_invoice(invoice, pcsid).await
    }
}

fn invoice_payload(invoice: &SignedInvoice) -> serde_json::Value {
    serde_json::json!({
        "invoiceHash": invoice.invoice_hash(),
        "uuid": invoice.uuid(),
        "invoice": invoice.to_xml_base64(),
    })
}

async fn send(request: RequestBuilder) -> Result<(u16, String), ZatcaError> {
    let response: Response = request.send().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ZatcaError::Network(e.to_string())
        } else {
            ZatcaError::Http(e)
        }
    })?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ZatcaError::Network(format!("failed reading response body: {e}")))?;
    Ok((status, body))
}

fn document_reply(status: u16, body: String) -> Result<AuthorityReply, ZatcaError> {
    match status {
        200 | 202 | 400 | 409 => match serde_json::from_str::<ValidationResponse>(&body) {
            Ok(response) => Ok(AuthorityReply {
                http_status: status,
                body,
                response,
            }),
            Err(e) => Err(ZatcaError::InvalidResponse(format!(
                "status {status}: {e}: {body}"
            ))),
        },
        401 | 403 | 407 | 451 => Err(ZatcaError::Unauthorized(UnauthorizedResponse::from_body(
            status, &body,
        ))),
        s if s >= 500 => Err(ZatcaError::ServerError {
            status,
            body: ServerErrorResponse::from_body(&body),
        }),
        _ => Err(ZatcaError::Rejected { status, body }),
    }
}

fn csid_from_reply<T>(
    portal: PortalType,
    status: u16,
    body: &str,
) -> Result<CsidCredentials<T>, ZatcaError> {
    match status {
        200 => {
            let parsed = serde_json::from_str::<CsidResponseEnvelope>(body)
                .map_err(|e| ZatcaError::InvalidResponse(format!("status {status}: {e}: {body}")))?
                .into_body();
            if let Some(message) = parsed.disposition_message.as_deref() {
                tracing::debug!(%portal, disposition = message, "CSID issued");
            }
            Ok(CsidCredentials::new(
                portal,
                parsed.request_id,
                parsed.binary_security_token,
                parsed.secret,
            ))
        }
        401 | 403 => Err(ZatcaError::Unauthorized(UnauthorizedResponse::from_body(
            status, body,
        ))),
        s if s >= 500 => Err(ZatcaError::ServerError {
            status,
            body: ServerErrorResponse::from_body(body),
        }),
        _ => Err(ZatcaError::Rejected {
            status,
            body: body.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_validation_response_with_info_object() {
        let payload = r#"{
          "validationResults": {
            "infoMessages": {
              "type": "INFO",
              "code": "XSD_ZATCA_VALID",
              "category": "XSD validation",
              "message": "Complied with UBL 2.1 standards in line with ZATCA specifications",
              "status": "PASS"
            },
            "warningMessages": [],
            "errorMessages": [],
            "status": "PASS"
          },
          "reportingStatus": "REPORTED",
          "clearanceStatus": null,
          "qrSellertStatus": null,
          "qrBuyertStatus": null
        }"#;

        let parsed: ValidationResponse = serde_json::from_str(payload).expect("deserialize");
        match parsed.validation_results.info_messages {
            MessageList::One(ref msg) => {
                assert_eq!(msg.code.as_deref(), Some("XSD_ZATCA_VALID"))
            }
            ref other => panic!("expected single info message, got {:?}", other),
        }
        assert_eq!(parsed.reporting_status(), Some("REPORTED"));
        assert_eq!(parsed.validation_results().status(), Some("PASS"));
    }

    #[test]
    fn null_message_lists_read_as_empty() {
        let payload = r#"{
          "validationResults": {
            "infoMessages": null,
            "warningMessages": [{"code": "BR-KSA-08", "message": "seller id"}],
            "errorMessages": null,
            "status": "WARNING"
          },
          "clearanceStatus": "CLEARED"
        }"#;

        let parsed: ValidationResponse = serde_json::from_str(payload).expect("deserialize");
        let results = parsed.validation_results();
        assert_eq!(results.info_messages(), &MessageList::Empty);
        assert!(results.error_messages().is_empty());
        assert_eq!(results.warning_messages().len(), 1);

        let reply = document_reply(202, payload.to_string()).expect("accepted reply");
        assert_eq!(reply.response.clearance_status(), Some("CLEARED"));
    }

    #[test]
    fn document_reply_status_mapping() {
        let body = r#"{"validationResults":{"status":"ERROR","errorMessages":[{"code":"E1","category":"C","message":"m"}]}}"#;
        let reply = document_reply(400, body.to_string()).expect("400 carries results");
        assert_eq!(reply.http_status, 400);
        assert_eq!(reply.response.validation_results().error_messages().len(), 1);

        assert!(matches!(
            document_reply(401, "{}".into()),
            Err(ZatcaError::Unauthorized(_))
        ));
        let err = document_reply(503, "busy".into()).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.http_status(), Some(503));
        assert!(matches!(
            document_reply(406, "wrong version".into()),
            Err(ZatcaError::Rejected { status: 406, .. })
        ));
        assert!(matches!(
            document_reply(200, "not json".into()),
            Err(ZatcaError::InvalidResponse(_))
        ));
    }

    #[test]
    fn csid_reply_accepts_wrapped_body() {
        let body = r#"{"value":{"requestID":7,"binarySecurityToken":"dG9r","secret":"s","tokenType":"t","dispositionMessage":"ISSUED"}}"#;
        let creds: CsidCredentials<Production> =
            csid_from_reply(PortalType::Simulation, 200, body).expect("wrapped body parses");
        assert_eq!(creds.request_id(), Some(7));
        assert_eq!(creds.portal(), PortalType::Simulation);
        assert_eq!(creds.secret(), "s");
    }

    #[test]
    fn csid_reply_400_is_rejected_verbatim() {
        let err = csid_from_reply::<Compliance>(
            PortalType::Sandbox,
            400,
            r#"{"errors":["Invalid-OTP"]}"#,
        )
        .unwrap_err();
        match err {
            ZatcaError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("Invalid-OTP"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = CsidCredentials::<Compliance>::new(PortalType::Sandbox, None, "tok", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn certificate_der_unwraps_double_base64() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        let token = Base64::encode_string(Base64::encode_string(&der).as_bytes());
        let creds = CsidCredentials::<Compliance>::new(PortalType::Sandbox, None, token, "s");
        assert_eq!(creds.certificate_der().expect("decodes"), der);
    }
}
