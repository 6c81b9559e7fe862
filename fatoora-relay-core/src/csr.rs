//! CSR configuration and generation.
use crate::config::PortalType;
use crate::validation::{ValidationError, ValidationIssue, ValidationKind};
use base64ct::{Base64, Encoding};
use bitflags::bitflags;
use fatoora_relay_derive::Validate;
use java_properties::{read, PropertiesError, PropertiesWriter};
use k256::{
    ecdsa::{DerSignature, SigningKey},
    pkcs8::{EncodePrivateKey, LineEnding},
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use uuid::Uuid;
use x509_cert::{
    builder::{Builder, RequestBuilder},
    der::{
        asn1::PrintableStringRef, Encode, EncodePem, Error as DerError, Length,
        Result as DerResult, Writer,
    },
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        AsExtension, Extension,
    },
    name::Name,
    request::CertReq,
};

/// Vendor prefix of the CSR common name.
const COMMON_NAME_PREFIX: &str = "TST-886431145-";
/// Fixed solution/model segments of the CSR serial number.
const SERIAL_TEMPLATE: &str = "1-TST|2-TST|3-";
const COUNTRY: &str = "SA";

/// Errors that can occur while generating or validating CSRs.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("failed to open CSR config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSR properties: {source}")]
    PropertiesRead {
        #[source]
        source: PropertiesError,
    },

    #[error("failed to write CSR properties: {source}")]
    PropertiesWrite {
        #[source]
        source: PropertiesError,
    },

    #[error("missing required CSR property '{key}'")]
    MissingProperty { key: String },

    #[error("invalid subject distinguished name constructed from provided fields: {message}")]
    InvalidSubject { message: String },

    #[error("invalid Subject Alternative Name (SAN) from fields: {message}")]
    InvalidSan { message: String },

    #[error("failed to construct CSR request: {message}")]
    RequestBuild { message: String },

    #[error("failed adding CSR extension '{which}': {message}")]
    AddExtension {
        which: &'static str,
        message: String,
    },

    #[error("failed to build CSR: {message}")]
    CsrBuild { message: String },

    #[error("failed DER encoding for {context}: {source}")]
    DerEncode {
        context: &'static str,
        #[source]
        source: DerError,
    },

    #[error("failed to encode private key: {message}")]
    KeyEncode { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

bitflags! {
    /// Invoice kinds the onboarded unit will issue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InvoiceCapabilities: u8 {
        const STANDARD = 0b01;
        const SIMPLIFIED = 0b10;
    }
}

impl InvoiceCapabilities {
    /// Four-digit `title` value: standard, simplified, then two reserved zeros.
    pub fn as_invoice_type(&self) -> String {
        let digit = |flag| if self.contains(flag) { '1' } else { '0' };
        format!("{}{}00", digit(Self::STANDARD), digit(Self::SIMPLIFIED))
    }
}

/// Company facts needed to derive a CSR configuration.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::csr::{CompanyProfile, InvoiceCapabilities};
///
/// let profile = CompanyProfile {
///     vat_number: "399999999900003".into(),
///     company_name: "Maximum Speed Tech Supply LTD".into(),
///     city: "Riyadh".into(),
///     business_category: "Supply activities".into(),
///     capabilities: InvoiceCapabilities::all(),
/// };
/// let props = profile.to_csr_properties()?;
/// assert_eq!(props.invoice_type(), "1100");
/// assert_eq!(props.location_address(), "RIYADH");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(ValidationError)]
pub struct CompanyProfile {
    #[validate(non_empty, digits)]
    pub vat_number: String,
    #[validate(non_empty)]
    pub company_name: String,
    #[validate(non_empty)]
    pub city: String,
    #[validate(non_empty)]
    pub business_category: String,
    #[validate(skip)]
    pub capabilities: InvoiceCapabilities,
}

impl CompanyProfile {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = match self.validate() {
            Ok(()) => Vec::new(),
            Err(err) => err.issues,
        };
        let vat = self.vat_number.trim();
        if !vat.is_empty() && vat.chars().all(|c| c.is_ascii_digit()) && vat.len() != 15 {
            issues.push(ValidationIssue::new(
                "vat_number",
                ValidationKind::InvalidFormat,
                "must be 15 digits",
            ));
        }
        if self.capabilities.is_empty() {
            issues.push(ValidationIssue::new(
                "capabilities",
                ValidationKind::Missing,
                "must include standard or simplified invoices",
            ));
        }
        issues
    }

    /// Derive the CSR configuration. A fresh serial segment is drawn on every call.
    pub fn to_csr_properties(&self) -> Result<CsrProperties, CsrError> {
        ValidationError::check(self.issues())?;
        let vat = self.vat_number.trim();
        let props = CsrProperties::new(
            format!("{COMMON_NAME_PREFIX}{vat}"),
            format!("{SERIAL_TEMPLATE}{}", Uuid::new_v4()),
            vat.to_string(),
            vat.to_string(),
            self.company_name.trim().to_string(),
            COUNTRY.to_string(),
            self.capabilities.as_invoice_type(),
            self.city.trim().to_uppercase(),
            self.business_category.trim().to_string(),
        )?;
        Ok(props)
    }
}

/// Certificate template name extension (`1.3.6.1.4.1.311.20.2`).
struct TemplateNameExtension(PrintableStringRef<'static>);

impl const_oid::AssociatedOid for TemplateNameExtension {
    const OID: const_oid::ObjectIdentifier =
        const_oid::ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.20.2");
}

impl Encode for TemplateNameExtension {
    fn encoded_len(&self) -> DerResult<Length> {
        self.0.encoded_len()
    }
    fn encode(&self, encoder: &mut impl Writer) -> DerResult<()> {
        self.0.encode(encoder)
    }
}

impl AsExtension for TemplateNameExtension {
    fn critical(&self, _name: &Name, _exts: &[Extension]) -> bool {
        false
    }
}

impl PortalType {
    pub const fn template_name(&self) -> &'static str {
        match self {
            PortalType::Sandbox => "TSTZATCA-Code-Signing",
            PortalType::Simulation => "PREZATCA-Code-Signing",
            PortalType::Production => "ZATCA-Code-Signing",
        }
    }

    fn to_extension(self) -> Result<TemplateNameExtension, CsrError> {
        let value =
            PrintableStringRef::new(self.template_name()).map_err(|e| CsrError::RequestBuild {
                message: format!("invalid template name for extension: {e}"),
            })?;
        Ok(TemplateNameExtension(value))
    }
}

/// CSR fields in the layout of the authority SDK properties file.
#[derive(Validate, Debug, Clone, PartialEq, Eq)]
#[validate_error(CsrError)]
pub struct CsrProperties {
    #[validate(non_empty)]
    common_name: String,
    #[validate(non_empty)]
    serial_number: String,
    #[validate(non_empty, digits)]
    organization_identifier: String,
    #[validate(non_empty)]
    organization_unit_name: String,
    #[validate(non_empty)]
    organization_name: String,
    #[validate(is_country_code)]
    country_name: String,
    #[validate(non_empty, digits)]
    invoice_type: String,
    #[validate(non_empty)]
    location_address: String,
    #[validate(non_empty)]
    industry_business_category: String,
}

/// Keys in SDK order.
const PROPERTY_KEYS: [&str; 9] = [
    "csr.common.name",
    "csr.serial.number",
    "csr.organization.identifier",
    "csr.organization.unit.name",
    "csr.organization.name",
    "csr.country.name",
    "csr.invoice.type",
    "csr.location.address",
    "csr.industry.business.category",
];

/// A signed CSR together with the key that signed it.
#[derive(Debug)]
pub struct GeneratedCsr {
    pub request: CertReq,
    pub key: SigningKey,
}

impl GeneratedCsr {
    pub fn to_pem(&self) -> Result<String, CsrError> {
        self.request
            .to_pem(x509_cert::der::pem::LineEnding::LF)
            .map_err(|e| CsrError::DerEncode {
                context: "certificate request (PEM)",
                source: e,
            })
    }

    /// Base64 of the PEM text, the form the compliance endpoint expects.
    pub fn to_pem_base64(&self) -> Result<String, CsrError> {
        Ok(Base64::encode_string(self.to_pem()?.as_bytes()))
    }

    pub fn private_key_pem(&self) -> Result<String, CsrError> {
        self.key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CsrError::KeyEncode {
                message: e.to_string(),
            })
    }
}

impl CsrProperties {
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn organization_identifier(&self) -> &str {
        &self.organization_identifier
    }

    pub fn organization_name(&self) -> &str {
        &self.organization_name
    }

    pub fn invoice_type(&self) -> &str {
        &self.invoice_type
    }

    pub fn location_address(&self) -> &str {
        &self.location_address
    }

    pub fn industry_business_category(&self) -> &str {
        &self.industry_business_category
    }

    fn values(&self) -> [&str; 9] {
        [
            &self.common_name,
            &self.serial_number,
            &self.organization_identifier,
            &self.organization_unit_name,
            &self.organization_name,
            &self.country_name,
            &self.invoice_type,
            &self.location_address,
            &self.industry_business_category,
        ]
    }

    fn generate_subject(&self) -> Result<Name, CsrError> {
        Name::from_str(&format!(
            "C={},OU={},O={},CN={}",
            escape_dn_value(&self.country_name),
            escape_dn_value(&self.organization_unit_name),
            escape_dn_value(&self.organization_name),
            escape_dn_value(&self.common_name)
        ))
        .map_err(|e| CsrError::InvalidSubject {
            message: e.to_string(),
        })
    }

    fn generate_san_extension(&self) -> Result<SubjectAltName, CsrError> {
        let name = Name::from_str(&format!(
            "sn={},uid={},title={},registeredAddress={},businessCategory={}",
            escape_dn_value(&self.serial_number),
            escape_dn_value(&self.organization_identifier),
            escape_dn_value(&self.invoice_type),
            escape_dn_value(&self.location_address),
            escape_dn_value(&self.industry_business_category)
        ))
        .map_err(|e| CsrError::InvalidSan {
            message: e.to_string(),
        })?;
        Ok(SubjectAltName::from(vec![GeneralName::DirectoryName(name)]))
    }

    /// Build and sign a CSR for `portal` with an existing key.
    pub fn build(&self, signer: &SigningKey, portal: PortalType) -> Result<CertReq, CsrError> {
        let subject = self.generate_subject()?;
        let template = portal.to_extension()?;
        let san = self.generate_san_extension()?;

        let mut builder = RequestBuilder::new(subject, signer).map_err(|e| CsrError::RequestBuild {
            message: e.to_string(),
        })?;
        builder
            .add_extension(&template)
            .map_err(|e| CsrError::AddExtension {
                which: "TemplateName",
                message: e.to_string(),
            })?;
        builder
            .add_extension(&san)
            .map_err(|e| CsrError::AddExtension {
                which: "SubjectAltName",
                message: e.to_string(),
            })?;
        builder
            .build::<DerSignature>()
            .map_err(|e| CsrError::CsrBuild {
                message: e.to_string(),
            })
    }

    /// Build a CSR with a freshly generated secp256k1 key.
    pub fn generate(&self, portal: PortalType) -> Result<GeneratedCsr, CsrError> {
        let key = SigningKey::random(&mut OsRng);
        let request = self.build(&key, portal)?;
        Ok(GeneratedCsr { request, key })
    }

    pub fn parse_csr_config(csr_path: &Path) -> Result<CsrProperties, CsrError> {
        let mut raw = String::new();
        File::open(csr_path)
            .and_then(|file| BufReader::new(file).read_to_string(&mut raw))
            .map_err(|source| CsrError::Io {
                path: csr_path.to_path_buf(),
                source,
            })?;
        Self::from_properties_str(&raw)
    }

    pub fn from_properties_str(raw: &str) -> Result<CsrProperties, CsrError> {
        let map: HashMap<String, String> =
            read(raw.as_bytes()).map_err(|source| CsrError::PropertiesRead { source })?;

        let req = |key: &str| -> Result<String, CsrError> {
            map.get(key)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| CsrError::MissingProperty {
                    key: key.to_string(),
                })
        };

        CsrProperties::new(
            req(PROPERTY_KEYS[0])?,
            req(PROPERTY_KEYS[1])?,
            req(PROPERTY_KEYS[2])?,
            req(PROPERTY_KEYS[3])?,
            req(PROPERTY_KEYS[4])?,
            req(PROPERTY_KEYS[5])?,
            req(PROPERTY_KEYS[6])?,
            req(PROPERTY_KEYS[7])?,
            req(PROPERTY_KEYS[8])?,
        )
    }

    /// Render in `.properties` form, keys in SDK order.
    pub fn to_properties_string(&self) -> Result<String, CsrError> {
        let mut out = Vec::new();
        {
            let mut writer = PropertiesWriter::new(&mut out);
            for (key, value) in PROPERTY_KEYS.iter().zip(self.values()) {
                writer
                    .write(key, value)
                    .map_err(|source| CsrError::PropertiesWrite { source })?;
            }
            writer
                .finish()
                .map_err(|source| CsrError::PropertiesWrite { source })?;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl From<Vec<(&'static str, &'static str, String)>> for CsrError {
    fn from(raw: Vec<(&'static str, &'static str, String)>) -> Self {
        CsrError::Validation(ValidationError::from(raw))
    }
}

/// RFC 4514 escaping for attribute values.
fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if idx == 0 => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    out
}
