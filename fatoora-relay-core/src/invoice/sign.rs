use crate::invoice::xml::{signed_properties_xml_string, InvoiceXmlError};
use crate::invoice::{FinalizedInvoice, QrCodeError, QrPayload, SignedInvoice};
use base64ct::{Base64, Encoding};
use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use k256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use thiserror::Error;
use x509_cert::{
    der::{Decode, DecodePem, Encode},
    Certificate,
};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("private key error: {0}")]
    PrivateKey(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error(transparent)]
    Xml(#[from] InvoiceXmlError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
}

/// Values that make up the XAdES signature block of a signed invoice.
#[derive(Debug, Clone)]
pub struct SignedProperties {
    invoice_hash: String,
    signature: String,
    public_key: String,
    issuer: String,
    serial: String,
    cert_hash: String,
    signed_props_hash: String,
    signing_time: String,
    certificate: String,
    zatca_key_signature: Option<String>,
}

impl SignedProperties {
    pub fn invoice_hash(&self) -> &str {
        &self.invoice_hash
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn zatca_key_signature(&self) -> Option<&str> {
        self.zatca_key_signature.as_deref()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }

    pub fn signed_props_hash(&self) -> &str {
        &self.signed_props_hash
    }

    /// `YYYY-MM-DDTHH:MM:SS`, taken from the invoice issue date and time.
    pub fn signing_time(&self) -> &str {
        &self.signing_time
    }

    /// Base64 DER of the signing certificate.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    fn compute(
        invoice: &FinalizedInvoice,
        cert: &Certificate,
        key: &SigningKey,
    ) -> Result<SignedProperties, SigningError> {
        let canonical = invoice.canonical_xml()?;
        let invoice_hash_b64 = invoice_hash_base64(&canonical);
        let signature_b64 = sign_hash(key, &invoice_hash_b64)?;
        let cert_hash_b64 = certificate_hash_base64(cert)?;
        let (issuer, serial) = issuer_and_serial(cert);
        let signing_time = invoice
            .data()
            .issue_datetime()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let signed_props_xml =
            signed_properties_xml_string(&signing_time, &cert_hash_b64, &issuer, &serial);
        let signed_props_hash_b64 = hex_hash_to_base64(&Sha256::digest(signed_props_xml));

        Ok(SignedProperties {
            invoice_hash: invoice_hash_b64,
            signature: signature_b64,
            public_key: public_key_base64(key)?,
            issuer,
            serial,
            cert_hash: cert_hash_b64,
            signed_props_hash: signed_props_hash_b64,
            signing_time,
            certificate: certificate_base64(cert)?,
            zatca_key_signature: certificate_signature_base64(cert),
        })
    }
}

/// Signs finalized invoices with a CSID certificate and its private key.
pub struct InvoiceSigner {
    csid: Certificate,
    private_key: SigningKey,
}

impl std::fmt::Debug for InvoiceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceSigner")
            .field("issuer", &self.csid.tbs_certificate.issuer.to_string())
            .finish_non_exhaustive()
    }
}

impl InvoiceSigner {
    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let cert = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::Certificate(format!("{e:?}")))?;
        let private_key = SigningKey::from_pkcs8_der(private_key_der)
            .map_err(|e| SigningError::PrivateKey(format!("{e:?}")))?;
        Ok(Self {
            csid: cert,
            private_key,
        })
    }

    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let cert = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| SigningError::Certificate(format!("{e:?}")))?;
        let private_key = SigningKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| SigningError::PrivateKey(format!("{e:?}")))?;
        Ok(Self {
            csid: cert,
            private_key,
        })
    }

    /// Certificate as issued by the authority (DER) plus a PKCS#8 PEM key,
    /// the shape credentials are stored in.
    pub fn from_certificate_der_and_key_pem(
        cert_der: &[u8],
        private_key_pem: &str,
    ) -> Result<Self, SigningError> {
        let cert = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::Certificate(format!("{e:?}")))?;
        let private_key = SigningKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| SigningError::PrivateKey(format!("{e:?}")))?;
        Ok(Self {
            csid: cert,
            private_key,
        })
    }

    pub fn sign(&self, invoice: FinalizedInvoice) -> Result<SignedInvoice, SigningError> {
        let signing = SignedProperties::compute(&invoice, &self.csid, &self.private_key)?;
        let qr_code = QrPayload::from_invoice(invoice.data(), invoice.totals())?
            .signed(
                signing.invoice_hash(),
                signing.signature(),
                signing.public_key(),
                signing.zatca_key_signature(),
            )?
            .encode()?;

        Ok(invoice.into_signed(signing, qr_code)?)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.csid
    }
}

/// Base64 SHA-256 over the canonical invoice form.
pub fn invoice_hash_base64(canonical_xml: &str) -> String {
    Base64::encode_string(&Sha256::digest(canonical_xml.as_bytes()))
}

fn sign_hash(key: &SigningKey, hash_b64: &str) -> Result<String, SigningError> {
    let hash_bytes =
        Base64::decode_vec(hash_b64).map_err(|e| SigningError::Encoding(format!("{e:?}")))?;
    let signature: Signature = key
        .try_sign(&hash_bytes)
        .map_err(|e| SigningError::Sign(format!("{e:?}")))?;
    Ok(Base64::encode_string(signature.to_der().as_bytes()))
}

fn certificate_base64(cert: &Certificate) -> Result<String, SigningError> {
    let der = cert
        .to_der()
        .map_err(|e| SigningError::Encoding(format!("certificate DER: {e:?}")))?;
    Ok(Base64::encode_string(&der))
}

fn certificate_hash_base64(cert: &Certificate) -> Result<String, SigningError> {
    let b64_der = certificate_base64(cert)?;
    Ok(hex_hash_to_base64(&Sha256::digest(b64_der.as_bytes())))
}

fn certificate_signature_base64(cert: &Certificate) -> Option<String> {
    cert.signature.as_bytes().map(Base64::encode_string)
}

fn issuer_and_serial(cert: &Certificate) -> (String, String) {
    let serial_bytes = cert.tbs_certificate.serial_number.as_bytes();
    let serial = serial_bytes_to_decimal_string(serial_bytes);

    let issuer = cert.tbs_certificate.issuer.to_string();
    let issuer = issuer
        .split(',')
        .map(|part| part.trim())
        .collect::<Vec<_>>()
        .join(", ");
    (issuer, serial)
}

fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}

fn hex_hash_to_base64(hash: &[u8]) -> String {
    let mut hex_hash = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(&mut hex_hash, "{:02x}", byte);
    }
    Base64::encode_string(hex_hash.as_bytes())
}

fn public_key_base64(key: &SigningKey) -> Result<String, SigningError> {
    let der = key
        .verifying_key()
        .to_public_key_der()
        .map_err(|e| SigningError::Encoding(format!("public key DER: {e:?}")))?;
    Ok(Base64::encode_string(der.as_bytes()))
}
