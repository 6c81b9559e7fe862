use super::{InvoiceData, InvoiceTotalsData};
use base64ct::{Base64, Encoding};
use quick_xml::{events::Event, Reader};
use std::fmt;
use thiserror::Error;

/// Largest base64 QR payload the authority accepts.
const MAX_ENCODED_LEN: usize = 700;

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("seller legal name is missing")]
    MissingSellerName,
    #[error("seller VAT ID is missing")]
    MissingSellerVat,
    #[error("QR field {tag:?} is {len} bytes, limit is 255")]
    ValueTooLong { tag: QrTag, len: usize },
    #[error("QR payload is {len} characters once base64 encoded, limit is 700")]
    EncodedTooLong { len: usize },
    #[error("QR field {tag:?} is not valid base64")]
    InvalidBase64 { tag: QrTag },
    #[error("QR payload is malformed: {0}")]
    Malformed(String),
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// TLV tags of the e-invoice QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QrTag {
    SellerName = 1,
    VatNumber = 2,
    Timestamp = 3,
    InvoiceTotal = 4,
    VatTotal = 5,
    InvoiceHash = 6,
    Signature = 7,
    PublicKey = 8,
    /// Signature of the CSID certificate, simplified invoices only.
    CertificateSignature = 9,
}

impl QrTag {
    const ALL: [QrTag; 9] = [
        QrTag::SellerName,
        QrTag::VatNumber,
        QrTag::Timestamp,
        QrTag::InvoiceTotal,
        QrTag::VatTotal,
        QrTag::InvoiceHash,
        QrTag::Signature,
        QrTag::PublicKey,
        QrTag::CertificateSignature,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u8 == byte)
    }
}

/// Ordered TLV fields rendered into the invoice's QR reference.
///
/// Built from the invoice first (tags 1-5) and completed with the signing
/// output (tags 6-9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    fields: Vec<(QrTag, Vec<u8>)>,
}

impl QrPayload {
    pub(crate) fn from_invoice(
        invoice: &InvoiceData,
        totals: &InvoiceTotalsData,
    ) -> QrResult<Self> {
        let timestamp = format!(
            "{}T{}",
            invoice.issue_date_string(),
            invoice.issue_time_string()
        );
        let mut payload = Self { fields: Vec::with_capacity(9) };
        payload.push(QrTag::SellerName, invoice.seller_name()?.as_bytes())?;
        payload.push(QrTag::VatNumber, invoice.seller_vat()?.as_bytes())?;
        payload.push(QrTag::Timestamp, timestamp.as_bytes())?;
        payload.push(
            QrTag::InvoiceTotal,
            InvoiceData::format_amount(totals.tax_inclusive_amount()).as_bytes(),
        )?;
        payload.push(
            QrTag::VatTotal,
            InvoiceData::format_amount(totals.tax_amount()).as_bytes(),
        )?;
        Ok(payload)
    }

    /// Appends the signing output. The hash and signature go in as their
    /// base64 text; the key and certificate signature as raw bytes.
    pub(crate) fn signed(
        mut self,
        invoice_hash: &str,
        signature: &str,
        public_key_base64: &str,
        certificate_signature_base64: Option<&str>,
    ) -> QrResult<Self> {
        self.push(QrTag::InvoiceHash, invoice_hash.as_bytes())?;
        self.push(QrTag::Signature, signature.as_bytes())?;
        let key = decode_field(QrTag::PublicKey, public_key_base64)?;
        self.push(QrTag::PublicKey, &key)?;
        if let Some(stamp) = certificate_signature_base64 {
            let stamp = decode_field(QrTag::CertificateSignature, stamp)?;
            self.push(QrTag::CertificateSignature, &stamp)?;
        }
        Ok(self)
    }

    fn push(&mut self, tag: QrTag, value: &[u8]) -> QrResult<()> {
        if value.len() > usize::from(u8::MAX) {
            return Err(QrCodeError::ValueTooLong {
                tag,
                len: value.len(),
            });
        }
        self.fields.push((tag, value.to_vec()));
        Ok(())
    }

    pub fn fields(&self) -> &[(QrTag, Vec<u8>)] {
        &self.fields
    }

    pub fn get(&self, tag: QrTag) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(field, _)| *field == tag)
            .map(|(_, value)| value.as_slice())
    }

    /// Base64 of the concatenated TLV triples.
    pub fn encode(&self) -> QrResult<String> {
        let mut bytes = Vec::new();
        for (tag, value) in &self.fields {
            bytes.push(*tag as u8);
            // lengths are bounded by `push`
            bytes.push(value.len() as u8);
            bytes.extend_from_slice(value);
        }
        let encoded = Base64::encode_string(&bytes);
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(QrCodeError::EncodedTooLong { len: encoded.len() });
        }
        Ok(encoded)
    }

    /// Parses a QR value produced by [`QrPayload::encode`] or by the authority.
    ///
    /// # Examples
    /// ```rust
    /// use fatoora_relay_core::invoice::{QrPayload, QrTag};
    ///
    /// // tag 1, length 4, "Acme"
    /// let payload = QrPayload::decode("AQRBY21l")?;
    /// assert_eq!(payload.get(QrTag::SellerName), Some(&b"Acme"[..]));
    /// # Ok::<(), fatoora_relay_core::invoice::QrCodeError>(())
    /// ```
    pub fn decode(encoded: &str) -> QrResult<Self> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|err| QrCodeError::Malformed(err.to_string()))?;
        let mut fields = Vec::new();
        let mut rest = bytes.as_slice();
        while let [tag, len, tail @ ..] = rest {
            let tag = QrTag::from_byte(*tag)
                .ok_or_else(|| QrCodeError::Malformed(format!("unknown tag {tag}")))?;
            let len = usize::from(*len);
            if tail.len() < len {
                return Err(QrCodeError::Malformed(format!(
                    "field {tag:?} is truncated"
                )));
            }
            let (value, next) = tail.split_at(len);
            fields.push((tag, value.to_vec()));
            rest = next;
        }
        if !rest.is_empty() {
            return Err(QrCodeError::Malformed("trailing byte".into()));
        }
        Ok(Self { fields })
    }
}

fn decode_field(tag: QrTag, value: &str) -> QrResult<Vec<u8>> {
    Base64::decode_vec(value).map_err(|_| QrCodeError::InvalidBase64 { tag })
}

fn malformed(err: impl fmt::Display) -> QrCodeError {
    QrCodeError::Malformed(err.to_string())
}

/// Base64 value of the `QR` document reference in a UBL invoice.
///
/// The value must decode as a [`QrPayload`]. `None` when the invoice has no
/// QR reference.
pub fn qr_value_from_xml(xml: &str) -> QrResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_reference = false;
    let mut element: Option<Vec<u8>> = None;
    let mut id: Option<String> = None;
    let mut value: Option<String> = None;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                let name = start.local_name();
                if name.as_ref() == b"AdditionalDocumentReference" {
                    in_reference = true;
                    id = None;
                    value = None;
                } else if in_reference {
                    element = Some(name.as_ref().to_vec());
                }
            }
            Event::Text(text) if in_reference => {
                let text = text.unescape().map_err(malformed)?;
                match element.as_deref() {
                    Some(b"ID") => id = Some(text.into_owned()),
                    Some(b"EmbeddedDocumentBinaryObject") => value = Some(text.into_owned()),
                    _ => {}
                }
            }
            Event::End(end) => {
                element = None;
                if end.local_name().as_ref() == b"AdditionalDocumentReference" {
                    in_reference = false;
                    if id.as_deref() == Some("QR") {
                        if let Some(value) = value.take() {
                            QrPayload::decode(&value)?;
                            return Ok(Some(value));
                        }
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}
