use super::{
    Buyer, InvoiceData, InvoiceError, InvoiceFlags, InvoiceNote, InvoiceTotalsData, InvoiceType,
    LineItems, Seller,
};
use crate::invoice::sign::{InvoiceSigner, SignedProperties, SigningError};
use crate::invoice::xml::{InvoiceXmlError, ToXml, XmlFormat};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use iso_currency::Currency;

/// Invoice with computed totals, ready for hashing and signing.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    data: InvoiceData,
    totals: InvoiceTotalsData,
}

/// Signed invoice: signature block, QR payload and the rendered XML.
#[derive(Debug, Clone)]
pub struct SignedInvoice {
    finalized: FinalizedInvoice,
    signed_properties: SignedProperties,
    qr_code: String,
    signed_xml: String,
}

/// Required fields for [`InvoiceBuilder::new`].
#[derive(Debug, Clone)]
pub struct RequiredInvoiceFields {
    pub invoice_type: InvoiceType,
    pub id: String,
    pub uuid: String,
    pub issue_datetime: DateTime<Utc>,
    pub currency: Currency,
    pub previous_invoice_hash: String,
    pub invoice_counter: u64,
    pub seller: Seller,
    pub line_items: LineItems,
    pub payment_means_code: String,
}

pub struct InvoiceBuilder {
    invoice: InvoiceData,
}

impl InvoiceBuilder {
    pub fn new(fields: RequiredInvoiceFields) -> Self {
        let vat_category = fields
            .line_items
            .first()
            .map(|li| li.vat_category())
            .unwrap_or(super::VatCategory::Standard);
        Self {
            invoice: InvoiceData {
                invoice_type: fields.invoice_type,
                id: fields.id,
                uuid: fields.uuid,
                issue_datetime: fields.issue_datetime,
                currency: fields.currency,
                previous_invoice_hash: fields.previous_invoice_hash,
                invoice_counter: fields.invoice_counter,
                note: None,
                seller: fields.seller,
                buyer: None,
                line_items: fields.line_items,
                payment_means_code: fields.payment_means_code,
                vat_category,
                flags: InvoiceFlags::empty(),
                invoice_level_charge: 0.0,
                invoice_level_discount: 0.0,
                allowance_reason: None,
            },
        }
    }

    pub fn note(mut self, note: InvoiceNote) -> Self {
        self.invoice.note = Some(note);
        self
    }

    pub fn buyer(mut self, buyer: Buyer) -> Self {
        self.invoice.buyer = Some(buyer);
        self
    }

    pub fn invoice_level_charge(mut self, charge: f64) -> Self {
        self.invoice.invoice_level_charge = charge;
        self
    }

    pub fn invoice_level_discount(mut self, discount: f64) -> Self {
        self.invoice.invoice_level_discount = discount;
        self
    }

    pub fn allowance_reason(mut self, reason: impl Into<String>) -> Self {
        self.invoice.allowance_reason = Some(reason.into());
        self
    }

    pub fn flags(mut self, flags: InvoiceFlags) -> Self {
        self.invoice.flags = flags;
        self
    }

    pub fn build(self) -> Result<FinalizedInvoice, InvoiceError> {
        if self.invoice.line_items.is_empty() {
            return Err(InvoiceError::MissingLineItems);
        }

        Ok(FinalizedInvoice {
            totals: InvoiceTotalsData::from_data(&self.invoice),
            data: self.invoice,
        })
    }
}

impl FinalizedInvoice {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        &self.totals
    }

    /// Compact serialization without the XML declaration. This is the form
    /// the invoice hash is computed over.
    pub fn canonical_xml(&self) -> Result<String, InvoiceXmlError> {
        crate::invoice::xml::to_canonical_xml(self)
    }

    pub fn sign(self, signer: &InvoiceSigner) -> Result<SignedInvoice, SigningError> {
        signer.sign(self)
    }

    pub(crate) fn into_signed(
        self,
        signed_properties: SignedProperties,
        qr_code: String,
    ) -> Result<SignedInvoice, InvoiceXmlError> {
        let mut signed = SignedInvoice {
            finalized: self,
            signed_properties,
            qr_code,
            signed_xml: String::new(),
        };
        signed.signed_xml = signed.to_xml_with_format(XmlFormat::Compact)?;
        Ok(signed)
    }
}

impl SignedInvoice {
    pub fn data(&self) -> &InvoiceData {
        self.finalized.data()
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        self.finalized.totals()
    }

    pub fn signed_properties(&self) -> &SignedProperties {
        &self.signed_properties
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn xml(&self) -> &str {
        &self.signed_xml
    }

    pub fn uuid(&self) -> &str {
        self.finalized.data().uuid()
    }

    pub fn invoice_hash(&self) -> &str {
        self.signed_properties.invoice_hash()
    }

    pub fn signature(&self) -> &str {
        self.signed_properties.signature()
    }

    pub fn to_xml_base64(&self) -> String {
        Base64::encode_string(self.signed_xml.as_bytes())
    }
}

pub trait InvoiceView {
    fn data(&self) -> &InvoiceData;
    fn totals(&self) -> &InvoiceTotalsData;
    fn qr_code(&self) -> Option<&str>;
    fn signed_properties(&self) -> Option<&SignedProperties>;
}

impl InvoiceView for FinalizedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotalsData {
        self.totals()
    }

    fn qr_code(&self) -> Option<&str> {
        None
    }

    fn signed_properties(&self) -> Option<&SignedProperties> {
        None
    }
}

impl InvoiceView for SignedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotalsData {
        self.totals()
    }

    fn qr_code(&self) -> Option<&str> {
        Some(self.qr_code())
    }

    fn signed_properties(&self) -> Option<&SignedProperties> {
        Some(&self.signed_properties)
    }
}
