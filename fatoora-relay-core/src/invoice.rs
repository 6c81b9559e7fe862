//! Invoice domain types and builders.
mod builder;
mod qr;
pub mod sign;
pub mod source;
pub mod xml;
pub use builder::{
    FinalizedInvoice, InvoiceBuilder, InvoiceView, RequiredInvoiceFields, SignedInvoice,
};
pub use qr::{qr_value_from_xml, QrCodeError, QrPayload, QrResult, QrTag};
pub use source::{
    DocumentKind, SourceAddress, SourceBillingReference, SourceFlags, SourceInvoice, SourceLine,
    SourceParty,
};

use crate::validation::ValidationError;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use iso_currency::Currency;
use isocountry::CountryCode;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;

type Result<T> = std::result::Result<T, InvoiceError>;

/// Placeholder hash that starts every identity's invoice chain (base64 of the hex SHA-256 of "0").
pub const INITIAL_PREVIOUS_INVOICE_HASH: &str =
    "NWZlY2ViNjZmZmM4NmYzOGQ5NTI3ODZjNmQ2OTZjNzljMmRiYzIzOWRkNGU5MWI0NjcyOWQ3M2EyN2ZiNTdlOQ==";

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid country code '{0}'")]
    InvalidCountryCode(String),
    #[error("unknown currency '{0}'")]
    InvalidCurrency(String),
    #[error("Missing Buyer ID for buyer")]
    MissingBuyerId,
    #[error("Invalid VAT ID format")]
    InvalidVatFormat,
    #[error("invoice has no line items")]
    MissingLineItems,
}

/// Postal address for parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub country_code: CountryCode,
    pub city: String,
    pub street: String,
    pub additional_street: Option<String>,
    pub building_number: String,
    pub additional_number: Option<String>,
    pub postal_code: String,
    pub district: Option<String>,
}

impl Address {
    pub fn country_code(&self) -> &CountryCode {
        &self.country_code
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn street(&self) -> &str {
        &self.street
    }

    pub fn building_number(&self) -> &str {
        &self.building_number
    }

    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn district(&self) -> Option<&str> {
        self.district.as_deref()
    }
}

/// VAT identifier wrapper.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::invoice::VatId;
///
/// let vat = VatId::parse(" 399999999900003 ")?;
/// assert_eq!(vat.as_str(), "399999999900003");
/// # Ok::<(), fatoora_relay_core::invoice::InvoiceError>(())
/// ```
///
/// # Errors
/// Returns [`InvoiceError::InvalidVatFormat`] if the input is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatId(String);
impl VatId {
    pub fn parse<S: Into<String>>(s: S) -> Result<Self> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(InvoiceError::InvalidVatFormat);
        }
        Ok(VatId(s))
    }

    /// Saudi VAT registration numbers: 15 digits, first and last digit `3`.
    pub fn is_saudi_format(value: &str) -> bool {
        value.len() == 15
            && value.bytes().all(|b| b.is_ascii_digit())
            && value.starts_with('3')
            && value.ends_with('3')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl AsRef<str> for VatId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
impl FromStr for VatId {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        VatId::parse(s)
    }
}

/// Additional party identifier (CRN, NAT, IQA, ...).
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::invoice::OtherId;
///
/// let id = OtherId::with_scheme("7003339333", "CRN");
/// assert_eq!(id.as_str(), "7003339333");
/// assert_eq!(id.scheme_id(), Some("CRN"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherId {
    value: String,
    scheme_id: Option<String>,
}
impl OtherId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        OtherId {
            value: value.into(),
            scheme_id: None,
        }
    }

    pub fn with_scheme<V: Into<String>, S: Into<String>>(value: V, scheme_id: S) -> Self {
        OtherId {
            value: value.into(),
            scheme_id: Some(scheme_id.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn scheme_id(&self) -> Option<&str> {
        self.scheme_id.as_deref()
    }
}

/// Invoice note with language metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNote {
    language: String,
    text: String,
}

impl InvoiceNote {
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Marker trait for party role types.
pub trait PartyRole {}

/// Seller role marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellerRole;
impl PartyRole for SellerRole {}
/// Buyer role marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerRole;
impl PartyRole for BuyerRole {}

/// Party wrapper with role-specific typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party<R: PartyRole> {
    _marker: PhantomData<R>,
    name: String,
    address: Address,
    vat_id: Option<VatId>,
    other_id: Option<OtherId>,
}

pub type Seller = Party<SellerRole>;
pub type Buyer = Party<BuyerRole>;

impl Party<SellerRole> {
    /// # Errors
    /// Returns an error if the VAT ID is empty.
    pub fn new(
        name: String,
        address: Address,
        vat_id: impl Into<String>,
        other_id: Option<OtherId>,
    ) -> Result<Self> {
        let vat = VatId::parse(vat_id.into())?;
        Ok(Party {
            _marker: PhantomData,
            name,
            address,
            vat_id: Some(vat),
            other_id,
        })
    }
}

impl Party<BuyerRole> {
    /// # Errors
    /// Returns an error if the VAT ID is empty or no identifier is provided.
    pub fn new(
        name: String,
        address: Address,
        vat_id: Option<String>,
        other_id: Option<OtherId>,
    ) -> Result<Self> {
        let vat = match vat_id {
            Some(v) => Some(VatId::parse(v)?),
            None => None,
        };
        if vat.is_none() && other_id.is_none() {
            return Err(InvoiceError::MissingBuyerId);
        }
        Ok(Party {
            _marker: PhantomData,
            name,
            address,
            vat_id: vat,
            other_id,
        })
    }
}

impl<R: PartyRole> Party<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn vat_id(&self) -> Option<&VatId> {
        self.vat_id.as_ref()
    }

    pub fn other_id(&self) -> Option<&OtherId> {
        self.other_id.as_ref()
    }
}

/// Standard (B2B, cleared) or simplified (B2C, reported).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSubType {
    Simplified,
    Standard,
}

impl InvoiceSubType {
    /// First two digits of the `InvoiceTypeCode/@name` attribute.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            InvoiceSubType::Standard => "01",
            InvoiceSubType::Simplified => "02",
        }
    }
}

/// Reference to an original invoice for credit/debit notes.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::invoice::OriginalInvoiceRef;
///
/// let original = OriginalInvoiceRef::new("INV-ORIG").with_uuid("uuid-orig");
/// assert_eq!(original.id(), "INV-ORIG");
/// assert_eq!(original.uuid(), Some("uuid-orig"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalInvoiceRef {
    id: String,
    uuid: Option<String>,
    issue_date: Option<chrono::NaiveDate>,
}

impl OriginalInvoiceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: None,
            issue_date: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_issue_date(mut self, issue_date: chrono::NaiveDate) -> Self {
        self.issue_date = Some(issue_date);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn issue_date(&self) -> Option<chrono::NaiveDate> {
        self.issue_date
    }
}

/// Invoice type and required metadata.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::invoice::{InvoiceFlags, InvoiceSubType, InvoiceType};
///
/// let invoice_type = InvoiceType::Prepayment(InvoiceSubType::Standard);
/// assert!(!invoice_type.is_simplified());
/// assert_eq!(invoice_type.code(), "386");
/// assert_eq!(invoice_type.name_attribute(InvoiceFlags::EXPORT), "0100100");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceType {
    Tax(InvoiceSubType),
    Prepayment(InvoiceSubType),
    CreditNote(InvoiceSubType, OriginalInvoiceRef, String), // original invoice ref + reason
    DebitNote(InvoiceSubType, OriginalInvoiceRef, String),  // original invoice ref + reason
}

impl InvoiceType {
    pub fn subtype(&self) -> InvoiceSubType {
        match self {
            InvoiceType::Tax(st)
            | InvoiceType::Prepayment(st)
            | InvoiceType::CreditNote(st, ..)
            | InvoiceType::DebitNote(st, ..) => *st,
        }
    }

    pub fn is_simplified(&self) -> bool {
        self.subtype() == InvoiceSubType::Simplified
    }

    /// UNTDID 1001 document code.
    pub fn code(&self) -> &'static str {
        match self {
            InvoiceType::Tax(_) => "388",
            InvoiceType::Prepayment(_) => "386",
            InvoiceType::CreditNote(..) => "381",
            InvoiceType::DebitNote(..) => "383",
        }
    }

    /// Subtype digits followed by the five transaction flag digits.
    pub fn name_attribute(&self, flags: InvoiceFlags) -> String {
        let mut name = String::with_capacity(7);
        name.push_str(self.subtype().name_prefix());
        for flag in [
            InvoiceFlags::THIRD_PARTY,
            InvoiceFlags::NOMINAL,
            InvoiceFlags::EXPORT,
            InvoiceFlags::SUMMARY,
            InvoiceFlags::SELF_BILLED,
        ] {
            name.push(if flags.contains(flag) { '1' } else { '0' });
        }
        name
    }

    pub fn original_reference(&self) -> Option<(&OriginalInvoiceRef, &str)> {
        match self {
            InvoiceType::CreditNote(_, original, reason)
            | InvoiceType::DebitNote(_, original, reason) => Some((original, reason.as_str())),
            _ => None,
        }
    }
}

/// VAT category for line items (UNCL 5305 codes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VatCategory {
    #[serde(rename = "E")]
    Exempt,
    #[serde(rename = "S")]
    Standard,
    #[serde(rename = "Z")]
    Zero,
    #[serde(rename = "O")]
    OutOfScope,
}

impl VatCategory {
    pub fn code(&self) -> &'static str {
        match self {
            VatCategory::Exempt => "E",
            VatCategory::Standard => "S",
            VatCategory::Zero => "Z",
            VatCategory::OutOfScope => "O",
        }
    }
}

/// Single invoice line item.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::invoice::{LineItem, LineItemFields, VatCategory};
///
/// let item = LineItem::new(LineItemFields {
///     description: "Item".into(),
///     quantity: 2.0,
///     unit_code: "PCE".into(),
///     unit_price: 50.0,
///     vat_rate: 15.0,
///     vat_category: VatCategory::Standard,
/// });
/// assert_eq!(item.total_amount(), 100.0);
/// assert_eq!(item.vat_amount(), 15.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    description: String,
    quantity: f64,
    unit_code: String,
    unit_price: f64,
    total_amount: f64,
    vat_rate: f64,
    vat_amount: f64,
    vat_category: VatCategory,
}

/// Fields for creating a line item with computed totals.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub description: String,
    pub quantity: f64,
    pub unit_code: String,
    pub unit_price: f64,
    pub vat_rate: f64,
    pub vat_category: VatCategory,
}

impl LineItem {
    pub fn new(fields: LineItemFields) -> Self {
        let total_amount = round2(fields.quantity * fields.unit_price);
        let vat_amount = round2(total_amount * (fields.vat_rate / 100.0));
        Self {
            description: fields.description,
            quantity: fields.quantity,
            unit_code: fields.unit_code,
            unit_price: fields.unit_price,
            total_amount,
            vat_rate: fields.vat_rate,
            vat_amount,
            vat_category: fields.vat_category,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_code(&self) -> &str {
        &self.unit_code
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    pub fn vat_rate(&self) -> f64 {
        self.vat_rate
    }

    pub fn vat_amount(&self) -> f64 {
        self.vat_amount
    }

    pub fn vat_category(&self) -> VatCategory {
        self.vat_category
    }
}

pub type LineItems = Vec<LineItem>;

bitflags! {
    /// Transaction flags carried in digits 3..=7 of `InvoiceTypeCode/@name`.
    ///
    /// # Examples
    /// ```rust
    /// use fatoora_relay_core::invoice::InvoiceFlags;
    ///
    /// let flags = InvoiceFlags::EXPORT | InvoiceFlags::SELF_BILLED;
    /// assert!(flags.contains(InvoiceFlags::EXPORT));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InvoiceFlags: u8 {
        const THIRD_PARTY = 0b00001;
        const NOMINAL = 0b00010;
        const EXPORT = 0b00100;
        const SUMMARY = 0b01000;
        const SELF_BILLED = 0b10000;
    }
}

/// Core invoice data model.
///
/// Instances are produced by the builder and exposed via views.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceData {
    invoice_type: InvoiceType,
    id: String,
    uuid: String,
    issue_datetime: DateTime<Utc>,
    currency: Currency,
    previous_invoice_hash: String,
    invoice_counter: u64,
    note: Option<InvoiceNote>,
    seller: Seller,
    buyer: Option<Buyer>,
    line_items: LineItems,
    payment_means_code: String,
    vat_category: VatCategory,

    flags: InvoiceFlags,

    invoice_level_charge: f64,
    invoice_level_discount: f64,
    allowance_reason: Option<String>,
}

impl InvoiceData {
    pub fn invoice_type(&self) -> &InvoiceType {
        &self.invoice_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn issue_datetime(&self) -> &DateTime<Utc> {
        &self.issue_datetime
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn previous_invoice_hash(&self) -> &str {
        &self.previous_invoice_hash
    }

    pub fn invoice_counter(&self) -> u64 {
        self.invoice_counter
    }

    pub fn note(&self) -> Option<&InvoiceNote> {
        self.note.as_ref()
    }

    pub fn seller(&self) -> &Seller {
        &self.seller
    }

    pub fn buyer(&self) -> Option<&Buyer> {
        self.buyer.as_ref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn payment_means_code(&self) -> &str {
        &self.payment_means_code
    }

    pub fn vat_category(&self) -> VatCategory {
        self.vat_category
    }

    pub fn flags(&self) -> InvoiceFlags {
        self.flags
    }

    pub fn invoice_level_charge(&self) -> f64 {
        self.invoice_level_charge
    }

    pub fn invoice_level_discount(&self) -> f64 {
        self.invoice_level_discount
    }

    pub fn allowance_reason(&self) -> Option<&str> {
        self.allowance_reason.as_deref()
    }

    pub(crate) fn seller_name(&self) -> QrResult<&str> {
        let name = self.seller.name.trim();
        if name.is_empty() {
            return Err(QrCodeError::MissingSellerName);
        }
        Ok(name)
    }

    pub(crate) fn seller_vat(&self) -> QrResult<&str> {
        let vat = self
            .seller
            .vat_id
            .as_ref()
            .ok_or(QrCodeError::MissingSellerVat)?
            .as_str()
            .trim();
        if vat.is_empty() {
            return Err(QrCodeError::MissingSellerVat);
        }
        Ok(vat)
    }

    pub(crate) fn issue_date_string(&self) -> String {
        self.issue_datetime.date_naive().to_string()
    }

    pub(crate) fn issue_time_string(&self) -> String {
        self.issue_datetime.time().format("%H:%M:%S").to_string()
    }

    pub(crate) fn format_amount(amount: f64) -> String {
        format!("{:.2}", amount)
    }
}

/// VAT breakdown for one (category, rate) group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxSubtotal {
    pub category: VatCategory,
    pub rate: f64,
    pub taxable_amount: f64,
    pub tax_amount: f64,
}

/// Computed invoice totals.
///
/// Document-level allowances and charges are booked against the first
/// line's VAT group.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotalsData {
    line_extension: f64,
    tax_amount: f64,
    allowance_total: f64,
    charge_total: f64,
    subtotals: Vec<TaxSubtotal>,
}

impl InvoiceTotalsData {
    pub(crate) fn from_data(data: &InvoiceData) -> Self {
        let line_extension = round2(data.line_items.iter().map(|li| li.total_amount).sum());

        let mut subtotals: Vec<TaxSubtotal> = Vec::new();
        for li in &data.line_items {
            match subtotals
                .iter_mut()
                .find(|s| s.category == li.vat_category && s.rate == li.vat_rate)
            {
                Some(group) => group.taxable_amount += li.total_amount,
                None => subtotals.push(TaxSubtotal {
                    category: li.vat_category,
                    rate: li.vat_rate,
                    taxable_amount: li.total_amount,
                    tax_amount: 0.0,
                }),
            }
        }
        if let Some(first) = subtotals.first_mut() {
            first.taxable_amount += data.invoice_level_charge - data.invoice_level_discount;
        }
        for group in subtotals.iter_mut() {
            group.taxable_amount = round2(group.taxable_amount);
            group.tax_amount = round2(group.taxable_amount * group.rate / 100.0);
        }
        let tax_amount = round2(subtotals.iter().map(|s| s.tax_amount).sum());

        Self {
            line_extension,
            tax_amount,
            allowance_total: data.invoice_level_discount,
            charge_total: data.invoice_level_charge,
            subtotals,
        }
    }

    pub fn line_extension(&self) -> f64 {
        self.line_extension
    }

    pub fn tax_amount(&self) -> f64 {
        self.tax_amount
    }

    pub fn allowance_total(&self) -> f64 {
        self.allowance_total
    }

    pub fn charge_total(&self) -> f64 {
        self.charge_total
    }

    pub fn subtotals(&self) -> &[TaxSubtotal] {
        &self.subtotals
    }

    pub fn taxable_amount(&self) -> f64 {
        round2(self.line_extension - self.allowance_total + self.charge_total)
    }

    pub fn tax_inclusive_amount(&self) -> f64 {
        round2(self.taxable_amount() + self.tax_amount)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn parse_country(code: &str) -> Result<CountryCode> {
    CountryCode::for_alpha2(code.trim())
        .map_err(|_| InvoiceError::InvalidCountryCode(code.to_string()))
}

pub(crate) fn parse_currency(code: &str) -> Result<Currency> {
    Currency::from_code(code.trim()).ok_or_else(|| InvoiceError::InvalidCurrency(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saudi_vat_format() {
        assert!(VatId::is_saudi_format("399999999900003"));
        assert!(!VatId::is_saudi_format("399999999900004"));
        assert!(!VatId::is_saudi_format("39999999990003"));
        assert!(!VatId::is_saudi_format("29999999990000A"));
    }

    #[test]
    fn type_code_name_carries_subtype_and_flags() {
        let simplified = InvoiceType::Tax(InvoiceSubType::Simplified);
        assert_eq!(simplified.name_attribute(InvoiceFlags::empty()), "0200000");
        let credit = InvoiceType::CreditNote(
            InvoiceSubType::Standard,
            OriginalInvoiceRef::new("INV-1"),
            "returned".into(),
        );
        assert_eq!(credit.code(), "381");
        assert_eq!(
            credit.name_attribute(InvoiceFlags::THIRD_PARTY | InvoiceFlags::SELF_BILLED),
            "0110001"
        );
        assert_eq!(credit.original_reference().map(|(r, _)| r.id()), Some("INV-1"));
    }

    #[test]
    fn vat_category_serde_uses_codes() {
        let json = serde_json::to_string(&VatCategory::Zero).unwrap();
        assert_eq!(json, "\"Z\"");
        let back: VatCategory = serde_json::from_str("\"S\"").unwrap();
        assert_eq!(back, VatCategory::Standard);
    }

    #[test]
    fn country_and_currency_lookup() {
        assert_eq!(parse_country("SA").unwrap(), CountryCode::SAU);
        assert!(matches!(
            parse_country("XX"),
            Err(InvoiceError::InvalidCountryCode(_))
        ));
        assert_eq!(parse_currency("SAR").unwrap(), Currency::SAR);
        assert!(matches!(
            parse_currency("ZZZ"),
            Err(InvoiceError::InvalidCurrency(_))
        ));
    }
}
