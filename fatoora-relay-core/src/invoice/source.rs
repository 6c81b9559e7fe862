//! ERP-side invoice document as handed to the relay.
//!
//! A [`SourceInvoice`] is plain serde data. [`SourceInvoice::validate`]
//! collects every issue the authority would reject, and
//! [`SourceInvoice::to_finalized`] turns it into a [`FinalizedInvoice`] once
//! the chain values (uuid, ICV, PIH) are known.
use super::{
    parse_country, parse_currency, Address, Buyer, BuyerRole, FinalizedInvoice, InvoiceBuilder,
    InvoiceError, InvoiceFlags, InvoiceNote, InvoiceSubType, InvoiceType, LineItem,
    LineItemFields, OriginalInvoiceRef, OtherId, Party, RequiredInvoiceFields, Seller, SellerRole,
    VatCategory, VatId,
};
use crate::identity::IdentityRef;
use crate::validation::{ValidationError, ValidationIssue, ValidationKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Prepayment,
    CreditNote,
    DebitNote,
}

impl DocumentKind {
    pub fn is_note(&self) -> bool {
        matches!(self, DocumentKind::CreditNote | DocumentKind::DebitNote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_street: Option<String>,
    pub building_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_number: Option<String>,
    pub city: String,
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default = "default_country")]
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceParty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_id_scheme: Option<String>,
    pub address: SourceAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLine {
    pub name: String,
    pub quantity: f64,
    #[serde(default = "default_unit_code")]
    pub unit_code: String,
    pub unit_price: f64,
    pub vat_rate: f64,
    pub vat_category: VatCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBillingReference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFlags {
    pub third_party: bool,
    pub nominal: bool,
    pub export: bool,
    pub summary: bool,
    pub self_billed: bool,
}

impl From<SourceFlags> for InvoiceFlags {
    fn from(flags: SourceFlags) -> Self {
        let mut out = InvoiceFlags::empty();
        out.set(InvoiceFlags::THIRD_PARTY, flags.third_party);
        out.set(InvoiceFlags::NOMINAL, flags.nominal);
        out.set(InvoiceFlags::EXPORT, flags.export);
        out.set(InvoiceFlags::SUMMARY, flags.summary);
        out.set(InvoiceFlags::SELF_BILLED, flags.self_billed);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInvoice {
    pub invoice_number: String,
    pub identity: IdentityRef,
    pub issue_datetime: DateTime<Utc>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub document: DocumentKind,
    pub subtype: InvoiceSubType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_reference: Option<SourceBillingReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub seller: SourceParty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<SourceParty>,
    pub lines: Vec<SourceLine>,
    #[serde(default = "default_payment_means")]
    pub payment_means_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<InvoiceNote>,
    #[serde(default)]
    pub discount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowance_reason: Option<String>,
    #[serde(default)]
    pub flags: SourceFlags,
}

fn default_country() -> String {
    "SA".to_string()
}

fn default_unit_code() -> String {
    "PCE".to_string()
}

fn default_currency() -> String {
    "SAR".to_string()
}

fn default_payment_means() -> String {
    "10".to_string()
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl SourceInvoice {
    /// Collects every issue in the document; `Ok(())` when there are none.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if blank(&self.invoice_number) {
            issues.push(ValidationIssue::missing("invoice_number"));
        }
        if parse_currency(&self.currency).is_err() {
            issues.push(ValidationIssue::new(
                "currency",
                ValidationKind::InvalidFormat,
                format!("'{}' is not an ISO 4217 code", self.currency),
            ));
        }

        self.validate_seller(&mut issues);
        self.validate_buyer(&mut issues);

        if self.lines.is_empty() {
            issues.push(ValidationIssue::new(
                "lines",
                ValidationKind::Missing,
                "at least one line item is required",
            ));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            if blank(&line.name) {
                issues.push(ValidationIssue::missing("lines.name").at_line(idx));
            }
            if line.quantity <= 0.0 {
                issues.push(
                    ValidationIssue::new(
                        "lines.quantity",
                        ValidationKind::OutOfRange,
                        "must be positive",
                    )
                    .at_line(idx),
                );
            }
            if line.vat_rate > 0.0 && line.vat_category != VatCategory::Standard {
                issues.push(
                    ValidationIssue::new(
                        "lines.vat_category",
                        ValidationKind::Mismatch,
                        "must be 'S' when the VAT rate is positive",
                    )
                    .at_line(idx),
                );
            }
            if line.vat_rate == 0.0 && line.vat_category == VatCategory::Standard {
                issues.push(
                    ValidationIssue::new(
                        "lines.vat_category",
                        ValidationKind::Mismatch,
                        "must not be 'S' when the VAT rate is zero",
                    )
                    .at_line(idx),
                );
            }
            if line.vat_rate < 0.0 {
                issues.push(
                    ValidationIssue::new(
                        "lines.vat_rate",
                        ValidationKind::OutOfRange,
                        "must not be negative",
                    )
                    .at_line(idx),
                );
            }
        }

        if self.document.is_note() {
            match &self.billing_reference {
                Some(reference) if !blank(&reference.id) => {}
                _ => issues.push(ValidationIssue::missing("billing_reference")),
            }
            if self.reason.as_deref().map_or(true, blank) {
                issues.push(ValidationIssue::missing("reason"));
            }
        }

        if self.discount < 0.0 {
            issues.push(ValidationIssue::new(
                "discount",
                ValidationKind::OutOfRange,
                "must not be negative",
            ));
        }

        ValidationError::check(issues)
    }

    fn validate_seller(&self, issues: &mut Vec<ValidationIssue>) {
        let seller = &self.seller;
        if blank(&seller.name) {
            issues.push(ValidationIssue::missing("seller.name"));
        }
        match seller.vat_number.as_deref().map(str::trim) {
            None | Some("") => issues.push(ValidationIssue::missing("seller.vat_number")),
            Some(vat) if !VatId::is_saudi_format(vat) => issues.push(ValidationIssue::new(
                "seller.vat_number",
                ValidationKind::InvalidFormat,
                "must be 15 digits starting and ending with 3",
            )),
            Some(_) => {}
        }

        let address = &seller.address;
        if !is_digits(address.building_number.trim(), 4) {
            issues.push(ValidationIssue::new(
                "seller.address.building_number",
                ValidationKind::InvalidFormat,
                "must be 4 digits",
            ));
        }
        if !is_digits(address.postal_code.trim(), 5) {
            issues.push(ValidationIssue::new(
                "seller.address.postal_code",
                ValidationKind::InvalidFormat,
                "must be 5 digits",
            ));
        }
        if blank(&address.street) {
            issues.push(ValidationIssue::missing("seller.address.street"));
        }
        if address.district.as_deref().map_or(true, blank) {
            issues.push(ValidationIssue::missing("seller.address.district"));
        }
        if blank(&address.city) {
            issues.push(ValidationIssue::missing("seller.address.city"));
        }
        if parse_country(&address.country_code).is_err() {
            issues.push(ValidationIssue::new(
                "seller.address.country_code",
                ValidationKind::InvalidFormat,
                format!("'{}' is not an ISO 3166 alpha-2 code", address.country_code),
            ));
        }
    }

    fn validate_buyer(&self, issues: &mut Vec<ValidationIssue>) {
        let Some(buyer) = &self.buyer else {
            if self.subtype == InvoiceSubType::Standard {
                issues.push(ValidationIssue::new(
                    "buyer",
                    ValidationKind::Missing,
                    "is required for standard invoices",
                ));
            }
            return;
        };

        let vat = buyer.vat_number.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let other = buyer.other_id.as_deref().map(str::trim).filter(|v| !v.is_empty());
        if self.subtype == InvoiceSubType::Standard && vat.is_none() && other.is_none() {
            issues.push(ValidationIssue::new(
                "buyer.vat_number",
                ValidationKind::Missing,
                "a VAT number or other identifier is required",
            ));
        }
        let saudi = buyer.address.country_code.trim().eq_ignore_ascii_case("SA");
        if let Some(vat) = vat {
            if saudi && !VatId::is_saudi_format(vat) {
                issues.push(ValidationIssue::new(
                    "buyer.vat_number",
                    ValidationKind::InvalidFormat,
                    "must be 15 digits starting and ending with 3",
                ));
            }
        }
        if blank(&buyer.name) {
            issues.push(ValidationIssue::missing("buyer.name"));
        }
        if parse_country(&buyer.address.country_code).is_err() {
            issues.push(ValidationIssue::new(
                "buyer.address.country_code",
                ValidationKind::InvalidFormat,
                format!(
                    "'{}' is not an ISO 3166 alpha-2 code",
                    buyer.address.country_code
                ),
            ));
        }
    }

    pub fn invoice_type(&self) -> InvoiceType {
        let reference = || {
            let source = self.billing_reference.as_ref();
            let mut original =
                OriginalInvoiceRef::new(source.map(|r| r.id.clone()).unwrap_or_default());
            if let Some(uuid) = source.and_then(|r| r.uuid.clone()) {
                original = original.with_uuid(uuid);
            }
            if let Some(date) = source.and_then(|r| r.issue_date) {
                original = original.with_issue_date(date);
            }
            original
        };
        let reason = || self.reason.clone().unwrap_or_default();

        match self.document {
            DocumentKind::Invoice => InvoiceType::Tax(self.subtype),
            DocumentKind::Prepayment => InvoiceType::Prepayment(self.subtype),
            DocumentKind::CreditNote => InvoiceType::CreditNote(self.subtype, reference(), reason()),
            DocumentKind::DebitNote => InvoiceType::DebitNote(self.subtype, reference(), reason()),
        }
    }

    /// Copy re-typed as another document kind and subtype.
    ///
    /// Notes produced this way reference the document's own number and carry
    /// a fixed reason when the source has none.
    pub fn retyped(&self, document: DocumentKind, subtype: InvoiceSubType) -> SourceInvoice {
        let mut copy = self.clone();
        copy.document = document;
        copy.subtype = subtype;
        if document.is_note() {
            if copy.billing_reference.is_none() {
                copy.billing_reference = Some(SourceBillingReference {
                    id: self.invoice_number.clone(),
                    uuid: None,
                    issue_date: Some(self.issue_datetime.date_naive()),
                });
            }
            if copy.reason.as_deref().map_or(true, blank) {
                copy.reason = Some("Compliance check adjustment".to_string());
            }
        } else {
            copy.billing_reference = None;
            copy.reason = None;
        }
        copy
    }

    /// Validates and builds the invoice for the given chain position.
    pub fn to_finalized(
        &self,
        uuid: &str,
        invoice_counter: u64,
        previous_invoice_hash: &str,
    ) -> Result<FinalizedInvoice, InvoiceError> {
        self.validate()?;

        let line_items = self
            .lines
            .iter()
            .map(|line| {
                LineItem::new(LineItemFields {
                    description: line.name.trim().to_string(),
                    quantity: line.quantity,
                    unit_code: line.unit_code.clone(),
                    unit_price: line.unit_price,
                    vat_rate: line.vat_rate,
                    vat_category: line.vat_category,
                })
            })
            .collect();

        let mut builder = InvoiceBuilder::new(RequiredInvoiceFields {
            invoice_type: self.invoice_type(),
            id: self.invoice_number.trim().to_string(),
            uuid: uuid.to_string(),
            issue_datetime: self.issue_datetime,
            currency: parse_currency(&self.currency)?,
            previous_invoice_hash: previous_invoice_hash.to_string(),
            invoice_counter,
            seller: seller_party(&self.seller)?,
            line_items,
            payment_means_code: self.payment_means_code.clone(),
        })
        .flags(self.flags.into());

        if let Some(buyer) = &self.buyer {
            builder = builder.buyer(buyer_party(buyer)?);
        }
        if let Some(note) = &self.note {
            builder = builder.note(note.clone());
        }
        if self.discount > 0.0 {
            builder = builder.invoice_level_discount(self.discount);
        }
        if let Some(reason) = &self.allowance_reason {
            builder = builder.allowance_reason(reason.clone());
        }

        builder.build()
    }
}

fn address(source: &SourceAddress) -> Result<Address, InvoiceError> {
    fn optional(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    Ok(Address {
        country_code: parse_country(&source.country_code)?,
        city: source.city.trim().to_string(),
        street: source.street.trim().to_string(),
        additional_street: optional(&source.additional_street),
        building_number: source.building_number.trim().to_string(),
        additional_number: optional(&source.additional_number),
        postal_code: source.postal_code.trim().to_string(),
        district: optional(&source.district),
    })
}

fn other_id(party: &SourceParty) -> Option<OtherId> {
    let value = party.other_id.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
    Some(match party.other_id_scheme.as_deref() {
        Some(scheme) => OtherId::with_scheme(value, scheme),
        None => OtherId::new(value),
    })
}

fn seller_party(source: &SourceParty) -> Result<Seller, InvoiceError> {
    Party::<SellerRole>::new(
        source.name.trim().to_string(),
        address(&source.address)?,
        source.vat_number.clone().unwrap_or_default(),
        other_id(source),
    )
}

fn buyer_party(source: &SourceParty) -> Result<Buyer, InvoiceError> {
    let vat = source
        .vat_number
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Party::<BuyerRole>::new(
        source.name.trim().to_string(),
        address(&source.address)?,
        vat,
        other_id(source),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seller() -> SourceParty {
        SourceParty {
            name: "Acme Trading".into(),
            vat_number: Some("399999999900003".into()),
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

    fn source() -> SourceInvoice {
        SourceInvoice {
            invoice_number: "SME00010".into(),
            identity: IdentityRef::company("ACME"),
            issue_datetime: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            currency: "SAR".into(),
            document: DocumentKind::Invoice,
            subtype: InvoiceSubType::Simplified,
            billing_reference: None,
            reason: None,
            seller: seller(),
            buyer: None,
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

    #[test]
    fn simplified_source_validates_and_builds() {
        let src = source();
        src.validate().expect("valid");
        let finalized = src.to_finalized("uuid-1", 3, "PIH").expect("finalized");
        assert_eq!(finalized.data().invoice_counter(), 3);
        assert_eq!(finalized.data().invoice_type().code(), "388");
        assert_eq!(finalized.totals().tax_inclusive_amount(), 23.0);
    }

    #[test]
    fn collects_all_issues() {
        let mut src = source();
        src.seller.vat_number = Some("123".into());
        src.seller.address.building_number = "12".into();
        src.seller.address.postal_code = "ABCDE".into();
        src.seller.address.district = None;
        src.subtype = InvoiceSubType::Standard;
        src.lines[0].vat_category = VatCategory::Zero;
        src.document = DocumentKind::CreditNote;

        let err = src.validate().unwrap_err();
        for field in [
            "seller.vat_number",
            "seller.address.building_number",
            "seller.address.postal_code",
            "seller.address.district",
            "buyer",
            "lines.vat_category",
            "billing_reference",
            "reason",
        ] {
            assert!(err.has_field(field), "missing issue for {field}: {err}");
        }
        let line_issue = err
            .issues
            .iter()
            .find(|issue| issue.field == "lines.vat_category")
            .unwrap();
        assert_eq!(line_issue.line_item_index, Some(0));
    }

    #[test]
    fn standard_buyer_needs_identifier_and_saudi_vat_format() {
        let mut src = source();
        src.subtype = InvoiceSubType::Standard;
        let mut buyer = seller();
        buyer.vat_number = None;
        buyer.other_id = None;
        src.buyer = Some(buyer.clone());
        assert!(src.validate().unwrap_err().has_field("buyer.vat_number"));

        buyer.vat_number = Some("300000000000004".into());
        src.buyer = Some(buyer.clone());
        assert!(src.validate().unwrap_err().has_field("buyer.vat_number"));

        buyer.address.country_code = "AE".into();
        src.buyer = Some(buyer);
        src.validate().expect("foreign VAT numbers are not checked");
    }

    #[test]
    fn zero_rate_line_must_not_be_standard() {
        let mut src = source();
        src.lines[0].vat_rate = 0.0;
        assert!(src.validate().unwrap_err().has_field("lines.vat_category"));
        src.lines[0].vat_category = VatCategory::Exempt;
        src.validate().expect("exempt zero-rated line");
    }

    #[test]
    fn retyped_note_references_itself() {
        let note = source().retyped(DocumentKind::DebitNote, InvoiceSubType::Simplified);
        assert_eq!(note.billing_reference.as_ref().unwrap().id, "SME00010");
        assert!(note.reason.is_some());
        match note.invoice_type() {
            InvoiceType::DebitNote(InvoiceSubType::Simplified, original, _) => {
                assert_eq!(original.id(), "SME00010")
            }
            other => panic!("unexpected type {other:?}"),
        }
        note.validate().expect("retyped note is valid");
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = serde_json::json!({
            "invoice_number": "INV-7",
            "identity": {"kind": "device", "id": "POS-1"},
            "issue_datetime": "2024-05-01T10:00:00Z",
            "document": "credit_note",
            "subtype": "standard",
            "billing_reference": {"id": "INV-6"},
            "reason": "Returned",
            "seller": {
                "name": "Acme",
                "vat_number": "399999999900003",
                "address": {
                    "street": "Main",
                    "building_number": "1234",
                    "city": "Jeddah",
                    "postal_code": "12345",
                    "district": "Center"
                }
            },
            "lines": [{
                "name": "Tea",
                "quantity": 1.0,
                "unit_price": 5.0,
                "vat_rate": 15.0,
                "vat_category": "S"
            }],
            "flags": {"export": true}
        });
        let src: SourceInvoice = serde_json::from_value(json).unwrap();
        assert_eq!(src.currency, "SAR");
        assert_eq!(src.payment_means_code, "10");
        assert_eq!(src.lines[0].unit_code, "PCE");
        assert_eq!(src.seller.address.country_code, "SA");
        assert_eq!(InvoiceFlags::from(src.flags), InvoiceFlags::EXPORT);
        assert_eq!(src.identity, IdentityRef::device("POS-1"));
    }
}
