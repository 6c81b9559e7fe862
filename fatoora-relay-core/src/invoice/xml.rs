//! XML serialization for invoices.
use super::{
    Address, Buyer, FinalizedInvoice, InvoiceData, InvoiceNote, InvoiceTotalsData, InvoiceView, LineItem, OtherId, Party, PartyRole, Seller, SignedInvoice, TaxSubtotal,
    VatCategory, VatId,
};
use crate::invoice::sign::SignedProperties;

use constants::{
    C14N11_ALGORITHM, CAC_NS, CBC_NS, DS_NS, ECDSA_SHA256_ALGORITHM, EXT_NS,
    HASH_EXCLUSION_XPATHS, INVOICE_NS, PROFILE_ID, REFERENCED_SIGNATURE_ID, SAC_NS, SBC_NS,
    SHA256_ALGORITHM, SIGNATURE_INFORMATION_ID, SIGNATURE_PROPERTIES_TYPE, SIG_NS,
    XADES_EXTENSION_URI, XADES_NS, XPATH_ALGORITHM,
};
use helpers::{
    currency_amount, currency_amount_with_precision, id_with_scheme, id_with_scheme_with_agency,
    quantity_with_unit, FixedPrecision,
};
use quick_xml::escape::partial_escape;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;

/// Wrapper for serializing invoices to XML.
pub struct InvoiceXml<'a, T: InvoiceView + ?Sized>(pub &'a T);

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

mod helpers {
    use serde::ser::{Serialize, SerializeStruct, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    struct CurrencyAmountSer<'a> {
        tag: &'static str,
        currency: &'a str,
        value: f64,
        precision: usize,
    }

    pub(super) fn currency_amount<'a>(
        tag: &'static str,
        currency: &'a str,
        value: f64,
    ) -> impl Serialize + 'a {
        CurrencyAmountSer {
            tag,
            currency,
            value,
            precision: 2,
        }
    }

    pub(super) fn currency_amount_with_precision<'a>(
        tag: &'static str,
        currency: &'a str,
        value: f64,
        precision: usize,
    ) -> impl Serialize + 'a {
        CurrencyAmountSer {
            tag,
            currency,
            value,
            precision,
        }
    }

    impl<'a> Serialize for CurrencyAmountSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct(self.tag, 2)?;
            st.serialize_field("@currencyID", self.currency)?;
            st.serialize_field("$text", &FixedPrecision::new(self.value, self.precision))?;
            st.end()
        }
    }

    struct IdWithSchemeSer<'a> {
        tag: &'static str,
        scheme_id: &'a str,
        scheme_agency_id: Option<&'a str>,
        value: &'a str,
    }

    pub(super) fn id_with_scheme<'a>(
        tag: &'static str,
        scheme_id: &'a str,
        value: &'a str,
    ) -> impl Serialize + 'a {
        IdWithSchemeSer {
            tag,
            scheme_id,
            scheme_agency_id: None,
            value,
        }
    }

    pub(super) fn id_with_scheme_with_agency<'a>(
        tag: &'static str,
        scheme_id: &'a str,
        scheme_agency_id: &'a str,
        value: &'a str,
    ) -> impl Serialize + 'a {
        IdWithSchemeSer {
            tag,
            scheme_id,
            scheme_agency_id: Some(scheme_agency_id),
            value,
        }
    }

    impl<'a> Serialize for IdWithSchemeSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            // attribute order matches canonical (sorted) form
            let mut st = s.serialize_struct(self.tag, 3)?;
            if let Some(agency) = self.scheme_agency_id {
                st.serialize_field("@schemeAgencyID", agency)?;
            }
            st.serialize_field("@schemeID", self.scheme_id)?;
            st.serialize_field("$text", self.value)?;
            st.end()
        }
    }

    struct QuantityWithUnitSer<'a> {
        tag: &'static str,
        value: f64,
        unit_code: &'a str,
    }

    pub(super) fn quantity_with_unit<'a>(
        tag: &'static str,
        value: f64,
        unit_code: &'a str,
    ) -> impl Serialize + 'a {
        QuantityWithUnitSer {
            tag,
            value,
            unit_code,
        }
    }

    impl<'a> Serialize for QuantityWithUnitSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct(self.tag, 2)?;
            st.serialize_field("@unitCode", self.unit_code)?;
            st.serialize_field("$text", &FixedPrecision::new(self.value, 6))?;
            st.end()
        }
    }
}

struct InvoiceTotals<'a> {
    currency: &'a str,
    vat_percent: f64,
    vat_category: &'a VatCategory,
    totals: &'a InvoiceTotalsData,
}

impl<'a> InvoiceTotals<'a> {
    fn new<T: InvoiceView + ?Sized>(inv: &'a T) -> Self {
        let data = inv.data();
        let vat_percent = data
            .line_items
            .first()
            .map(|li| li.vat_rate)
            .unwrap_or_default();

        Self {
            currency: data.currency.code(),
            vat_percent,
            vat_category: &data.vat_category,
            totals: inv.totals(),
        }
    }

    fn currency(&self) -> &'a str {
        self.currency
    }
}

struct InvoiceTypeView<'a>(&'a InvoiceData);

impl<'a> Serialize for InvoiceTypeView<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.0;
        let mut st = s.serialize_struct("cbc:InvoiceTypeCode", 2)?;
        st.serialize_field("@name", &data.invoice_type.name_attribute(data.flags))?;
        st.serialize_field("$text", data.invoice_type.code())?;
        st.end()
    }
}

struct TaxSchemeXml;

impl Serialize for TaxSchemeXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:TaxScheme", 0)?;
        st.serialize_field(
            "cbc:ID",
            &id_with_scheme_with_agency("cbc:ID", "UN/ECE 5153", "6", "VAT"),
        )?;
        st.end()
    }
}

struct VatSchemeXml<'a>(&'a VatId);

impl<'a> Serialize for VatSchemeXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:PartyTaxScheme", 0)?;
        st.serialize_field("cbc:CompanyID", self.0.as_str())?;
        st.serialize_field("cac:TaxScheme", &TaxSchemeXml)?;
        st.end()
    }
}

struct PartyXml<'a, R: PartyRole>(&'a Party<R>);

struct PartyIdentificationXml<'a>(&'a OtherId);

impl<'a> Serialize for PartyIdentificationXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let other_id = self.0;
        let mut st = s.serialize_struct("cac:PartyIdentification", 0)?;
        if let Some(scheme_id) = other_id.scheme_id() {
            st.serialize_field(
                "cbc:ID",
                &id_with_scheme("cbc:ID", scheme_id, other_id.as_str()),
            )?;
        } else {
            st.serialize_field("cbc:ID", other_id.as_str())?;
        }
        st.end()
    }
}

struct PartyLegalEntityXml<'a>(&'a str);

impl<'a> Serialize for PartyLegalEntityXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:PartyLegalEntity", 0)?;
        st.serialize_field("cbc:RegistrationName", self.0)?;
        st.end()
    }
}

struct AccountingSupplierPartyXml<'a>(&'a Seller);

impl<'a> Serialize for AccountingSupplierPartyXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:AccountingSupplierParty", 0)?;
        st.serialize_field("cac:Party", &PartyXml(self.0))?;
        st.end()
    }
}

struct AccountingCustomerPartyXml<'a>(Option<&'a Buyer>);

impl<'a> Serialize for AccountingCustomerPartyXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:AccountingCustomerParty", 0)?;
        if let Some(party) = self.0 {
            st.serialize_field("cac:Party", &PartyXml(party))?;
        } else {
            st.serialize_field("cac:Party", &EmptyParty)?;
        }
        st.end()
    }
}

struct EmptyParty;

impl Serialize for EmptyParty {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let st = s.serialize_struct("cac:Party", 0)?;
        st.end()
    }
}

struct NoteXml<'a>(&'a InvoiceNote);

impl<'a> Serialize for NoteXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let note = self.0;
        let mut st = s.serialize_struct("cbc:Note", 2)?;
        st.serialize_field("@languageID", &note.language)?;
        st.serialize_field("$text", &note.text)?;
        st.end()
    }
}

enum AdditionalDocumentReferenceXml<'a> {
    InvoiceCounter(&'a str),
    PreviousInvoiceHash(&'a str),
    QrCode(&'a str),
}

impl<'a> Serialize for AdditionalDocumentReferenceXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:AdditionalDocumentReference", 0)?;
        match self {
            AdditionalDocumentReferenceXml::InvoiceCounter(value) => {
                st.serialize_field("cbc:ID", "ICV")?;
                st.serialize_field("cbc:UUID", value)?;
            }
            AdditionalDocumentReferenceXml::PreviousInvoiceHash(value) => {
                st.serialize_field("cbc:ID", "PIH")?;
                st.serialize_field("cac:Attachment", &AttachmentXml(value))?;
            }
            AdditionalDocumentReferenceXml::QrCode(value) => {
                st.serialize_field("cbc:ID", "QR")?;
                st.serialize_field("cac:Attachment", &AttachmentXml(value))?;
            }
        }
        st.end()
    }
}

struct AttachmentXml<'a>(&'a str);

impl<'a> Serialize for AttachmentXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct EmbeddedDocumentXml<'a>(&'a str);
        impl<'a> Serialize for EmbeddedDocumentXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("cbc:EmbeddedDocumentBinaryObject", 2)?;
                st.serialize_field("@mimeCode", "text/plain")?;
                st.serialize_field("$text", self.0)?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("cac:Attachment", 0)?;
        st.serialize_field("cbc:EmbeddedDocumentBinaryObject", &EmbeddedDocumentXml(self.0))?;
        st.end()
    }
}

struct BillingReferenceXml<'a>(&'a super::OriginalInvoiceRef);

impl<'a> Serialize for BillingReferenceXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct InvoiceDocumentReferenceXml<'a>(&'a super::OriginalInvoiceRef);
        impl<'a> Serialize for InvoiceDocumentReferenceXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("cac:InvoiceDocumentReference", 0)?;
                st.serialize_field("cbc:ID", self.0.id())?;
                if let Some(uuid) = self.0.uuid() {
                    st.serialize_field("cbc:UUID", uuid)?;
                }
                if let Some(issue_date) = self.0.issue_date() {
                    st.serialize_field("cbc:IssueDate", &issue_date.to_string())?;
                }
                st.end()
            }
        }

        let mut st = s.serialize_struct("cac:BillingReference", 0)?;
        st.serialize_field(
            "cac:InvoiceDocumentReference",
            &InvoiceDocumentReferenceXml(self.0),
        )?;
        st.end()
    }
}

// ---- signature blocks ----

struct AlgorithmXml(&'static str, &'static str);

impl Serialize for AlgorithmXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.0, 1)?;
        st.serialize_field("@Algorithm", self.1)?;
        st.end()
    }
}

struct TransformXml(Option<&'static str>);

impl Serialize for TransformXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Transform", 2)?;
        match self.0 {
            Some(xpath) => {
                st.serialize_field("@Algorithm", XPATH_ALGORITHM)?;
                st.serialize_field("ds:XPath", xpath)?;
            }
            None => st.serialize_field("@Algorithm", C14N11_ALGORITHM)?,
        }
        st.end()
    }
}

struct TransformsXml;

impl Serialize for TransformsXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Transforms", 4)?;
        for xpath in HASH_EXCLUSION_XPATHS {
            st.serialize_field("ds:Transform", &TransformXml(Some(xpath)))?;
        }
        st.serialize_field("ds:Transform", &TransformXml(None))?;
        st.end()
    }
}

enum ReferenceXml<'a> {
    InvoiceSignedData(&'a str),
    SignedProperties(&'a str),
}

impl<'a> Serialize for ReferenceXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Reference", 0)?;
        let digest = match self {
            ReferenceXml::InvoiceSignedData(digest) => {
                st.serialize_field("@Id", "invoiceSignedData")?;
                st.serialize_field("@URI", "")?;
                st.serialize_field("ds:Transforms", &TransformsXml)?;
                digest
            }
            ReferenceXml::SignedProperties(digest) => {
                st.serialize_field("@Type", SIGNATURE_PROPERTIES_TYPE)?;
                st.serialize_field("@URI", "#xadesSignedProperties")?;
                digest
            }
        };
        st.serialize_field(
            "ds:DigestMethod",
            &AlgorithmXml("ds:DigestMethod", SHA256_ALGORITHM),
        )?;
        st.serialize_field("ds:DigestValue", *digest)?;
        st.end()
    }
}

struct SignedInfoXml<'a>(&'a SignedProperties);

impl<'a> Serialize for SignedInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:SignedInfo", 0)?;
        st.serialize_field(
            "ds:CanonicalizationMethod",
            &AlgorithmXml("ds:CanonicalizationMethod", C14N11_ALGORITHM),
        )?;
        st.serialize_field(
            "ds:SignatureMethod",
            &AlgorithmXml("ds:SignatureMethod", ECDSA_SHA256_ALGORITHM),
        )?;
        st.serialize_field(
            "ds:Reference",
            &ReferenceXml::InvoiceSignedData(self.0.invoice_hash()),
        )?;
        st.serialize_field(
            "ds:Reference",
            &ReferenceXml::SignedProperties(self.0.signed_props_hash()),
        )?;
        st.end()
    }
}

struct KeyInfoXml<'a>(&'a str);

impl<'a> Serialize for KeyInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct X509DataXml<'a>(&'a str);
        impl<'a> Serialize for X509DataXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("ds:X509Data", 1)?;
                st.serialize_field("ds:X509Certificate", self.0)?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("ds:KeyInfo", 1)?;
        st.serialize_field("ds:X509Data", &X509DataXml(self.0))?;
        st.end()
    }
}

struct SigningCertificateXml<'a>(&'a SignedProperties);

impl<'a> Serialize for SigningCertificateXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct CertDigestXml<'a>(&'a str);
        impl<'a> Serialize for CertDigestXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("xades:CertDigest", 2)?;
                st.serialize_field(
                    "ds:DigestMethod",
                    &AlgorithmXml("ds:DigestMethod", SHA256_ALGORITHM),
                )?;
                st.serialize_field("ds:DigestValue", self.0)?;
                st.end()
            }
        }

        struct IssuerSerialXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for IssuerSerialXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("xades:IssuerSerial", 2)?;
                st.serialize_field("ds:X509IssuerName", self.0.issuer())?;
                st.serialize_field("ds:X509SerialNumber", self.0.serial())?;
                st.end()
            }
        }

        struct CertXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for CertXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("xades:Cert", 2)?;
                st.serialize_field("xades:CertDigest", &CertDigestXml(self.0.cert_hash()))?;
                st.serialize_field("xades:IssuerSerial", &IssuerSerialXml(self.0))?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("xades:SigningCertificate", 1)?;
        st.serialize_field("xades:Cert", &CertXml(self.0))?;
        st.end()
    }
}

struct QualifyingPropertiesXml<'a>(&'a SignedProperties);

impl<'a> Serialize for QualifyingPropertiesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct SignedSignaturePropertiesXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for SignedSignaturePropertiesXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("xades:SignedSignatureProperties", 2)?;
                st.serialize_field("xades:SigningTime", &self.0.signing_time())?;
                st.serialize_field("xades:SigningCertificate", &SigningCertificateXml(self.0))?;
                st.end()
            }
        }

        struct SignedPropertiesXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for SignedPropertiesXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("xades:SignedProperties", 2)?;
                st.serialize_field("@Id", "xadesSignedProperties")?;
                st.serialize_field(
                    "xades:SignedSignatureProperties",
                    &SignedSignaturePropertiesXml(self.0),
                )?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("xades:QualifyingProperties", 3)?;
        st.serialize_field("@xmlns:xades", XADES_NS)?;
        st.serialize_field("@Target", "signature")?;
        st.serialize_field("xades:SignedProperties", &SignedPropertiesXml(self.0))?;
        st.end()
    }
}

struct DsSignatureXml<'a>(&'a SignedProperties);

impl<'a> Serialize for DsSignatureXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct ObjectXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for ObjectXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("ds:Object", 1)?;
                st.serialize_field(
                    "xades:QualifyingProperties",
                    &QualifyingPropertiesXml(self.0),
                )?;
                st.end()
            }
        }

        let signing = self.0;
        let mut st = s.serialize_struct("ds:Signature", 0)?;
        st.serialize_field("@xmlns:ds", DS_NS)?;
        st.serialize_field("@Id", "signature")?;
        st.serialize_field("ds:SignedInfo", &SignedInfoXml(signing))?;
        st.serialize_field("ds:SignatureValue", signing.signature())?;
        st.serialize_field("ds:KeyInfo", &KeyInfoXml(signing.certificate()))?;
        st.serialize_field("ds:Object", &ObjectXml(signing))?;
        st.end()
    }
}

struct UblExtensionsXml<'a>(&'a SignedProperties);

impl<'a> Serialize for UblExtensionsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct SignatureInformationXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for SignatureInformationXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("sac:SignatureInformation", 3)?;
                st.serialize_field("cbc:ID", SIGNATURE_INFORMATION_ID)?;
                st.serialize_field("sbc:ReferencedSignatureID", REFERENCED_SIGNATURE_ID)?;
                st.serialize_field("ds:Signature", &DsSignatureXml(self.0))?;
                st.end()
            }
        }

        struct DocumentSignaturesXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for DocumentSignaturesXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("sig:UBLDocumentSignatures", 4)?;
                st.serialize_field("@xmlns:sac", SAC_NS)?;
                st.serialize_field("@xmlns:sbc", SBC_NS)?;
                st.serialize_field("@xmlns:sig", SIG_NS)?;
                st.serialize_field("sac:SignatureInformation", &SignatureInformationXml(self.0))?;
                st.end()
            }
        }

        struct ExtensionContentXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for ExtensionContentXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("ext:ExtensionContent", 1)?;
                st.serialize_field("sig:UBLDocumentSignatures", &DocumentSignaturesXml(self.0))?;
                st.end()
            }
        }

        struct ExtensionXml<'a>(&'a SignedProperties);
        impl<'a> Serialize for ExtensionXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("ext:UBLExtension", 2)?;
                st.serialize_field("ext:ExtensionURI", XADES_EXTENSION_URI)?;
                st.serialize_field("ext:ExtensionContent", &ExtensionContentXml(self.0))?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("ext:UBLExtensions", 1)?;
        st.serialize_field("ext:UBLExtension", &ExtensionXml(self.0))?;
        st.end()
    }
}

struct CacSignatureXml;

impl Serialize for CacSignatureXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:Signature", 2)?;
        st.serialize_field("cbc:ID", REFERENCED_SIGNATURE_ID)?;
        st.serialize_field("cbc:SignatureMethod", XADES_EXTENSION_URI)?;
        st.end()
    }
}

/// The `xades:SignedProperties` element as hashed for the
/// `#xadesSignedProperties` reference.
pub(crate) fn signed_properties_xml_string(
    signing_time: &str,
    cert_hash_b64: &str,
    issuer: &str,
    serial: &str,
) -> String {
    format!(
        concat!(
            "<xades:SignedProperties xmlns:xades=\"{xades}\" Id=\"xadesSignedProperties\">",
            "<xades:SignedSignatureProperties>",
            "<xades:SigningTime>{time}</xades:SigningTime>",
            "<xades:SigningCertificate><xades:Cert><xades:CertDigest>",
            "<ds:DigestMethod xmlns:ds=\"{ds}\" Algorithm=\"{sha256}\"></ds:DigestMethod>",
            "<ds:DigestValue xmlns:ds=\"{ds}\">{hash}</ds:DigestValue>",
            "</xades:CertDigest><xades:IssuerSerial>",
            "<ds:X509IssuerName xmlns:ds=\"{ds}\">{issuer}</ds:X509IssuerName>",
            "<ds:X509SerialNumber xmlns:ds=\"{ds}\">{serial}</ds:X509SerialNumber>",
            "</xades:IssuerSerial></xades:Cert></xades:SigningCertificate>",
            "</xades:SignedSignatureProperties>",
            "</xades:SignedProperties>"
        ),
        xades = XADES_NS,
        ds = DS_NS,
        sha256 = SHA256_ALGORITHM,
        time = signing_time,
        hash = cert_hash_b64,
        issuer = partial_escape(issuer),
        serial = serial,
    )
}

struct TaxCategoryXml<'a> {
    category: &'a VatCategory,
    percent: f64,
}

impl<'a> Serialize for TaxCategoryXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cac:TaxCategory", 0)?;
        st.serialize_field(
            "cbc:ID",
            &id_with_scheme_with_agency("cbc:ID", "UN/ECE 5305", "6", self.category.code()),
        )?;
        st.serialize_field("cbc:Percent", &FixedPrecision::new(self.percent, 2))?;
        st.serialize_field("cac:TaxScheme", &TaxSchemeXml)?;
        st.end()
    }
}

fn allowance_charge<'a>(
    charge_indicator: bool,
    amount: f64,
    currency: &'a str,
    reason: &'a str,
    vat_category: &'a VatCategory,
    percent: f64,
) -> impl Serialize + 'a {
    struct AllowanceChargeSer<'a> {
        charge_indicator: bool,
        amount: f64,
        currency: &'a str,
        reason: &'a str,
        vat_category: &'a VatCategory,
        percent: f64,
    }
    impl<'a> Serialize for AllowanceChargeSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("cac:AllowanceCharge", 0)?;
            st.serialize_field("cbc:ChargeIndicator", &self.charge_indicator)?;
            st.serialize_field("cbc:AllowanceChargeReason", self.reason)?;
            st.serialize_field(
                "cbc:Amount",
                &currency_amount("cbc:Amount", self.currency, self.amount),
            )?;
            st.serialize_field(
                "cac:TaxCategory",
                &TaxCategoryXml {
                    category: self.vat_category,
                    percent: self.percent,
                },
            )?;
            st.end()
        }
    }
    AllowanceChargeSer {
        charge_indicator,
        amount,
        currency,
        reason,
        vat_category,
        percent,
    }
}

fn tax_total<'a>(
    amount: f64,
    currency: &'a str,
    subtotals: &'a [TaxSubtotal],
) -> impl Serialize + 'a {
    struct TaxTotalSer<'a> {
        amount: f64,
        currency: &'a str,
        subtotals: &'a [TaxSubtotal],
    }
    impl<'a> Serialize for TaxTotalSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("cac:TaxTotal", 0)?;
            st.serialize_field(
                "cbc:TaxAmount",
                &currency_amount("cbc:TaxAmount", self.currency, self.amount),
            )?;
            for subtotal in self.subtotals {
                st.serialize_field("cac:TaxSubtotal", &tax_subtotal(self.currency, subtotal))?;
            }
            st.end()
        }
    }
    TaxTotalSer {
        amount,
        currency,
        subtotals,
    }
}

fn tax_subtotal<'a>(currency: &'a str, data: &'a TaxSubtotal) -> impl Serialize + 'a {
    struct TaxSubtotalSer<'a> {
        currency: &'a str,
        data: &'a TaxSubtotal,
    }
    impl<'a> Serialize for TaxSubtotalSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let data = self.data;
            let mut st = s.serialize_struct("cac:TaxSubtotal", 0)?;
            st.serialize_field(
                "cbc:TaxableAmount",
                &currency_amount("cbc:TaxableAmount", self.currency, data.taxable_amount),
            )?;
            st.serialize_field(
                "cbc:TaxAmount",
                &currency_amount("cbc:TaxAmount", self.currency, data.tax_amount),
            )?;
            st.serialize_field(
                "cac:TaxCategory",
                &TaxCategoryXml {
                    category: &data.category,
                    percent: data.rate,
                },
            )?;
            st.end()
        }
    }
    TaxSubtotalSer { currency, data }
}

fn legal_monetary_total<'a>(currency: &'a str, totals: &'a InvoiceTotalsData) -> impl Serialize + 'a {
    struct LegalMonetaryTotalSer<'a> {
        currency: &'a str,
        totals: &'a InvoiceTotalsData,
    }
    impl<'a> Serialize for LegalMonetaryTotalSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let t = self.totals;
            let mut st = s.serialize_struct("cac:LegalMonetaryTotal", 0)?;
            st.serialize_field(
                "cbc:LineExtensionAmount",
                &currency_amount("cbc:LineExtensionAmount", self.currency, t.line_extension()),
            )?;
            st.serialize_field(
                "cbc:TaxExclusiveAmount",
                &currency_amount("cbc:TaxExclusiveAmount", self.currency, t.taxable_amount()),
            )?;
            st.serialize_field(
                "cbc:TaxInclusiveAmount",
                &currency_amount(
                    "cbc:TaxInclusiveAmount",
                    self.currency,
                    t.tax_inclusive_amount(),
                ),
            )?;
            st.serialize_field(
                "cbc:AllowanceTotalAmount",
                &currency_amount("cbc:AllowanceTotalAmount", self.currency, t.allowance_total()),
            )?;
            if t.charge_total() > 0.0 {
                st.serialize_field(
                    "cbc:ChargeTotalAmount",
                    &currency_amount("cbc:ChargeTotalAmount", self.currency, t.charge_total()),
                )?;
            }
            st.serialize_field(
                "cbc:PrepaidAmount",
                &currency_amount("cbc:PrepaidAmount", self.currency, 0.0),
            )?;
            st.serialize_field(
                "cbc:PayableAmount",
                &currency_amount("cbc:PayableAmount", self.currency, t.tax_inclusive_amount()),
            )?;
            st.end()
        }
    }
    LegalMonetaryTotalSer { currency, totals }
}

fn payment_means<'a>(code: &'a str, instruction_note: Option<&'a str>) -> impl Serialize + 'a {
    struct PaymentMeansSer<'a> {
        code: &'a str,
        instruction_note: Option<&'a str>,
    }
    impl<'a> Serialize for PaymentMeansSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("cac:PaymentMeans", 0)?;
            st.serialize_field("cbc:PaymentMeansCode", self.code)?;
            if let Some(note) = self.instruction_note {
                st.serialize_field("cbc:InstructionNote", note)?;
            }
            st.end()
        }
    }
    PaymentMeansSer {
        code,
        instruction_note,
    }
}

impl<'a, R: PartyRole> Serialize for PartyXml<'a, R> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let p = self.0;

        let mut st = s.serialize_struct("cac:Party", 0)?;

        if let Some(other_id) = &p.other_id {
            st.serialize_field("cac:PartyIdentification", &PartyIdentificationXml(other_id))?;
        }
        st.serialize_field("cac:PostalAddress", &AddressXml(&p.address))?;
        if let Some(vat) = &p.vat_id {
            st.serialize_field("cac:PartyTaxScheme", &VatSchemeXml(vat))?;
        }
        st.serialize_field("cac:PartyLegalEntity", &PartyLegalEntityXml(&p.name))?;

        st.end()
    }
}

struct AddressXml<'a>(&'a Address);

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct CountryXml<'a>(&'a str);
        impl<'a> Serialize for CountryXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("cac:Country", 0)?;
                st.serialize_field("cbc:IdentificationCode", self.0)?;
                st.end()
            }
        }

        let a = self.0;
        let mut st = s.serialize_struct("cac:PostalAddress", 0)?;

        st.serialize_field("cbc:StreetName", &a.street)?;
        if let Some(additional) = &a.additional_street {
            st.serialize_field("cbc:AdditionalStreetName", additional)?;
        }
        st.serialize_field("cbc:BuildingNumber", &a.building_number)?;
        if let Some(plot) = &a.additional_number {
            st.serialize_field("cbc:PlotIdentification", plot)?;
        }
        if let Some(district) = &a.district {
            st.serialize_field("cbc:CitySubdivisionName", district)?;
        }
        st.serialize_field("cbc:CityName", &a.city)?;
        st.serialize_field("cbc:PostalZone", &a.postal_code)?;
        st.serialize_field("cac:Country", &CountryXml(a.country_code.alpha2()))?;

        st.end()
    }
}

struct InvoiceLineXml<'a>(usize, &'a LineItem, &'a str);

impl<'a> Serialize for InvoiceLineXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct LineTaxTotalXml<'a>(&'a LineItem, &'a str);
        impl<'a> Serialize for LineTaxTotalXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let (li, currency) = (self.0, self.1);
                let mut st = s.serialize_struct("cac:TaxTotal", 0)?;
                st.serialize_field(
                    "cbc:TaxAmount",
                    &currency_amount("cbc:TaxAmount", currency, li.vat_amount),
                )?;
                st.serialize_field(
                    "cbc:RoundingAmount",
                    &currency_amount(
                        "cbc:RoundingAmount",
                        currency,
                        li.total_amount + li.vat_amount,
                    ),
                )?;
                st.end()
            }
        }

        struct ItemXml<'a>(&'a LineItem);
        impl<'a> Serialize for ItemXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("cac:Item", 0)?;
                st.serialize_field("cbc:Name", &self.0.description)?;
                st.serialize_field(
                    "cac:ClassifiedTaxCategory",
                    &TaxCategoryXml {
                        category: &self.0.vat_category,
                        percent: self.0.vat_rate,
                    },
                )?;
                st.end()
            }
        }

        struct PriceXml<'a>(f64, &'a str);
        impl<'a> Serialize for PriceXml<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("cac:Price", 0)?;
                st.serialize_field(
                    "cbc:PriceAmount",
                    &currency_amount_with_precision("cbc:PriceAmount", self.1, self.0, 2),
                )?;
                st.end()
            }
        }

        let (idx, li, currency) = (self.0, self.1, self.2);

        let mut st = s.serialize_struct("cac:InvoiceLine", 0)?;
        st.serialize_field("cbc:ID", &idx.to_string())?;
        st.serialize_field(
            "cbc:InvoicedQuantity",
            &quantity_with_unit("cbc:InvoicedQuantity", li.quantity, &li.unit_code),
        )?;
        st.serialize_field(
            "cbc:LineExtensionAmount",
            &currency_amount("cbc:LineExtensionAmount", currency, li.total_amount),
        )?;
        st.serialize_field("cac:TaxTotal", &LineTaxTotalXml(li, currency))?;
        st.serialize_field("cac:Item", &ItemXml(li))?;
        st.serialize_field("cac:Price", &PriceXml(li.unit_price, currency))?;
        st.end()
    }
}

/// Serialize invoices to XML.
///
/// A [`FinalizedInvoice`] renders without signature blocks. A
/// [`SignedInvoice`] renders with the UBL extension, the QR reference and
/// the `cac:Signature` element.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for FinalizedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        to_xml_with_format(self, format, true)
    }
}

impl ToXml for SignedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        to_xml_with_format(self, format, true)
    }
}

pub(crate) fn to_canonical_xml<T: InvoiceView + ?Sized>(
    invoice: &T,
) -> Result<String, InvoiceXmlError> {
    to_xml_with_format(invoice, XmlFormat::Compact, false)
}

fn to_xml_with_format<T: InvoiceView + ?Sized>(
    invoice: &T,
    format: XmlFormat,
    declaration: bool,
) -> Result<String, InvoiceXmlError> {
    let mut buffer = String::with_capacity(8192);
    if declaration {
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');
    }

    {
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = format
        {
            serializer.indent(indent_char, indent_size);
        }
        InvoiceXml(invoice).serialize(serializer)?;
    }

    Ok(buffer)
}

impl<'a, T: InvoiceView + ?Sized> Serialize for InvoiceXml<'a, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let data = view.data();
        let totals = InvoiceTotals::new(view);
        let currency_code = totals.currency();

        let mut root = serializer.serialize_struct("Invoice", 0)?;

        // ---- namespaces (attributes) ----
        root.serialize_field("@xmlns", INVOICE_NS)?;
        root.serialize_field("@xmlns:cac", CAC_NS)?;
        root.serialize_field("@xmlns:cbc", CBC_NS)?;
        root.serialize_field("@xmlns:ext", EXT_NS)?;

        if let Some(signing) = view.signed_properties() {
            root.serialize_field("ext:UBLExtensions", &UblExtensionsXml(signing))?;
        }

        // ---- identifiers & issue info ----
        root.serialize_field("cbc:ProfileID", PROFILE_ID)?;
        root.serialize_field("cbc:ID", &data.id)?;
        root.serialize_field("cbc:UUID", &data.uuid)?;
        root.serialize_field("cbc:IssueDate", &data.issue_date_string())?;
        root.serialize_field("cbc:IssueTime", &data.issue_time_string())?;

        // ---- invoice type ----
        root.serialize_field("cbc:InvoiceTypeCode", &InvoiceTypeView(data))?;
        if let Some(note) = data.note.as_ref() {
            root.serialize_field("cbc:Note", &NoteXml(note))?;
        }
        root.serialize_field("cbc:DocumentCurrencyCode", currency_code)?;
        root.serialize_field("cbc:TaxCurrencyCode", currency_code)?;

        // ---- credit/debit references ----
        if let Some((original, _)) = data.invoice_type.original_reference() {
            root.serialize_field("cac:BillingReference", &BillingReferenceXml(original))?;
        }

        // ---- supporting references ----
        let counter = data.invoice_counter.to_string();
        root.serialize_field(
            "cac:AdditionalDocumentReference",
            &AdditionalDocumentReferenceXml::InvoiceCounter(&counter),
        )?;
        root.serialize_field(
            "cac:AdditionalDocumentReference",
            &AdditionalDocumentReferenceXml::PreviousInvoiceHash(&data.previous_invoice_hash),
        )?;
        if let Some(qr) = view.qr_code() {
            root.serialize_field(
                "cac:AdditionalDocumentReference",
                &AdditionalDocumentReferenceXml::QrCode(qr),
            )?;
        }
        if view.signed_properties().is_some() {
            root.serialize_field("cac:Signature", &CacSignatureXml)?;
        }

        // ---- parties ----
        root.serialize_field(
            "cac:AccountingSupplierParty",
            &AccountingSupplierPartyXml(&data.seller),
        )?;
        root.serialize_field(
            "cac:AccountingCustomerParty",
            &AccountingCustomerPartyXml(data.buyer.as_ref()),
        )?;

        // ---- payment ----
        let instruction_note = data
            .invoice_type
            .original_reference()
            .map(|(_, reason)| reason.trim())
            .filter(|reason| !reason.is_empty());
        root.serialize_field(
            "cac:PaymentMeans",
            &payment_means(&data.payment_means_code, instruction_note),
        )?;

        // ---- allowance / charges ----
        let t = totals.totals;
        if t.allowance_total() > 0.0 {
            root.serialize_field(
                "cac:AllowanceCharge",
                &allowance_charge(
                    false,
                    t.allowance_total(),
                    currency_code,
                    data.allowance_reason.as_deref().unwrap_or("discount"),
                    totals.vat_category,
                    totals.vat_percent,
                ),
            )?;
        }
        if t.charge_total() > 0.0 {
            root.serialize_field(
                "cac:AllowanceCharge",
                &allowance_charge(
                    true,
                    t.charge_total(),
                    currency_code,
                    data.allowance_reason.as_deref().unwrap_or("charge"),
                    totals.vat_category,
                    totals.vat_percent,
                ),
            )?;
        }

        // ---- tax totals ----
        root.serialize_field("cac:TaxTotal", &tax_total(t.tax_amount(), currency_code, &[]))?;
        root.serialize_field(
            "cac:TaxTotal",
            &tax_total(t.tax_amount(), currency_code, t.subtotals()),
        )?;

        // ---- legal monetary totals ----
        root.serialize_field("cac:LegalMonetaryTotal", &legal_monetary_total(currency_code, t))?;

        // ---- lines ----
        for (i, line) in data.line_items.iter().enumerate() {
            root.serialize_field("cac:InvoiceLine", &InvoiceLineXml(i + 1, line, currency_code))?;
        }

        root.end()
    }
}
