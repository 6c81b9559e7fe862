pub(crate) const INVOICE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub(crate) const CBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub(crate) const CAC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const EXT_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
pub(crate) const SIG_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonSignatureComponents-2";
pub(crate) const SAC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:SignatureAggregateComponents-2";
pub(crate) const SBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:SignatureBasicComponents-2";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";

pub(crate) const PROFILE_ID: &str = "reporting:1.0";

pub(crate) const XADES_EXTENSION_URI: &str = "urn:oasis:names:specification:ubl:dsig:enveloped:xades";
pub(crate) const SIGNATURE_INFORMATION_ID: &str = "urn:oasis:names:specification:ubl:signature:1";
pub(crate) const REFERENCED_SIGNATURE_ID: &str = "urn:oasis:names:specification:ubl:signature:Invoice";

pub(crate) const C14N11_ALGORITHM: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub(crate) const ECDSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub(crate) const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub(crate) const XPATH_ALGORITHM: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";
pub(crate) const SIGNATURE_PROPERTIES_TYPE: &str =
    "http://www.w3.org/2000/09/xmldsig#SignatureProperties";

/// Elements excluded from the invoice hash.
pub(crate) const HASH_EXCLUSION_XPATHS: [&str; 3] = [
    "not(//ancestor-or-self::ext:UBLExtensions)",
    "not(//ancestor-or-self::cac:Signature)",
    "not(//ancestor-or-self::cac:AdditionalDocumentReference[cbc:ID='QR'])",
];
