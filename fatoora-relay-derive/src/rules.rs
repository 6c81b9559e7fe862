//! Builtin validation rules.
//!
//! Each rule expands to a boolean expression that is `true` when the value
//! violates it. All rules operate on `String` fields.
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

pub(crate) struct RuleCheck {
    pub violated: TokenStream2,
    pub message: &'static str,
}

pub(crate) fn dispatch(rule: &str, value: &TokenStream2) -> Option<RuleCheck> {
    let check = match rule {
        "non_empty" => RuleCheck {
            violated: quote! { #value.trim().is_empty() },
            message: "is required",
        },
        "no_special_chars" => RuleCheck {
            violated: quote! {
                #value.contains(|c: char| !(c.is_alphanumeric() || c.is_whitespace()))
            },
            message: "must not contain special characters",
        },
        "digits" => RuleCheck {
            violated: quote! {
                !#value.trim().is_empty() && !#value.trim().chars().all(|c| c.is_ascii_digit())
            },
            message: "must contain digits only",
        },
        // ZATCA only accepts alpha-2 codes here.
        "is_country_code" => RuleCheck {
            violated: quote! {
                !(#value.len() == 2 && #value.chars().all(|c| c.is_ascii_uppercase()))
            },
            message: "must be an ISO 3166 alpha-2 country code",
        },
        _ => return None,
    };
    Some(check)
}
