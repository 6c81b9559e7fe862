//! `#[derive(Validate)]` for plain input records.
//!
//! Generates a checked constructor `new(..)` and a `validate(&self)` method.
//! Every violated rule is collected as a `(field, rule, message)` triple, so
//! callers get all field-level problems at once instead of the first one.
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Type};

mod rules;

fn extract_error_type(attrs: &[Attribute]) -> syn::Result<TokenStream2> {
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate_error")) {
        let mut ty = None;
        attr.parse_nested_meta(|meta| {
            ty = Some(meta.path.to_token_stream());
            Ok(())
        })?;
        if let Some(t) = ty {
            return Ok(t);
        }
    }
    Ok(quote! { ::std::vec::Vec<(&'static str, &'static str, ::std::string::String)> })
}

fn extract_rules(attrs: &[Attribute]) -> syn::Result<Vec<String>> {
    let mut out = vec![];
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            if let Some(id) = meta.path.get_ident() {
                out.push(id.to_string());
            }
            Ok(())
        })?;
    }
    Ok(out)
}

/// Only allow rules on String for now.
fn is_string_type(ty: &Type) -> bool {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident == "String")
            .unwrap_or(false),
        _ => false,
    }
}

#[proc_macro_derive(Validate, attributes(validate, validate_error))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    match expand(ast) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(ast: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &ast.ident;
    let error_type = extract_error_type(&ast.attrs)?;
    let struct_rules = extract_rules(&ast.attrs)?;

    let fields = match &ast.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(n) => n.named.clone(),
            _ => {
                return Err(syn::Error::new_spanned(
                    struct_name,
                    "Validate supports named structs only",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "Validate can only be used on structs",
            ))
        }
    };

    let mut ctor_params = vec![];
    let mut ctor_assigns = vec![];
    let mut checks = vec![];

    for field in fields {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let ty = &field.ty;

        ctor_params.push(quote! { #ident: #ty });
        ctor_assigns.push(quote! { #ident });

        let mut field_rules = extract_rules(&field.attrs)?;
        if field_rules.iter().any(|r| r == "skip") {
            continue;
        }
        if field_rules.is_empty() {
            field_rules = struct_rules.clone();
        }
        if field_rules.is_empty() {
            continue;
        }

        if !is_string_type(ty) {
            return Err(syn::Error::new_spanned(
                ty,
                format!("validation rules can only be applied to String fields: {ident}"),
            ));
        }

        let value = quote! { self.#ident };
        let field_name = ident.to_string();
        for rule in field_rules {
            let Some(rule_check) = rules::dispatch(&rule, &value) else {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!("unknown validation rule `{rule}`"),
                ));
            };
            let rule_name = rule.as_str();
            let violated = rule_check.violated;
            let message = rule_check.message;
            checks.push(quote! {
                if #violated {
                    issues.push((#field_name, #rule_name, ::std::string::String::from(#message)));
                }
            });
        }
    }

    Ok(quote! {
        impl #struct_name {
            pub fn new(
                #(#ctor_params),*
            ) -> ::std::result::Result<Self, #error_type> {
                let value = Self {
                    #(#ctor_assigns),*
                };
                value.validate()?;
                Ok(value)
            }

            pub fn validate(&self) -> ::std::result::Result<(), #error_type> {
                #[allow(unused_mut)]
                let mut issues: ::std::vec::Vec<(&'static str, &'static str, ::std::string::String)> =
                    ::std::vec::Vec::new();

                #(#checks)*

                if issues.is_empty() {
                    Ok(())
                } else {
                    Err(<#error_type as ::std::convert::From<_>>::from(issues))
                }
            }
        }
    })
}
