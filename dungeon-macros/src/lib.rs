//! Proc macros for structured model output.
//!
//! Provides `#[derive(Schema)]`, which implements `gemini::ResponseSchema`
//! for a struct so it can be used as a `responseSchema` in generation requests.
//!
//! # Example
//!
//! ```ignore
//! /// A choice the player can make.
//! #[derive(Schema, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Choice {
//!     /// Short label shown on the button
//!     text: String,
//!     #[schema(max_items = 4)]
//!     follow_ups: Vec<String>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, Field, Lit, LitInt, LitStr, Meta, Type};

/// Derive macro for generating `gemini::ResponseSchema` implementations.
///
/// Property names follow serde: `#[serde(rename_all = "...")]` on the struct and
/// `#[serde(rename = "...")]` on fields are honoured.
///
/// # Attributes
///
/// - `#[schema(rename = "...")]` on fields - Override field name in schema
/// - `#[schema(min_items = N)]` / `#[schema(max_items = N)]` on `Vec` fields
/// - `#[schema(optional)]` on fields - Leave the field out of `required`
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_schema(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_schema(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let description = get_doc_comment(&input.attrs);
    let rename_all = get_rename_all(&input.attrs)?;

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Schema derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Schema derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut ordering = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = FieldOptions::parse(field, rename_all.as_deref())?;
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty)?;
        let name = &options.name;

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };
        let min_token = options.min_items.map(|n| {
            quote! { property["minItems"] = serde_json::json!(#n); }
        });
        let max_token = options.max_items.map(|n| {
            quote! { property["maxItems"] = serde_json::json!(#n); }
        });

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                #min_token
                #max_token
                properties.insert(#name.to_string(), property);
            }
        });

        ordering.push(name.clone());
        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(name.clone());
        }
    }

    let desc_token = if description.is_empty() {
        quote! {}
    } else {
        quote! { schema["description"] = serde_json::json!(#description); }
    };

    Ok(quote! {
        impl gemini::ResponseSchema for #struct_name {
            fn response_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];
                let ordering: Vec<&str> = vec![#(#ordering),*];

                #[allow(unused_mut)]
                let mut schema = serde_json::json!({
                    "type": "OBJECT",
                    "properties": properties,
                    "required": required,
                    "propertyOrdering": ordering
                });
                #desc_token
                schema
            }
        }
    })
}

struct FieldOptions {
    name: String,
    optional: bool,
    min_items: Option<u32>,
    max_items: Option<u32>,
}

impl FieldOptions {
    fn parse(field: &Field, rename_all: Option<&str>) -> syn::Result<Self> {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let raw = ident.to_string();
        let raw = raw.strip_prefix("r#").unwrap_or(&raw).to_string();

        let mut options = Self {
            name: match rename_all {
                Some(rule) => apply_rename_rule(&raw, rule),
                None => raw,
            },
            optional: false,
            min_items: None,
            max_items: None,
        };

        for attr in &field.attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                        let value: LitStr = meta.value()?.parse()?;
                        options.name = value.value();
                        Ok(())
                    } else {
                        skip_meta_value(&meta)
                    }
                })?;
            }
        }

        // schema attributes win over serde ones
        for attr in &field.attrs {
            if attr.path().is_ident("schema") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") {
                        let value: LitStr = meta.value()?.parse()?;
                        options.name = value.value();
                    } else if meta.path.is_ident("optional") {
                        options.optional = true;
                    } else if meta.path.is_ident("min_items") {
                        let value: LitInt = meta.value()?.parse()?;
                        options.min_items = Some(value.base10_parse()?);
                    } else if meta.path.is_ident("max_items") {
                        let value: LitInt = meta.value()?.parse()?;
                        options.max_items = Some(value.base10_parse()?);
                    } else {
                        return Err(meta.error("unknown schema attribute"));
                    }
                    Ok(())
                })?;
            }
        }

        Ok(options)
    }
}

fn get_rename_all(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut rule = None;
    for attr in attrs {
        if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename_all") && meta.input.peek(syn::Token![=]) {
                    let value: LitStr = meta.value()?.parse()?;
                    match value.value().as_str() {
                        "camelCase" | "snake_case" | "lowercase" | "UPPERCASE" => {
                            rule = Some(value.value());
                            Ok(())
                        }
                        other => Err(meta.error(format!("unsupported rename_all rule: {other}"))),
                    }
                } else {
                    skip_meta_value(&meta)
                }
            })?;
        }
    }
    Ok(rule)
}

/// Consume whatever follows a serde key we don't care about.
fn skip_meta_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

fn apply_rename_rule(field: &str, rule: &str) -> String {
    match rule {
        "camelCase" => to_camel_case(field),
        "lowercase" => field.to_lowercase(),
        "UPPERCASE" => field.to_uppercase(),
        _ => field.to_string(),
    }
}

fn get_doc_comment(attrs: &[Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn first_generic(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn type_to_schema(ty: &Type) -> syn::Result<TokenStream2> {
    let Type::Path(type_path) = ty else {
        return Err(syn::Error::new_spanned(ty, "unsupported field type for Schema derive"));
    };
    let Some(segment) = type_path.path.segments.last() else {
        return Err(syn::Error::new_spanned(ty, "empty type path"));
    };

    Ok(match segment.ident.to_string().as_str() {
        "String" => quote! { serde_json::json!({"type": "STRING"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "INTEGER"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "NUMBER"}) },
        "bool" => quote! { serde_json::json!({"type": "BOOLEAN"}) },
        "Option" => match first_generic(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner)?;
                quote! {{
                    let mut inner = #inner_schema;
                    inner["nullable"] = serde_json::json!(true);
                    inner
                }}
            }
            None => return Err(syn::Error::new_spanned(ty, "Option without a type argument")),
        },
        "Vec" => match first_generic(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner)?;
                quote! {
                    serde_json::json!({
                        "type": "ARRAY",
                        "items": #inner_schema
                    })
                }
            }
            None => return Err(syn::Error::new_spanned(ty, "Vec without a type argument")),
        },
        // Nested types describe themselves.
        _ => quote! { <#ty as gemini::ResponseSchema>::response_schema() },
    })
}

fn to_camel_case(s: &str) -> String {
    let mut result = String::new();
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = !result.is_empty();
        } else if upper_next {
            result.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_camel_case() {
        assert_eq!(to_camel_case("chapter_text"), "chapterText");
        assert_eq!(to_camel_case("max_health"), "maxHealth");
        assert_eq!(to_camel_case("health"), "health");
        assert_eq!(to_camel_case("completed_percentage"), "completedPercentage");
    }

    #[test]
    fn test_rename_rules() {
        assert_eq!(apply_rename_rule("strength", "UPPERCASE"), "STRENGTH");
        assert_eq!(apply_rename_rule("Agility", "lowercase"), "agility");
        assert_eq!(apply_rename_rule("image_prompt", "snake_case"), "image_prompt");
    }
}
