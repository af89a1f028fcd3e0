//! Proc macros for response schema generation.
//!
//! Provides `#[derive(ResponseSchema)]` to generate the JSON schema a model
//! response must conform to, straight from the Rust payload type. Field doc
//! comments become schema descriptions, so the schema and the prompt-facing
//! documentation cannot drift apart.
//!
//! # Example
//!
//! ```ignore
//! /// A single line of dialogue for one character
//! #[derive(ResponseSchema, Deserialize)]
//! #[schema(name = "dialogue_line")]
//! struct DialogueLine {
//!     /// What the character says, without quotation marks
//!     dialogue: String,
//! }
//! ```
//!
//! Serde's `rename`, `rename_all`, `default` and `skip` attributes are
//! honoured so the schema always matches what deserialization accepts.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, punctuated::Punctuated, token::Comma, Attribute, Data, DataEnum,
    DeriveInput, Field, Fields, Lit, Meta, Type,
};

/// Derive macro for generating response schemas.
///
/// # Attributes
///
/// - `#[schema(name = "...")]` - Override the schema/tool name (defaults to snake_case type name)
/// - `#[schema(optional)]` on fields - Leave the field out of `required`
/// - `#[schema(rename = "...")]` on fields - Override the field name in the schema
/// - `#[schema(min_items = N, max_items = M)]` on `Vec` fields - Bound the array length
///
/// Structs with named fields become JSON objects. Enums with only unit
/// variants become string enums. Any other field type is expected to derive
/// `ResponseSchema` itself and is nested.
#[proc_macro_derive(ResponseSchema, attributes(schema))]
pub fn derive_response_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let container = ContainerAttrs::parse(&input)?;

    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => expand_struct(&input, &container, &named.named),
            _ => Err(syn::Error::new_spanned(
                &input,
                "ResponseSchema only supports structs with named fields",
            )),
        },
        Data::Enum(data) => expand_enum(&input, &container, data),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input,
            "ResponseSchema does not support unions",
        )),
    }
}

fn expand_struct(
    input: &DeriveInput,
    container: &ContainerAttrs,
    fields: &Punctuated<Field, Comma>,
) -> syn::Result<TokenStream2> {
    let type_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let schema_name = &container.name;
    let description = get_doc_comment(&input.attrs);

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let attrs = FieldAttrs::parse(field)?;
        if attrs.skip {
            continue;
        }

        let field_name = attrs.schema_name(field, container.rename_all.as_deref())?;
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty);

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };
        let min_token = match attrs.min_items {
            Some(n) => quote! { property["minItems"] = serde_json::json!(#n); },
            None => quote! {},
        };
        let max_token = match attrs.max_items {
            Some(n) => quote! { property["maxItems"] = serde_json::json!(#n); },
            None => quote! {},
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                #min_token
                #max_token
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !attrs.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name);
        }
    }

    let required_array: Vec<_> = required_fields.iter().map(|s| quote! { #s }).collect();

    Ok(quote! {
        impl #impl_generics #type_name #ty_generics #where_clause {
            /// Name under which this schema is offered to the model.
            pub fn schema_name() -> &'static str {
                #schema_name
            }

            /// Description taken from the type's doc comment.
            pub fn schema_description() -> &'static str {
                #description
            }

            /// JSON schema the model response must conform to.
            pub fn response_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_array),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }

            /// The schema wrapped as a forced tool for the Claude API.
            pub fn as_tool() -> claude::Tool {
                claude::Tool {
                    name: Self::schema_name().to_string(),
                    description: Self::schema_description().to_string(),
                    input_schema: Self::response_schema(),
                }
            }
        }
    })
}

fn expand_enum(
    input: &DeriveInput,
    container: &ContainerAttrs,
    data: &DataEnum,
) -> syn::Result<TokenStream2> {
    let type_name = &input.ident;
    let schema_name = &container.name;
    let description = get_doc_comment(&input.attrs);

    let mut values = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "ResponseSchema enums may only contain unit variants",
            ));
        }
        let rename = find_rename(&variant.attrs)?;
        let value = match rename {
            Some(name) => name,
            None => rename_variant(&variant.ident.to_string(), container.rename_all.as_deref()),
        };
        values.push(value);
    }

    let desc_token = if description.is_empty() {
        quote! {}
    } else {
        quote! { schema["description"] = serde_json::json!(#description); }
    };

    Ok(quote! {
        impl #type_name {
            /// Name of this value set.
            pub fn schema_name() -> &'static str {
                #schema_name
            }

            /// Description taken from the type's doc comment.
            pub fn schema_description() -> &'static str {
                #description
            }

            /// JSON schema accepting exactly the enum's wire names.
            pub fn response_schema() -> serde_json::Value {
                let mut schema = serde_json::json!({
                    "type": "string",
                    "enum": [#(#values),*]
                });
                #desc_token
                schema
            }
        }
    })
}

// ============================================================================
// Attribute parsing
// ============================================================================

struct ContainerAttrs {
    name: String,
    rename_all: Option<String>,
}

impl ContainerAttrs {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut name = None;
        let mut rename_all = None;

        for attr in &input.attrs {
            let is_schema = attr.path().is_ident("schema");
            if !is_schema && !attr.path().is_ident("serde") {
                continue;
            }
            for_each_arg(attr, |key, value| {
                match (key, value) {
                    ("name", Some(Lit::Str(s))) if is_schema => name = Some(s.value()),
                    ("rename_all", Some(Lit::Str(s))) => rename_all = Some(s.value()),
                    _ => {}
                }
                Ok(())
            })?;
        }

        Ok(Self {
            name: name.unwrap_or_else(|| to_snake_case(&input.ident.to_string())),
            rename_all,
        })
    }
}

#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
    optional: bool,
    skip: bool,
    min_items: Option<u64>,
    max_items: Option<u64>,
}

impl FieldAttrs {
    fn parse(field: &Field) -> syn::Result<Self> {
        let mut attrs = FieldAttrs::default();

        for attr in &field.attrs {
            let is_schema = attr.path().is_ident("schema");
            if !is_schema && !attr.path().is_ident("serde") {
                continue;
            }
            for_each_arg(attr, |key, value| {
                match (key, value) {
                    ("rename", Some(Lit::Str(s))) => {
                        // An explicit schema rename wins over serde's.
                        if is_schema || attrs.rename.is_none() {
                            attrs.rename = Some(s.value());
                        }
                    }
                    ("optional", None) if is_schema => attrs.optional = true,
                    ("default", _) if !is_schema => attrs.optional = true,
                    ("skip", None) | ("skip_deserializing", None) => attrs.skip = true,
                    ("min_items", Some(Lit::Int(n))) if is_schema => {
                        attrs.min_items = Some(n.base10_parse()?)
                    }
                    ("max_items", Some(Lit::Int(n))) if is_schema => {
                        attrs.max_items = Some(n.base10_parse()?)
                    }
                    _ => {}
                }
                Ok(())
            })?;
        }

        Ok(attrs)
    }

    fn schema_name(&self, field: &Field, rename_all: Option<&str>) -> syn::Result<String> {
        if let Some(ref rename) = self.rename {
            return Ok(rename.clone());
        }
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let raw = ident.to_string();
        let raw = raw.strip_prefix("r#").unwrap_or(&raw);
        Ok(rename_field(raw, rename_all))
    }
}

fn find_rename(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut rename = None;
    for attr in attrs {
        if !attr.path().is_ident("schema") && !attr.path().is_ident("serde") {
            continue;
        }
        for_each_arg(attr, |key, value| {
            if let ("rename", Some(Lit::Str(s))) = (key, value) {
                rename = Some(s.value());
            }
            Ok(())
        })?;
    }
    Ok(rename)
}

/// Walk `key`, `key = literal` and `key(...)` arguments of an attribute.
///
/// Nested lists such as serde's `bound(...)` are consumed and ignored.
fn for_each_arg(
    attr: &Attribute,
    mut f: impl FnMut(&str, Option<Lit>) -> syn::Result<()>,
) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let key = meta
            .path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default();

        if meta.input.peek(syn::Token![=]) {
            let expr: syn::Expr = meta.value()?.parse()?;
            let lit = match expr {
                syn::Expr::Lit(expr_lit) => Some(expr_lit.lit),
                _ => None,
            };
            f(&key, lit)
        } else if meta.input.peek(syn::token::Paren) {
            let content;
            syn::parenthesized!(content in meta.input);
            let _: TokenStream2 = content.parse()?;
            Ok(())
        } else {
            f(&key, None)
        }
    })
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

// ============================================================================
// Type mapping
// ============================================================================

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn generic_args(segment: &syn::PathSegment) -> Vec<&Type> {
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                syn::GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let Type::Path(type_path) = ty else {
        return quote! { serde_json::json!({}) };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { serde_json::json!({}) };
    };
    let args = generic_args(segment);

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        "Value" => quote! { serde_json::json!({}) },
        "Option" | "Box" => match args.first() {
            Some(inner) => type_to_schema(inner),
            None => quote! { serde_json::json!({}) },
        },
        "Vec" => match args.first() {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    serde_json::json!({
                        "type": "array",
                        "items": #inner_schema
                    })
                }
            }
            None => quote! { serde_json::json!({"type": "array"}) },
        },
        "HashMap" | "BTreeMap" => match args.get(1) {
            Some(value) => {
                let value_schema = type_to_schema(value);
                quote! {
                    serde_json::json!({
                        "type": "object",
                        "additionalProperties": #value_schema
                    })
                }
            }
            None => quote! { serde_json::json!({"type": "object"}) },
        },
        // Anything else must derive ResponseSchema itself.
        _ => quote! { <#ty>::response_schema() },
    }
}

// ============================================================================
// Case conversion
// ============================================================================

fn rename_field(name: &str, rename_all: Option<&str>) -> String {
    match rename_all {
        Some("camelCase") => snake_to_camel(name),
        Some("PascalCase") => {
            let camel = snake_to_camel(name);
            capitalize(&camel)
        }
        Some("lowercase") => name.replace('_', "").to_lowercase(),
        Some("UPPERCASE") => name.replace('_', "").to_uppercase(),
        Some("kebab-case") => name.replace('_', "-"),
        Some("SCREAMING_SNAKE_CASE") => name.to_uppercase(),
        _ => name.to_string(),
    }
}

fn rename_variant(name: &str, rename_all: Option<&str>) -> String {
    match rename_all {
        Some("lowercase") => name.to_lowercase(),
        Some("UPPERCASE") => name.to_uppercase(),
        Some("snake_case") => to_snake_case(name),
        Some("SCREAMING_SNAKE_CASE") => to_snake_case(name).to_uppercase(),
        Some("kebab-case") => to_snake_case(name).replace('_', "-"),
        Some("camelCase") => {
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        _ => name.to_string(),
    }
}

fn snake_to_camel(s: &str) -> String {
    let mut result = String::new();
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = !result.is_empty();
        } else if upper_next {
            result.extend(c.to_uppercase());
            upper_next = false;
        } else {
            result.push(c);
        }
    }
    result
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
