//! Derive macro for rivven-orm entities
//!
//! `#[derive(Entity)]` turns a plain struct into a mapped entity by generating
//! its `Entity::descriptor()` implementation. Nothing is inspected at run
//! time; every column shape is fixed when the crate compiles.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_orm::Entity;
//!
//! #[derive(Debug, Default, Entity)]
//! #[entity(table = "orders")]
//! pub struct Order {
//!     #[column(id)]
//!     pub id: i64,
//!     #[column(max_length = 64, unique)]
//!     pub reference: String,
//!     #[column(one_of = "open,paid,shipped", index)]
//!     pub status: String,
//!     #[column(references = "Customer")]
//!     pub customer_id: Option<i64>,
//!     #[column(check = "total >= 0")]
//!     pub total: f64,
//! }
//! ```

use darling::{ast, FromDeriveInput, FromField};
use heck::ToSnakeCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container attributes: `#[entity(...)]`
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(entity), supports(struct_named))]
struct EntityAttrs {
    ident: syn::Ident,
    generics: syn::Generics,
    data: ast::Data<(), ColumnAttrs>,
    /// Table name (defaults to the snake_case type name)
    #[darling(default)]
    table: Option<String>,
}

/// Field attributes: `#[column(...)]`
#[derive(Debug, FromField)]
#[darling(attributes(column))]
struct ColumnAttrs {
    ident: Option<syn::Ident>,
    ty: syn::Type,
    /// Column name override
    #[darling(default)]
    name: Option<String>,
    /// Primary key marker
    #[darling(default)]
    id: bool,
    /// Id generation strategy: identity, sequence or none
    #[darling(default)]
    strategy: Option<String>,
    /// Nullability override
    #[darling(default)]
    nullable: Option<bool>,
    /// Length bound for string columns
    #[darling(default)]
    max_length: Option<u32>,
    #[darling(default)]
    unique: bool,
    #[darling(default)]
    index: bool,
    /// Comma separated allowed values
    #[darling(default)]
    one_of: Option<String>,
    /// CHECK expression over the column
    #[darling(default)]
    check: Option<String>,
    /// Entity whose primary key this column holds
    #[darling(default)]
    references: Option<syn::Path>,
    /// Leave the field unmapped
    #[darling(default)]
    skip: bool,
}

/// Derive `rivven_orm::Entity`
///
/// # Attributes
///
/// - `#[entity(table = "...")]` - Table name (defaults to the snake_case struct name)
/// - `#[column(name = "...")]` - Column name (defaults to the field name)
/// - `#[column(id)]` - Primary key; a field named `id` is used when none is marked
/// - `#[column(strategy = "identity|sequence|none")]` - Id generation strategy
/// - `#[column(nullable = false)]` - Override nullability inferred from `Option<T>`
/// - `#[column(max_length = N)]` - Length bound for string columns
/// - `#[column(unique)]` / `#[column(index)]` - Uniqueness constraint / index hint
/// - `#[column(one_of = "a,b,c")]` - Allowed value domain
/// - `#[column(check = "expr")]` - CHECK expression
/// - `#[column(references = "Type")]` - Foreign key to another entity's id
/// - `#[column(skip)]` - Not mapped; keeps its `Default` value on reads
#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let attrs = match EntityAttrs::from_derive_input(&input) {
        Ok(v) => v,
        Err(e) => return TokenStream::from(e.write_errors()),
    };

    match expand(attrs) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(e) => TokenStream::from(e.write_errors()),
    }
}

fn expand(attrs: EntityAttrs) -> darling::Result<TokenStream2> {
    let struct_name = &attrs.ident;
    if !attrs.generics.params.is_empty() {
        return Err(
            darling::Error::custom("Entity cannot be derived for generic types")
                .with_span(&attrs.generics),
        );
    }

    let table = attrs
        .table
        .clone()
        .unwrap_or_else(|| struct_name.to_string().to_snake_case());

    let fields: Vec<&ColumnAttrs> = match &attrs.data {
        ast::Data::Struct(fields) => fields.iter().filter(|f| !f.skip).collect(),
        ast::Data::Enum(_) => {
            return Err(darling::Error::unsupported_shape("enum").with_span(struct_name))
        }
    };

    let has_marker = fields.iter().any(|f| f.id);
    let mut errors = darling::Error::accumulator();
    let mut descriptors = Vec::with_capacity(fields.len());

    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let implicit_id = !has_marker && ident == "id";
        if let Some(tokens) = errors.handle(field_descriptor(struct_name, field, implicit_id)) {
            descriptors.push(tokens);
        }
    }
    errors.finish()?;

    Ok(quote! {
        impl ::rivven_orm::metadata::Entity for #struct_name {
            fn descriptor() -> ::rivven_orm::metadata::EntityDescriptor<Self> {
                ::rivven_orm::metadata::EntityDescriptor::<Self>::new(#table)
                    #(.field(#descriptors))*
            }
        }
    })
}

fn field_descriptor(
    struct_name: &syn::Ident,
    field: &ColumnAttrs,
    implicit_id: bool,
) -> darling::Result<TokenStream2> {
    let ident = field
        .ident
        .as_ref()
        .ok_or_else(|| darling::Error::custom("tuple fields are not supported"))?;
    let ty = &field.ty;
    let field_name = ident.to_string();

    let is_id = field.id || implicit_id;
    if field.strategy.is_some() && !is_id {
        return Err(darling::Error::custom("`strategy` requires `id`").with_span(ident));
    }

    let mut modifiers = Vec::new();

    if let Some(name) = &field.name {
        modifiers.push(quote! { .column(#name) });
    }
    if let Some(nullable) = field.nullable {
        modifiers.push(quote! { .nullable(#nullable) });
    }
    if let Some(len) = field.max_length {
        modifiers.push(quote! { .max_length(#len) });
    }
    if is_id {
        let strategy = match field.strategy.as_deref().map(str::to_ascii_lowercase) {
            None => quote! {
                ::rivven_orm::metadata::IdStrategy::default_for(
                    <#ty as ::rivven_orm::FieldType>::COLUMN_TYPE
                )
            },
            Some(s) if s == "identity" => quote! { ::rivven_orm::metadata::IdStrategy::Identity },
            Some(s) if s == "sequence" => quote! { ::rivven_orm::metadata::IdStrategy::Sequence },
            Some(s) if s == "none" => quote! { ::rivven_orm::metadata::IdStrategy::None },
            Some(other) => {
                return Err(darling::Error::unknown_value(&other).with_span(ident));
            }
        };
        modifiers.push(quote! { .primary_key(#strategy) });
    }
    if field.unique {
        modifiers.push(quote! { .unique() });
    }
    if field.index {
        modifiers.push(quote! { .indexed() });
    }
    if let Some(values) = &field.one_of {
        let values: Vec<&str> = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return Err(darling::Error::custom("`one_of` needs at least one value").with_span(ident));
        }
        modifiers.push(quote! { .one_of(&[#(#values),*]) });
    }
    if let Some(expr) = &field.check {
        modifiers.push(quote! { .check(#expr) });
    }
    if let Some(target) = &field.references {
        modifiers.push(quote! { .references::<#target>() });
    }

    Ok(quote! {
        ::rivven_orm::metadata::FieldDescriptor::<Self>::typed::<#ty>(
            #field_name,
            |e: &#struct_name| ::rivven_orm::FieldType::to_value(&e.#ident),
            |e: &mut #struct_name, v: ::rivven_orm::Value| {
                e.#ident = <#ty as ::rivven_orm::FieldType>::from_value(v)?;
                ::std::result::Result::Ok(())
            },
        )
        #(#modifiers)*
    })
}
