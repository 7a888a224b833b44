// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use std::collections::HashSet;

use darling::{FromDeriveInput, util::PathList};
use heck::{ToKebabCase, ToUpperCamelCase};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, Path, parse_macro_input};

#[allow(clippy::doc_markdown, reason = "false positive")]
/// Build a PascalCase enum variant name from a type path.
fn path_to_pascal_ident(path: &Path) -> Ident {
    let combined = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("_");
    let pascal = combined.to_upper_camel_case();
    let span = path
        .segments
        .last()
        .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
    Ident::new(&pascal, span)
}

/// Returns the override or the kebab-case name of the ident.
fn kebab_or(ident: &Ident, name: Option<String>) -> String {
    name.unwrap_or_else(|| ident.to_string().to_kebab_case())
}

/// Configuration for the `#[aggregate(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(aggregate), supports(struct_named))]
struct AggregateArgs {
    ident: Ident,
    vis: syn::Visibility,
    events: PathList,
    #[darling(default)]
    kind: Option<String>,
    #[darling(default)]
    event_enum: Option<String>,
    /// Name of the `AggregateRoot` field.
    #[darling(default)]
    root: Option<String>,
    #[darling(default)]
    derives: Option<PathList>,
}

/// Configuration for the `#[event(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(event), supports(struct_any, enum_any))]
struct DomainEventArgs {
    ident: Ident,
    #[darling(default)]
    reason: Option<String>,
}

/// Captures the event type path and its generated enum variant identifier.
struct EventSpec<'a> {
    path: &'a Path,
    variant: Ident,
}

impl<'a> EventSpec<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            variant: path_to_pascal_ident(path),
        }
    }
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Derives `DomainEvent` for a payload type.
///
/// The reason tag defaults to the kebab-case type name. Override it with
/// `#[event(reason = "...")]` to keep stored tags stable across renames.
///
/// The type must also implement `Clone`, `Debug`, `Serialize` and
/// `Deserialize`.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
/// #[event(reason = "account-opened")]
/// pub struct Opened {
///     pub owner: String,
/// }
/// ```
#[proc_macro_derive(DomainEvent, attributes(event))]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_domain_event_impl(&input).into()
}

fn derive_domain_event_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<DomainEventArgs, _>(input, |args| {
        let name = &args.ident;
        let reason = kebab_or(name, args.reason);
        if reason.is_empty() {
            return darling::Error::custom("event reason must not be empty")
                .with_span(name)
                .write_errors();
        }
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
        quote! {
            impl #impl_generics ::eventide::event::DomainEvent for #name #ty_generics #where_clause {
                const REASON: &'static str = #reason;
            }
        }
    })
}

/// Derives the `Aggregate` trait for a struct.
///
/// This macro generates:
/// - An event enum with one variant per payload type
/// - `EventSet` for the enum, so the registry learns every payload
/// - `From<E>` for each payload type
/// - `Aggregate` for the struct, dispatching `transition` to `Apply<E>`
///
/// The struct must hold an `AggregateRoot<{Struct}Event>` field, named
/// `root` unless overridden.
///
/// # Attributes
///
/// ## Required
/// - `events(Type1, Type2, ...)` - Payload types, each implementing
///   `DomainEvent`
///
/// ## Optional
/// - `kind = "name"` - Aggregate type tag (default: kebab-case struct name)
/// - `event_enum = "Name"` - Override the generated enum name (default:
///   `{Struct}Event`)
/// - `root = "field"` - Name of the `AggregateRoot` field
/// - `derives(Trait1, ...)` - Extra derives for the event enum, on top of
///   `Clone` and `Debug`
///
/// # Example
///
/// ```ignore
/// #[derive(Default, Aggregate)]
/// #[aggregate(events(FundsDeposited, FundsWithdrawn), derives(PartialEq))]
/// pub struct Account {
///     root: AggregateRoot<AccountEvent>,
///     balance: i64,
/// }
/// ```
#[proc_macro_derive(Aggregate, attributes(aggregate))]
pub fn derive_aggregate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_aggregate_impl(&input).into()
}

fn derive_aggregate_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<AggregateArgs, _>(input, |args| generate_aggregate_impl(args, input))
}

/// Check the named root field exists on the struct.
fn find_root_field<'a>(input: &'a DeriveInput, name: &str) -> darling::Result<&'a Ident> {
    let Data::Struct(data) = &input.data else {
        return Err(darling::Error::unsupported_shape("enum or union").with_span(&input.ident));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(darling::Error::unsupported_shape("tuple or unit struct").with_span(&input.ident));
    };
    fields
        .named
        .iter()
        .filter_map(|field| field.ident.as_ref())
        .find(|ident| *ident == name)
        .ok_or_else(|| {
            darling::Error::custom(format!(
                "aggregate has no `{name}` field; add an `AggregateRoot` field or set `root = \"...\"`"
            ))
            .with_span(&input.ident)
        })
}

/// Generate the aggregate derive implementation tokens.
fn generate_aggregate_impl(args: AggregateArgs, input: &DeriveInput) -> TokenStream2 {
    let event_specs: Vec<EventSpec<'_>> = args.events.iter().map(EventSpec::new).collect();

    if event_specs.is_empty() {
        return darling::Error::custom("events(...) must contain at least one event type")
            .with_span(&input.ident)
            .write_errors();
    }

    let mut seen = HashSet::new();
    for spec in &event_specs {
        if !seen.insert(spec.variant.to_string()) {
            return darling::Error::custom(format!(
                "event `{}` is listed twice",
                spec.variant
            ))
            .with_span(&spec.variant)
            .write_errors();
        }
    }

    let root_name = args.root.as_deref().unwrap_or("root");
    let root_field = match find_root_field(input, root_name) {
        Ok(field) => field,
        Err(err) => return err.write_errors(),
    };

    let struct_name = &args.ident;
    let struct_vis = &args.vis;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let kind = kebab_or(struct_name, args.kind);

    let event_enum_name = args.event_enum.map_or_else(
        || Ident::new(&format!("{struct_name}Event"), struct_name.span()),
        |name| Ident::new(&name, struct_name.span()),
    );

    let event_types: Vec<&Path> = event_specs.iter().map(|spec| spec.path).collect();
    let variant_names: Vec<&Ident> = event_specs.iter().map(|spec| &spec.variant).collect();

    let collision_message = format!(
        "two events of `{struct_name}` share a reason; set a distinct `#[event(reason = \"...\")]`"
    );

    let user_derives = args.derives.unwrap_or_default();
    let derives = quote! { #[derive(Clone, Debug, #(#user_derives),*)] };

    quote! {
        #[doc = concat!("Event type for the [`", stringify!(#struct_name), "`] aggregate.")]
        #derives
        #struct_vis enum #event_enum_name {
            #(
                #[doc = concat!("[`", stringify!(#event_types), "`]")]
                #variant_names(#event_types)
            ),*
        }

        impl ::eventide::event::EventSet for #event_enum_name {
            fn reason(&self) -> &'static str {
                match self {
                    #(Self::#variant_names(_) => <#event_types as ::eventide::event::DomainEvent>::REASON),*
                }
            }

            fn encode<C: ::eventide::codec::Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error> {
                match self {
                    #(Self::#variant_names(inner) => codec.serialize(inner)),*
                }
            }

            fn to_payload(&self) -> ::eventide::event::Payload {
                match self {
                    #(Self::#variant_names(inner) => ::eventide::event::Payload::new(::core::clone::Clone::clone(inner))),*
                }
            }

            fn from_payload(payload: ::eventide::event::Payload) -> Result<Self, ::eventide::event::Payload> {
                #(
                    let payload = match payload.downcast::<#event_types>() {
                        Ok(inner) => return Ok(Self::#variant_names(inner)),
                        Err(payload) => payload,
                    };
                )*
                Err(payload)
            }

            fn register<C: ::eventide::codec::Codec>(
                registrar: &mut ::eventide::registry::Registrar<'_, Self, C>,
            ) {
                #(registrar.event::<#event_types>();)*
            }

            fn payload_type(&self) -> ::core::any::TypeId {
                match self {
                    #(Self::#variant_names(_) => ::core::any::TypeId::of::<#event_types>()),*
                }
            }
        }

        const _: () = ::core::assert!(
            ::eventide::event::reasons_are_unique(&[
                #(<#event_types as ::eventide::event::DomainEvent>::REASON),*
            ]),
            #collision_message
        );

        #(
            impl From<#event_types> for #event_enum_name {
                fn from(event: #event_types) -> Self {
                    Self::#variant_names(event)
                }
            }
        )*

        impl #impl_generics ::eventide::aggregate::Aggregate for #struct_name #ty_generics #where_clause {
            const TYPE: &'static str = #kind;
            type Event = #event_enum_name;

            fn root(&self) -> &::eventide::aggregate::AggregateRoot<Self::Event> {
                &self.#root_field
            }

            fn root_mut(&mut self) -> &mut ::eventide::aggregate::AggregateRoot<Self::Event> {
                &mut self.#root_field
            }

            fn transition(&mut self, event: &::eventide::event::Event<Self::Event>) {
                match &event.data {
                    #(#event_enum_name::#variant_names(e) => ::eventide::aggregate::Apply::apply(self, e)),*
                }
            }
        }
    }
}
