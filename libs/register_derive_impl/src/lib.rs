//! Implementation of `#[derive(Register)]`.
//!
//! A plugin struct is annotated with one or more `#[register(...)]`
//! attributes:
//!
//! ```ignore
//! #[derive(Register)]
//! #[register(msg(Message))]
//! #[register(plugin(StaticAddr))]
//! pub struct Leases { .. }
//! ```
//!
//! Each `msg(T)` entry produces one `impl Register<T> for Leases`, calling
//! `srv.plugin_order(self, &[..])` with the `TypeId`s named by every
//! `plugin(..)` entry (the plugins this one must run after). `plugin()`
//! with no arguments means no dependencies.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Meta, NestedMeta};

#[proc_macro_derive(Register, attributes(register))]
pub fn derive_register(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut msg_types: Vec<syn::Path> = Vec::new();
    let mut dep_types: Vec<syn::Path> = Vec::new();

    for attr in &input.attrs {
        if !attr.path.is_ident("register") {
            continue;
        }
        let meta = match attr.parse_meta() {
            Ok(meta) => meta,
            Err(err) => return err.to_compile_error().into(),
        };
        let list = match meta {
            Meta::List(list) => list,
            _ => {
                return syn::Error::new_spanned(attr, "expected #[register(..)]")
                    .to_compile_error()
                    .into()
            }
        };
        for nested in list.nested.iter() {
            let inner = match nested {
                NestedMeta::Meta(Meta::List(inner)) => inner,
                _ => {
                    return syn::Error::new_spanned(
                        nested,
                        "expected msg(..) or plugin(..)",
                    )
                    .to_compile_error()
                    .into()
                }
            };
            if inner.path.is_ident("msg") {
                for item in inner.nested.iter() {
                    match item {
                        NestedMeta::Meta(Meta::Path(path)) => msg_types.push(path.clone()),
                        _ => {
                            return syn::Error::new_spanned(item, "expected a type path")
                                .to_compile_error()
                                .into()
                        }
                    }
                }
            } else if inner.path.is_ident("plugin") {
                for item in inner.nested.iter() {
                    match item {
                        NestedMeta::Meta(Meta::Path(path)) => dep_types.push(path.clone()),
                        _ => {
                            return syn::Error::new_spanned(item, "expected a type path")
                                .to_compile_error()
                                .into()
                        }
                    }
                }
            } else {
                return syn::Error::new_spanned(inner, "expected msg(..) or plugin(..)")
                    .to_compile_error()
                    .into();
            }
        }
    }

    if msg_types.is_empty() {
        return syn::Error::new_spanned(
            &input.ident,
            "#[derive(Register)] requires at least one #[register(msg(..))] attribute",
        )
        .to_compile_error()
        .into();
    }

    let deps = dep_types.iter().map(|dep| {
        quote! { ::std::any::TypeId::of::<#dep>() }
    });
    let deps = quote! { [#(#deps),*] };

    let impls = msg_types.iter().map(|msg| {
        quote! {
            impl #impl_generics dhcpd_core::Register<#msg> for #name #ty_generics #where_clause {
                fn register(self, srv: &mut dhcpd_core::server::Server<#msg>) {
                    srv.plugin_order(self, &#deps);
                }
            }
        }
    });

    let expanded = quote! {
        #(#impls)*
    };
    expanded.into()
}
