use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Token, parse_macro_input};

/// Generates a `{Name}Paths` handle with one accessor per field, each returning the
/// field type's own path handle rooted one segment deeper.
#[proc_macro_derive(FormPaths, attributes(form_paths))]
pub fn derive_form_paths(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.ident,
            "FormPaths derive currently supports only non-generic structs",
        ));
    }

    let model_ident = input.ident;
    let vis = input.vis;
    let paths_ident = format_ident!("{model_ident}Paths");
    let container = KeyOptions::from_attrs(&input.attrs)?;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "FormPaths derive requires a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                Span::call_site(),
                "FormPaths derive is only supported on structs",
            ));
        }
    };

    let formwork = formwork_path();
    let mut accessors = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let options = KeyOptions::from_attrs(&field.attrs)?;
        let field_ty = field.ty;
        let raw_name = field_ident.to_string();
        let raw_name = raw_name.trim_start_matches("r#");
        let key = match options.rename {
            Some(rename) => rename,
            None if container.camel_case => to_camel_case(raw_name),
            None => raw_name.to_string(),
        };

        accessors.push(quote! {
            pub fn #field_ident(&self) -> <#field_ty as #formwork::PathNode>::Handle {
                <#field_ty as #formwork::PathNode>::handle(self.path.child(#key))
            }
        });
    }

    Ok(quote! {
        #[derive(Clone, Debug, Default, PartialEq, Eq)]
        #vis struct #paths_ident {
            path: #formwork::FieldPath,
        }

        impl #paths_ident {
            #(#accessors)*
        }

        impl #formwork::AsFieldPath for #paths_ident {
            fn to_field_path(&self) -> #formwork::FormResult<#formwork::FieldPath> {
                Ok(self.path.clone())
            }
        }

        impl #formwork::PathHandle for #paths_ident {
            fn from_field_path(path: #formwork::FieldPath) -> Self {
                Self { path }
            }

            fn field_path(&self) -> &#formwork::FieldPath {
                &self.path
            }
        }

        impl #formwork::PathNode for #model_ident {
            type Handle = #paths_ident;
        }
    })
}

/// Key naming read from `#[form_paths(...)]`, falling back to the matching `#[serde(...)]`
/// options so handles agree with how the model deserializes.
#[derive(Default)]
struct KeyOptions {
    rename: Option<String>,
    camel_case: bool,
}

impl KeyOptions {
    fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut own = Self::default();
        let mut serde = Self::default();
        for attr in attrs {
            if attr.path().is_ident("form_paths") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") {
                        own.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                        Ok(())
                    } else if meta.path.is_ident("rename_all") {
                        own.camel_case = parse_rename_all(&meta.value()?.parse::<LitStr>()?)?;
                        Ok(())
                    } else {
                        Err(meta.error("expected `rename` or `rename_all`"))
                    }
                })?;
            } else if attr.path().is_ident("serde") {
                // Unrelated serde options are skipped; only naming matters here.
                let _ = attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                        serde.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("rename_all") && meta.input.peek(Token![=]) {
                        let value = meta.value()?.parse::<LitStr>()?;
                        serde.camel_case = value.value() == "camelCase";
                    } else if meta.input.peek(Token![=]) {
                        meta.value()?.parse::<syn::Expr>()?;
                    } else if meta.input.peek(syn::token::Paren) {
                        let content;
                        syn::parenthesized!(content in meta.input);
                        content.parse::<TokenStream2>()?;
                    }
                    Ok(())
                });
            }
        }
        Ok(Self {
            rename: own.rename.or(serde.rename),
            camel_case: own.camel_case || serde.camel_case,
        })
    }
}

fn parse_rename_all(value: &LitStr) -> syn::Result<bool> {
    match value.value().as_str() {
        "camelCase" => Ok(true),
        "snake_case" => Ok(false),
        _ => Err(syn::Error::new_spanned(
            value,
            "supported rename_all values are \"camelCase\" and \"snake_case\"",
        )),
    }
}

fn formwork_path() -> TokenStream2 {
    match crate_name("formwork") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::formwork),
    }
}

fn to_camel_case(input: &str) -> String {
    let mut out = String::new();
    for (index, segment) in input.split('_').filter(|segment| !segment.is_empty()).enumerate() {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                out.push(first);
            } else {
                out.push(first.to_ascii_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}
