use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitStr};

/// Derive `keyflight::RequestKey` for a struct
///
/// Fields are rendered with `Display` in declaration order and joined with
/// the separator (`:` unless overridden).
///
/// ```ignore
/// #[derive(RequestKey)]
/// #[request_key(namespace = "user")]
/// struct UserKey {
///     id: u64,
///     #[request_key(skip)]
///     trace_id: String,
/// }
/// ```
#[proc_macro_derive(RequestKey, attributes(request_key))]
pub fn derive_request_key(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct KeyOptions {
    namespace: Option<String>,
    separator: String,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let options = struct_options(&input.attrs)?;
    let separator = &options.separator;

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "RequestKey derive only supports structs",
            ));
        }
    };

    let mut parts = Vec::new();
    if !matches!(fields, Fields::Unit) {
        for (i, field) in fields.iter().enumerate() {
            if is_skipped(&field.attrs)? {
                continue;
            }
            match &field.ident {
                Some(ident) => parts.push(quote! { self.#ident.to_string() }),
                None => {
                    let index = syn::Index::from(i);
                    parts.push(quote! { self.#index.to_string() });
                }
            }
        }
    }

    let body = if parts.is_empty() {
        quote! { ::std::string::String::new() }
    } else {
        quote! { [#(#parts),*].join(#separator) }
    };

    let namespace_impl = options.namespace.map(|ns| {
        quote! {
            fn namespace(&self) -> ::std::option::Option<&str> {
                ::std::option::Option::Some(#ns)
            }
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::keyflight::RequestKey for #name #ty_generics #where_clause {
            fn key_body(&self) -> ::std::string::String {
                #body
            }
            #namespace_impl
        }
    })
}

fn struct_options(attrs: &[Attribute]) -> syn::Result<KeyOptions> {
    let mut options = KeyOptions {
        namespace: None,
        separator: ":".to_string(),
    };

    for attr in attrs.iter().filter(|a| a.path().is_ident("request_key")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("namespace") {
                let s: LitStr = meta.value()?.parse()?;
                options.namespace = Some(s.value());
                Ok(())
            } else if meta.path.is_ident("separator") {
                let s: LitStr = meta.value()?.parse()?;
                if s.value().is_empty() {
                    return Err(meta.error("separator must not be empty"));
                }
                options.separator = s.value();
                Ok(())
            } else {
                Err(meta.error("expected `namespace` or `separator`"))
            }
        })?;
    }

    Ok(options)
}

fn is_skipped(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut skip = false;
    for attr in attrs.iter().filter(|a| a.path().is_ident("request_key")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}
