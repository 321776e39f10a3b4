//! `#[asset]` attribute.
//!
//! Turns a materializer function into a function returning its
//! `AssetDefinition`. The parameter list is read from the signature:
//!
//! ```ignore
//! #[asset("{customer}/{endpoint}.parquet", name = "{customer}_{endpoint}", filetype = "parquet")]
//! async fn endpoint(customer: String, endpoint: String, #[default(100)] limit: i64, page: Option<i64>)
//!     -> Result<Vec<Record>, Error> { ... }
//!
//! let acme = endpoint().with_arguments(args![customer = "acme"])?;
//! ```
//!
//! Parameters must be owned types implementing `FromValue`. `Option<T>`
//! parameters default to none; `#[default(expr)]` gives any parameter a default.
//! The function returns `Result<T, Error>` with `T: Into<Output>`.

use std::fmt::Display;

use proc_macro::TokenStream;
use quote::{format_ident, quote, ToTokens};
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, FnArg, ItemFn, Pat, Type};

#[derive(Default)]
struct AssetAttributes {
    path: Option<syn::LitStr>,
    name: Option<syn::LitStr>,
    artifacts_dir: Option<syn::LitStr>,
    filetype: Option<syn::Ident>,
    snapshot_artifacts: Option<syn::LitBool>,
    cache_expiration_secs: Option<syn::LitInt>,
}

impl Parse for AssetAttributes {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut attributes = AssetAttributes::default();
        if input.peek(syn::LitStr) {
            attributes.path = Some(input.parse()?);
            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }
        while !input.is_empty() {
            let key = input.parse::<syn::Ident>()?;
            input.parse::<syn::Token![=]>()?;
            match key.to_string().as_str() {
                "path" => attributes.path = Some(input.parse()?),
                "name" => attributes.name = Some(input.parse()?),
                "artifacts_dir" => attributes.artifacts_dir = Some(input.parse()?),
                "filetype" | "artifact_filetype" => {
                    let value = input.parse::<syn::LitStr>()?;
                    let variant = match value.value().to_lowercase().as_str() {
                        "json" => "Json",
                        "parquet" => "Parquet",
                        other => {
                            return Err(syn::Error::new(
                                value.span(),
                                format!("unsupported artifact file type '{}', expected json or parquet", other),
                            ))
                        }
                    };
                    attributes.filetype = Some(syn::Ident::new(variant, value.span()));
                }
                "snapshot_artifacts" => attributes.snapshot_artifacts = Some(input.parse()?),
                "cache_expiration_secs" => attributes.cache_expiration_secs = Some(input.parse()?),
                _ => return Err(syn::Error::new(key.span(), format!("unknown asset option '{}'", key))),
            }
            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }
        if attributes.path.is_none() {
            return Err(input.error("asset path template is required"));
        }
        Ok(attributes)
    }
}

struct AssetParameter {
    name: syn::Ident,
    ty: Type,
    default: Option<syn::Expr>,
}

impl AssetParameter {
    fn is_option(&self) -> bool {
        match &self.ty {
            Type::Path(path) => path
                .path
                .segments
                .last()
                .map(|s| s.ident == "Option")
                .unwrap_or(false),
            _ => false,
        }
    }

    fn descriptor(&self) -> proc_macro2::TokenStream {
        let name = self.name.to_string();
        match &self.default {
            Some(default) => quote! { ::assetry_core::arguments::Parameter::with_default(#name, #default) },
            None if self.is_option() => quote! { ::assetry_core::arguments::Parameter::optional(#name) },
            None => quote! { ::assetry_core::arguments::Parameter::required(#name) },
        }
    }

    fn extraction(&self) -> proc_macro2::TokenStream {
        let ident = &self.name;
        let name = self.name.to_string();
        let ty = &self.ty;
        quote! {
            let #ident: #ty = match __arguments.extract::<#ty>(#name) {
                Ok(value) => value,
                Err(e) => return Err::<::assetry_core::materializer::Output, ::assetry_core::error::Error>(e),
            };
        }
    }
}

struct AssetFunction {
    attributes: AssetAttributes,
    function: ItemFn,
    parameters: Vec<AssetParameter>,
}

impl Display for AssetFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signature = &self.function.sig;
        write!(
            f,
            "{}fn {}({})",
            if signature.asyncness.is_some() { "async " } else { "" },
            signature.ident,
            self.parameters.iter().map(|p| p.name.to_string()).collect::<Vec<_>>().join(", ")
        )
    }
}

impl AssetFunction {
    fn new(attributes: AssetAttributes, mut function: ItemFn) -> syn::Result<Self> {
        let mut parameters = Vec::new();
        for input in function.sig.inputs.iter_mut() {
            let typed = match input {
                FnArg::Typed(typed) => typed,
                FnArg::Receiver(receiver) => {
                    return Err(syn::Error::new_spanned(receiver, "an asset materializer can't take self"))
                }
            };
            let name = match typed.pat.as_ref() {
                Pat::Ident(ident) => ident.ident.clone(),
                other => return Err(syn::Error::new_spanned(other, "asset parameters must be plain identifiers")),
            };
            let mut default = None;
            let mut attrs = Vec::new();
            for attr in typed.attrs.drain(..) {
                if attr.path().is_ident("default") {
                    default = Some(attr.parse_args::<syn::Expr>()?);
                } else {
                    attrs.push(attr);
                }
            }
            typed.attrs = attrs;
            parameters.push(AssetParameter {
                name,
                ty: typed.ty.as_ref().clone(),
                default,
            });
        }
        Ok(AssetFunction {
            attributes,
            function,
            parameters,
        })
    }
}

impl ToTokens for AssetFunction {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let vis = &self.function.vis;
        let name = &self.function.sig.ident;
        let inner_name = format_ident!("__{}_materializer", name);
        let mut inner = self.function.clone();
        inner.sig.ident = inner_name.clone();
        inner.vis = syn::Visibility::Inherited;
        let docs = self
            .function
            .attrs
            .iter()
            .filter(|a| a.path().is_ident("doc"))
            .collect::<Vec<_>>();

        let mut declaration = {
            let path = &self.attributes.path;
            quote! { ::assetry_core::asset::AssetDeclaration::new(#path) }
        };
        if let Some(asset_name) = &self.attributes.name {
            declaration.extend(quote! { .name(#asset_name) });
        }
        if let Some(artifacts_dir) = &self.attributes.artifacts_dir {
            declaration.extend(quote! { .artifacts_dir(Some(#artifacts_dir)) });
        }
        if let Some(filetype) = &self.attributes.filetype {
            declaration.extend(quote! { .artifact_filetype(::assetry_core::options::ArtifactFileType::#filetype) });
        }
        if let Some(snapshot) = &self.attributes.snapshot_artifacts {
            declaration.extend(quote! { .snapshot_artifacts(#snapshot) });
        }
        if let Some(seconds) = &self.attributes.cache_expiration_secs {
            declaration.extend(quote! { .cache_expiration(::assetry_core::chrono::TimeDelta::seconds(#seconds)) });
        }

        let descriptors = self.parameters.iter().map(|p| p.descriptor());
        let extractions = self.parameters.iter().map(|p| p.extraction());
        let arguments = self.parameters.iter().map(|p| &p.name);
        let call = if self.function.sig.asyncness.is_some() {
            quote! { #inner_name(#(#arguments),*).await }
        } else {
            quote! { #inner_name(#(#arguments),*) }
        };

        tokens.extend(quote! {
            #(#docs)*
            #vis fn #name() -> ::assetry_core::asset::AssetDefinition {
                #inner

                #declaration.materializer(
                    stringify!(#name),
                    ::assetry_core::arguments::ParameterList::new(vec![#(#descriptors),*]),
                    |__arguments: ::assetry_core::arguments::BoundArguments| async move {
                        #(#extractions)*
                        let output: Result<::assetry_core::materializer::Output, ::assetry_core::error::Error> =
                            #call.map(::core::convert::Into::into);
                        output
                    },
                )
            }
        });
    }
}

/// Declare an asset; see the crate documentation.
#[proc_macro_attribute]
pub fn asset(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attributes = parse_macro_input!(attr as AssetAttributes);
    let function = parse_macro_input!(item as ItemFn);
    match AssetFunction::new(attributes, function) {
        Ok(asset) => asset.into_token_stream().into(),
        Err(e) => e.to_compile_error().into(),
    }
}
