use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

/// For every single-field tuple variant `Enum::V(T)`, implements
/// `From<T> for Enum` and `TryFrom<Enum> for T`. The latter hands the
/// enum back when it holds another variant.
pub fn derive_conversions(input: &DeriveInput) -> syn::Result<TokenStream> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "FromVariants can only be derived for enums",
        ));
    };
    let ident = &input.ident;

    let conversions = data.variants.iter().filter_map(|variant| {
        let Fields::Unnamed(fields) = &variant.fields else {
            return None;
        };
        if fields.unnamed.len() != 1 {
            return None;
        }
        let ty = &fields.unnamed[0].ty;
        let variant = &variant.ident;
        Some(quote! {
            impl ::std::convert::From<#ty> for #ident {
                fn from(value: #ty) -> Self {
                    Self::#variant(value)
                }
            }

            impl ::std::convert::TryFrom<#ident> for #ty {
                type Error = #ident;

                fn try_from(value: #ident) -> ::std::result::Result<Self, #ident> {
                    match value {
                        #ident::#variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        })
    });

    Ok(quote! {
        #(#conversions)*
    })
}
