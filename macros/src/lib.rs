//! Derives for the wire types of the proxy.
//!
//! `Encode` and `Decode` read `#[encoding(..)]` attributes on fields
//! (`varint`, `varulong`, `length_prefix`, `rest`, ...) and on packet
//! enum variants (`id = ..`).

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod from_variants;
mod protocol;

fn expand(
    input: TokenStream,
    derive: fn(&DeriveInput) -> syn::Result<proc_macro2::TokenStream>,
) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(Encode, attributes(encoding))]
pub fn derive_encode(input: TokenStream) -> TokenStream {
    expand(input, protocol::derive_encode_on)
}

#[proc_macro_derive(Decode, attributes(encoding))]
pub fn derive_decode(input: TokenStream) -> TokenStream {
    expand(input, protocol::derive_decode_on)
}

/// Conversions between a packet enum and its payload types.
#[proc_macro_derive(FromVariants)]
pub fn derive_from_variants(input: TokenStream) -> TokenStream {
    expand(input, from_variants::derive_conversions)
}
