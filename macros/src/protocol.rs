//! Implements derives for the protocol Encode and Decode traits.
//!
//! Structs encode their fields in declaration order. Enums either carry
//! their own discriminant (`varuint`, `varint`, `byte`, `int`) or, for
//! the top-level packet enum, take it from the packet header
//! (`discriminant = "header"`), in which case a `PacketBody` impl is
//! generated instead of `Encode`/`Decode`.

use darling::{FromDeriveInput, FromField, FromMeta, FromVariant};
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;
use syn::{Data, DataEnum, DataStruct, DeriveInput, Fields};

/// Options to encode a field.
#[derive(Default, Debug, FromField)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
#[darling(default)]
pub struct FieldOptions {
    /// Zigzag varint (signed 32-bit).
    varint: bool,
    /// Zigzag varlong (signed 64-bit).
    varlong: bool,
    /// Unsigned varint (32-bit).
    varuint: bool,
    /// Unsigned varlong (64-bit).
    varulong: bool,
    /// For an option field, prefix the field with a boolean
    /// to determine whether the field is present.
    bool_prefixed: bool,
    /// A `Vec<u8>` prefixed with its unsigned varint length.
    byte_array: bool,
    /// A `Vec<u8>` holding every byte left in the packet.
    ///
    /// Only works for the last field of a packet.
    rest: bool,
    /// For a list field, how do we encode the length?
    length_prefix: Option<LengthPrefix>,
}

impl FieldOptions {
    fn num_set(&self) -> u32 {
        self.varint as u32
            + self.varlong as u32
            + self.varuint as u32
            + self.varulong as u32
            + self.bool_prefixed as u32
            + self.byte_array as u32
            + self.rest as u32
            + self.length_prefix.is_some() as u32
    }
}

/// For a list field, how do we encode the length?
#[derive(Debug, FromMeta)]
pub enum LengthPrefix {
    /// Prefix with an unsigned varint.
    #[darling(rename = "varuint")]
    VarUint,
    /// Prefix with a little-endian u32.
    #[darling(rename = "u32")]
    U32,
    /// Infer the length from the remaining length of the stream.
    ///
    /// Only works for the last field of a packet.
    #[darling(rename = "inferred")]
    Inferred,
}

/// Options to encode an enum.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
struct EnumOptions {
    /// How do we determine the discriminant?
    discriminant: Discriminant,
}

#[derive(Debug, FromMeta, PartialEq, Eq)]
enum Discriminant {
    /// Prefix the item with an unsigned varint.
    #[darling(rename = "varuint")]
    VarUint,
    /// Prefix the item with a zigzag varint.
    #[darling(rename = "varint")]
    VarInt,
    /// Prefix the item with a byte.
    #[darling(rename = "byte")]
    Byte,
    /// Prefix the item with a little-endian integer.
    #[darling(rename = "int")]
    Int,
    /// The discriminant is the packet id carried by the packet header.
    #[darling(rename = "header")]
    Header,
}

/// Options to encode an enum variant.
#[derive(Debug, Default, FromVariant)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
#[darling(default)]
struct VariantOptions {
    id: Option<i64>,
    /// Catch-all variant for ids without a dedicated variant.
    /// Header-discriminated enums only.
    fallback: bool,
}

#[derive(Debug)]
struct FieldInput {
    ident: Ident,
    get: TokenStream,
    options: FieldOptions,
}

#[derive(Debug)]
struct StructInput {
    fields: Vec<FieldInput>,
}

#[derive(Debug)]
struct EnumInput {
    variants: Vec<VariantInput>,
    options: EnumOptions,
}

#[derive(Debug)]
struct VariantInput {
    ident: Ident,
    fields: Vec<FieldInput>,
    bindings: Vec<Ident>,
    options: VariantOptions,
    fields_named: bool,
}

#[derive(Debug)]
enum Input {
    Struct(StructInput),
    Enum(EnumInput),
}

fn encode_field(field: &FieldInput) -> syn::Result<TokenStream> {
    let FieldInput { options, get, .. } = field;
    if options.num_set() > 1 {
        return Err(syn::Error::new(
            Span::call_site(),
            "at most one encoding option can be set",
        ));
    }

    let result = if options.varint {
        quote! {
            encoder.write_var_int(#get.try_into().unwrap_or(i32::MAX));
        }
    } else if options.varlong {
        quote! {
            encoder.write_var_long(#get.try_into().unwrap_or(i64::MAX));
        }
    } else if options.varuint {
        quote! {
            encoder.write_var_uint(#get.try_into().unwrap_or(u32::MAX));
        }
    } else if options.varulong {
        quote! {
            encoder.write_var_ulong(#get.try_into().unwrap_or(u64::MAX));
        }
    } else if options.bool_prefixed {
        quote! {
            encoder.write_bool(#get.is_some());
            if let Some(val) = &#get {
                crate::protocol::Encode::encode(val, encoder);
            }
        }
    } else if options.byte_array {
        quote! {
            encoder.write_byte_array(&#get);
        }
    } else if options.rest {
        quote! {
            encoder.write_slice(&#get);
        }
    } else if let Some(length_prefix) = &options.length_prefix {
        let encode_length = match length_prefix {
            LengthPrefix::Inferred => quote! {},
            LengthPrefix::VarUint => quote! {
                encoder.write_var_uint(#get.len().try_into().unwrap_or(u32::MAX));
            },
            LengthPrefix::U32 => quote! {
                encoder.write_u32(#get.len().try_into().unwrap_or(u32::MAX));
            },
        };

        quote! {
            #encode_length
            for item in &#get {
                crate::protocol::Encode::encode(item, encoder);
            }
        }
    } else {
        quote! {
            crate::protocol::Encode::encode(&#get, encoder);
        }
    };
    Ok(result)
}

fn encode_variant(variant: &VariantInput, parent: &EnumInput) -> syn::Result<TokenStream> {
    let id = variant.options.id.ok_or_else(|| {
        syn::Error::new_spanned(&variant.ident, "variant requires #[encoding(id = ...)]")
    })?;
    let write_discriminant = match &parent.options.discriminant {
        Discriminant::Byte => {
            let id = u8::try_from(id).expect("ID overflow");
            quote! {
                encoder.write_u8(#id);
            }
        }
        Discriminant::Int => {
            let id = i32::try_from(id).expect("ID overflow");
            quote! {
                encoder.write_i32(#id);
            }
        }
        Discriminant::VarUint => {
            let id = u32::try_from(id).expect("ID overflow");
            quote! {
                encoder.write_var_uint(#id);
            }
        }
        Discriminant::VarInt => {
            let id = i32::try_from(id).expect("ID overflow");
            quote! {
                encoder.write_var_int(#id);
            }
        }
        Discriminant::Header => unreachable!("header enums are handled by derive_packet_body"),
    };

    let encode_fields = variant
        .fields
        .iter()
        .map(encode_field)
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        #write_discriminant
        #(#encode_fields)*
    })
}

fn derive_encode_struct(input: &StructInput) -> syn::Result<TokenStream> {
    let encode_fields = input
        .fields
        .iter()
        .map(encode_field)
        .collect::<syn::Result<Vec<_>>>()?;
    Ok(quote! {
        #(#encode_fields)*
    })
}

fn variant_binding(variant: &VariantInput) -> TokenStream {
    let bindings = &variant.bindings;
    if bindings.is_empty() {
        quote! {}
    } else if !variant.fields_named {
        quote! { (__field) }
    } else {
        quote! {
            { #(#bindings),* }
        }
    }
}

fn derive_encode_enum(input: &EnumInput) -> syn::Result<TokenStream> {
    let mut match_arms = Vec::new();

    for variant in &input.variants {
        let ident = &variant.ident;
        let binding = variant_binding(variant);
        let encode = encode_variant(variant, input)?;
        match_arms.push(quote! {
            Self::#ident #binding => {
                #encode
            }
        });
    }

    Ok(quote! {
        match self {
            #(#match_arms,)*
        }
    })
}

fn encode(input: &Input, ident: &Ident) -> syn::Result<TokenStream> {
    let encode = match input {
        Input::Struct(s) => derive_encode_struct(s)?,
        Input::Enum(e) => derive_encode_enum(e)?,
    };
    Ok(quote! {
        impl crate::protocol::Encode for #ident {
            fn encode(&self, encoder: &mut crate::protocol::Encoder) {
                #encode
            }
        }
    })
}

fn decode_field(field: &FieldInput) -> TokenStream {
    let FieldInput { options, ident, .. } = field;

    if options.varint {
        quote! {
            let #ident = decoder.read_var_int()?.try_into()?;
        }
    } else if options.varlong {
        quote! {
            let #ident = decoder.read_var_long()?.try_into()?;
        }
    } else if options.varuint {
        quote! {
            let #ident = decoder.read_var_uint()?.try_into()?;
        }
    } else if options.varulong {
        quote! {
            let #ident = decoder.read_var_ulong()?.try_into()?;
        }
    } else if options.bool_prefixed {
        quote! {
            let is_present = decoder.read_bool()?;
            let #ident = if is_present {
                Some(crate::protocol::Decode::decode(decoder)?)
            } else {
                None
            };
        }
    } else if options.byte_array {
        quote! {
            let #ident = decoder.read_byte_array()?.to_vec();
        }
    } else if options.rest {
        quote! {
            let #ident = decoder.consume_rest().to_vec();
        }
    } else if let Some(length_prefix) = &options.length_prefix {
        let read_items = quote! {
            let mut #ident = Vec::with_capacity(length.min(1024));
            for _ in 0..length {
                #ident.push(crate::protocol::Decode::decode(decoder)?);
            }
        };
        match length_prefix {
            LengthPrefix::VarUint => quote! {let #ident = {
                let length = usize::try_from(decoder.read_var_uint()?)?;
                #read_items
                #ident
            };},
            LengthPrefix::U32 => quote! {let #ident = {
                let length = usize::try_from(decoder.read_u32()?)?;
                #read_items
                #ident
            };},
            LengthPrefix::Inferred => quote! {
                let mut #ident = Vec::new();
                while !decoder.is_finished() {
                    #ident.push(crate::protocol::Decode::decode(decoder)?);
                }
            },
        }
    } else {
        quote! {
            let #ident = crate::protocol::Decode::decode(decoder)?;
        }
    }
}

fn init_fields(fields: &[FieldInput]) -> Vec<TokenStream> {
    fields
        .iter()
        .map(|FieldInput { ident, .. }| {
            quote! {
                #ident
            }
        })
        .collect()
}

fn decode_struct(input: &StructInput) -> TokenStream {
    let decode_fields: Vec<_> = input.fields.iter().map(decode_field).collect();
    let init_fields = init_fields(&input.fields);

    quote! {
        #(#decode_fields)*
        Ok(Self {
            #(#init_fields,)*
        })
    }
}

fn decode_variant(input: &VariantInput) -> TokenStream {
    let decode_fields: Vec<_> = input.fields.iter().map(decode_field).collect();
    let init_fields = init_fields(&input.fields);

    let init = if init_fields.is_empty() {
        quote! {}
    } else if !input.fields_named {
        quote! { (#(#init_fields)*) }
    } else {
        quote! {
            {
                #(#init_fields,)*
            }
        }
    };

    let ident = &input.ident;
    quote! {
        #(#decode_fields)*
        Ok(Self::#ident #init)
    }
}

fn decode_enum(input: &EnumInput) -> TokenStream {
    let decode_discriminant = match &input.options.discriminant {
        Discriminant::VarUint => quote! { decoder.read_var_uint()? },
        Discriminant::VarInt => quote! { decoder.read_var_int()? },
        Discriminant::Byte => quote! { decoder.read_u8()? },
        Discriminant::Int => quote! { decoder.read_i32()? },
        Discriminant::Header => unreachable!("header enums are handled by derive_packet_body"),
    };

    let mut match_arms = Vec::new();
    for variant in &input.variants {
        let decode = decode_variant(variant);
        if let Some(id) = variant.options.id {
            match_arms.push(quote! {
                #id => {
                    #decode
                }
            });
        }
    }

    quote! {
        let discriminant = i64::from(#decode_discriminant);

        match discriminant {
            #(#match_arms,)*
            _ => Err(crate::protocol::DecodeError::Other(::anyhow::format_err!("invalid discriminant '{}'", discriminant))),
        }
    }
}

fn decode(input: &Input, derive_input: &DeriveInput) -> TokenStream {
    let ident = &derive_input.ident;
    let imp = match input {
        Input::Struct(s) => decode_struct(s),
        Input::Enum(e) => decode_enum(e),
    };

    quote! {
        impl crate::protocol::Decode for #ident {
            fn decode(decoder: &mut crate::protocol::Decoder) -> ::std::result::Result<Self, crate::protocol::DecodeError> {
                #imp
            }
        }
    }
}

/// Generates `PacketBody` for an enum whose discriminant lives in the
/// packet header rather than in the body.
fn derive_packet_body(input: &EnumInput, ident: &Ident) -> syn::Result<TokenStream> {
    let mut id_arms = Vec::new();
    let mut encode_arms = Vec::new();
    let mut decode_arms = Vec::new();
    let mut fallback = None;

    for variant in &input.variants {
        let variant_ident = &variant.ident;
        if variant.fields_named || variant.fields.len() != 1 {
            return Err(syn::Error::new_spanned(
                variant_ident,
                "packet variants must wrap exactly one unnamed field",
            ));
        }

        encode_arms.push(quote! {
            Self::#variant_ident(__field) => crate::protocol::Encode::encode(__field, encoder)
        });

        if variant.options.fallback {
            if fallback.is_some() {
                return Err(syn::Error::new_spanned(
                    variant_ident,
                    "at most one fallback variant is allowed",
                ));
            }
            id_arms.push(quote! {
                Self::#variant_ident(__field) => crate::protocol::UnknownBody::packet_id(__field)
            });
            fallback = Some(variant_ident.clone());
            continue;
        }

        let id = variant.options.id.ok_or_else(|| {
            syn::Error::new_spanned(variant_ident, "variant requires #[encoding(id = ...)]")
        })?;
        let id = u32::try_from(id).map_err(|_| {
            syn::Error::new_spanned(variant_ident, "packet id must fit in 32 bits")
        })?;
        id_arms.push(quote! {
            Self::#variant_ident(_) => #id
        });
        decode_arms.push(quote! {
            #id => Ok(Self::#variant_ident(crate::protocol::Decode::decode(decoder)?))
        });
    }

    let fallback_arm = match fallback {
        Some(variant_ident) => quote! {
            _ => Ok(Self::#variant_ident(crate::protocol::UnknownBody::decode_unknown(packet_id, decoder)?))
        },
        None => quote! {
            _ => Err(crate::protocol::DecodeError::UnknownPacket(packet_id))
        },
    };

    Ok(quote! {
        impl crate::protocol::PacketBody for #ident {
            fn packet_id(&self) -> u32 {
                match self {
                    #(#id_arms,)*
                }
            }

            fn encode_body(&self, encoder: &mut crate::protocol::Encoder) {
                match self {
                    #(#encode_arms,)*
                }
            }

            fn decode_body(
                packet_id: u32,
                decoder: &mut crate::protocol::Decoder,
            ) -> ::std::result::Result<Self, crate::protocol::DecodeError> {
                match packet_id {
                    #(#decode_arms,)*
                    #fallback_arm,
                }
            }
        }
    })
}

fn get_input(input: &DeriveInput) -> syn::Result<Input> {
    match &input.data {
        Data::Struct(s) => get_struct_input(s).map(Input::Struct),
        Data::Enum(e) => get_enum_input(e, input).map(Input::Enum),
        Data::Union(u) => Err(syn::Error::new_spanned(
            u.union_token,
            "cannot derive Encode/Decode on a union",
        )),
    }
}

fn get_struct_input(s: &DataStruct) -> syn::Result<StructInput> {
    let mut fields = Vec::new();
    match &s.fields {
        Fields::Named(named) => {
            for field in &named.named {
                let options = FieldOptions::from_field(field)?;
                let ident = field.ident.clone().ok_or_else(|| {
                    syn::Error::new_spanned(field, "expected a named field")
                })?;
                fields.push(FieldInput {
                    get: quote! {
                        self.#ident
                    },
                    options,
                    ident,
                });
            }
        }
        Fields::Unnamed(unnamed) => {
            return Err(syn::Error::new_spanned(
                &unnamed.unnamed,
                "structs with unnamed fields are unsupported",
            ))
        }
        Fields::Unit => {}
    }

    Ok(StructInput { fields })
}

fn get_enum_input(s: &DataEnum, input: &DeriveInput) -> syn::Result<EnumInput> {
    let options = EnumOptions::from_derive_input(input)?;
    let mut variants = Vec::new();

    for variant in &s.variants {
        let options = VariantOptions::from_variant(variant)?;

        let mut bindings = Vec::new();
        let mut fields = Vec::new();

        match &variant.fields {
            Fields::Named(named) => {
                for field in &named.named {
                    let options = FieldOptions::from_field(field)?;
                    let ident = field.ident.clone().ok_or_else(|| {
                        syn::Error::new_spanned(field, "expected a named field")
                    })?;
                    fields.push(FieldInput {
                        get: quote! { (*#ident) },
                        options,
                        ident: ident.clone(),
                    });

                    bindings.push(ident);
                }
            }
            Fields::Unnamed(unnamed) => {
                if unnamed.unnamed.len() > 1 {
                    return Err(syn::Error::new_spanned(
                        &unnamed.unnamed,
                        "more than one unnamed field in a variant is unsupported",
                    ));
                }
                let field = &unnamed.unnamed[0];
                let options = FieldOptions::from_field(field)?;
                fields.push(FieldInput {
                    get: quote! { (*__field) },
                    options,
                    ident: Ident::new("__field", Span::call_site()),
                });
                bindings.push(Ident::new("__field", Span::call_site()));
            }
            Fields::Unit => {}
        };

        variants.push(VariantInput {
            ident: variant.ident.clone(),
            fields,
            bindings,
            options,
            fields_named: matches!(variant.fields, Fields::Named(_)),
        });
    }

    Ok(EnumInput { variants, options })
}

fn is_header_enum(input: &Input) -> bool {
    matches!(input, Input::Enum(e) if e.options.discriminant == Discriminant::Header)
}

pub fn derive_encode_on(derive_input: &DeriveInput) -> syn::Result<TokenStream> {
    let input = get_input(derive_input)?;
    match &input {
        Input::Enum(e) if is_header_enum(&input) => derive_packet_body(e, &derive_input.ident),
        _ => encode(&input, &derive_input.ident),
    }
}

pub fn derive_decode_on(derive_input: &DeriveInput) -> syn::Result<TokenStream> {
    let input = get_input(derive_input)?;
    if is_header_enum(&input) {
        // `PacketBody` is emitted once, from the `Encode` derive.
        return Ok(TokenStream::new());
    }
    Ok(decode(&input, derive_input))
}
