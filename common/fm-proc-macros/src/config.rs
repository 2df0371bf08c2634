use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field};

#[derive(Debug, Clone, Copy, Default)]
struct FieldOptions {
    debug_fmt: bool,
    skip: bool,
}

fn parse_field_options(field: &Field) -> FieldOptions {
    let mut options = FieldOptions::default();

    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("cfg_display")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("debug_fmt") {
                options.debug_fmt = true;
            } else if meta.path.is_ident("skip") {
                options.skip = true;
            } else {
                return Err(meta.error("invalid cfg_display option"));
            }
            Ok(())
        })
        .expect("unable to parse cfg_display attribute");
    }

    options
}

pub fn config_display(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = syn::parse(input).expect("unable to parse input");
    let name = &ast.ident;

    let Data::Struct(data) = &ast.data else {
        panic!("ConfigDisplay derive macro only applies to structs; {name} is not a struct");
    };

    let lines: Vec<_> = data
        .fields
        .iter()
        .filter_map(|field| {
            let options = parse_field_options(field);
            if options.skip {
                return None;
            }

            let Some(ident) = &field.ident else {
                panic!("ConfigDisplay derive macro requires named fields");
            };

            let fmt_string = if options.debug_fmt {
                format!("  {ident}: {{:?}}")
            } else {
                format!("  {ident}: {{}}")
            };
            Some(quote! { ::std::write!(f, #fmt_string, self.#ident)?; })
        })
        .collect();

    assert!(!lines.is_empty(), "ConfigDisplay derive macro requires at least one displayed field");

    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        impl #impl_generics ::std::fmt::Display for #name #type_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #(
                    ::std::writeln!(f)?;
                    #lines
                )*
                ::std::result::Result::Ok(())
            }
        }
    };

    expanded.into()
}
