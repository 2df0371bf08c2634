//! Derive macros shared by the FM synthesis crates

mod config;
mod enums;

use proc_macro::TokenStream;

/// Implement `to_str()` and `Display` for an enum with only fieldless variants, using the
/// variant names as-is.
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    enums::enum_display(input)
}

/// Implement case-insensitive `FromStr` for an enum with only fieldless variants.
#[proc_macro_derive(EnumFromStr)]
pub fn enum_from_str(input: TokenStream) -> TokenStream {
    enums::enum_from_str(input)
}

/// Add an `ALL` constant containing every variant in declaration order.
#[proc_macro_derive(EnumAll)]
pub fn enum_all(input: TokenStream) -> TokenStream {
    enums::enum_all(input)
}

/// Implement `clap::ValueEnum` in terms of `ALL` and `to_str()`. Requires `EnumAll` and
/// `EnumDisplay`.
#[proc_macro_derive(CustomValueEnum)]
pub fn custom_value_enum(input: TokenStream) -> TokenStream {
    enums::custom_value_enum(input)
}

/// Generate a `match_each_variant!` macro for an enum where every variant wraps exactly one value.
///
/// `match_each_variant!(value, inner => expr)` evaluates `expr` against whichever value the
/// enum currently holds.
#[proc_macro_derive(MatchEachVariantMacro)]
pub fn match_each_variant_macro(input: TokenStream) -> TokenStream {
    enums::match_each_variant_macro(input)
}

/// Implement a multi-line `Display` for a config struct, one `name: value` line per field.
///
/// Fields can be annotated with `#[cfg_display(debug_fmt)]` to format with `Debug` or
/// `#[cfg_display(skip)]` to leave them out.
#[proc_macro_derive(ConfigDisplay, attributes(cfg_display))]
pub fn config_display(input: TokenStream) -> TokenStream {
    config::config_display(input)
}
