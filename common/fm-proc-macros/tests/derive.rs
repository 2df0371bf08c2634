use clap::ValueEnum;
use fm_proc_macros::{
    ConfigDisplay, CustomValueEnum, EnumAll, EnumDisplay, EnumFromStr, MatchEachVariantMacro,
};
use test_log::test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumDisplay, EnumFromStr, EnumAll, CustomValueEnum)]
enum Waveform {
    Sine,
    HalfSine,
    AbsSine,
}

#[test]
fn display_uses_variant_names() {
    assert_eq!(Waveform::HalfSine.to_str(), "HalfSine");
    assert_eq!(Waveform::AbsSine.to_string(), "AbsSine");
}

#[test]
fn from_str_ignores_case() {
    assert_eq!("halfsine".parse::<Waveform>(), Ok(Waveform::HalfSine));
    assert_eq!("SINE".parse::<Waveform>(), Ok(Waveform::Sine));
    assert_eq!(
        "square".parse::<Waveform>(),
        Err("invalid Waveform string: 'square'".to_string())
    );
}

#[test]
fn all_and_value_enum() {
    assert_eq!(Waveform::ALL, [Waveform::Sine, Waveform::HalfSine, Waveform::AbsSine]);
    assert_eq!(Waveform::value_variants(), &Waveform::ALL);

    let names: Vec<_> = Waveform::ALL
        .iter()
        .filter_map(ValueEnum::to_possible_value)
        .map(|value| value.get_name().to_string())
        .collect();
    assert_eq!(names, ["Sine", "HalfSine", "AbsSine"]);
}

#[derive(Debug, Clone, Copy, Default, ConfigDisplay)]
struct Settings {
    clock: u32,
    #[cfg_display(debug_fmt)]
    label: &'static str,
    #[cfg_display(skip)]
    _hidden: bool,
}

#[test]
fn config_display_lines() {
    let settings = Settings { clock: 3579545, label: "opm", _hidden: true };
    assert_eq!(settings.to_string(), "\n  clock: 3579545\n  label: \"opm\"");
}

#[derive(MatchEachVariantMacro)]
enum Number {
    Small(u8),
    Large(u32),
}

#[test]
fn match_each_variant_dispatch() {
    let values = [Number::Small(200), Number::Large(70_000)];
    let widened: Vec<u32> =
        values.iter().map(|value| match_each_variant!(value, n => u32::from(*n))).collect();
    assert_eq!(widened, [200, 70_000]);
}
