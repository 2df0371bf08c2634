use fm_config::{BusyFlagBehavior, ChipConfig, ChipFamily, OpnaOutputStage};
use fm_core::{Chip, UnsupportedFamilyError};
use test_log::test;

const OPM_CLOCK: u32 = 3_579_545;

fn chip(family: ChipFamily) -> Chip {
    Chip::new(family, family.default_clock()).unwrap()
}

fn render(chip: &mut Chip, samples: usize, line: usize) -> Vec<i32> {
    (0..samples).map(|_| chip.generate().line(line)).collect()
}

fn peak(samples: &[i32]) -> i32 {
    samples.iter().map(|sample| sample.abs()).max().unwrap_or(0)
}

fn rising_edges(samples: &[i32]) -> Vec<usize> {
    samples
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] < 0 && pair[1] >= 0)
        .map(|(i, _)| i + 1)
        .collect()
}

// Algorithm 7 with only op4 audible, instant attack, no decay
fn program_opm_sine(chip: &mut Chip, key_code: u8) {
    chip.write(0x20, 0xC7);
    chip.write(0x28, key_code);
    chip.write(0x30, 0x00);
    for slot in [0x00, 0x08, 0x10, 0x18] {
        chip.write(0x40 + slot, 0x01);
        chip.write(0x60 + slot, if slot == 0x18 { 0x00 } else { 0x7F });
        chip.write(0x80 + slot, 0x1F);
        chip.write(0xA0 + slot, 0x00);
        chip.write(0xC0 + slot, 0x00);
        chip.write(0xE0 + slot, 0x0F);
    }
    chip.write(0x08, 0x78);
}

#[test]
fn unsupported_families_are_rejected() {
    for family in [ChipFamily::Opq, ChipFamily::Opz] {
        let result = Chip::new(family, OPM_CLOCK);
        assert_eq!(result.err(), Some(UnsupportedFamilyError { family }));
    }
}

#[test]
fn registers_store_every_write() {
    for (family, address, value) in [
        (ChipFamily::Opm, 0x30, 0x5A),
        (ChipFamily::Opn, 0x40, 0x7F),
        (ChipFamily::Opna, 0x140, 0x12),
        (ChipFamily::Opl, 0x40, 0x3F),
        (ChipFamily::Opl2, 0xE0, 0x03),
        (ChipFamily::Opll, 0x30, 0x12),
        // Unused addresses are stored too
        (ChipFamily::Opm, 0x02, 0x99),
    ] {
        let mut chip = chip(family);
        chip.write(address, value);
        assert_eq!(chip.register(address), value, "{family} {address:03X}");
    }

    let mut opl3 = chip(ChipFamily::Opl3);
    opl3.write(0x105, 0x01);
    opl3.write(0x140, 0x21);
    assert_eq!(opl3.register(0x140), 0x21);
    assert_eq!(opl3.register(0x040), 0x00);
}

#[test]
fn opm_renders_periodic_tone() {
    let mut chip = chip(ChipFamily::Opm);
    let sample_rate = chip.sample_rate();
    assert_eq!(sample_rate, OPM_CLOCK / 64);

    // Key code 0x4A is A4
    program_opm_sine(&mut chip, 0x4A);
    let samples = render(&mut chip, 16384, 0);
    let samples = &samples[256..];
    assert!(peak(samples) > 4096);

    let edges = rising_edges(samples);
    assert!(edges.len() > 50);

    let gaps: Vec<usize> = edges.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let min_gap = gaps.iter().copied().min().unwrap();
    let max_gap = gaps.iter().copied().max().unwrap();
    assert!(max_gap - min_gap <= 2, "gaps {min_gap}..{max_gap}");

    let period = (edges[edges.len() - 1] - edges[0]) as f64 / (edges.len() - 1) as f64;
    let frequency = f64::from(sample_rate) / period;
    assert!((frequency - 440.0).abs() < 440.0 * 0.03, "frequency {frequency}");

    // Both lines enabled by $20 bits 6-7
    let frame = chip.generate();
    assert_eq!(frame.lines().len(), 2);
    assert_eq!(frame.line(0), frame.line(1));
}

#[test]
fn opm_octave_doubles_frequency() {
    let measure = |key_code| {
        let mut chip = chip(ChipFamily::Opm);
        program_opm_sine(&mut chip, key_code);
        let samples = render(&mut chip, 16384, 0);
        let edges = rising_edges(&samples[256..]);
        (edges[edges.len() - 1] - edges[0]) as f64 / (edges.len() - 1) as f64
    };

    let ratio = measure(0x3A) / measure(0x4A);
    assert!((ratio - 2.0).abs() < 0.05, "ratio {ratio}");

    // Key code 15 plays the first note of the next block
    let ratio = measure(0x3F) / measure(0x40);
    assert!((ratio - 1.0).abs() < 0.01, "ratio {ratio}");

    // Key code 14 is one semitone below it
    let ratio = measure(0x3E) / measure(0x40);
    assert!((ratio - 2.0_f64.powf(1.0 / 12.0)).abs() < 0.01, "ratio {ratio}");
}

#[test]
fn key_off_releases_to_silence() {
    let mut chip = chip(ChipFamily::Opm);
    program_opm_sine(&mut chip, 0x4A);
    assert!(peak(&render(&mut chip, 1024, 0)) > 4096);

    chip.write(0x08, 0x00);
    render(&mut chip, 8192, 0);
    assert_eq!(peak(&render(&mut chip, 256, 0)), 0);
}

#[test]
fn busy_flag_counts_down() {
    let mut chip = chip(ChipFamily::Opn);
    chip.write(0x30, 0x01);
    for _ in 0..3 {
        assert_eq!(chip.read(0) & 0x80, 0x80);
        chip.generate();
    }
    assert_eq!(chip.read(0) & 0x80, 0);

    let config = ChipConfig {
        busy_behavior: BusyFlagBehavior::AlwaysZero,
        ..ChipConfig::new(ChipFamily::Opn)
    };
    chip.reload_config(&config);
    chip.write(0x30, 0x01);
    assert_eq!(chip.read(0) & 0x80, 0);
}

#[test]
fn timer_b_overflow_and_irq_mask() {
    let mut chip = chip(ChipFamily::Opm);
    chip.write(0x12, 0xFF);
    chip.write(0x14, 0x0A);
    render(&mut chip, 64, 0);

    assert_eq!(chip.status() & 0x03, 0x02);
    assert!(chip.irq());

    chip.set_irq_mask(0x01);
    assert!(!chip.irq());
    assert_eq!(chip.status() & 0x02, 0x02);
}

#[test]
fn collaborator_status_bits() {
    let mut chip = chip(ChipFamily::Opna);
    chip.set_reset_status(0x04, 0);
    assert_eq!(chip.status(), 0x04);
    assert!(!chip.irq());

    chip.set_irq_mask(0x07);
    assert!(chip.irq());

    chip.set_reset_status(0, 0x04);
    assert_eq!(chip.status(), 0);
    assert!(!chip.irq());
}

#[test]
fn opl_always_set_status_bits() {
    assert_eq!(chip(ChipFamily::Opl).read(0), 0x06);
    assert_eq!(chip(ChipFamily::Opl2).read(0), 0x06);
    assert_eq!(chip(ChipFamily::Opl3).read(0), 0x00);
    assert_eq!(chip(ChipFamily::Opll).read(0), 0x00);
}

#[test]
fn opl_mode_register_masks_timer() {
    let mut chip = chip(ChipFamily::Opl2);
    chip.write(0x02, 0xFF);
    chip.write(0x04, 0x41);
    render(&mut chip, 64, 0);
    assert_eq!(chip.read(0) & 0xE0, 0);
    assert!(!chip.irq());

    chip.write(0x04, 0x01);
    render(&mut chip, 64, 0);
    assert_eq!(chip.read(0) & 0xE0, 0xC0);
    assert!(chip.irq());

    chip.write(0x04, 0x80);
    assert_eq!(chip.read(0) & 0xE0, 0);
}

#[test]
fn opna_chip_id() {
    let opna = chip(ChipFamily::Opna);
    assert_eq!(opna.read(0xFF), 0x01);
    assert_eq!(chip(ChipFamily::Opn).read(0xFF) & 0x7F, 0x00);
}

#[test]
fn opn_prescaler_changes_sample_rate() {
    let mut chip = Chip::new(ChipFamily::Opn, 4_000_000).unwrap();
    assert_eq!(chip.sample_rate(), 4_000_000 / (6 * 12));

    chip.write(0x2F, 0x00);
    assert_eq!(chip.sample_rate(), 4_000_000 / (2 * 12));

    chip.write(0x2D, 0x00);
    chip.write(0x2E, 0x00);
    assert_eq!(chip.sample_rate(), 4_000_000 / (3 * 12));
}

#[test]
fn opn2_ladder_offsets_silence() {
    let stage = |opna_output| ChipConfig { opna_output, ..ChipConfig::new(ChipFamily::Opna) };

    let mut ym2612 = Chip::from_config(&stage(OpnaOutputStage::Ym2612)).unwrap();
    let frame = ym2612.generate();
    assert_eq!(frame.lines(), &[6 * 4 * 128 / 6, 6 * 4 * 128 / 6]);

    let mut ym3438 = Chip::from_config(&stage(OpnaOutputStage::Ym3438)).unwrap();
    assert_eq!(ym3438.generate().lines(), &[0, 0]);

    // Switching stages at runtime
    ym2612.reload_config(&stage(OpnaOutputStage::Ym3438));
    assert_eq!(ym2612.generate().lines(), &[0, 0]);
}

#[test]
fn opn2_dac_replaces_channel_6() {
    let config =
        ChipConfig { opna_output: OpnaOutputStage::Ym3438, ..ChipConfig::new(ChipFamily::Opna) };
    let mut chip = Chip::from_config(&config).unwrap();

    chip.write(0x2B, 0x80);
    chip.write(0x2A, 0xC0);
    let frame = chip.generate();
    // (0x180 - 0x100) on both lines, scaled by 128/6
    assert_eq!(frame.lines(), &[0x80 * 128 / 6, 0x80 * 128 / 6]);

    chip.write(0x2B, 0x00);
    assert_eq!(chip.generate().lines(), &[0, 0]);
}

#[test]
fn opll_instrument_is_audible() {
    let mut chip = chip(ChipFamily::Opll);
    chip.write(0x30, 0x10);
    chip.write(0x10, 0x80);
    chip.write(0x20, 0x1C);

    let samples = render(&mut chip, 8192, 0);
    assert!(peak(&samples) > 0);
    assert_eq!(chip.generate().lines().len(), 1);
}

// Channel 0 as a single audible carrier
fn program_opl_channel_0(chip: &mut Chip) {
    chip.write(0x20, 0x01);
    chip.write(0x23, 0x01);
    chip.write(0x40, 0x3F);
    chip.write(0x43, 0x00);
    chip.write(0x60, 0xF0);
    chip.write(0x63, 0xF0);
    chip.write(0x80, 0x0F);
    chip.write(0x83, 0x0F);
    chip.write(0xA0, 0x41);
    chip.write(0xB0, 0x32);
}

#[test]
fn opl3_routes_by_output_bits() {
    let mut chip = chip(ChipFamily::Opl3);
    chip.write(0x105, 0x01);
    chip.write(0xC0, 0x30);
    program_opl_channel_0(&mut chip);

    let frames: Vec<_> = (0..2048).map(|_| chip.generate()).collect();
    let line_peak = |line: usize| {
        let samples: Vec<i32> = frames.iter().map(|frame| frame.line(line)).collect();
        peak(&samples)
    };

    assert!(line_peak(0) > 1000);
    assert!(line_peak(1) > 1000);
    assert_eq!(line_peak(2), 0);
    assert_eq!(line_peak(3), 0);
}

#[test]
fn opl2_tone_and_reset() {
    let mut chip = chip(ChipFamily::Opl2);
    program_opl_channel_0(&mut chip);
    assert!(peak(&render(&mut chip, 2048, 0)) > 1000);

    chip.reset();
    assert_eq!(chip.register(0xB0), 0);
    assert_eq!(peak(&render(&mut chip, 256, 0)), 0);
}

#[test]
fn opl_bass_drum() {
    let mut chip = chip(ChipFamily::Opl2);
    // Channel 6 uses operator slots at offsets 0x10 and 0x13
    chip.write(0x30, 0x01);
    chip.write(0x33, 0x01);
    chip.write(0x50, 0x3F);
    chip.write(0x53, 0x00);
    chip.write(0x73, 0xF0);
    chip.write(0x93, 0x0F);
    chip.write(0xA6, 0x41);
    chip.write(0xB6, 0x12);

    chip.write(0xBD, 0x20);
    assert_eq!(peak(&render(&mut chip, 512, 0)), 0);

    chip.write(0xBD, 0x30);
    assert!(peak(&render(&mut chip, 2048, 0)) > 1000);
}

#[test]
fn reset_restores_power_on_state() {
    let mut chip = chip(ChipFamily::Opna);
    chip.write(0x30, 0x55);
    chip.write(0x1B4, 0x00);
    chip.set_reset_status(0x03, 0);

    chip.reset();
    assert_eq!(chip.register(0x30), 0);
    assert_eq!(chip.register(0x1B4), 0xC0);
    assert_eq!(chip.status(), 0);
    assert!(!chip.irq());
}
