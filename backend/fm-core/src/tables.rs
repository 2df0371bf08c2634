//! Shared lookup tables and the fixed-point conversions built on them

use fm_common::num::GetBit;
use std::array;
use std::sync::LazyLock;

pub const WAVEFORM_LENGTH: usize = 1024;
pub const WAVEFORM_COUNT: usize = 8;

// Bit 15 of a waveform entry is the sign; the rest is a 4.8 log2 attenuation
pub const WAVEFORM_SIGN_BIT: u16 = 0x8000;

pub type Waveform = [u16; WAVEFORM_LENGTH];

// From http://gendev.spritesmind.net/forum/viewtopic.php?f=24&t=386&start=105
#[rustfmt::skip]
const ATTENUATION_INCREMENTS: &[[u8; 8]; 64] = &[
    [0,0,0,0,0,0,0,0], [0,0,0,0,0,0,0,0], [0,1,0,1,0,1,0,1], [0,1,0,1,0,1,0,1],  // 0-3
    [0,1,0,1,0,1,0,1], [0,1,0,1,0,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,0,1,1,1],  // 4-7
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 8-11
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 12-15
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 16-19
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 20-23
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 24-27
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 28-31
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 32-35
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 36-39
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 40-43
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],  // 44-47
    [1,1,1,1,1,1,1,1], [1,1,1,2,1,1,1,2], [1,2,1,2,1,2,1,2], [1,2,2,2,1,2,2,2],  // 48-51
    [2,2,2,2,2,2,2,2], [2,2,2,4,2,2,2,4], [2,4,2,4,2,4,2,4], [2,4,4,4,2,4,4,4],  // 52-55
    [4,4,4,4,4,4,4,4], [4,4,4,8,4,4,4,8], [4,8,4,8,4,8,4,8], [4,8,8,8,4,8,8,8],  // 56-59
    [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8],  // 60-63
];

#[inline]
pub fn attenuation_increment(rate: u8, index: u32) -> u32 {
    ATTENUATION_INCREMENTS[rate as usize & 0x3F][index as usize & 7].into()
}

// Indexed by 5-bit key code, then the low 2 bits of the detune setting
#[rustfmt::skip]
const DETUNE_TABLE: &[[u8; 4]; 32] = &[
    [0,  0,  1,  2],  [0,  0,  1,  2],  [0,  0,  1,  2],  [0,  0,  1,  2],  // Block 0
    [0,  1,  2,  2],  [0,  1,  2,  3],  [0,  1,  2,  3],  [0,  1,  2,  3],  // Block 1
    [0,  1,  2,  4],  [0,  1,  3,  4],  [0,  1,  3,  4],  [0,  1,  3,  5],  // Block 2
    [0,  2,  4,  5],  [0,  2,  4,  6],  [0,  2,  4,  6],  [0,  2,  5,  7],  // Block 3
    [0,  2,  5,  8],  [0,  3,  6,  8],  [0,  3,  6,  9],  [0,  3,  7, 10],  // Block 4
    [0,  4,  8, 11],  [0,  4,  8, 12],  [0,  4,  9, 13],  [0,  5, 10, 14],  // Block 5
    [0,  5, 11, 16],  [0,  6, 12, 17],  [0,  6, 13, 19],  [0,  7, 14, 20],  // Block 6
    [0,  8, 16, 22],  [0,  8, 16, 22],  [0,  8, 16, 22],  [0,  8, 16, 22],  // Block 7
];

/// Signed phase step adjustment for a 3-bit detune setting; bit 2 is the sign.
#[inline]
pub fn detune_adjustment(detune: u32, keycode: u32) -> i32 {
    let magnitude: i32 = DETUNE_TABLE[keycode as usize & 0x1F][detune as usize & 3].into();
    if detune.bit(2) { -magnitude } else { magnitude }
}

// OPL/OPLL frequency multiples in 0.5 steps, x2
const MULTIPLIER_TABLE: &[u8; 16] = &[1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];

#[inline]
pub fn opl_multiple(multiple: u32) -> u32 {
    MULTIPLIER_TABLE[multiple as usize & 0xF].into()
}

/// Key-scale attenuation in 0.75dB steps for a 3-bit block and the top 4 F-number bits.
#[must_use]
pub fn opl_key_scale_atten(block: u32, fnum_4msb: u32) -> u32 {
    const FNUM_TO_ATTEN: &[u8; 16] =
        &[0, 24, 32, 37, 40, 43, 45, 47, 48, 50, 51, 52, 53, 54, 55, 56];

    let atten = i32::from(FNUM_TO_ATTEN[fnum_4msb as usize & 0xF]) - 8 * ((block & 7) ^ 7) as i32;
    atten.max(0) as u32
}

/// Apply key scale rate to a raw 0-63 rate. A raw rate of 0 never advances.
#[inline]
#[must_use]
pub fn effective_rate(raw_rate: u32, ksr: u32) -> u8 {
    if raw_rate == 0 { 0 } else { (raw_rate + ksr).min(63) as u8 }
}

// Logic based on http://gendev.spritesmind.net/forum/viewtopic.php?p=6114#p6114
fn quarter_sine_attenuation(index: usize) -> u16 {
    static QUARTER_SINE_TABLE: LazyLock<[u16; 256]> = LazyLock::new(|| {
        array::from_fn(|i| {
            use std::f64::consts::PI;

            // Offset by half a step to avoid computing log2(0)
            let n = ((i << 1) | 1) as f64;
            let sine = (n * PI / 1024.0).sin();

            // 4.8 fixed-point log2 attenuation
            (-sine.log2() * f64::from(1 << 8)).round() as u16
        })
    });

    let index = if index.bit(8) { !index } else { index };
    QUARTER_SINE_TABLE[index & 0xFF]
}

static WAVEFORMS: LazyLock<[Waveform; WAVEFORM_COUNT]> = LazyLock::new(|| {
    let sine: Waveform = array::from_fn(|i| {
        let sign = if i.bit(9) { WAVEFORM_SIGN_BIT } else { 0 };
        quarter_sine_attenuation(i) | sign
    });

    // Silence reuses the attenuation at the zero crossing
    let zero = sine[0];

    let half_sine = array::from_fn(|i| if i.bit(9) { zero } else { sine[i] });
    let abs_sine = array::from_fn(|i| sine[i] & !WAVEFORM_SIGN_BIT);
    let quarter_sine =
        array::from_fn(|i| if i.bit(8) { zero } else { sine[i] & !WAVEFORM_SIGN_BIT });
    let alternating_sine = array::from_fn(|i| if i.bit(9) { zero } else { sine[(i * 2) & 0x3FF] });
    let camel_sine =
        array::from_fn(|i| if i.bit(9) { zero } else { sine[(i * 2) & 0x1FF] });
    let square = array::from_fn(|i| u16::from(i.bit(9)) << 15);
    let log_saw = array::from_fn(|i| {
        let value = if i.bit(9) { i ^ 0x13FF } else { i };
        (value << 3) as u16
    });

    [sine, half_sine, abs_sine, quarter_sine, alternating_sine, camel_sine, square, log_saw]
});

#[inline]
pub fn waveform(index: u8) -> &'static Waveform {
    &WAVEFORMS[index as usize % WAVEFORM_COUNT]
}

// Logic based on http://gendev.spritesmind.net/forum/viewtopic.php?p=6114#p6114
/// Convert a 5.8 fixed-point log2 attenuation into a 13-bit linear volume.
#[inline]
pub fn attenuation_to_volume(attenuation: u32) -> u32 {
    static POW2_TABLE: LazyLock<[u16; 256]> = LazyLock::new(|| {
        array::from_fn(|i| {
            // 2^(-n) for n in (0, 1], stored as 0.11 fixed-point
            let n = ((i + 1) as f64) / 256.0;
            (2.0_f64.powf(-n) * f64::from(1 << 11)).round() as u16
        })
    });

    let int_part = attenuation >> 8;
    if int_part >= 13 {
        return 0;
    }

    (u32::from(POW2_TABLE[(attenuation & 0xFF) as usize]) << 2) >> int_part
}

/// OPM phase step for a 10-bit note index (key code without block) in octave 7.
///
/// One octave is 768 steps of 1/64 semitone, starting from C#; index 512 is A at 3520 Hz.
/// Values are derived from equal temperament at the reference clock and rounded to multiples
/// of 32, which is the granularity of the chip's internal table.
fn opm_phase_step(index: usize) -> u32 {
    static PHASE_STEP_TABLE: LazyLock<[u32; 768]> = LazyLock::new(|| {
        const REFERENCE_CLOCK: f64 = 3_579_545.0;
        const OPERATOR_RATE: f64 = REFERENCE_CLOCK / 64.0;

        array::from_fn(|i| {
            let frequency = 3520.0 * 2.0_f64.powf((i as f64 - 512.0) / 768.0);
            let step = frequency * f64::from(1 << 20) / OPERATOR_RATE;
            (step / 32.0).round() as u32 * 32
        })
    });

    PHASE_STEP_TABLE[index]
}

/// Convert a 13-bit OPM block/keycode/fraction word plus a signed adjustment (DT2 and LFO PM,
/// in 1/64 semitone units) into a phase step.
pub fn opm_key_code_to_phase_step(block_freq: u32, delta: i32) -> u32 {
    // Key codes 3, 7, 11, 15 are not valid notes; 15 lands on the first note of the next octave
    let keycode = block_freq.field(6, 4);
    let adjusted_code = keycode - (keycode >> 2);

    let eff_freq = ((adjusted_code << 6) | block_freq.field(0, 6)) as i32 + delta;
    let block = block_freq.field(10, 3) as i32 + eff_freq.div_euclid(768);
    let eff_freq = eff_freq.rem_euclid(768) as usize;

    // Clamp to the top and bottom of the 8-octave range
    match block {
        ..=-1 => opm_phase_step(0) >> 7,
        0..=7 => opm_phase_step(eff_freq) >> (7 - block),
        _ => opm_phase_step(767),
    }
}

/// Round-trip a sample through the 10.3 floating-point format of the YM3012/YM3014 DACs.
#[must_use]
pub fn roundtrip_fp(value: i32) -> i32 {
    if value < i32::from(i16::MIN) {
        return i16::MIN.into();
    }
    if value > i32::from(i16::MAX) {
        return i16::MAX.into();
    }

    // Count leading sign bits below the sign; a negative value is inverted so leading ones
    // become leading zeros
    let scan = (value ^ (value >> 31)) as u32;
    let exponent = (7 - (scan << 17).leading_zeros() as i32).max(1) - 1;
    value & !((1 << exponent) - 1)
}
