mod script;

use crate::script::Command;
use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use fm_config::{BusyFlagBehavior, ChipConfig, ChipFamily, OpllPatchSet, OpnaOutputStage};
use fm_core::Chip;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

const CHIP_OPTIONS_HEADING: &str = "Chip Options";

#[derive(Parser)]
struct Args {
    /// Register-write script to play
    #[arg(short = 's', long)]
    script: PathBuf,

    /// WAV file to write
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// TOML chip config file; command-line options override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Minimum output length in seconds; silence after the script is rendered up to this length
    #[arg(long)]
    seconds: Option<f64>,

    /// Chip family (Opm / Opn / Opna / Opl / Opl2 / Opll / Opl3)
    #[arg(long, ignore_case = true, help_heading = CHIP_OPTIONS_HEADING)]
    family: Option<ChipFamily>,

    /// Input clock in Hz, defaults to the family's typical clock
    #[arg(long, help_heading = CHIP_OPTIONS_HEADING)]
    clock: Option<u32>,

    /// Busy flag behavior (Emulated / AlwaysZero)
    #[arg(long, ignore_case = true, help_heading = CHIP_OPTIONS_HEADING)]
    busy_behavior: Option<BusyFlagBehavior>,

    /// OPNA output stage (Ym2608 / Ym2612 / Ym3438)
    #[arg(long, ignore_case = true, help_heading = CHIP_OPTIONS_HEADING)]
    opna_output: Option<OpnaOutputStage>,

    /// OPLL instrument ROM (Ym2413 / Vrc7)
    #[arg(long, ignore_case = true, help_heading = CHIP_OPTIONS_HEADING)]
    opll_patches: Option<OpllPatchSet>,
}

impl Args {
    fn chip_config(&self) -> anyhow::Result<ChipConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ChipConfig::default(),
        };

        if let Some(family) = self.family {
            config.family = family;
        }
        if let Some(clock) = self.clock {
            config.clock = Some(clock);
        }
        if let Some(busy_behavior) = self.busy_behavior {
            config.busy_behavior = busy_behavior;
        }
        if let Some(opna_output) = self.opna_output {
            config.opna_output = opna_output;
        }
        if let Some(opll_patches) = self.opll_patches {
            config.opll_patches = opll_patches;
        }

        Ok(config)
    }
}

fn load_config(path: &Path) -> anyhow::Result<ChipConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Unable to read config file at '{}'", path.display()))?;
    toml::from_str(&text)
        .with_context(|| format!("Unable to parse config file at '{}'", path.display()))
}

fn saturate(sample: i32) -> i16 {
    sample.clamp(i16::MIN.into(), i16::MAX.into()) as i16
}

fn render_samples<W: Write + Seek>(
    chip: &mut Chip,
    writer: &mut hound::WavWriter<W>,
    samples: u64,
) -> anyhow::Result<()> {
    for _ in 0..samples {
        let frame = chip.generate();
        for &sample in frame.lines() {
            writer.write_sample(saturate(sample)).context("Unable to write WAV sample")?;
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.chip_config()?;
    log::info!("Running with config:\n{config}");

    let source = fs::read_to_string(&args.script)
        .with_context(|| format!("Unable to read script at '{}'", args.script.display()))?;
    let commands = script::parse(&source)
        .with_context(|| format!("Invalid script at '{}'", args.script.display()))?;

    let mut chip = Chip::from_config(&config)?;
    let sample_rate = chip.sample_rate();

    let spec = hound::WavSpec {
        channels: chip.traits().outputs as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("Unable to create WAV file at '{}'", args.output.display()))?;

    let mut rendered = 0_u64;
    for command in commands {
        match command {
            Command::Write { address, data } => chip.write(address, data),
            Command::Wait(samples) => {
                render_samples(&mut chip, &mut writer, samples.into())?;
                rendered += u64::from(samples);
            }
            Command::End => break,
        }
    }

    let min_samples = args.seconds.map_or(0, |seconds| (seconds * f64::from(sample_rate)) as u64);
    if rendered < min_samples {
        render_samples(&mut chip, &mut writer, min_samples - rendered)?;
        rendered = min_samples;
    }

    writer.finalize().context("Unable to finalize WAV file")?;

    if chip.sample_rate() != sample_rate {
        log::warn!(
            "Sample rate changed from {sample_rate} Hz to {} Hz during the script; WAV header \
             uses the initial rate",
            chip.sample_rate()
        );
    }

    log::info!(
        "Wrote {rendered} samples at {sample_rate} Hz to '{}'",
        args.output.display()
    );

    Ok(())
}
