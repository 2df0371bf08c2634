//! Family-generic FM engine: channels, operators, timers, and the per-sample update

use crate::channel::{self, FmChannel};
use crate::envelope::KeyOnSource;
use crate::family::FamilyTraits;
use crate::mixer::{self, Mixer, OutputFrame, OutputStage};
use crate::operator::FmOperator;
use crate::registers::{FamilyRegisters, KeyOnEvent};
use crate::timer::{BusyCounter, StatusRegister, TimerA, TimerB, TimerTickEffect};
use bincode::{Decode, Encode};
use fm_common::num::{GetBit, U16Ext};
use fm_config::{BusyFlagBehavior, ChipConfig};

const OPN2_TEST_REGISTER: u16 = 0x21;

#[derive(Debug, Clone, Encode, Decode)]
pub struct FmEngine<R> {
    regs: R,
    channels: Vec<FmChannel>,
    operators: Vec<FmOperator>,
    env_counter: u32,
    timer_a: TimerA,
    timer_b: TimerB,
    status: StatusRegister,
    busy: BusyCounter,
    clock: u32,
    prescale: u32,
    output_stage: OutputStage,
    busy_behavior: BusyFlagBehavior,
    last_channel_output: i16,
}

impl<R: FamilyRegisters> FmEngine<R> {
    pub fn new(config: &ChipConfig) -> Self {
        let traits = R::TRAITS;
        let channels =
            (0..traits.channels).map(|ch| FmChannel::new(R::channel_offset(ch))).collect();
        let operators =
            (0..traits.operators).map(|op| FmOperator::new(R::operator_offset(op))).collect();

        let mut engine = Self {
            regs: R::new(config),
            channels,
            operators,
            env_counter: 0,
            timer_a: TimerA::new(),
            timer_b: TimerB::new(),
            status: StatusRegister::new(traits.status),
            busy: BusyCounter::default(),
            clock: config.effective_clock(),
            prescale: traits.default_prescale,
            output_stage: OutputStage::new(traits, config),
            busy_behavior: config.busy_behavior,
            last_channel_output: 0,
        };
        engine.assign_operators();
        engine
    }

    pub fn traits(&self) -> &'static FamilyTraits {
        R::TRAITS
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn channel(&self, chnum: usize) -> &FmChannel {
        &self.channels[chnum]
    }

    pub fn operator(&self, opnum: usize) -> &FmOperator {
        &self.operators[opnum]
    }

    fn address_mask() -> u16 {
        (R::TRAITS.registers - 1) as u16
    }

    pub fn sample_rate(&self) -> u32 {
        R::TRAITS.sample_rate(self.clock, self.prescale)
    }

    pub fn prescale(&self) -> u32 {
        self.prescale
    }

    pub fn register(&self, address: u16) -> u8 {
        self.regs.raw(address & Self::address_mask())
    }

    pub fn reload_config(&mut self, config: &ChipConfig) {
        self.busy_behavior = config.busy_behavior;
        self.output_stage = OutputStage::new(R::TRAITS, config);
    }

    fn assign_operators(&mut self) {
        for (chnum, channel) in self.channels.iter_mut().enumerate() {
            let ops = self.regs.operator_list(chnum);
            channel.set_operators(ops);
            for opnum in ops.into_iter().flatten() {
                self.operators[usize::from(opnum)].set_choffs(channel.choffs());
            }
        }
    }

    pub fn write(&mut self, address: u16, data: u8) {
        let address = self.regs.remap_address(address & Self::address_mask());
        log::trace!("FM register write: {address:03X} = {data:02X}");

        if self.busy_behavior == BusyFlagBehavior::Emulated {
            self.busy.start(R::TRAITS.busy_ticks);
        }

        if R::TRAITS.prescale_select
            && !self.output_stage.is_multiplexed_dac()
            && (0x2D..=0x2F).contains(&address)
        {
            self.write_prescale(address);
            return;
        }

        let event = self.regs.write(address, data);

        if Some(address) == R::MODE_REGISTER {
            self.write_mode();
            return;
        }

        self.timer_a.set_interval(self.regs.timer_a_value());
        self.timer_b.set_interval(self.regs.timer_b_value());

        match event {
            Some(KeyOnEvent::Channel { channel, opmask }) => {
                if let Some(fm_channel) = self.channels.get(channel) {
                    log::trace!("Channel {channel} key mask {opmask:X}");
                    fm_channel.keyonoff(opmask, KeyOnSource::Normal, &mut self.operators);
                }
            }
            Some(KeyOnEvent::Rhythm { opmask }) => self.rhythm_key_on(opmask),
            None => {}
        }
    }

    fn write_prescale(&mut self, address: u16) {
        let prescale = match address {
            0x2D => Some(6),
            // $2E only takes effect right after $2D
            0x2E if self.prescale == 6 => Some(3),
            0x2F => Some(2),
            _ => None,
        };

        if let Some(prescale) = prescale {
            if prescale != self.prescale {
                log::debug!("Clock prescale changed from {} to {prescale}", self.prescale);
                self.prescale = prescale;
            }
        }
    }

    fn write_mode(&mut self) {
        let status_mask = self.regs.status_mask();

        if self.regs.irq_reset() {
            self.status.set_reset(0, 0x78, status_mask);
            return;
        }

        let control = self.regs.timer_control();
        let bits = R::TRAITS.status;

        let mut reset = 0;
        if control.reset_a {
            reset |= bits.timer_a;
        }
        if control.reset_b {
            reset |= bits.timer_b;
        }
        self.status.set_reset(0, reset, status_mask);
        log::trace!("Timer control: {control:?}");

        self.timer_a.set_interval(self.regs.timer_a_value());
        self.timer_a.set_load(control.load_a);
        self.timer_b.set_interval(self.regs.timer_b_value());
        self.timer_b.set_load(control.load_b);
    }

    fn rhythm_key_on(&mut self, opmask: u8) {
        if !R::TRAITS.has_rhythm || self.channels.len() < 9 {
            return;
        }

        // Bits 4-0: bass drum, snare drum, tom-tom, top cymbal, high hat
        let masks = [
            (6, if opmask.bit(4) { 0b11 } else { 0 }),
            (7, u8::from(opmask.bit(0)) | (u8::from(opmask.bit(3)) << 1)),
            (8, u8::from(opmask.bit(2)) | (u8::from(opmask.bit(1)) << 1)),
        ];
        for (chnum, mask) in masks {
            self.channels[chnum].keyonoff(mask, KeyOnSource::Rhythm, &mut self.operators);
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        let address = address & Self::address_mask();

        if let Some((id_address, id)) = R::TRAITS.chip_id {
            if address == id_address {
                return id;
            }
        }

        let test = self.regs.raw(OPN2_TEST_REGISTER);
        if self.output_stage.is_multiplexed_dac() && test.bit(6) {
            let word = self.last_channel_output as u16;
            return if test.bit(7) { word.lsb() } else { word.msb() };
        }

        let mut value = self.status() | R::TRAITS.status.always_set;
        if self.busy_behavior == BusyFlagBehavior::Emulated && self.busy.is_busy() {
            value |= R::TRAITS.status.busy;
        }
        value
    }

    pub fn status(&self) -> u8 {
        self.status.value(self.regs.status_mask())
    }

    pub fn irq(&self) -> bool {
        self.status.irq()
    }

    pub fn set_irq_mask(&mut self, mask: u8) {
        self.status.set_irq_mask(mask, self.regs.status_mask());
    }

    pub fn set_reset_status(&mut self, set: u8, reset: u8) {
        self.status.set_reset(set, reset, self.regs.status_mask());
    }

    pub fn reset(&mut self) {
        self.status.set_reset(0, 0xFF, self.regs.status_mask());

        self.regs.reset();
        if let Some(mode) = R::MODE_REGISTER {
            self.regs.write(mode, 0);
            self.write_mode();
        }

        self.timer_a = TimerA::new();
        self.timer_b = TimerB::new();
        self.busy.clear();
        self.env_counter = 0;
        self.prescale = R::TRAITS.default_prescale;
        self.last_channel_output = 0;

        for channel in &mut self.channels {
            channel.reset();
        }
        for operator in &mut self.operators {
            operator.reset();
        }
        self.assign_operators();
    }

    /// Advance one output sample.
    pub fn generate(&mut self) -> OutputFrame {
        self.busy.tick();
        if R::TRAITS.has_timers {
            self.clock_timers();
        }
        self.clock();
        self.output()
    }

    fn clock_timers(&mut self) {
        let control = self.regs.timer_control();
        let bits = R::TRAITS.status;

        let mut set = 0;
        if self.timer_a.tick() == TimerTickEffect::Overflowed {
            if R::TRAITS.has_csm && self.regs.csm() {
                self.csm_key_on();
            }
            if control.enable_a {
                set |= bits.timer_a;
            }
        }
        if self.timer_b.tick() == TimerTickEffect::Overflowed && control.enable_b {
            set |= bits.timer_b;
        }

        if set != 0 {
            self.status.set_reset(set, 0, self.regs.status_mask());
        }
    }

    fn csm_key_on(&mut self) {
        for (chnum, channel) in self.channels.iter().enumerate() {
            if R::TRAITS.csm_trigger_mask.bit(chnum as u8) {
                channel.keyonoff(0xF, KeyOnSource::Csm, &mut self.operators);
            }
        }
    }

    fn clock(&mut self) {
        if R::TRAITS.dynamic_op_count {
            self.assign_operators();
        }

        for operator in &mut self.operators {
            operator.prepare(&self.regs);
        }

        // Low two bits are a subcount that wraps at the divider
        let divider = R::TRAITS.eg_clock_divider;
        self.env_counter = self.env_counter.wrapping_add(1);
        if self.env_counter & 3 == divider {
            self.env_counter = self.env_counter.wrapping_add(4 - divider);
        }

        let lfo_raw_pm = self.regs.clock_noise_and_lfo();

        for channel in &mut self.channels {
            channel.clock_feedback();
            for opnum in channel.operators().into_iter().flatten() {
                self.operators[usize::from(opnum)].clock(&self.regs, self.env_counter, lfo_raw_pm);
            }
        }
    }

    fn output(&mut self) -> OutputFrame {
        let (rshift, clipmax) = self.output_stage.channel_shift();
        let mut mixer = Mixer::new(self.output_stage, R::TRAITS.outputs);

        let rhythm = R::TRAITS.has_rhythm && self.regs.rhythm_enable();
        let phase_select = if rhythm { self.rhythm_phase_select() } else { 0 };
        let dac = if self.output_stage.is_multiplexed_dac() { self.regs.dac() } else { None };

        let operators = &self.operators;
        for (chnum, channel) in self.channels.iter_mut().enumerate() {
            let regs = &self.regs;
            let value = match chnum {
                6 if rhythm => channel.output_rhythm_bass_drum(regs, operators, rshift),
                7 if rhythm => {
                    channel.output_rhythm_hh_sd(regs, operators, phase_select, rshift, clipmax)
                }
                8 if rhythm => {
                    channel.output_rhythm_tom_tc(regs, operators, phase_select, rshift, clipmax)
                }
                _ if channel.is_4op() => channel.output_4op(regs, operators, rshift, clipmax),
                _ => channel.output_2op(regs, operators, rshift, clipmax),
            };

            // OPN2 DAC replaces channel 6
            let value = match dac {
                Some(sample) if chnum == 5 => mixer::dac_sample_to_signed(sample),
                _ => value,
            };

            self.last_channel_output = value as i16;
            mixer.add_channel(value, regs.ch_outputs(channel.choffs()));
        }

        mixer.finish()
    }

    fn rhythm_phase_select(&self) -> u32 {
        let phase = |chnum: usize, index: usize| {
            self.channels[chnum].operators()[index]
                .map_or(0, |opnum| self.operators[usize::from(opnum)].phase())
        };
        channel::rhythm_phase_select(phase(7, 0), phase(8, 1))
    }
}
