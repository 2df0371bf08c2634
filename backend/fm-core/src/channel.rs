//! Channels: operator connection algorithms, op1 self-feedback, and the OPL rhythm voices

use crate::envelope::KeyOnSource;
use crate::operator::FmOperator;
use crate::registers::{FamilyRegisters, OperatorList};
use bincode::{Decode, Encode};
use fm_common::num::GetBit;

// Packs, per algorithm: op2 input (bit 0), op3 input (bits 1-3), op4 input (bits 4-6), and
// whether op1/op2/op3 are summed into the output (bits 7-9). Inputs index the opout table below.
const fn algorithm(
    op2in: u16,
    op3in: u16,
    op4in: u16,
    op1out: u16,
    op2out: u16,
    op3out: u16,
) -> u16 {
    op2in | (op3in << 1) | (op4in << 4) | (op1out << 7) | (op2out << 8) | (op3out << 9)
}

const ALGORITHMS: [u16; 12] = [
    // O1 -> O2 -> O3 -> O4
    algorithm(1, 2, 3, 0, 0, 0),
    // (O1 + O2) -> O3 -> O4
    algorithm(0, 5, 3, 0, 0, 0),
    // (O1 + (O2 -> O3)) -> O4
    algorithm(0, 2, 6, 0, 0, 0),
    // ((O1 -> O2) + O3) -> O4
    algorithm(1, 0, 7, 0, 0, 0),
    // (O1 -> O2) + (O3 -> O4)
    algorithm(1, 0, 3, 0, 1, 0),
    // (O1 -> O2) + (O1 -> O3) + (O1 -> O4)
    algorithm(1, 1, 1, 0, 1, 1),
    // (O1 -> O2) + O3 + O4
    algorithm(1, 0, 0, 0, 1, 1),
    // O1 + O2 + O3 + O4
    algorithm(0, 0, 0, 1, 1, 1),
    // OPL3 4-op connections
    algorithm(1, 2, 3, 0, 0, 0),
    algorithm(0, 2, 3, 1, 0, 0),
    algorithm(1, 0, 3, 0, 1, 0),
    algorithm(0, 2, 0, 1, 0, 1),
];

#[inline]
fn clamp_output(value: i32, clipmax: i32) -> i32 {
    value.clamp(-clipmax - 1, clipmax)
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct FmChannel {
    choffs: u16,
    ops: OperatorList,
    // Current and previous op1 outputs
    feedback: [i32; 2],
    feedback_in: i32,
}

impl FmChannel {
    pub fn new(choffs: u16) -> Self {
        Self { choffs, ops: [None; 4], feedback: [0; 2], feedback_in: 0 }
    }

    pub fn reset(&mut self) {
        self.feedback = [0; 2];
        self.feedback_in = 0;
    }

    pub fn choffs(&self) -> u16 {
        self.choffs
    }

    pub fn operators(&self) -> OperatorList {
        self.ops
    }

    pub fn set_operators(&mut self, ops: OperatorList) {
        self.ops = ops;
    }

    pub fn is_4op(&self) -> bool {
        self.ops[2].is_some()
    }

    /// Apply one key bit per assigned operator, in algorithm order.
    pub fn keyonoff(&self, opmask: u8, source: KeyOnSource, operators: &mut [FmOperator]) {
        for (i, opnum) in self.ops.iter().enumerate() {
            if let Some(opnum) = opnum {
                operators[usize::from(*opnum)].keyonoff(opmask.bit(i as u8), source);
            }
        }
    }

    pub fn clock_feedback(&mut self) {
        self.feedback[0] = self.feedback[1];
        self.feedback[1] = self.feedback_in;
    }

    fn op<'a>(&self, operators: &'a [FmOperator], index: usize) -> Option<&'a FmOperator> {
        self.ops[index].map(|opnum| &operators[usize::from(opnum)])
    }

    // Op1 output with self-feedback, which also becomes the next feedback sample
    fn op1_with_feedback<R: FamilyRegisters>(
        &mut self,
        regs: &R,
        op1: &FmOperator,
        am_offset: u32,
    ) -> i32 {
        let feedback = regs.ch_feedback(self.choffs);
        let opmod = if feedback != 0 {
            (self.feedback[0] + self.feedback[1]) >> (10 - feedback)
        } else {
            0
        };

        let phase = op1.phase().wrapping_add_signed(opmod);
        self.feedback_in = op1.compute_volume(regs, phase, am_offset);
        self.feedback_in
    }

    fn any_output<R: FamilyRegisters>(&self, regs: &R) -> bool {
        regs.ch_outputs(self.choffs).iter().any(|&enabled| enabled)
    }

    /// 2-op channel: op1 -> op2 (connection 0) or op1 + op2 (connection 1).
    pub fn output_2op<R: FamilyRegisters>(
        &mut self,
        regs: &R,
        operators: &[FmOperator],
        rshift: u32,
        clipmax: i32,
    ) -> i32 {
        let (Some(op1), Some(op2)) = (self.op(operators, 0), self.op(operators, 1)) else {
            return 0;
        };

        let am_offset = regs.lfo_am_offset(self.choffs);
        let op1_value = self.op1_with_feedback(regs, op1, am_offset);
        if !self.any_output(regs) {
            return 0;
        }

        // Some OPL parts modulate with the previous sample's op1 output
        let modulator = if R::TRAITS.modulator_delay { self.feedback[1] } else { op1_value };

        if !regs.ch_algorithm(self.choffs).bit(0) {
            let phase = op2.phase().wrapping_add_signed(modulator >> 1);
            op2.compute_volume(regs, phase, am_offset) >> rshift
        } else {
            let carrier = op2.compute_volume(regs, op2.phase(), am_offset);
            clamp_output((modulator >> rshift) + (carrier >> rshift), clipmax)
        }
    }

    pub fn output_4op<R: FamilyRegisters>(
        &mut self,
        regs: &R,
        operators: &[FmOperator],
        rshift: u32,
        clipmax: i32,
    ) -> i32 {
        let ops = [0, 1, 2, 3].map(|i| self.op(operators, i));
        let [Some(op1), Some(op2), Some(op3), Some(op4)] = ops else {
            return 0;
        };

        let am_offset = regs.lfo_am_offset(self.choffs);
        let op1_value = self.op1_with_feedback(regs, op1, am_offset);
        if !self.any_output(regs) {
            return 0;
        }

        let algorithm = ALGORITHMS[regs.ch_algorithm(self.choffs) as usize % ALGORITHMS.len()];

        // Index 0 is silence, 1-3 single operators, 5-7 pairwise sums
        let mut opout = [0_i32; 8];
        opout[1] = op1_value;

        let opmod = opout[usize::from(algorithm.field(0, 1))] >> 1;
        opout[2] = op2.compute_volume(regs, op2.phase().wrapping_add_signed(opmod), am_offset);
        opout[5] = opout[1] + opout[2];

        let opmod = opout[usize::from(algorithm.field(1, 3))] >> 1;
        opout[3] = op3.compute_volume(regs, op3.phase().wrapping_add_signed(opmod), am_offset);
        opout[6] = opout[1] + opout[3];
        opout[7] = opout[2] + opout[3];

        // OPM channel 8 can replace op4 with noise
        let op4_value = if regs.noise_enable() && self.choffs == 7 {
            op4.compute_noise_volume(regs, am_offset)
        } else {
            let opmod = opout[usize::from(algorithm.field(4, 3))] >> 1;
            op4.compute_volume(regs, op4.phase().wrapping_add_signed(opmod), am_offset)
        };

        let mut result = op4_value >> rshift;
        for (bit, value) in [(7, opout[1]), (8, opout[2]), (9, opout[3])] {
            if algorithm.bit(bit) {
                result = clamp_output(result + (value >> rshift), clipmax);
            }
        }
        result
    }

    /// Bass drum: a 2-op FM voice where the additive connection drops op1.
    pub fn output_rhythm_bass_drum<R: FamilyRegisters>(
        &mut self,
        regs: &R,
        operators: &[FmOperator],
        rshift: u32,
    ) -> i32 {
        let (Some(op1), Some(op2)) = (self.op(operators, 0), self.op(operators, 1)) else {
            return 0;
        };

        let am_offset = regs.lfo_am_offset(self.choffs);
        let op1_value = self.op1_with_feedback(regs, op1, am_offset);

        let opmod = if regs.ch_algorithm(self.choffs).bit(0) { 0 } else { op1_value >> 1 };
        let phase = op2.phase().wrapping_add_signed(opmod);
        (op2.compute_volume(regs, phase, am_offset) >> rshift) * 2
    }

    /// High hat (op1) and snare drum (op2), with phases derived from noise and `phase_select`.
    pub fn output_rhythm_hh_sd<R: FamilyRegisters>(
        &self,
        regs: &R,
        operators: &[FmOperator],
        phase_select: u32,
        rshift: u32,
        clipmax: i32,
    ) -> i32 {
        let (Some(high_hat), Some(snare)) = (self.op(operators, 0), self.op(operators, 1)) else {
            return 0;
        };

        let am_offset = regs.lfo_am_offset(self.choffs);
        let noise = regs.noise_state() & 1;

        let phase = (phase_select << 9) | (0xD0 >> (2 * (noise ^ phase_select)));
        let mut result = high_hat.compute_volume(regs, phase, am_offset) >> rshift;

        let phase = (0x100 << u32::from(high_hat.phase().bit(8))) ^ (noise << 8);
        result += snare.compute_volume(regs, phase, am_offset) >> rshift;

        clamp_output(result, clipmax) * 2
    }

    /// Tom-tom (op1, plain sine) and top cymbal (op2, phase from `phase_select`).
    pub fn output_rhythm_tom_tc<R: FamilyRegisters>(
        &self,
        regs: &R,
        operators: &[FmOperator],
        phase_select: u32,
        rshift: u32,
        clipmax: i32,
    ) -> i32 {
        let (Some(tom), Some(cymbal)) = (self.op(operators, 0), self.op(operators, 1)) else {
            return 0;
        };

        let am_offset = regs.lfo_am_offset(self.choffs);
        let mut result = tom.compute_volume(regs, tom.phase(), am_offset) >> rshift;

        let phase = 0x100 | (phase_select << 9);
        result += cymbal.compute_volume(regs, phase, am_offset) >> rshift;

        clamp_output(result, clipmax) * 2
    }
}

/// Rhythm phase select from the high hat (channel 7 op1) and top cymbal (channel 8 op2) phases.
#[must_use]
pub fn rhythm_phase_select(high_hat_phase: u32, top_cymbal_phase: u32) -> u32 {
    let hh = |bit| u32::from(high_hat_phase.bit(bit));
    let tc = |bit| u32::from(top_cymbal_phase.bit(bit));
    (hh(2) ^ hh(7)) | hh(3) | (tc(5) ^ tc(3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn algorithm_packing() {
        // Algorithm 4: op2 from op1, op4 from op3, outputs op2 + op4
        let alg = ALGORITHMS[4];
        assert_eq!(alg.field(0, 1), 1);
        assert_eq!(alg.field(1, 3), 0);
        assert_eq!(alg.field(4, 3), 3);
        assert!(!alg.bit(7) && alg.bit(8) && !alg.bit(9));

        // Algorithm 7: no modulation, all carriers
        let alg = ALGORITHMS[7];
        assert_eq!(alg & 0x7F, 0);
        assert_eq!(alg >> 7, 0b111);

        // OPL3 connection 3: op1 + (op2 -> op3) + op4
        let alg = ALGORITHMS[11];
        assert_eq!(alg.field(1, 3), 2);
        assert_eq!(alg.field(4, 3), 0);
        assert!(alg.bit(7) && alg.bit(9));
    }

    #[test]
    fn phase_select_bits() {
        assert_eq!(rhythm_phase_select(0, 0), 0);
        assert_eq!(rhythm_phase_select(1 << 2, 0), 1);
        assert_eq!(rhythm_phase_select((1 << 2) | (1 << 7), 0), 0);
        assert_eq!(rhythm_phase_select(1 << 3, 0), 1);
        assert_eq!(rhythm_phase_select(0, 1 << 5), 1);
        assert_eq!(rhythm_phase_select(0, (1 << 5) | (1 << 3)), 0);
    }

    #[test]
    fn feedback_pipeline() {
        let mut channel = FmChannel::new(0);
        channel.feedback_in = 100;
        channel.clock_feedback();
        assert_eq!(channel.feedback, [0, 100]);

        channel.feedback_in = -50;
        channel.clock_feedback();
        assert_eq!(channel.feedback, [100, -50]);

        channel.reset();
        assert_eq!(channel.feedback, [0, 0]);
    }

    #[test]
    fn empty_channel_is_silent() {
        use crate::registers::OplRegisters;
        use fm_config::ChipConfig;

        let regs = OplRegisters::<3>::new(&ChipConfig::default());
        let mut channel = FmChannel::new(3);
        assert!(!channel.is_4op());
        assert_eq!(channel.output_2op(&regs, &[], 0, 32767), 0);
        assert_eq!(channel.output_4op(&regs, &[], 0, 32767), 0);
    }
}
