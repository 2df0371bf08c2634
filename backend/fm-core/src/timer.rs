//! Timers A and B, the status register, and the busy countdown

use crate::family::StatusBits;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTickEffect {
    None,
    Overflowed,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct TimerA {
    enabled: bool,
    enabled_next: bool,
    interval: u16,
    counter: u16,
}

impl TimerA {
    // Timer A counter is 10-bit in actual hardware
    const OVERFLOW: u16 = 1024;

    pub fn new() -> Self {
        Self { enabled: false, enabled_next: false, interval: 0, counter: 0 }
    }

    pub fn tick(&mut self) -> TimerTickEffect {
        if !self.enabled {
            if self.enabled_next {
                self.enabled = true;
                self.counter = self.interval;
            }
            return TimerTickEffect::None;
        }

        self.enabled = self.enabled_next;

        self.counter += 1;
        if self.counter >= Self::OVERFLOW {
            self.counter = self.interval;
            TimerTickEffect::Overflowed
        } else {
            TimerTickEffect::None
        }
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> u16 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: u16) {
        self.interval = interval & (Self::OVERFLOW - 1);
    }

    /// Loading an already-loaded timer keeps its current count.
    pub fn set_load(&mut self, load: bool) {
        self.enabled_next = load;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct TimerB {
    enabled: bool,
    enabled_next: bool,
    interval: u8,
    counter: u8,
    divider: u8,
}

impl TimerB {
    // Timer B counter increments once per 16 samples
    const DIVIDER: u8 = 16;

    pub fn new() -> Self {
        Self {
            enabled: false,
            enabled_next: false,
            interval: 0,
            counter: 0,
            divider: Self::DIVIDER,
        }
    }

    pub fn tick(&mut self) -> TimerTickEffect {
        let mut effect = TimerTickEffect::None;

        self.divider -= 1;
        if self.divider == 0 {
            self.divider = Self::DIVIDER;

            if self.enabled {
                let overflowed;
                (self.counter, overflowed) = self.counter.overflowing_add(1);
                if overflowed {
                    self.counter = self.interval;
                    effect = TimerTickEffect::Overflowed;
                }
            }
        }

        if !self.enabled && self.enabled_next {
            self.counter = self.interval;
        }
        self.enabled = self.enabled_next;

        effect
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: u8) {
        self.interval = interval;
    }

    pub fn set_load(&mut self, load: bool) {
        self.enabled_next = load;
    }
}

/// Status flags shared between the engine and external collaborators, plus the IRQ line.
#[derive(Debug, Clone, Encode, Decode)]
pub struct StatusRegister {
    value: u8,
    irq_mask: u8,
    irq: bool,
    busy_bit: u8,
    irq_bit: u8,
}

impl StatusRegister {
    pub fn new(bits: StatusBits) -> Self {
        Self {
            value: 0,
            irq_mask: bits.timer_a | bits.timer_b,
            irq: false,
            busy_bit: bits.busy,
            irq_bit: bits.irq,
        }
    }

    /// Status bits visible to the host, excluding busy and any bits the chip masks.
    pub fn value(&self, status_mask: u8) -> u8 {
        self.value & !self.busy_bit & !status_mask
    }

    pub fn irq(&self) -> bool {
        self.irq
    }

    pub fn irq_mask(&self) -> u8 {
        self.irq_mask
    }

    pub fn set_irq_mask(&mut self, mask: u8, status_mask: u8) {
        self.irq_mask = mask;
        self.update_irq(status_mask);
    }

    /// Set and clear status bits, then recompute the IRQ line. Reset wins over set.
    pub fn set_reset(&mut self, set: u8, reset: u8, status_mask: u8) {
        self.value = (self.value | set) & !(reset | self.busy_bit);
        self.update_irq(status_mask);
    }

    fn update_irq(&mut self, status_mask: u8) {
        let old_irq = self.irq;
        self.irq = self.value & self.irq_mask & !status_mask != 0;

        if self.irq_bit != 0 {
            if self.irq {
                self.value |= self.irq_bit;
            } else {
                self.value &= !self.irq_bit;
            }
        }

        if self.irq != old_irq {
            log::trace!("IRQ line {}", if self.irq { "asserted" } else { "cleared" });
        }
    }
}

/// Counts down the samples remaining until the busy flag clears.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct BusyCounter {
    remaining: u8,
}

impl BusyCounter {
    pub fn start(&mut self, ticks: u8) {
        self.remaining = ticks;
    }

    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn is_busy(&self) -> bool {
        self.remaining != 0
    }

    pub fn clear(&mut self) {
        self.remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family;
    use test_log::test;

    #[test]
    fn timer_a_period() {
        let mut timer = TimerA::new();
        timer.set_interval(1000);
        timer.set_load(true);

        // First tick arms the counter at the interval
        assert_eq!(timer.tick(), TimerTickEffect::None);
        assert!(timer.is_running());

        for _ in 0..23 {
            assert_eq!(timer.tick(), TimerTickEffect::None);
        }
        assert_eq!(timer.tick(), TimerTickEffect::Overflowed);

        // Reloads and repeats with the same period
        for _ in 0..23 {
            assert_eq!(timer.tick(), TimerTickEffect::None);
        }
        assert_eq!(timer.tick(), TimerTickEffect::Overflowed);

        timer.set_load(false);
        timer.tick();
        assert!(!timer.is_running());
        for _ in 0..2000 {
            assert_eq!(timer.tick(), TimerTickEffect::None);
        }
    }

    #[test]
    fn timer_b_period() {
        let mut timer = TimerB::new();
        timer.set_interval(0xFE);
        timer.set_load(true);

        let overflows: Vec<_> = (0..16 * 8)
            .map(|tick| (tick, timer.tick()))
            .filter(|&(_, effect)| effect == TimerTickEffect::Overflowed)
            .map(|(tick, _)| tick)
            .collect();
        assert_eq!(overflows.len(), 4);
        assert!(overflows.windows(2).all(|pair| pair[1] - pair[0] == 32));
    }

    #[test]
    fn status_and_mask() {
        let mut status = StatusRegister::new(family::OPM.status);
        status.set_reset(0x01, 0, 0);
        assert_eq!(status.value(0), 0x01);
        assert!(status.irq());

        // Busy is never stored
        status.set_reset(0x80, 0, 0);
        assert_eq!(status.value(0), 0x01);

        status.set_irq_mask(0x02, 0);
        assert!(!status.irq());

        // External collaborators can own bits the timers never touch
        status.set_irq_mask(0x0C, 0);
        status.set_reset(0x08, 0, 0);
        assert!(status.irq());
        status.set_reset(0, 0xFF, 0);
        assert_eq!(status.value(0), 0);
        assert!(!status.irq());
    }

    #[test]
    fn opl_irq_bit() {
        let mut status = StatusRegister::new(family::OPL.status);
        status.set_reset(0x40, 0, 0);
        assert_eq!(status.value(0), 0xC0);

        // Masked flags neither read back nor raise the IRQ
        status.set_reset(0, 0, 0x40);
        assert_eq!(status.value(0x40), 0x00);
        assert!(!status.irq());

        status.set_reset(0, 0x78, 0);
        assert_eq!(status.value(0), 0);
    }

    #[test]
    fn busy_countdown() {
        let mut busy = BusyCounter::default();
        busy.start(2);
        assert!(busy.is_busy());
        busy.tick();
        assert!(busy.is_busy());
        busy.tick();
        assert!(!busy.is_busy());
        busy.tick();
        assert!(!busy.is_busy());
    }
}
