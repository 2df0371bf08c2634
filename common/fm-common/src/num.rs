//! Bit extraction helpers for register decoding

use std::ops::RangeInclusive;

pub trait GetBit: Copy {
    #[must_use]
    fn bit(self, i: u8) -> bool;

    /// Extract an inclusive bit range, shifted down to bit 0.
    #[must_use]
    fn bits(self, range: RangeInclusive<u8>) -> Self;

    /// Extract `count` bits starting at `start`, shifted down to bit 0.
    #[must_use]
    fn field(self, start: u8, count: u8) -> Self;
}

macro_rules! impl_get_bit {
    ($($t:ty),* $(,)?) => {
        $(
            impl GetBit for $t {
                #[inline]
                fn bit(self, i: u8) -> bool {
                    debug_assert!(u32::from(i) < <$t>::BITS);
                    (self >> i) & 1 != 0
                }

                #[inline]
                fn bits(self, range: RangeInclusive<u8>) -> Self {
                    let (start, end) = range.into_inner();
                    debug_assert!(start <= end);
                    self.field(start, end - start + 1)
                }

                #[inline]
                fn field(self, start: u8, count: u8) -> Self {
                    debug_assert!(u32::from(start) + u32::from(count) <= <$t>::BITS);
                    if u32::from(count) == <$t>::BITS {
                        return self;
                    }
                    (self >> start) & ((1 << count) - 1)
                }
            }
        )*
    };
}

impl_get_bit!(u8, u16, u32, u64, usize, i16, i32);

pub trait SignBit: Copy {
    fn sign_bit(self) -> bool;
}

macro_rules! impl_sign_bit {
    ($($t:ty),* $(,)?) => {
        $(
            impl SignBit for $t {
                #[inline]
                fn sign_bit(self) -> bool {
                    self.bit((<$t>::BITS - 1) as u8)
                }
            }
        )*
    };
}

impl_sign_bit!(u8, u16, u32, i16, i32);

pub trait U16Ext {
    fn lsb(self) -> u8;

    fn msb(self) -> u8;
}

impl U16Ext for u16 {
    #[inline(always)]
    fn lsb(self) -> u8 {
        (self & 0xFF) as u8
    }

    #[inline(always)]
    fn msb(self) -> u8 {
        (self >> 8) as u8
    }
}
