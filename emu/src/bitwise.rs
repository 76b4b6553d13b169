use std::fmt::Debug;
use std::mem::size_of;
use std::ops::RangeInclusive;

/// Contains some helper methods to manipulate bits,
/// the index (`bit_idx`) is supposed to be from lsb to msb (right to left)
pub trait Bits
where
    Self: Clone + Sized + Into<u128> + TryFrom<u128>,
    <Self as TryFrom<u128>>::Error: Debug,
{
    fn is_bit_on(&self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < (size_of::<Self>() * 8) as u8);
        let bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask: u128 = 0b1 << bit_idx;
        (bitwise & mask) != 0
    }

    fn is_bit_off(&self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < (size_of::<Self>() * 8) as u8);
        let bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask = 0b1 << bit_idx;
        (bitwise & mask) == 0
    }

    fn set_bit_on(&mut self, bit_idx: u8) {
        debug_assert!(bit_idx < (size_of::<Self>() * 8) as u8);
        let mut bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask = 0b1 << bit_idx;
        bitwise |= mask;
        *self = <Self as TryFrom<u128>>::try_from(bitwise).unwrap();
    }

    fn set_bit_off(&mut self, bit_idx: u8) {
        let mut bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask = !(0b1 << bit_idx);
        bitwise &= mask;
        *self = <Self as TryFrom<u128>>::try_from(bitwise).unwrap();
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        match value {
            false => self.set_bit_off(bit_idx),
            true => self.set_bit_on(bit_idx),
        }
    }

    fn get_bit(&self, bit_idx: u8) -> bool {
        self.is_bit_on(bit_idx)
    }

    fn get_bits(&self, bits_range: RangeInclusive<u8>) -> Self {
        let start = bits_range.start();
        let length = bits_range.len() as u32;

        // Gets a value with `length` number of ones.
        // If bits_range is 1..=10 then length is 10 and we want
        // 10 ones.
        let mut mask = (2_u128.pow(length)) - 1;

        // Moves the mask to the correct place.
        // If `bits_range` is 1..=10 then we should move the mask
        // 1 bit to the left in order to get from the first bit on.
        mask <<= start;

        let value: u128 = <Self as Into<u128>>::into(self.clone());

        // We apply the mask and then move the value back to the 0 position.
        <Self as TryFrom<u128>>::try_from((value & mask) >> start).unwrap()
    }

    /// Returns a sign-extended copy of the value.
    /// `number_of_bits` is the width of the value we want to sign-extend.
    fn sign_extended(&self, number_of_bits: u8) -> Self {
        let value: u128 = <Self as Into<u128>>::into(self.clone());

        // A mask with a 1 in the "sign bit" position of the narrow value.
        // `value ^ mask` removes the sign information and the subtraction
        // re-adds it as borrows, which fills the upper bits with ones for
        // negative values and leaves positive values unchanged.
        let mask = 1 << (number_of_bits - 1);
        let value = ((value as i128 ^ mask) - mask) as u128;

        // Drop the excess leading ones so the `try_from` below cannot fail
        // for types narrower than 128 bits.
        let size_bits = (size_of::<Self>() * 8) as u128;
        let mask = (1 << size_bits) - 1;
        let value = value & mask;

        <Self as TryFrom<u128>>::try_from(value).unwrap()
    }
}

impl Bits for u64 {}
impl Bits for u32 {}
impl Bits for u16 {}
impl Bits for u8 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_on() {
        let b = 0b110011101_u32;
        assert!(b.is_bit_on(0));
        assert!(!b.is_bit_on(1));
        assert!(b.is_bit_on(2));
        assert!(b.is_bit_on(3));
        assert!(b.is_bit_on(8));
        assert!(!b.is_bit_on(31));
    }

    #[test]
    fn test_is_off() {
        let b = 0b110011101_u32;
        assert!(!b.is_bit_off(0));
        assert!(b.is_bit_off(1));
        assert!(!b.is_bit_off(2));
        assert!(!b.is_bit_off(3));
        assert!(!b.is_bit_off(8));
        assert!(b.is_bit_off(31));
    }

    #[test]
    fn test_set_on() {
        let mut b = 0b110011101_u32;
        b.set_bit_on(1);
        b.set_bit_on(0);
        b.set_bit_on(11);
        assert_eq!(b, 0b100110011111);
    }

    #[test]
    fn test_set_off() {
        let mut b = 0b1101001101_u32;
        b.set_bit_off(0);
        b.set_bit_off(4);
        b.set_bit_off(5);
        b.set_bit_off(6);
        b.set_bit_off(20);
        assert_eq!(b, 0b1100001100);
    }

    #[test]
    fn set_bit() {
        let mut b = 0b1100110_u32;
        b.set_bit(0, true);
        b.set_bit(1, true);
        b.set_bit(2, false);
        b.set_bit(3, false);
        assert_eq!(b, 0b1100011)
    }

    #[test]
    fn get_bit() {
        let b = 0b1011001110_u32;
        assert!(b.get_bit(1));
        assert!(!b.get_bit(0));
        assert!(b.get_bit(2));
        assert!(!b.get_bit(31));
    }

    #[test]
    #[should_panic]
    fn invalid_index() {
        let b = 0u32;
        b.is_bit_on(32);
    }

    #[test]
    fn get_bits() {
        let b = 0b1011001110_u32;
        assert_eq!(b.get_bits(0..=3), 0b1110);
        assert_eq!(b.get_bits(1..=1), 0b1);
        assert_eq!(b.get_bits(4..=7), 0b1100);
        assert_eq!(b.get_bits(8..=9), 0b10);
        assert_eq!(b.get_bits(0..=9), 0b10_1100_1110);
        assert_eq!(b.get_bits(0..=31), 0b10_1100_1110);
        assert_eq!(b.get_bits(28..=31), 0b0);
    }

    #[test]
    fn bits_of_instruction_fields() {
        // cond, Rn, Rt and imm12 of 0xE5B32008 (pre-indexed load).
        let inst = 0xE5B3_2008_u32;
        assert_eq!(inst.get_bits(28..=31), 0xE);
        assert_eq!(inst.get_bits(16..=19), 0x3);
        assert_eq!(inst.get_bits(12..=15), 0x2);
        assert_eq!(inst.get_bits(0..=11), 0x8);
    }

    #[test]
    fn check_sign_extended() {
        let a: u32 = 0b1001; // -7 in i4

        assert_eq!(a.sign_extended(4) as i32, -7);

        let b: u32 = 0x8000; // i16 minimum
        assert_eq!(b.sign_extended(16), 0xFFFF_8000);

        let c: u32 = 0x7F;
        assert_eq!(c.sign_extended(8), 0x7F);
    }
}
