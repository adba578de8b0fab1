//! Minimal unsigned big-number arithmetic for DH.
//!
//! Just enough for modular exponentiation over caller-supplied moduli:
//! big-endian byte conversion, comparison, and a square-and-multiply
//! `mod_pow` built on shift-and-add modular multiplication. Values are
//! little-endian `u64` limbs with no trailing zero limbs.
//!
//! This is not a general bignum library and is not constant-time; the
//! modulus and exponent sizes in play here are bounded by the keys the
//! provider accepts.

use std::cmp::Ordering;

use zeroize::Zeroize;

/// An unsigned big integer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Bn {
    /// Little-endian limbs, normalized (no trailing zeros).
    limbs: Vec<u64>,
}

impl Zeroize for Bn {
    fn zeroize(&mut self) {
        self.limbs.zeroize();
    }
}

impl Bn {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn one() -> Self {
        Self { limbs: vec![1] }
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bn = Self {
            limbs: vec![value],
        };
        bn.normalize();
        bn
    }

    /// Parses big-endian unsigned bytes; leading zeros are ignored.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut limbs = Vec::with_capacity(bytes.len() / 8 + 1);
        for chunk in bytes.rchunks(8) {
            let mut limb = 0u64;
            for byte in chunk {
                limb = (limb << 8) | u64::from(*byte);
            }
            limbs.push(limb);
        }
        let mut bn = Self { limbs };
        bn.normalize();
        bn
    }

    /// Minimal big-endian encoding; empty for zero.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.limbs.len() * 8);
        for limb in self.limbs.iter().rev() {
            out.extend_from_slice(&limb.to_be_bytes());
        }
        let skip = out.iter().take_while(|b| **b == 0).count();
        out.drain(..skip);
        out
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    /// Number of significant bits.
    pub fn bit_len(&self) -> usize {
        match self.limbs.last() {
            Some(top) => self.limbs.len() * 64 - top.leading_zeros() as usize,
            None => 0,
        }
    }

    /// Number of significant bytes (the natural encoding length).
    pub fn byte_len(&self) -> usize {
        (self.bit_len() + 7) / 8
    }

    fn bit(&self, index: usize) -> bool {
        let limb = index / 64;
        self.limbs
            .get(limb)
            .is_some_and(|l| l >> (index % 64) & 1 == 1)
    }

    fn normalize(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }

    fn add_assign(&mut self, other: &Self) {
        if self.limbs.len() < other.limbs.len() {
            self.limbs.resize(other.limbs.len(), 0);
        }
        let mut carry = 0u64;
        for (i, limb) in self.limbs.iter_mut().enumerate() {
            let rhs = other.limbs.get(i).copied().unwrap_or(0);
            let (sum, c1) = limb.overflowing_add(rhs);
            let (sum, c2) = sum.overflowing_add(carry);
            *limb = sum;
            carry = u64::from(c1) + u64::from(c2);
        }
        if carry != 0 {
            self.limbs.push(carry);
        }
    }

    /// Requires `self >= other`.
    fn sub_assign(&mut self, other: &Self) {
        debug_assert!(*self >= *other);
        let mut borrow = 0u64;
        for (i, limb) in self.limbs.iter_mut().enumerate() {
            let rhs = other.limbs.get(i).copied().unwrap_or(0);
            let (diff, b1) = limb.overflowing_sub(rhs);
            let (diff, b2) = diff.overflowing_sub(borrow);
            *limb = diff;
            borrow = u64::from(b1) + u64::from(b2);
        }
        debug_assert_eq!(borrow, 0);
        self.normalize();
    }

    /// Doubles in place.
    fn shl1(&mut self) {
        let mut carry = 0u64;
        for limb in &mut self.limbs {
            let next_carry = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = next_carry;
        }
        if carry != 0 {
            self.limbs.push(carry);
        }
    }

    /// Left shift by whole bit counts, producing a new value.
    fn shl(&self, bits: usize) -> Self {
        if self.is_zero() {
            return Self::zero();
        }
        let limb_shift = bits / 64;
        let bit_shift = bits % 64;
        let mut limbs = vec![0u64; limb_shift];
        if bit_shift == 0 {
            limbs.extend_from_slice(&self.limbs);
        } else {
            let mut carry = 0u64;
            for limb in &self.limbs {
                limbs.push((limb << bit_shift) | carry);
                carry = limb >> (64 - bit_shift);
            }
            if carry != 0 {
                limbs.push(carry);
            }
        }
        let mut bn = Self { limbs };
        bn.normalize();
        bn
    }

    /// Reduces `self` below `modulus` by shift-and-subtract.
    fn reduce(&mut self, modulus: &Self) {
        debug_assert!(!modulus.is_zero());
        while *self >= *modulus {
            let shift = self.bit_len() - modulus.bit_len();
            let mut shifted = modulus.shl(shift);
            if shifted > *self {
                shifted = modulus.shl(shift - 1);
            }
            self.sub_assign(&shifted);
        }
    }

    /// `self * other mod modulus`; both inputs must already be reduced.
    fn mod_mul(&self, other: &Self, modulus: &Self) -> Self {
        let mut result = Self::zero();
        for index in (0..other.bit_len()).rev() {
            result.shl1();
            if result >= *modulus {
                result.sub_assign(modulus);
            }
            if other.bit(index) {
                result.add_assign(self);
                if result >= *modulus {
                    result.sub_assign(modulus);
                }
            }
        }
        result
    }

    /// `self ^ exponent mod modulus`. A modulus of one yields zero.
    pub fn mod_pow(&self, exponent: &Self, modulus: &Self) -> Self {
        debug_assert!(!modulus.is_zero());
        if modulus.bit_len() == 1 {
            return Self::zero();
        }
        let mut base = self.clone();
        base.reduce(modulus);
        let mut result = Self::one();
        for index in (0..exponent.bit_len()).rev() {
            result = result.mod_mul(&result, modulus);
            if exponent.bit(index) {
                result = result.mod_mul(&base, modulus);
            }
        }
        result
    }
}

impl PartialOrd for Bn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bn {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.limbs.len().cmp(&other.limbs.len()) {
            Ordering::Equal => self
                .limbs
                .iter()
                .rev()
                .cmp(other.limbs.iter().rev()),
            order => order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip_strips_leading_zeros() {
        let bn = Bn::from_be_bytes(&[0x00, 0x00, 0x12, 0x34]);
        assert_eq!(bn.to_be_bytes(), vec![0x12, 0x34]);
        assert_eq!(bn.byte_len(), 2);
        assert_eq!(bn.bit_len(), 13);

        assert!(Bn::from_be_bytes(&[]).is_zero());
        assert!(Bn::from_be_bytes(&[0, 0]).is_zero());
        assert_eq!(Bn::zero().to_be_bytes(), Vec::<u8>::new());
    }

    #[test]
    fn multi_limb_round_trip() {
        let bytes: Vec<u8> = (1..=20).collect();
        let bn = Bn::from_be_bytes(&bytes);
        assert_eq!(bn.to_be_bytes(), bytes);
        assert_eq!(bn.byte_len(), 20);
    }

    #[test]
    fn ordering_follows_magnitude() {
        let small = Bn::from_u64(7);
        let large = Bn::from_be_bytes(&[1, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(small < large);
        assert!(large > small);
        assert_eq!(small.cmp(&Bn::from_u64(7)), Ordering::Equal);
    }

    #[test]
    fn mod_pow_known_values() {
        let cases: &[(u64, u64, u64, u64)] = &[
            // (base, exponent, modulus, expected)
            (4, 13, 497, 445),
            (5, 6, 23, 8),
            (2, 10, 1000, 24),
            (3, 0, 7, 1),
            (0, 5, 13, 0),
            (10, 1, 7, 3),
            // Base larger than the modulus reduces first.
            (30, 2, 7, 4),
        ];
        for &(base, exp, modulus, expected) in cases {
            let got = Bn::from_u64(base).mod_pow(&Bn::from_u64(exp), &Bn::from_u64(modulus));
            assert_eq!(got, Bn::from_u64(expected), "{base}^{exp} mod {modulus}");
        }
    }

    #[test]
    fn mod_pow_with_modulus_one_is_zero() {
        let got = Bn::from_u64(12).mod_pow(&Bn::from_u64(34), &Bn::from_u64(1));
        assert!(got.is_zero());
    }

    #[test]
    fn mod_pow_matches_u128_reference() {
        fn reference(base: u64, mut exp: u64, modulus: u64) -> u64 {
            let modulus = u128::from(modulus);
            let mut base = u128::from(base) % modulus;
            let mut result = 1u128;
            while exp > 0 {
                if exp & 1 == 1 {
                    result = result * base % modulus;
                }
                base = base * base % modulus;
                exp >>= 1;
            }
            result as u64
        }

        // A deterministic spread of awkward values, including limb edges.
        let values = [
            1u64,
            2,
            3,
            255,
            256,
            65_521,
            0xFFFF_FFFF,
            0x1_0000_0001,
            0xFFFF_FFFF_FFFF_FFC5,
        ];
        for &base in &values {
            for &exp in &values {
                for &modulus in &values[1..] {
                    let got =
                        Bn::from_u64(base).mod_pow(&Bn::from_u64(exp), &Bn::from_u64(modulus));
                    let expected = reference(base, exp, modulus);
                    assert_eq!(
                        got,
                        Bn::from_u64(expected),
                        "{base}^{exp} mod {modulus}"
                    );
                }
            }
        }
    }

    #[test]
    fn mod_pow_across_limb_boundaries() {
        // 2^130 mod (2^64 + 1): 2^128 = (2^64)^2 = (-1)^2 = 1, so
        // 2^130 = 4 (mod 2^64 + 1).
        let base = Bn::from_u64(2);
        let exp = Bn::from_u64(130);
        let modulus = Bn::from_be_bytes(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0x01]);
        assert_eq!(base.mod_pow(&exp, &modulus), Bn::from_u64(4));
    }
}
