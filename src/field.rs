// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! Fixed-width field arithmetic for 256-bit short Weierstrass curves.
//!
//! A [`Fe`] is a 256-bit integer held as four 64-bit limbs, little-endian
//! limb order.  All modular arithmetic runs in the Montgomery domain and is
//! parameterized by a [`Modulus`] table, so that a single implementation
//! serves both the curve prime and the group order.  Every operation whose
//! operands may be secret is constant time: carries and borrows propagate
//! unconditionally and selection is done with `subtle`.

use core::fmt::Debug;

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

/// Number of 64-bit limbs in a field element.
pub(crate) const LIMBS: usize = 4;

/// A 256-bit integer, four little-endian 64-bit limbs.  Depending on
/// context the value is either canonical (below its modulus) or in the
/// Montgomery domain of one of the two moduli of the active curve.
#[derive(Copy, Clone, Default)]
pub struct Fe(pub(crate) [u64; LIMBS]);

impl Debug for Fe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Fe({:016x}{:016x}{:016x}{:016x})", self.0[3], self.0[2], self.0[1], self.0[0])
    }
}

impl ConditionallySelectable for Fe {
    fn conditional_select(a: &Fe, b: &Fe, choice: Choice) -> Fe {
        let mut out = [0u64; LIMBS];
        for i in 0..LIMBS {
            out[i] = u64::conditional_select(&a.0[i], &b.0[i], choice);
        }
        Fe(out)
    }
}

impl ConstantTimeEq for Fe {
    fn ct_eq(&self, other: &Fe) -> Choice {
        self.0[0].ct_eq(&other.0[0])
            & self.0[1].ct_eq(&other.0[1])
            & self.0[2].ct_eq(&other.0[2])
            & self.0[3].ct_eq(&other.0[3])
    }
}

#[cfg(feature = "zeroize")]
impl Zeroize for Fe {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Fe {
    /// The integer zero.
    pub const ZERO: Fe = Fe([0, 0, 0, 0]);
    /// The integer one (canonical domain).
    pub const ONE: Fe = Fe([1, 0, 0, 0]);

    /// Parse a big-endian 32-byte value.  No range check is performed
    /// here; callers validate against the relevant modulus.
    pub fn from_bytes_be(bytes: &[u8; 32]) -> Fe {
        let mut limbs = [0u64; LIMBS];
        for i in 0..LIMBS {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[8 * (LIMBS - 1 - i)..8 * (LIMBS - i)]);
            limbs[i] = u64::from_be_bytes(w);
        }
        Fe(limbs)
    }

    /// Serialize as big-endian bytes.
    pub fn to_bytes_be(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for i in 0..LIMBS {
            bytes[8 * (LIMBS - 1 - i)..8 * (LIMBS - i)].copy_from_slice(&self.0[i].to_be_bytes());
        }
        bytes
    }

    /// Returns 1 if `self` is zero.
    pub fn is_zero(&self) -> Choice {
        self.ct_eq(&Fe::ZERO)
    }

    /// Bit `i` of the canonical value, as a `Choice`.  The bit index is
    /// public; only the value being indexed may be secret.
    pub fn bit(&self, i: usize) -> Choice {
        Choice::from(((self.0[i / 64] >> (i % 64)) & 1) as u8)
    }

    /// Constant-time `self < other` on canonical values.
    pub fn ct_lt(&self, other: &Fe) -> Choice {
        let (_, borrow) = sbb_all(&self.0, &other.0);
        Choice::from(borrow as u8)
    }

    /// Swap `a` and `b` iff `choice` is set, in constant time.
    pub fn conditional_swap(a: &mut Fe, b: &mut Fe, choice: Choice) {
        for i in 0..LIMBS {
            u64::conditional_swap(&mut a.0[i], &mut b.0[i], choice);
        }
    }
}

/// `a + b` over all limbs, returning the carry-out.
#[inline]
fn adc_all(a: &[u64; LIMBS], b: &[u64; LIMBS]) -> ([u64; LIMBS], u64) {
    let mut out = [0u64; LIMBS];
    let mut carry = 0u64;
    for i in 0..LIMBS {
        let v = (a[i] as u128) + (b[i] as u128) + (carry as u128);
        out[i] = v as u64;
        carry = (v >> 64) as u64;
    }
    (out, carry)
}

/// `a - b` over all limbs, returning the borrow-out (0 or 1).
#[inline]
fn sbb_all(a: &[u64; LIMBS], b: &[u64; LIMBS]) -> ([u64; LIMBS], u64) {
    let mut out = [0u64; LIMBS];
    let mut borrow = 0u64;
    for i in 0..LIMBS {
        let v = (a[i] as u128)
            .wrapping_sub(b[i] as u128)
            .wrapping_sub(borrow as u128);
        out[i] = v as u64;
        borrow = ((v >> 64) as u64) & 1;
    }
    (out, borrow)
}

/// A modulus together with its Montgomery constants.
///
/// `mp` is `-m⁻¹ mod 2⁶⁴` and `r2` is `2⁵¹² mod m`; both are fixed,
/// public per-curve constants (see `curve.rs`).
#[derive(Debug)]
pub struct Modulus {
    pub(crate) m: Fe,
    pub(crate) mp: u64,
    pub(crate) r2: Fe,
}

impl Modulus {
    /// Modular addition of canonical or Montgomery-domain values.
    pub fn add(&self, a: &Fe, b: &Fe) -> Fe {
        let (sum, carry) = adc_all(&a.0, &b.0);
        let (diff, borrow) = sbb_all(&sum, &self.m.0);
        // Keep the reduced value if the raw sum overflowed 2^256 or is >= m.
        let take_diff = Choice::from(carry as u8) | !Choice::from(borrow as u8);
        Fe::conditional_select(&Fe(sum), &Fe(diff), take_diff)
    }

    /// Modular subtraction.
    pub fn sub(&self, a: &Fe, b: &Fe) -> Fe {
        let (diff, borrow) = sbb_all(&a.0, &b.0);
        let (wrapped, _) = adc_all(&diff, &self.m.0);
        Fe::conditional_select(&Fe(diff), &Fe(wrapped), Choice::from(borrow as u8))
    }

    /// Montgomery multiplication: `a * b * 2⁻²⁵⁶ mod m` (CIOS).
    pub fn mul(&self, a: &Fe, b: &Fe) -> Fe {
        let mut t = [0u64; LIMBS + 2];
        for i in 0..LIMBS {
            // t += a[i] * b
            let mut carry = 0u64;
            for j in 0..LIMBS {
                let v = (t[j] as u128) + (a.0[i] as u128) * (b.0[j] as u128) + (carry as u128);
                t[j] = v as u64;
                carry = (v >> 64) as u64;
            }
            let v = (t[LIMBS] as u128) + (carry as u128);
            t[LIMBS] = v as u64;
            t[LIMBS + 1] = t[LIMBS + 1].wrapping_add((v >> 64) as u64);

            // t = (t + u*m) / 2^64, with u chosen so the low limb cancels
            let u = t[0].wrapping_mul(self.mp);
            let v = (t[0] as u128) + (u as u128) * (self.m.0[0] as u128);
            let mut carry = (v >> 64) as u64;
            for j in 1..LIMBS {
                let v = (t[j] as u128) + (u as u128) * (self.m.0[j] as u128) + (carry as u128);
                t[j - 1] = v as u64;
                carry = (v >> 64) as u64;
            }
            let v = (t[LIMBS] as u128) + (carry as u128);
            t[LIMBS - 1] = v as u64;
            t[LIMBS] = t[LIMBS + 1].wrapping_add((v >> 64) as u64);
            t[LIMBS + 1] = 0;
        }
        let limbs = [t[0], t[1], t[2], t[3]];
        let (diff, borrow) = sbb_all(&limbs, &self.m.0);
        let take_diff = !t[LIMBS].ct_eq(&0) | !Choice::from(borrow as u8);
        Fe::conditional_select(&Fe(limbs), &Fe(diff), take_diff)
    }

    /// Montgomery squaring.
    pub fn sqr(&self, a: &Fe) -> Fe {
        self.mul(a, a)
    }

    /// Convert a canonical value into the Montgomery domain.
    pub fn to_mont(&self, a: &Fe) -> Fe {
        self.mul(a, &self.r2)
    }

    /// Convert a Montgomery-domain value back to canonical form.
    pub fn from_mont(&self, a: &Fe) -> Fe {
        self.mul(a, &Fe::ONE)
    }

    /// The multiplicative identity in the Montgomery domain.
    pub fn one(&self) -> Fe {
        self.from_mont(&self.r2)
    }

    /// Conditionally subtract `m` once, reducing a value known to be
    /// below `2m` into canonical range.
    pub fn reduce_once(&self, a: &Fe) -> Fe {
        let (diff, borrow) = sbb_all(&a.0, &self.m.0);
        Fe::conditional_select(&Fe(diff), a, Choice::from(borrow as u8))
    }

    /// Limbs of the public exponent `m - 2` used by Fermat inversion.
    pub fn sub2(&self) -> Fe {
        let (out, _) = sbb_all(&self.m.0, &[2, 0, 0, 0]);
        Fe(out)
    }

    /// Whether `a` is a valid nonzero canonical residue: `1 <= a < m`.
    pub fn is_valid_scalar(&self, a: &Fe) -> Choice {
        !a.is_zero() & a.ct_lt(&self.m)
    }
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::P256;

    fn fe(n: u64) -> Fe {
        Fe([n, 0, 0, 0])
    }

    #[test]
    fn bytes_round_trip() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let x = Fe::from_bytes_be(&bytes);
        assert_eq!(x.to_bytes_be(), bytes);
    }

    #[test]
    fn mont_round_trip() {
        let m = &P256.field;
        let x = Fe::from_bytes_be(&[0xab; 32]);
        let xm = m.to_mont(&x);
        // 0xabab.. exceeds p once; round trip lands on the reduced value.
        assert_eq!(m.from_mont(&xm).to_bytes_be(), m.reduce_once(&x).to_bytes_be());
    }

    #[test]
    fn small_products() {
        let m = &P256.field;
        let three = m.to_mont(&fe(3));
        let nine = m.from_mont(&m.sqr(&three));
        assert_eq!(nine.0, [9, 0, 0, 0]);

        let seven = m.to_mont(&fe(7));
        let twenty_one = m.from_mont(&m.mul(&three, &seven));
        assert_eq!(twenty_one.0, [21, 0, 0, 0]);
    }

    #[test]
    fn add_sub_wrap() {
        let m = &P256.field;
        let a = m.sub(&Fe::ZERO, &Fe::ONE); // p - 1
        assert_eq!(m.add(&a, &Fe::ONE).0, [0, 0, 0, 0]);
        assert_eq!(m.sub(&Fe::ONE, &a).0, [2, 0, 0, 0]);
    }

    #[test]
    fn comparisons() {
        let m = &P256.order;
        assert!(bool::from(Fe::ONE.ct_lt(&m.m)));
        assert!(!bool::from(m.m.ct_lt(&m.m)));
        assert!(bool::from(m.is_valid_scalar(&fe(5))));
        assert!(!bool::from(m.is_valid_scalar(&Fe::ZERO)));
        assert!(!bool::from(m.is_valid_scalar(&m.m)));
    }

    #[test]
    fn conditional_swap_works() {
        let mut a = fe(1);
        let mut b = fe(2);
        Fe::conditional_swap(&mut a, &mut b, Choice::from(0));
        assert_eq!((a.0[0], b.0[0]), (1, 2));
        Fe::conditional_swap(&mut a, &mut b, Choice::from(1));
        assert_eq!((a.0[0], b.0[0]), (2, 1));
    }
}
