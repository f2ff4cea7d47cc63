// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! Curve parameter tables for short Weierstrass curves `y² = x³ + ax + b`.
//!
//! A [`CurveParams`] table is immutable and `'static`: contexts borrow it
//! for the duration of one operation and never mutate it, so a single table
//! may be shared freely across contexts and threads.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

use crate::field::{Fe, Modulus};

/// Two field elements together: a point's affine coordinates, or an
/// `(X, Z)`-style working pair inside the ladder.
#[derive(Copy, Clone, Debug, Default)]
pub struct FePair {
    pub(crate) a: Fe,
    pub(crate) b: Fe,
}

impl FePair {
    pub(crate) fn new(a: Fe, b: Fe) -> FePair {
        FePair { a, b }
    }

    /// Swap `x` and `y` pairwise iff `choice` is set, in constant time.
    pub(crate) fn conditional_swap(x: &mut FePair, y: &mut FePair, choice: Choice) {
        Fe::conditional_swap(&mut x.a, &mut y.a, choice);
        Fe::conditional_swap(&mut x.b, &mut y.b, choice);
    }
}

impl ConditionallySelectable for FePair {
    fn conditional_select(x: &FePair, y: &FePair, choice: Choice) -> FePair {
        FePair {
            a: Fe::conditional_select(&x.a, &y.a, choice),
            b: Fe::conditional_select(&x.b, &y.b, choice),
        }
    }
}

#[cfg(feature = "zeroize")]
impl Zeroize for FePair {
    fn zeroize(&mut self) {
        self.a.zeroize();
        self.b.zeroize();
    }
}

/// An affine curve point in big-endian byte form, the crate's boundary
/// representation for externally supplied points and point results.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AffinePoint {
    /// Big-endian x coordinate.
    pub x: [u8; 32],
    /// Big-endian y coordinate.
    pub y: [u8; 32],
}

/// An ECDSA signature as raw big-endian components.  Byte-level wire
/// formats (DER and friends) are out of scope; callers encode these.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Signature {
    /// Big-endian `r` component.
    pub r: [u8; 32],
    /// Big-endian `s` component.
    pub s: [u8; 32],
}

/// Parameters of one short Weierstrass curve.
///
/// `field` is the arithmetic table for the curve prime, `order` the table
/// for the group order; `a`, `b` and the generator are canonical values
/// and get converted into the Montgomery domain at operation start.
#[derive(Debug)]
pub struct CurveParams {
    /// Arithmetic modulo the curve prime `p`.
    pub(crate) field: Modulus,
    /// Arithmetic modulo the group order `n`.
    pub(crate) order: Modulus,
    /// Coefficient `a`, canonical.
    pub(crate) a: Fe,
    /// Coefficient `b`, canonical.
    pub(crate) b: Fe,
    /// Generator x coordinate, canonical.
    pub(crate) gx: Fe,
    /// Generator y coordinate, canonical.
    pub(crate) gy: Fe,
}

impl CurveParams {
    /// Decode and validate an externally supplied affine point: both
    /// coordinates canonical, point on the curve and not at infinity.
    /// Returns the Montgomery-domain coordinates.
    pub(crate) fn decode_point(&self, point: &AffinePoint) -> Option<FePair> {
        let x = Fe::from_bytes_be(&point.x);
        let y = Fe::from_bytes_be(&point.y);
        let in_range = x.ct_lt(&self.field.m) & y.ct_lt(&self.field.m);

        let f = &self.field;
        let xm = f.to_mont(&x);
        let ym = f.to_mont(&y);
        // y^2 - (x^3 + a*x + b) == 0
        let lhs = f.sqr(&ym);
        let x2 = f.sqr(&xm);
        let x3 = f.mul(&x2, &xm);
        let ax = f.mul(&f.to_mont(&self.a), &xm);
        let rhs = f.add(&f.add(&x3, &ax), &f.to_mont(&self.b));
        let on_curve = lhs.ct_eq(&rhs);

        // The affine encoding cannot represent infinity, so range plus
        // curve membership is the whole check.
        if bool::from(in_range & on_curve) {
            Some(FePair::new(xm, ym))
        } else {
            None
        }
    }

    /// The generator in Montgomery-domain coordinates.
    pub(crate) fn generator_mont(&self) -> FePair {
        FePair::new(self.field.to_mont(&self.gx), self.field.to_mont(&self.gy))
    }
}

/// NIST P-256 (secp256r1).
pub static P256: CurveParams = CurveParams {
    field: Modulus {
        m: Fe([
            0xffffffffffffffff, 0x00000000ffffffff,
            0x0000000000000000, 0xffffffff00000001,
        ]),
        mp: 0x0000000000000001,
        r2: Fe([
            0x0000000000000003, 0xfffffffbffffffff,
            0xfffffffffffffffe, 0x00000004fffffffd,
        ]),
    },
    order: Modulus {
        m: Fe([
            0xf3b9cac2fc632551, 0xbce6faada7179e84,
            0xffffffffffffffff, 0xffffffff00000000,
        ]),
        mp: 0xccd1c8aaee00bc4f,
        r2: Fe([
            0x83244c95be79eea2, 0x4699799c49bd6fa6,
            0x2845b2392b6bec59, 0x66e12d94f3d95620,
        ]),
    },
    a: Fe([
        0xfffffffffffffffc, 0x00000000ffffffff,
        0x0000000000000000, 0xffffffff00000001,
    ]),
    b: Fe([
        0x3bce3c3e27d2604b, 0x651d06b0cc53b0f6,
        0xb3ebbd55769886bc, 0x5ac635d8aa3a93e7,
    ]),
    gx: Fe([
        0xf4a13945d898c296, 0x77037d812deb33a0,
        0xf8bce6e563a440f2, 0x6b17d1f2e12c4247,
    ]),
    gy: Fe([
        0xcbb6406837bf51f5, 0x2bce33576b315ece,
        0x8ee7eb4a7c0f9e16, 0x4fe342e2fe1a7f9b,
    ]),
};

/// secp256k1.
pub static SECP256K1: CurveParams = CurveParams {
    field: Modulus {
        m: Fe([
            0xfffffffefffffc2f, 0xffffffffffffffff,
            0xffffffffffffffff, 0xffffffffffffffff,
        ]),
        mp: 0xd838091dd2253531,
        r2: Fe([
            0x000007a2000e90a1, 0x0000000000000001,
            0x0000000000000000, 0x0000000000000000,
        ]),
    },
    order: Modulus {
        m: Fe([
            0xbfd25e8cd0364141, 0xbaaedce6af48a03b,
            0xfffffffffffffffe, 0xffffffffffffffff,
        ]),
        mp: 0x4b0dff665588b13f,
        r2: Fe([
            0x896cf21467d7d140, 0x741496c20e7cf878,
            0xe697f5e45bcd07c6, 0x9d671cd581c69bc5,
        ]),
    },
    a: Fe([0, 0, 0, 0]),
    b: Fe([0x0000000000000007, 0, 0, 0]),
    gx: Fe([
        0x59f2815b16f81798, 0x029bfcdb2dce28d9,
        0x55a06295ce870b07, 0x79be667ef9dcbbac,
    ]),
    gy: Fe([
        0x9c47d08ffb10d4b8, 0xfd17b448a6855419,
        0x5da4fbfc0e1108a8, 0x483ada7726a3c465,
    ]),
};

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generators_are_on_curve() {
        for curve in [&P256, &SECP256K1] {
            let g = AffinePoint {
                x: curve.gx.to_bytes_be(),
                y: curve.gy.to_bytes_be(),
            };
            assert!(curve.decode_point(&g).is_some());
        }
    }

    #[test]
    fn off_curve_point_rejected() {
        let mut g = AffinePoint {
            x: P256.gx.to_bytes_be(),
            y: P256.gy.to_bytes_be(),
        };
        g.y[31] ^= 1;
        assert!(P256.decode_point(&g).is_none());
    }

    #[test]
    fn out_of_range_coordinate_rejected() {
        let g = AffinePoint {
            x: [0xff; 32],
            y: P256.gy.to_bytes_be(),
        };
        assert!(P256.decode_point(&g).is_none());
    }

    #[test]
    fn mont_one_matches_tables() {
        // R mod p for P-256 has a well-known closed form.
        let one = P256.field.one();
        assert_eq!(
            one.0,
            [0x0000000000000001, 0xffffffff00000000, 0xffffffffffffffff, 0x00000000fffffffe]
        );
    }
}
