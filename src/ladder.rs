// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! Curve-arithmetic building blocks for the incremental engine.
//!
//! Scalar multiplication uses the x-only Montgomery ladder on short
//! Weierstrass curves (Brier-Joye XZ differential addition and doubling),
//! one scalar bit per unit of work with a `subtle` conditional swap, and
//! projective Okeya-Sakurai y-recovery so a single Z inversion yields the
//! affine result.
//!
//! Verification's dual multiplication `u1*G + u2*Q` carries no secrets but
//! is still regular: a Jacobian add-always ladder whose per-bit work is one
//! doubling plus one mixed addition plus constant-time selection among the
//! precomputed addends, with the exceptional cases (identity accumulator,
//! equal or opposite inputs) folded in by selection rather than branching.
//!
//! All inputs and outputs here are Montgomery-domain field elements; only
//! scalar bits are read from canonical values.

#![allow(non_snake_case)]

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use crate::context::{Registers, Temporaries};
use crate::curve::FePair;
use crate::field::{Fe, Modulus};

/// One ladder bit: conditional swap against the running swap flag, then a
/// differential add into `p2` and a doubling into `p1`.
///
/// Register convention: `p1 = (X0, Z0)` holds the smaller multiple, `p2 =
/// (X1, Z1)` the larger, with `x(P1 - P0) = xP` invariant throughout.
pub(crate) fn xz_ladder_unit(
    f: &Modulus,
    a_m: &Fe,
    b_m: &Fe,
    xP: &Fe,
    regs: &mut Registers,
    swap: &mut Choice,
    bit: Choice,
    t: &mut Temporaries,
) {
    FePair::conditional_swap(&mut regs.p1, &mut regs.p2, *swap ^ bit);
    *swap = bit;
    xz_add(f, a_m, b_m, xP, regs, t);
    xz_double(f, a_m, b_m, regs, t);
}

/// Undo the final pending swap after the last ladder bit.
pub(crate) fn xz_final_swap(regs: &mut Registers, swap: Choice) {
    FePair::conditional_swap(&mut regs.p1, &mut regs.p2, swap);
}

/// Differential addition: `p2 <- p1 + p2` given `x(p2 - p1) = xP`.
///
/// With `A = X0*X1`, `B = Z0*Z1`, `C = X0*Z1`, `D = X1*Z0`:
/// `Z' = (C - D)^2`, `X' = 2(C + D)(A + a*B) + 4b*B^2 - xP*Z'`.
fn xz_add(f: &Modulus, a_m: &Fe, b_m: &Fe, xP: &Fe, regs: &mut Registers, t: &mut Temporaries) {
    let (x0, z0) = (regs.p1.a, regs.p1.b);
    let (x1, z1) = (regs.p2.a, regs.p2.b);

    t.t5 = f.mul(&x0, &x1);
    t.t6 = f.mul(&z0, &z1);
    t.t7 = f.mul(&x0, &z1);
    t.t8 = f.mul(&x1, &z0);

    let diff = f.sub(&t.t7, &t.t8);
    let sum = f.add(&t.t7, &t.t8);
    t.t7 = f.sqr(&diff); // Z'

    t.t8 = f.mul(a_m, &t.t6);
    t.t8 = f.add(&t.t8, &t.t5); // A + a*B
    t.t5 = f.mul(&sum, &t.t8);
    t.t5 = f.add(&t.t5, &t.t5); // 2(C + D)(A + a*B)

    t.t6 = f.sqr(&t.t6); // B^2
    t.t6 = f.mul(b_m, &t.t6);
    t.t6 = f.add(&t.t6, &t.t6);
    t.t6 = f.add(&t.t6, &t.t6); // 4b*B^2
    t.t5 = f.add(&t.t5, &t.t6);

    t.t6 = f.mul(xP, &t.t7);
    regs.p2.a = f.sub(&t.t5, &t.t6);
    regs.p2.b = t.t7;
}

/// Doubling: `p1 <- 2*p1`.
///
/// `X' = (X^2 - a*Z^2)^2 - 8b*X*Z^3`,
/// `Z' = 4*Z*(X^3 + a*X*Z^2 + b*Z^3)`.
fn xz_double(f: &Modulus, a_m: &Fe, b_m: &Fe, regs: &mut Registers, t: &mut Temporaries) {
    let (x, z) = (regs.p1.a, regs.p1.b);

    t.t5 = f.sqr(&x);
    t.t6 = f.sqr(&z);
    t.t7 = f.mul(a_m, &t.t6); // a*Z^2
    t.t8 = f.sub(&t.t5, &t.t7); // X^2 - a*Z^2
    t.t7 = f.add(&t.t5, &t.t7); // X^2 + a*Z^2
    t.t5 = f.sqr(&t.t8); // (X^2 - a*Z^2)^2

    t.t8 = f.mul(&z, &t.t6); // Z^3
    t.t8 = f.mul(b_m, &t.t8); // b*Z^3
    t.t7 = f.mul(&x, &t.t7); // X^3 + a*X*Z^2
    t.t7 = f.add(&t.t7, &t.t8);
    t.t7 = f.mul(&t.t7, &z);
    t.t7 = f.add(&t.t7, &t.t7);
    t.t7 = f.add(&t.t7, &t.t7); // Z'

    t.t6 = f.mul(&x, &t.t8); // b*X*Z^3
    t.t6 = f.add(&t.t6, &t.t6);
    t.t6 = f.add(&t.t6, &t.t6);
    t.t6 = f.add(&t.t6, &t.t6); // 8b*X*Z^3

    regs.p1.a = f.sub(&t.t5, &t.t6);
    regs.p1.b = t.t7;
}

/// Projective Okeya-Sakurai y-recovery after the ladder.
///
/// On entry `p1 = (X1, Z1)` holds `kP` and `p2 = (X2, Z2)` holds
/// `(k+1)P` in XZ form, with `(xP, yP)` the affine base point.  On exit
/// the registers are repacked for the inversion stage:
/// `p1 = (X', Y')` homogeneous numerators, `p2.a = Z'` (the value to
/// invert), `p2.b` = Montgomery one (the inversion accumulator), so that
/// the affine result is `(X'/Z', Y'/Z')`.
pub(crate) fn xz_recover(
    f: &Modulus,
    a_m: &Fe,
    b_m: &Fe,
    base: &FePair,
    regs: &mut Registers,
    t: &mut Temporaries,
) {
    let (xP, yP) = (base.a, base.b);
    let (X1, Z1) = (regs.p1.a, regs.p1.b);
    let (X2, Z2) = (regs.p2.a, regs.p2.b);

    // Y' = Z2*(2b*Z1^2 + (a*Z1 + xP*X1)(xP*Z1 + X1)) - X2*(xP*Z1 - X1)^2
    t.t5 = f.mul(&xP, &Z1);
    t.t6 = f.sub(&t.t5, &X1);
    t.t6 = f.sqr(&t.t6);
    t.t6 = f.mul(&X2, &t.t6); // X2*(xP*Z1 - X1)^2

    t.t7 = f.mul(&xP, &X1);
    t.t8 = f.mul(a_m, &Z1);
    t.t8 = f.add(&t.t8, &t.t7); // a*Z1 + xP*X1
    t.t5 = f.add(&t.t5, &X1); // xP*Z1 + X1
    t.t5 = f.mul(&t.t5, &t.t8);

    t.t8 = f.sqr(&Z1);
    t.t7 = f.mul(b_m, &t.t8);
    t.t7 = f.add(&t.t7, &t.t7); // 2b*Z1^2
    t.t5 = f.add(&t.t5, &t.t7);
    t.t5 = f.mul(&t.t5, &Z2);
    t.t5 = f.sub(&t.t5, &t.t6); // Y'

    // X' = 2*yP*X1*Z1*Z2, Z' = 2*yP*Z1^2*Z2
    t.t6 = f.mul(&yP, &X1);
    t.t6 = f.mul(&t.t6, &Z1);
    t.t6 = f.mul(&t.t6, &Z2);
    t.t6 = f.add(&t.t6, &t.t6); // X'

    t.t7 = f.mul(&yP, &t.t8);
    t.t7 = f.mul(&t.t7, &Z2);
    t.t7 = f.add(&t.t7, &t.t7); // Z'

    regs.p1.a = t.t6;
    regs.p1.b = t.t5;
    regs.p2.a = t.t7;
    regs.p2.b = f.one();
}

/// One bit of constant-time Fermat inversion: square the accumulator and
/// conditionally fold in the base.  The exponent (`m - 2`) is public, but
/// selection keeps the work pattern uniform anyway.
pub(crate) fn inv_unit(f: &Modulus, base: &Fe, acc: &mut Fe, bit: Choice) {
    let sq = f.sqr(acc);
    let pr = f.mul(&sq, base);
    *acc = Fe::conditional_select(&sq, &pr, bit);
}

/// Complete the affine sum `T = P1 + P2` from the precomputed inverse of
/// `x2 - x1`: the chord slope, then the standard affine addition.
pub(crate) fn affine_sum(f: &Modulus, p1: &FePair, p2: &FePair, inv_dx: &Fe) -> FePair {
    let lambda = f.mul(&f.sub(&p2.b, &p1.b), inv_dx);
    let x3 = f.sub(&f.sub(&f.sqr(&lambda), &p1.a), &p2.a);
    let y3 = f.sub(&f.mul(&lambda, &f.sub(&p1.a, &x3)), &p1.b);
    FePair::new(x3, y3)
}

// ------------------------------------------------------------------------
// Jacobian arithmetic for the verification dual ladder
// ------------------------------------------------------------------------

/// A Jacobian point, stack-only scratch for the verification ladder.  The
/// persistent copy lives across three register slots.
#[derive(Copy, Clone, Debug)]
pub(crate) struct JacPoint {
    pub x: Fe,
    pub y: Fe,
    pub z: Fe,
}

impl JacPoint {
    /// The identity, `Z = 0`.
    pub(crate) fn identity(f: &Modulus) -> JacPoint {
        JacPoint {
            x: f.one(),
            y: f.one(),
            z: Fe::ZERO,
        }
    }

    pub(crate) fn conditional_select(a: &JacPoint, b: &JacPoint, choice: Choice) -> JacPoint {
        JacPoint {
            x: Fe::conditional_select(&a.x, &b.x, choice),
            y: Fe::conditional_select(&a.y, &b.y, choice),
            z: Fe::conditional_select(&a.z, &b.z, choice),
        }
    }
}

/// Jacobian doubling, valid for all inputs including the identity.
pub(crate) fn jac_double(f: &Modulus, a_m: &Fe, p: &JacPoint) -> JacPoint {
    let yy = f.sqr(&p.y);
    let mut b = f.mul(&p.x, &yy);
    b = f.add(&b, &b);
    b = f.add(&b, &b); // 4*X*Y^2
    let mut c = f.sqr(&yy);
    c = f.add(&c, &c);
    c = f.add(&c, &c);
    c = f.add(&c, &c); // 8*Y^4

    let z2 = f.sqr(&p.z);
    let z4 = f.sqr(&z2);
    let xx = f.sqr(&p.x);
    let mut d = f.mul(a_m, &z4); // a*Z^4
    d = f.add(&d, &xx);
    let xx2 = f.add(&xx, &xx);
    d = f.add(&d, &xx2); // 3*X^2 + a*Z^4

    let mut x3 = f.sqr(&d);
    x3 = f.sub(&x3, &b);
    x3 = f.sub(&x3, &b);
    let mut y3 = f.sub(&b, &x3);
    y3 = f.mul(&d, &y3);
    y3 = f.sub(&y3, &c);
    let mut z3 = f.mul(&p.y, &p.z);
    z3 = f.add(&z3, &z3);

    JacPoint { x: x3, y: y3, z: z3 }
}

/// Mixed addition `R + A` with `A` affine, plus the exception flags the
/// caller needs to select the true result: `(candidate, r_was_identity,
/// h_zero, r_zero)`.  The candidate is garbage whenever a flag fires; the
/// caller substitutes by constant-time selection.
pub(crate) fn jac_add_affine(
    f: &Modulus,
    r: &JacPoint,
    a: &FePair,
) -> (JacPoint, Choice, Choice, Choice) {
    let was_identity = r.z.is_zero();

    let z1z1 = f.sqr(&r.z);
    let u2 = f.mul(&a.a, &z1z1);
    let s2 = f.mul(&f.mul(&a.b, &r.z), &z1z1);
    let h = f.sub(&u2, &r.x);
    let rr = f.sub(&s2, &r.y);
    let h_zero = h.is_zero();
    let r_zero = rr.is_zero();

    let hh = f.sqr(&h);
    let hhh = f.mul(&h, &hh);
    let v = f.mul(&r.x, &hh);

    let mut x3 = f.sqr(&rr);
    x3 = f.sub(&x3, &hhh);
    x3 = f.sub(&x3, &v);
    x3 = f.sub(&x3, &v);
    let mut y3 = f.sub(&v, &x3);
    y3 = f.mul(&rr, &y3);
    y3 = f.sub(&y3, &f.mul(&r.y, &hhh));
    let z3 = f.mul(&r.z, &h);

    (JacPoint { x: x3, y: y3, z: z3 }, was_identity, h_zero, r_zero)
}

/// One bit of the verification dual ladder: double the accumulator, then
/// add-always the selected addend (`G`, `Q`, or the precomputed `G + Q`),
/// resolving every exceptional case by selection.
pub(crate) fn dual_ladder_unit(
    f: &Modulus,
    a_m: &Fe,
    r: &JacPoint,
    g: &FePair,
    q: &FePair,
    t_sum: &FePair,
    b1: Choice,
    b2: Choice,
) -> JacPoint {
    let doubled = jac_double(f, a_m, r);

    let any = b1 | b2;
    let mut addend = FePair::conditional_select(g, q, b2);
    addend = FePair::conditional_select(&addend, t_sum, b1 & b2);

    let (sum, was_identity, h_zero, r_zero) = jac_add_affine(f, &doubled, &addend);
    let addend_jac = JacPoint {
        x: addend.a,
        y: addend.b,
        z: f.one(),
    };
    let addend_doubled = jac_double(f, a_m, &addend_jac);
    let identity = JacPoint::identity(f);

    let mut out = sum;
    let not_inf = !was_identity;
    out = JacPoint::conditional_select(&out, &addend_doubled, h_zero & r_zero & not_inf);
    out = JacPoint::conditional_select(&out, &identity, h_zero & !r_zero & not_inf);
    out = JacPoint::conditional_select(&out, &addend_jac, was_identity);
    JacPoint::conditional_select(&out, &doubled, !any)
}

/// Constant-time test used by verification's Test stage: does the
/// accumulator's x-coordinate, read modulo the curve order, equal `r`?
///
/// Inversion-free form: accept iff `r*Z^2 == X (mod p)` or, when `r + n`
/// still fits below `p`, `(r + n)*Z^2 == X (mod p)`.  Both comparisons are
/// always evaluated.
pub(crate) fn x_equals_r_mod_n(
    f: &Modulus,
    order: &Modulus,
    r_canon: &Fe,
    acc: &JacPoint,
) -> Choice {
    let not_infinity = !acc.z.is_zero();
    let zz = f.sqr(&acc.z);

    let r_m = f.to_mont(r_canon);
    let first = f.mul(&r_m, &zz).ct_eq(&acc.x);

    // r + n as a canonical field value, valid only when it does not wrap
    // 2^256 and stays below p.
    let mut wide = [0u64; 4];
    let mut carry = 0u64;
    for i in 0..4 {
        let v = (r_canon.0[i] as u128) + (order.m.0[i] as u128) + (carry as u128);
        wide[i] = v as u64;
        carry = (v >> 64) as u64;
    }
    let rn = Fe(wide);
    let rn_valid = carry.ct_eq(&0) & rn.ct_lt(&f.m);
    let rn_m = f.to_mont(&rn);
    let second = f.mul(&rn_m, &zz).ct_eq(&acc.x) & rn_valid;

    (first | second) & not_infinity
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::P256;

    /// Run the full Fermat inversion loop over the staged unit.
    fn invert(f: &Modulus, x: &Fe) -> Fe {
        let e = f.sub2();
        let base = f.to_mont(x);
        let mut acc = f.one();
        for i in (0..256).rev() {
            inv_unit(f, &base, &mut acc, e.bit(i));
        }
        acc
    }

    #[test]
    fn fermat_inversion_round_trips() {
        for f in [&P256.field, &P256.order] {
            let x = Fe([0x1234_5678, 42, 7, 0x0bad_cafe]);
            let inv = invert(f, &x);
            let prod = f.mul(&inv, &f.to_mont(&x));
            assert_eq!(f.from_mont(&prod).0, [1, 0, 0, 0]);
        }
    }

    #[test]
    fn jacobian_double_of_identity_is_identity() {
        let f = &P256.field;
        let a_m = f.to_mont(&P256.a);
        let id = JacPoint::identity(f);
        let d = jac_double(f, &a_m, &id);
        assert!(bool::from(d.z.is_zero()));
    }

    #[test]
    fn mixed_add_flags_identity() {
        let f = &P256.field;
        let g = P256.generator_mont();
        let id = JacPoint::identity(f);
        let (_, was_identity, _, _) = jac_add_affine(f, &id, &g);
        assert!(bool::from(was_identity));
    }

    #[test]
    fn dual_ladder_small_multiples() {
        // 3*G computed as u1=3, u2=0 must match 1*G + 1*(2G) chains: walk
        // two bits of u1 = 0b11 with q unused.
        let f = &P256.field;
        let a_m = f.to_mont(&P256.a);
        let g = P256.generator_mont();
        let mut r = JacPoint::identity(f);
        for bit in [1u8, 1u8] {
            r = dual_ladder_unit(
                f,
                &a_m,
                &r,
                &g,
                &g,
                &g,
                Choice::from(bit),
                Choice::from(0),
            );
        }
        // x(3G) for P-256, reference value.
        let zz = invert(f, &f.from_mont(&f.sqr(&r.z)));
        let x_aff = f.from_mont(&f.mul(&r.x, &zz));
        let expected = Fe::from_bytes_be(
            &hex_literal("5ecbe4d1a6330a44c8f7ef951d4bf165e6c6b721efada985fb41661bc6e7fd6c"),
        );
        assert_eq!(x_aff.0, expected.0);
    }

    fn hex_literal(s: &str) -> [u8; 32] {
        let v = hex::decode(s).unwrap();
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        out
    }
}
