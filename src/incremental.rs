// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! The incremental execution engine: begin, step, result, abandon.
//!
//! Every operation is decomposed into fixed-size units of work (one ladder
//! bit, one inversion bit, one final comparison), and [`Context::step`]
//! executes up to a caller-chosen budget of units before returning.  The
//! interleaving is externally invisible: a run of `step(1)` calls and a
//! single `step(usize::MAX)` produce identical outputs for identical
//! inputs.  Unit boundaries are data-independent, so the resumption
//! schedule leaks nothing about scalars.
//!
//! Faults are latched: once a unit fails, the operation is pinned in the
//! failed state and every further `step` or `result` reports the same
//! error until the context is abandoned or rebegun.

use rand_core::{CryptoRng, RngCore};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use crate::context::{
    Context, MultOperand, OpScratch, ParamGen, ParamUse, Params, Phase, Registers, SavedState,
    SignScratch, StageWords, Temporaries, VerifyCommon, VerifyEarly, VerifyLate, VerifyScratch,
    VerifySub, GEN_BUF_BYTES,
};
use crate::curve::{AffinePoint, CurveParams, FePair, Signature};
use crate::drbg::HmacDrbg;
use crate::errors::Error;
use crate::field::{Fe, Modulus};
use crate::ladder;
use crate::ladder::JacPoint;

/// The operation a context is running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Multiply the generator by a private scalar.
    ComputePublicKey,
    /// Multiply a validated peer point by a private scalar, exposing only
    /// the x coordinate.
    SharedSecret,
    /// Multiply an arbitrary validated point by a scalar, exposing the
    /// full affine result.
    PointMultiply,
    /// Produce an ECDSA signature over a message digest.
    Sign,
    /// Check an ECDSA signature over a message digest.
    Verify,
}

/// Operation inputs, all borrowed; everything needed later is copied into
/// the context before [`Context::begin`] returns.
#[derive(Copy, Clone, Debug)]
pub enum Inputs<'a> {
    /// Compute `d*G` for a private scalar `d`.
    ComputePublicKey {
        /// Big-endian private scalar, `1 <= d < n`.
        private_key: &'a [u8; 32],
    },
    /// Compute the x coordinate of `d*Q` for a peer public key `Q`.
    SharedSecret {
        /// Big-endian private scalar, `1 <= d < n`.
        private_key: &'a [u8; 32],
        /// The peer's public key; validated before use.
        public_key: &'a AffinePoint,
    },
    /// Compute `k*P` for an arbitrary validated point `P`.
    PointMultiply {
        /// Big-endian scalar, `1 <= k < n`.
        scalar: &'a [u8; 32],
        /// The point to multiply; validated before use.
        point: &'a AffinePoint,
    },
    /// ECDSA-sign a message digest.  Requires previously generated
    /// per-signature parameters (see [`Context::generate`]).
    Sign {
        /// The 32-byte message digest, interpreted big-endian and
        /// reduced modulo the group order.
        digest: &'a [u8; 32],
        /// Big-endian private scalar, `1 <= d < n`.
        private_key: &'a [u8; 32],
    },
    /// Check an ECDSA signature over a message digest.
    Verify {
        /// The 32-byte message digest.
        digest: &'a [u8; 32],
        /// The signer's public key; validated before use.
        public_key: &'a AffinePoint,
        /// The signature to check; components must lie in `[1, n)`.
        signature: &'a Signature,
    },
}

/// A completed operation's output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Output {
    /// Affine point result of `ComputePublicKey` or `PointMultiply`.
    Point(AffinePoint),
    /// x-only ECDH result, big-endian.
    SharedSecret([u8; 32]),
    /// Signature produced by `Sign`.
    Signature(Signature),
    /// Verification verdict.  A well-formed signature that does not match
    /// is `Verified(false)`, not an error.
    Verified(bool),
}

/// What one call to [`Context::step`] observed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Budget exhausted with work remaining; call `step` again.
    Continue,
    /// The operation completed during this call; fetch via `result`.
    Done,
    /// The operation faulted, or no operation was in progress.
    Failed(Error),
}

// Stage numbering.  The three multiplication flavors and signing share the
// ladder and z-inversion stages; signing continues where multiplication
// terminates.  Verification has its own track.
const MULT_LADDER: u32 = 0;
const MULT_INV_Z: u32 = 1;
const MULT_DONE: u32 = 2;
const SIGN_INV: u32 = 2;
const SIGN_DONE: u32 = 3;
const VERIFY_INV_S: u32 = 0;
const VERIFY_INV_Z: u32 = 1;
const VERIFY_LADDER: u32 = 2;
const VERIFY_TEST: u32 = 3;
const VERIFY_DONE: u32 = 4;

/// Scalar width in bits; every ladder and inversion runs this many units
/// regardless of the scalar's value.
const BITS: usize = 256;

/// Candidate draws permitted per generated value before generation gives
/// up.  Each draw succeeds with overwhelming probability, so reaching the
/// bound indicates a broken entropy source.
const GEN_ATTEMPTS: usize = 64;

fn done_stage(op: Operation) -> u32 {
    match op {
        Operation::ComputePublicKey | Operation::SharedSecret | Operation::PointMultiply => {
            MULT_DONE
        }
        Operation::Sign => SIGN_DONE,
        Operation::Verify => VERIFY_DONE,
    }
}

impl<'c> Context<'c> {
    /// Whether an operation is running and not yet finished or faulted.
    fn in_progress(&self) -> bool {
        match &self.phase {
            Phase::Idle => false,
            Phase::Gen(_) => true,
            Phase::Use(u) => u.state.fault.is_none() && u.state.stage != done_stage(u.op),
        }
    }

    /// Generate a fresh scalar and projective blinding value from `rng`,
    /// storing them in the context for the next `Sign` (which requires
    /// them) or multiplication (which consumes the blinding value).
    pub fn generate<R>(&mut self, curve: &CurveParams, rng: &mut R) -> Result<(), Error>
    where
        R: RngCore + CryptoRng,
    {
        if self.in_progress() {
            return Err(Error::InvalidState);
        }
        // Any failure below must leave no usable parameters behind, not
        // even ones from an earlier successful generation.
        self.generated = false;
        let mut entropy = [0u8; 32];
        let mut nonce = [0u8; 16];
        rng.try_fill_bytes(&mut entropy)
            .map_err(|_| Error::EntropyFailure)?;
        rng.try_fill_bytes(&mut nonce)
            .map_err(|_| Error::EntropyFailure)?;
        let drbg = HmacDrbg::new(&entropy, &nonce, &[])?;
        self.run_generation(curve, drbg)
    }

    /// Deterministic variant of [`generate`](Context::generate): derive
    /// the scalar and blinding value from a seed and personalization
    /// string.  The same inputs always yield the same parameters.
    pub fn generate_from_seed(
        &mut self,
        curve: &CurveParams,
        seed: &[u8],
        personalization: &[u8],
    ) -> Result<(), Error> {
        if self.in_progress() {
            return Err(Error::InvalidState);
        }
        self.generated = false;
        let drbg = HmacDrbg::new(seed, &[], personalization)?;
        self.run_generation(curve, drbg)
    }

    fn run_generation(&mut self, curve: &CurveParams, drbg: HmacDrbg) -> Result<(), Error> {
        self.generated = false;
        self.phase = Phase::Gen(ParamGen {
            drbg,
            buf: [0u8; GEN_BUF_BYTES],
        });
        let outcome = match &mut self.phase {
            Phase::Gen(gen) => draw_scalar(gen, &curve.order)
                .and_then(|k| draw_scalar(gen, &curve.field).map(|z| (k, z))),
            _ => Err(Error::InvalidState),
        };
        self.phase = Phase::Idle;
        let (k, z) = outcome?;
        self.params = Params { k, z };
        self.generated = true;
        Ok(())
    }

    /// Start an operation.  Inputs are validated and copied in here; the
    /// context then owes the caller a sequence of `step` calls.
    pub fn begin(&mut self, curve: &'c CurveParams, inputs: Inputs<'_>) -> Result<(), Error> {
        if self.in_progress() {
            return Err(Error::InvalidState);
        }

        let (op, scalar, point, scratch) = match inputs {
            Inputs::ComputePublicKey { private_key } => {
                let d = parse_scalar(&curve.order, private_key)?;
                (
                    Operation::ComputePublicKey,
                    d,
                    curve.generator_mont(),
                    OpScratch::Mult,
                )
            }
            Inputs::SharedSecret {
                private_key,
                public_key,
            } => {
                let d = parse_scalar(&curve.order, private_key)?;
                let q = curve.decode_point(public_key).ok_or(Error::InvalidInput)?;
                (Operation::SharedSecret, d, q, OpScratch::Mult)
            }
            Inputs::PointMultiply { scalar, point } => {
                let k = parse_scalar(&curve.order, scalar)?;
                let q = curve.decode_point(point).ok_or(Error::InvalidInput)?;
                (Operation::PointMultiply, k, q, OpScratch::Mult)
            }
            Inputs::Sign {
                digest,
                private_key,
            } => {
                // Signing consumes a previously generated nonce.
                if !self.generated {
                    return Err(Error::InvalidState);
                }
                let d = parse_scalar(&curve.order, private_key)?;
                let e = curve.order.reduce_once(&Fe::from_bytes_be(digest));
                (
                    Operation::Sign,
                    self.params.k,
                    curve.generator_mont(),
                    OpScratch::Sign(SignScratch {
                        message: e,
                        secret: d,
                    }),
                )
            }
            Inputs::Verify {
                digest,
                public_key,
                signature,
            } => {
                return self.begin_verify(curve, digest, public_key, signature);
            }
        };

        // Projective blinding: a generated z randomizes every intermediate
        // coordinate; without one the ladder runs unblinded on z = 1.
        let z = if self.generated {
            self.params.z
        } else {
            Fe::ONE
        };
        self.generated = false;
        self.params.k = scalar;

        let f = &curve.field;
        let z_m = f.to_mont(&z);
        let arith = Registers {
            p1: FePair::new(z_m, Fe::ZERO),
            p2: FePair::new(f.mul(&point.a, &z_m), z_m),
        };

        self.phase = Phase::Use(ParamUse {
            curve,
            op,
            arith,
            mult: MultOperand { point },
            state: SavedState {
                stage: MULT_LADDER,
                i: BITS,
                words: StageWords::Ladder {
                    swap: Choice::from(0),
                },
                fault: None,
            },
            scratch,
        });
        Ok(())
    }

    fn begin_verify(
        &mut self,
        curve: &'c CurveParams,
        digest: &[u8; 32],
        public_key: &AffinePoint,
        signature: &Signature,
    ) -> Result<(), Error> {
        let order = &curve.order;
        let r = parse_scalar(order, &signature.r)?;
        let s = parse_scalar(order, &signature.s)?;
        let q = curve.decode_point(public_key).ok_or(Error::InvalidInput)?;
        let e = order.reduce_once(&Fe::from_bytes_be(digest));

        // The s-inversion accumulates in p1.b; its base stays in the
        // verify scratch and is read there each unit.
        let arith = Registers {
            p1: FePair::new(Fe::ZERO, order.one()),
            p2: FePair::default(),
        };

        self.phase = Phase::Use(ParamUse {
            curve,
            op: Operation::Verify,
            arith,
            mult: MultOperand { point: q },
            state: SavedState {
                stage: VERIFY_INV_S,
                i: BITS,
                words: StageWords::Loop,
                fault: None,
            },
            scratch: OpScratch::Verify(VerifyScratch {
                common: VerifyCommon { qr: r },
                sub: VerifySub::Early(VerifyEarly { message: e, qs: s }),
            }),
        });
        Ok(())
    }

    /// Run up to `budget` units of work (at least one).  Returns
    /// [`Outcome::Done`] the moment the operation finishes, even with
    /// budget remaining.
    pub fn step(&mut self, budget: usize) -> Outcome {
        let params = self.params;
        let u = match &mut self.phase {
            Phase::Use(u) => u,
            _ => return Outcome::Failed(Error::InvalidState),
        };
        if let Some(e) = u.state.fault {
            return Outcome::Failed(e);
        }
        let done = done_stage(u.op);
        if u.state.stage == done {
            return Outcome::Failed(Error::InvalidState);
        }

        for _ in 0..budget.max(1) {
            if let Err(e) = run_unit(&params, u) {
                u.state.fault = Some(e);
                return Outcome::Failed(e);
            }
            if u.state.stage == done {
                return Outcome::Done;
            }
        }
        Outcome::Continue
    }

    /// Fetch the completed operation's output.  Before completion, or
    /// after a fault, this reports the corresponding error; it does not
    /// consume the result.
    pub fn result(&self) -> Result<Output, Error> {
        let u = match &self.phase {
            Phase::Use(u) => u,
            _ => return Err(Error::InvalidState),
        };
        if let Some(e) = u.state.fault {
            return Err(e);
        }
        if u.state.stage != done_stage(u.op) {
            return Err(Error::InvalidState);
        }

        match u.op {
            Operation::ComputePublicKey | Operation::PointMultiply => Ok(Output::Point(AffinePoint {
                x: u.arith.p1.a.to_bytes_be(),
                y: u.arith.p1.b.to_bytes_be(),
            })),
            Operation::SharedSecret => Ok(Output::SharedSecret(u.arith.p1.a.to_bytes_be())),
            Operation::Sign => Ok(Output::Signature(Signature {
                r: u.arith.p1.a.to_bytes_be(),
                s: u.arith.p1.b.to_bytes_be(),
            })),
            Operation::Verify => match u.state.words {
                StageWords::Outcome { accept } => Ok(Output::Verified(bool::from(accept))),
                _ => Err(Error::InvalidState),
            },
        }
    }

    /// Drop whatever operation or generated parameters the context holds
    /// and return it to idle.  Always permitted.
    pub fn abandon(&mut self) {
        self.params = Params::default();
        self.generated = false;
        self.phase = Phase::Idle;
    }
}

/// Parse a big-endian scalar and require `1 <= k < n`.
fn parse_scalar(order: &Modulus, bytes: &[u8; 32]) -> Result<Fe, Error> {
    let k = Fe::from_bytes_be(bytes);
    if bool::from(order.is_valid_scalar(&k)) {
        Ok(k)
    } else {
        Err(Error::InvalidInput)
    }
}

/// Draw candidates from the engine until one lands in `[1, m)`.
fn draw_scalar(gen: &mut ParamGen, m: &Modulus) -> Result<Fe, Error> {
    for _ in 0..GEN_ATTEMPTS {
        gen.drbg.generate(&mut gen.buf[..32])?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&gen.buf[..32]);
        let candidate = Fe::from_bytes_be(&bytes);
        if bool::from(m.is_valid_scalar(&candidate)) {
            return Ok(candidate);
        }
    }
    Err(Error::EntropyFailure)
}

/// Execute exactly one unit of work, advancing the stage machine.
fn run_unit(params: &Params, u: &mut ParamUse<'_>) -> Result<(), Error> {
    let curve = u.curve;
    let f = &curve.field;
    let order = &curve.order;
    let a_m = f.to_mont(&curve.a);
    let b_m = f.to_mont(&curve.b);

    match (u.op, u.state.stage) {
        // --- verification track -----------------------------------------
        (Operation::Verify, VERIFY_INV_S) => {
            u.state.i -= 1;
            let exp = order.sub2();
            let base = match &u.scratch {
                OpScratch::Verify(VerifyScratch {
                    sub: VerifySub::Early(early),
                    ..
                }) => order.to_mont(&early.qs),
                _ => return Err(Error::InvalidState),
            };
            ladder::inv_unit(order, &base, &mut u.arith.p1.b, exp.bit(u.state.i));
            if u.state.i == 0 {
                finish_s_inversion(u, f, order)?;
            }
            Ok(())
        }
        (Operation::Verify, VERIFY_INV_Z) => {
            u.state.i -= 1;
            let exp = f.sub2();
            let base = u.arith.p1.a;
            ladder::inv_unit(f, &base, &mut u.arith.p1.b, exp.bit(u.state.i));
            if u.state.i == 0 {
                finish_z_inversion_verify(u, f)?;
            }
            Ok(())
        }
        (Operation::Verify, VERIFY_LADDER) => {
            u.state.i -= 1;
            let (kg, pg) = match &u.scratch {
                OpScratch::Verify(VerifyScratch {
                    sub: VerifySub::Late(late),
                    ..
                }) => (late.kg, late.pg),
                _ => return Err(Error::InvalidState),
            };
            let b1 = kg.bit(u.state.i);
            let b2 = u.arith.p2.b.bit(u.state.i);
            let g_m = curve.generator_mont();
            let r = JacPoint {
                x: u.arith.p1.a,
                y: u.arith.p1.b,
                z: u.arith.p2.a,
            };
            let r = ladder::dual_ladder_unit(f, &a_m, &r, &g_m, &u.mult.point, &pg, b1, b2);
            u.arith.p1.a = r.x;
            u.arith.p1.b = r.y;
            u.arith.p2.a = r.z;
            if u.state.i == 0 {
                u.state.stage = VERIFY_TEST;
            }
            Ok(())
        }
        (Operation::Verify, VERIFY_TEST) => {
            let qr = match &u.scratch {
                OpScratch::Verify(vs) => vs.common.qr,
                _ => return Err(Error::InvalidState),
            };
            let acc = JacPoint {
                x: u.arith.p1.a,
                y: u.arith.p1.b,
                z: u.arith.p2.a,
            };
            let accept = ladder::x_equals_r_mod_n(f, order, &qr, &acc);
            u.state.words = StageWords::Outcome { accept };
            u.state.stage = VERIFY_DONE;
            Ok(())
        }

        // --- signing continuation ---------------------------------------
        (Operation::Sign, SIGN_INV) => {
            u.state.i -= 1;
            let exp = order.sub2();
            let base = u.arith.p2.a;
            ladder::inv_unit(order, &base, &mut u.arith.p2.b, exp.bit(u.state.i));
            if u.state.i == 0 {
                finish_sign(u, order)?;
            }
            Ok(())
        }

        // --- shared multiplication track --------------------------------
        (_, MULT_LADDER) => {
            u.state.i -= 1;
            let bit = params.k.bit(u.state.i);
            let mut swap = match u.state.words {
                StageWords::Ladder { swap } => swap,
                _ => return Err(Error::InvalidState),
            };
            let mut t = Temporaries::default();
            let x_p = u.mult.point.a;
            ladder::xz_ladder_unit(f, &a_m, &b_m, &x_p, &mut u.arith, &mut swap, bit, &mut t);
            if u.state.i == 0 {
                ladder::xz_final_swap(&mut u.arith, swap);
                ladder::xz_recover(f, &a_m, &b_m, &u.mult.point, &mut u.arith, &mut t);
                u.state.stage = MULT_INV_Z;
                u.state.i = BITS;
                u.state.words = StageWords::Loop;
            } else {
                u.state.words = StageWords::Ladder { swap };
            }
            Ok(())
        }
        (_, MULT_INV_Z) => {
            u.state.i -= 1;
            let exp = f.sub2();
            let base = u.arith.p2.a;
            ladder::inv_unit(f, &base, &mut u.arith.p2.b, exp.bit(u.state.i));
            if u.state.i == 0 {
                finish_z_inversion_mult(params, u, f, order)?;
            }
            Ok(())
        }

        _ => Err(Error::InvalidState),
    }
}

/// Completion of the multiplication track's z inversion: convert the
/// recovered point to affine form, then either finish (multiplication
/// flavors) or derive `r` and pivot into the nonce inversion (signing).
fn finish_z_inversion_mult(
    params: &Params,
    u: &mut ParamUse<'_>,
    f: &Modulus,
    order: &Modulus,
) -> Result<(), Error> {
    // k = n - 1 drives the ladder's second register to the point at
    // infinity, which zeroes the recovered denominator; the product is
    // then the negated operand `(xP, p - yP)`.  Selected in constant
    // time, after the inversion has run its full unit count.
    let exceptional = u.arith.p2.a.is_zero();
    let inv = u.arith.p2.b;
    let mut x_m = f.mul(&u.arith.p1.a, &inv);
    let mut y_m = f.mul(&u.arith.p1.b, &inv);
    let neg_y = f.sub(&Fe::ZERO, &u.mult.point.b);
    x_m = Fe::conditional_select(&x_m, &u.mult.point.a, exceptional);
    y_m = Fe::conditional_select(&y_m, &neg_y, exceptional);

    match u.op {
        Operation::Sign => {
            // r = x(kG) mod n; the field prime is below 2n, so one
            // conditional subtraction reduces it.
            let r = order.reduce_once(&f.from_mont(&x_m));
            if bool::from(r.is_zero()) {
                return Err(Error::InvalidInput);
            }
            u.arith.p1.a = r;
            u.arith.p2.a = order.to_mont(&params.k);
            u.arith.p2.b = order.one();
            u.state.stage = SIGN_INV;
            u.state.i = BITS;
            Ok(())
        }
        _ => {
            u.arith.p1.a = f.from_mont(&x_m);
            u.arith.p1.b = f.from_mont(&y_m);
            u.state.stage = MULT_DONE;
            Ok(())
        }
    }
}

/// Completion of signing's nonce inversion: `s = k⁻¹(e + r·d) mod n`.
fn finish_sign(u: &mut ParamUse<'_>, order: &Modulus) -> Result<(), Error> {
    let sc = match &u.scratch {
        OpScratch::Sign(sc) => *sc,
        _ => return Err(Error::InvalidState),
    };
    let kinv = u.arith.p2.b;
    let e_m = order.to_mont(&sc.message);
    let r_m = order.to_mont(&u.arith.p1.a);
    let d_m = order.to_mont(&sc.secret);
    let s_m = order.mul(&kinv, &order.add(&e_m, &order.mul(&r_m, &d_m)));
    let s = order.from_mont(&s_m);
    if bool::from(s.is_zero()) {
        return Err(Error::InvalidInput);
    }
    u.arith.p1.b = s;
    u.state.stage = SIGN_DONE;
    Ok(())
}

/// Completion of verification's s inversion: compute `u1 = e·s⁻¹` and
/// `u2 = r·s⁻¹`, fold the scalars if the public key shares the
/// generator's x coordinate (so the dual ladder's precomputed sum would
/// not exist), and set up the chord-denominator inversion.
fn finish_s_inversion(u: &mut ParamUse<'_>, f: &Modulus, order: &Modulus) -> Result<(), Error> {
    let sinv = u.arith.p1.b;
    let vs = match &mut u.scratch {
        OpScratch::Verify(vs) => vs,
        _ => return Err(Error::InvalidState),
    };
    let early = match vs.sub {
        VerifySub::Early(early) => early,
        _ => return Err(Error::InvalidState),
    };

    let e_m = order.to_mont(&early.message);
    let r_m = order.to_mont(&vs.common.qr);
    let mut u1 = order.from_mont(&order.mul(&e_m, &sinv));
    let mut u2 = order.from_mont(&order.mul(&r_m, &sinv));

    // Q = ±G makes G + Q degenerate; fold u2 into u1 instead, since
    // u1*G + u2*(±G) = (u1 ± u2)*G.
    let gx_m = f.to_mont(&u.curve.gx);
    let gy_m = f.to_mont(&u.curve.gy);
    let same_x = u.mult.point.a.ct_eq(&gx_m);
    let same_y = u.mult.point.b.ct_eq(&gy_m);
    let folded = Fe::conditional_select(&order.sub(&u1, &u2), &order.add(&u1, &u2), same_y);
    u1 = Fe::conditional_select(&u1, &folded, same_x);
    u2 = Fe::conditional_select(&u2, &Fe::ZERO, same_x);

    vs.sub = VerifySub::Late(VerifyLate {
        kg: u1,
        pg: FePair::default(),
    });
    u.arith.p2.b = u2;

    // Invert xQ - xG for the chord slope of G + Q.  When folded the
    // denominator is zero and the inversion yields garbage, but the sum
    // point is then never selected by the ladder; the full unit count
    // runs regardless.
    u.arith.p1.a = f.sub(&u.mult.point.a, &gx_m);
    u.arith.p1.b = f.one();
    u.state.stage = VERIFY_INV_Z;
    u.state.i = BITS;
    Ok(())
}

/// Completion of verification's denominator inversion: materialize the
/// affine sum `G + Q` and reset the registers to the identity for the
/// dual ladder.
fn finish_z_inversion_verify(u: &mut ParamUse<'_>, f: &Modulus) -> Result<(), Error> {
    let inv_dx = u.arith.p1.b;
    let g_m = u.curve.generator_mont();
    let sum = ladder::affine_sum(f, &g_m, &u.mult.point, &inv_dx);

    match &mut u.scratch {
        OpScratch::Verify(VerifyScratch {
            sub: VerifySub::Late(late),
            ..
        }) => late.pg = sum,
        _ => return Err(Error::InvalidState),
    }

    u.arith.p1.a = f.one();
    u.arith.p1.b = f.one();
    u.arith.p2.a = Fe::ZERO;
    u.state.stage = VERIFY_LADDER;
    u.state.i = BITS;
    Ok(())
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::P256;

    fn run(ctx: &mut Context<'_>) -> Outcome {
        loop {
            match ctx.step(64) {
                Outcome::Continue => {}
                other => return other,
            }
        }
    }

    #[test]
    fn deterministic_generation_known_answer() {
        let mut ctx = Context::new();
        ctx.generate_from_seed(&P256, &[0xaa; 32], b"sign").unwrap();
        assert_eq!(
            ctx.params.k.0,
            [0xea9e36fc40ce094c, 0x328cebe676da6a30, 0xf4da9cedcd2521a1, 0xc07c71f65f7bb24b]
        );
        assert_eq!(
            ctx.params.z.0,
            [0x5fe349ed16cefd65, 0x464613827f17aa88, 0xaf149d947c119d7e, 0x2e65bb9630c27bfc]
        );
    }

    #[test]
    fn sign_known_answer() {
        let mut ctx = Context::new();
        // Inject the fixed nonce of the reference vector directly.
        ctx.params.k = Fe([
            0xb9670787642a68de, 0x3b4a6247824f5d33, 0xa280f245f9e93c7f, 0x94a1bbb14b906a61,
        ]);
        ctx.params.z = Fe::ONE;
        ctx.generated = true;

        let d = Fe([
            0x7b8a622b120f6721, 0x4e50c3db36e89b12, 0x6b5c215767b1d693, 0xc9afa9d845ba7516,
        ])
        .to_bytes_be();
        let e = Fe([
            0x62113d8a62add1bf, 0x1a831d0268e98915, 0xe2ade1d694f41fc7, 0xaf2bdbe1aa9b6ec1,
        ])
        .to_bytes_be();
        ctx.begin(&P256, Inputs::Sign { digest: &e, private_key: &d }).unwrap();
        assert_eq!(run(&mut ctx), Outcome::Done);

        let sig = match ctx.result().unwrap() {
            Output::Signature(sig) => sig,
            other => panic!("unexpected output {:?}", other),
        };
        assert_eq!(
            Fe::from_bytes_be(&sig.r).0,
            [0xcabb5e6f79c8c2ac, 0x2afd6b1f6a555a7a, 0x8843e3d6629527ed, 0xf3ac8061b514795b]
        );
        assert_eq!(
            Fe::from_bytes_be(&sig.s).0,
            [0x6ae9c374f0070a4d, 0x4d9c264d209b7c85, 0x4aa5b9b25de14d07, 0x20715828913752af]
        );
    }

    #[test]
    fn sign_with_boundary_nonce() {
        // Nonce n - 1 sends the ladder's second register to infinity;
        // the signature must still come out over x(-G) = x(G).
        let mut ctx = Context::new();
        ctx.params.k = P256.order.sub(&Fe::ZERO, &Fe::ONE);
        ctx.params.z = Fe::ONE;
        ctx.generated = true;

        let d = [0x37; 32];
        let e = [0x11; 32];
        ctx.begin(&P256, Inputs::Sign { digest: &e, private_key: &d }).unwrap();
        assert_eq!(run(&mut ctx), Outcome::Done);
        let sig = match ctx.result().unwrap() {
            Output::Signature(sig) => sig,
            other => panic!("unexpected output {:?}", other),
        };
        // x(-G) = x(G), and Gx < n, so r is exactly Gx.
        assert_eq!(sig.r, P256.gx.to_bytes_be());

        ctx.abandon();
        ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }).unwrap();
        assert_eq!(run(&mut ctx), Outcome::Done);
        let q = match ctx.result().unwrap() {
            Output::Point(q) => q,
            other => panic!("unexpected output {:?}", other),
        };
        ctx.abandon();
        ctx.begin(&P256, Inputs::Verify { digest: &e, public_key: &q, signature: &sig })
            .unwrap();
        assert_eq!(run(&mut ctx), Outcome::Done);
        assert_eq!(ctx.result(), Ok(Output::Verified(true)));
    }

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand_core::Error> {
            Err(rand_core::Error::from(
                core::num::NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap(),
            ))
        }
    }

    impl CryptoRng for FailingRng {}

    #[test]
    fn failed_generation_produces_no_params() {
        let mut ctx = Context::new();
        assert_eq!(ctx.generate(&P256, &mut FailingRng), Err(Error::EntropyFailure));
        assert!(!ctx.generated);
        assert_eq!(ctx.params.k.0, [0; 4]);

        let d = [0x01; 32];
        let e = [0x02; 32];
        assert_eq!(
            ctx.begin(&P256, Inputs::Sign { digest: &e, private_key: &d }),
            Err(Error::InvalidState)
        );

        // A failed attempt also invalidates previously generated
        // parameters.
        ctx.generate_from_seed(&P256, &[0x55; 32], b"").unwrap();
        assert_eq!(ctx.generate_from_seed(&P256, &[], b""), Err(Error::EntropyFailure));
        assert!(!ctx.generated);
        assert_eq!(
            ctx.begin(&P256, Inputs::Sign { digest: &e, private_key: &d }),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn sign_requires_generated_nonce() {
        let mut ctx = Context::new();
        let d = [0x01; 32];
        let e = [0x02; 32];
        assert_eq!(
            ctx.begin(&P256, Inputs::Sign { digest: &e, private_key: &d }),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn invalid_scalars_rejected() {
        let mut ctx = Context::new();
        let zero = [0u8; 32];
        assert_eq!(
            ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &zero }),
            Err(Error::InvalidInput)
        );
        let order = P256.order.m.to_bytes_be();
        assert_eq!(
            ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &order }),
            Err(Error::InvalidInput)
        );
    }

    #[test]
    fn verify_rejects_zero_signature_components() {
        let mut ctx = Context::new();
        let q = AffinePoint {
            x: P256.gx.to_bytes_be(),
            y: P256.gy.to_bytes_be(),
        };
        let digest = [0x11; 32];
        let sig = Signature { r: [0u8; 32], s: [0x01; 32] };
        assert_eq!(
            ctx.begin(&P256, Inputs::Verify { digest: &digest, public_key: &q, signature: &sig }),
            Err(Error::InvalidInput)
        );
    }

    #[test]
    fn step_on_idle_context_fails() {
        let mut ctx = Context::new();
        assert_eq!(ctx.step(1), Outcome::Failed(Error::InvalidState));
    }

    #[test]
    fn step_after_completion_fails() {
        let mut ctx = Context::new();
        let d = [0x37; 32];
        ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }).unwrap();
        assert_eq!(run(&mut ctx), Outcome::Done);
        assert!(ctx.result().is_ok());
        assert_eq!(ctx.step(1), Outcome::Failed(Error::InvalidState));
        // The result stays readable after the failed step.
        assert!(ctx.result().is_ok());
    }

    #[test]
    fn params_untouched_while_running() {
        let mut ctx = Context::new();
        let d = [0x37; 32];
        ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }).unwrap();
        let k0 = ctx.params.k.0;
        assert_eq!(ctx.step(17), Outcome::Continue);
        assert_eq!(ctx.params.k.0, k0);
        assert_eq!(run(&mut ctx), Outcome::Done);
        assert_eq!(ctx.params.k.0, k0);
    }

    #[test]
    fn begin_while_running_fails() {
        let mut ctx = Context::new();
        let d = [0x37; 32];
        ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }).unwrap();
        ctx.step(1);
        assert_eq!(
            ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn result_before_completion_fails() {
        let mut ctx = Context::new();
        let d = [0x37; 32];
        ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &d }).unwrap();
        ctx.step(1);
        assert_eq!(ctx.result(), Err(Error::InvalidState));
    }
}
