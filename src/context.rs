// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! The fixed-size execution context.
//!
//! Every operation runs entirely inside one caller-allocated [`Context`]:
//! no allocation, no hidden state.  The context is a small always-live
//! parameter block plus a phase variant which is *either* generation
//! scratch *or* the use-phase bundle (point registers, the multiplication
//! operand, the incremental state tracker, and operation-specific
//! scratch).  Exactly one interpretation of each variant is valid at any
//! instant; the tags below are the Rust rendition of the original byte
//! overlays, and the layout tests at the bottom pin the byte budget of
//! each piece.
//!
//! The curve-arithmetic temporaries are the one deliberate asymmetry: they
//! are only ever live *between* suspension points, so they are built on the
//! stack inside a step and never stored.  Their 128 bytes are accounted to
//! the same slot the suspended state tracker occupies.

use subtle::Choice;

#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

use crate::curve::{CurveParams, FePair};
use crate::drbg::HmacDrbg;
use crate::errors::Error;
use crate::field::Fe;

/// Possibly-generated parameters: the operation's scalar `k` and the
/// projective blinding value `z`.  These bytes persist across the
/// generation-to-use transition and are never touched by use-phase
/// scratch.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Params {
    pub k: Fe,
    pub z: Fe,
}

/// Generation-phase scratch: the derivation engine plus the staging buffer
/// candidate bytes are drawn into before validity testing.
pub(crate) struct ParamGen {
    pub drbg: HmacDrbg,
    pub buf: [u8; GEN_BUF_BYTES],
}

/// The two point registers driven by the ladder and by the dual
/// multiplication-addition used for verification.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Registers {
    pub p1: FePair,
    pub p2: FePair,
}

/// Scratch for one atomic curve-arithmetic step.  Stack-allocated inside
/// `step`; never live while the operation is suspended.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Temporaries {
    pub t5: Fe,
    pub t6: Fe,
    pub t7: Fe,
    pub t8: Fe,
}

/// The externally supplied second operand: the point to multiply in ECDH
/// (or the generator during signing and public-key computation), or the
/// public key during verification.  Never mutated once an operation
/// begins.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct MultOperand {
    pub point: FePair,
}

/// Signing payload: the message digest and the private scalar.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct SignScratch {
    pub message: Fe,
    pub secret: Fe,
}

/// Verification payload common to all verification stages.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct VerifyCommon {
    pub qr: Fe,
}

/// Early verification payload: digest and signature `s`, consumed by the
/// InvS stage.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct VerifyEarly {
    pub message: Fe,
    pub qs: Fe,
}

/// Late verification payload: one scalar slot and the precomputed sum
/// point `G + Q` used by the dual ladder.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct VerifyLate {
    pub kg: Fe,
    pub pg: FePair,
}

/// The early and late payloads are mutually exclusive.
#[derive(Copy, Clone, Debug)]
pub(crate) enum VerifySub {
    Early(VerifyEarly),
    Late(VerifyLate),
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct VerifyScratch {
    pub common: VerifyCommon,
    pub sub: VerifySub,
}

/// Operation-specific payload, selected by the active operation.
#[derive(Copy, Clone, Debug)]
pub(crate) enum OpScratch {
    /// Point multiplication flavors carry no extra payload.
    Mult,
    Sign(SignScratch),
    Verify(VerifyScratch),
}

/// Small word-sized values saved across re-entries; the interpretation
/// follows the active stage.
#[derive(Copy, Clone, Debug)]
pub(crate) enum StageWords {
    /// Conditional-swap flag carried between ladder bits.
    Ladder { swap: Choice },
    /// Stages that need nothing beyond the loop index: Fermat inversion
    /// walking its public exponent, and the verification dual ladder.
    Loop,
    /// Verification outcome, written by the Test stage without branching.
    Outcome { accept: Choice },
}

/// The resumable state tracker: which stage the operation is in, the loop
/// index, the stage words, and a latched fault.  Lives exactly while the
/// operation is suspended between external re-entries.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SavedState {
    pub stage: u32,
    pub i: usize,
    pub words: StageWords,
    pub fault: Option<Error>,
}

/// The use-phase bundle: everything a running operation needs, plus the
/// borrowed curve table (immutable, must outlive the operation).
pub(crate) struct ParamUse<'c> {
    pub curve: &'c CurveParams,
    pub op: crate::incremental::Operation,
    pub arith: Registers,
    pub mult: MultOperand,
    pub state: SavedState,
    pub scratch: OpScratch,
}

/// Phase selection: generation scratch and the use bundle never coexist.
pub(crate) enum Phase<'c> {
    Idle,
    Gen(ParamGen),
    Use(ParamUse<'c>),
}

/// The caller-allocated context.  One context runs one operation at a
/// time; it may be reused for a new operation after the previous one
/// completes or is abandoned.  This core performs no implicit secret
/// wiping beyond what correctness demands; callers needing erasure use
/// the [`Zeroize`] impl explicitly.
pub struct Context<'c> {
    pub(crate) params: Params,
    /// Whether `params` holds freshly generated values not yet consumed
    /// by an operation.
    pub(crate) generated: bool,
    pub(crate) phase: Phase<'c>,
}

impl<'c> Context<'c> {
    /// A fresh, idle context.
    pub fn new() -> Context<'c> {
        Context {
            params: Params::default(),
            generated: false,
            phase: Phase::Idle,
        }
    }
}

impl<'c> Default for Context<'c> {
    fn default() -> Context<'c> {
        Context::new()
    }
}

#[cfg(feature = "zeroize")]
impl Zeroize for Context<'_> {
    fn zeroize(&mut self) {
        self.params.k.zeroize();
        self.params.z.zeroize();
        self.generated = false;
        match &mut self.phase {
            Phase::Idle => {}
            Phase::Gen(gen) => {
                gen.drbg.zeroize();
                gen.buf.zeroize();
            }
            Phase::Use(u) => {
                u.arith.p1.zeroize();
                u.arith.p2.zeroize();
                u.mult.point.zeroize();
                if let OpScratch::Sign(s) = &mut u.scratch {
                    s.message.zeroize();
                    s.secret.zeroize();
                }
            }
        }
        self.phase = Phase::Idle;
    }
}

// ------------------------------------------------------------------------
// Layout budget
// ------------------------------------------------------------------------

/// Bytes of raw candidate staging space: four elements.
pub(crate) const GEN_BUF_BYTES: usize = 4 * 32;

/// Reference byte budgets for a 32-byte element width, matching the
/// compact-memory layout this structure renders as tagged variants.
pub mod layout {
    /// Always-live parameter block.
    pub const PARAMS_BYTES: usize = 64;
    /// Two point registers.
    pub const REGISTERS_BYTES: usize = 128;
    /// Atomic-step temporaries; alias the suspended tracker's slot.
    pub const TEMPORARIES_BYTES: usize = 128;
    /// Fixed multiplication operand.
    pub const MULT_OPERAND_BYTES: usize = 64;
    /// Signing payload.
    pub const SIGN_BYTES: usize = 64;
    /// Verification payload: common part plus the larger sub-phase.
    pub const VERIFY_BYTES: usize = 32 + 96;
    /// The whole use-phase bundle.
    pub const USE_BUNDLE_BYTES: usize =
        REGISTERS_BYTES + MULT_OPERAND_BYTES + TEMPORARIES_BYTES + VERIFY_BYTES;
    /// Total context budget: params plus the larger phase arm.
    pub const CONTEXT_BYTES: usize = PARAMS_BYTES + USE_BUNDLE_BYTES;
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use core::mem::size_of;

    /// The tag-free storage structs must match the reference layout
    /// byte-for-byte; the tagged variants wrapping them are the only
    /// Rust-side addition, and the pointer-bearing tracker is excluded
    /// from the byte budget exactly as the original asserts.
    #[test]
    fn storage_sizes() {
        assert_eq!(size_of::<Params>(), layout::PARAMS_BYTES);
        assert_eq!(size_of::<Registers>(), layout::REGISTERS_BYTES);
        assert_eq!(size_of::<Temporaries>(), layout::TEMPORARIES_BYTES);
        assert_eq!(size_of::<MultOperand>(), layout::MULT_OPERAND_BYTES);
        assert_eq!(size_of::<SignScratch>(), layout::SIGN_BYTES);
        assert_eq!(size_of::<VerifyCommon>(), 32);
        assert_eq!(size_of::<VerifyEarly>(), 64);
        assert_eq!(size_of::<VerifyLate>(), 96);
    }

    #[test]
    fn context_budget_is_512() {
        assert_eq!(layout::USE_BUNDLE_BYTES, 448);
        assert_eq!(layout::CONTEXT_BYTES, 512);
        // The generation arm must fit inside the use arm so the phase
        // union never grows the context.
        assert!(size_of::<ParamGen>() <= layout::USE_BUNDLE_BYTES);
    }
}
