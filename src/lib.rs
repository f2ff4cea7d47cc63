// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! An embeddable, zero-allocation, resumable elliptic curve engine for
//! short Weierstrass curves.
//!
//! Every operation (public-key computation, ECDH, arbitrary point
//! multiplication, ECDSA signing and verification) runs entirely inside a
//! caller-allocated [`Context`], decomposed into fixed-size units of work
//! so the caller decides how much latency each re-entry may cost:
//!
//! ```
//! use weierstrass_dalek::{Context, Error, Inputs, Outcome, Output, P256};
//!
//! # fn demo() -> Result<(), Error> {
//! let private_key = [0x37u8; 32];
//! let mut ctx = Context::new();
//! ctx.begin(&P256, Inputs::ComputePublicKey { private_key: &private_key })?;
//! loop {
//!     match ctx.step(16) {
//!         Outcome::Continue => { /* yield to other work */ }
//!         Outcome::Done => break,
//!         Outcome::Failed(e) => return Err(e),
//!     }
//! }
//! let public_key = match ctx.result()? {
//!     Output::Point(p) => p,
//!     _ => unreachable!(),
//! };
//! # let _ = public_key;
//! # Ok(())
//! # }
//! # demo().unwrap();
//! ```
//!
//! All arithmetic on secret values is constant time, built on the
//! [`subtle`] crate; unit boundaries are data-independent, so the
//! resumption schedule itself leaks nothing.  The crate is `no_std` with
//! no allocator requirement.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_docs)]

#[cfg(feature = "std")]
extern crate std;

//------------------------------------------------------------------------
// Modules
//------------------------------------------------------------------------

mod context;
mod curve;
mod drbg;
mod errors;
mod field;
mod incremental;
mod ladder;

//------------------------------------------------------------------------
// Re-exports
//------------------------------------------------------------------------

pub use crate::context::layout;
pub use crate::context::Context;
pub use crate::curve::{AffinePoint, CurveParams, Signature, P256, SECP256K1};
pub use crate::drbg::{HmacDrbg, RESEED_INTERVAL};
pub use crate::errors::Error;
pub use crate::incremental::{Inputs, Operation, Outcome, Output};
