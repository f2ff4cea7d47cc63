// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! Errors which may occur while driving an incremental curve operation.

use core::fmt;
use core::fmt::Display;

/// Errors reported by the incremental engine.
///
/// Every failure is an explicit value: no operation produces partial
/// output, and only the `Done` state of an operation exposes a result.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    /// A step was requested on a context which is not running an
    /// operation, whose operation already reached its terminal stage, or
    /// whose result was requested before completion.
    InvalidState,
    /// A scalar, point, or signature component was out of its valid
    /// range (zero, at infinity, or not below the group order) at a
    /// point where the operation cannot proceed.
    InvalidInput,
    /// The derivation engine signalled exhaustion or failure during
    /// parameter generation.  No parameters were produced.
    EntropyFailure,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidState => write!(f, "operation is not resumable in its current state"),
            Error::InvalidInput => write!(f, "input value is out of the valid range"),
            Error::EntropyFailure => write!(f, "derivation engine failed during generation"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
