// -*- mode: rust; -*-
//
// This file is part of weierstrass-dalek.
// See LICENSE for licensing information.

//! HMAC-DRBG over SHA-256 (SP 800-90A), the derivation engine used during
//! parameter generation.
//!
//! The whole engine state is three fixed-size fields so that it fits inside
//! the context's generation scratch; nothing is allocated.  Deterministic
//! derivation (the HKDF-style path) is the same engine instantiated from a
//! seed with no nonce.

use hmac::{Hmac, Mac};
use sha2::Sha256;

#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

use crate::errors::Error;

type HmacSha256 = Hmac<Sha256>;

/// Number of generate calls permitted before the engine demands fresh
/// entropy (SP 800-90A reseed interval).
pub const RESEED_INTERVAL: u64 = 1 << 48;

/// An HMAC-DRBG instance.  `no_std`, no allocation, fixed-size state.
#[derive(Clone)]
pub struct HmacDrbg {
    k: [u8; 32],
    v: [u8; 32],
    reseed_counter: u64,
}

#[cfg(feature = "zeroize")]
impl Zeroize for HmacDrbg {
    fn zeroize(&mut self) {
        self.k.zeroize();
        self.v.zeroize();
        self.reseed_counter = 0;
    }
}

fn hmac(key: &[u8; 32], parts: &[&[u8]]) -> Result<[u8; 32], Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::EntropyFailure)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

impl HmacDrbg {
    /// Instantiate from entropy, a nonce, and a personalization string.
    pub fn new(entropy: &[u8], nonce: &[u8], personalization: &[u8]) -> Result<HmacDrbg, Error> {
        if entropy.is_empty() {
            return Err(Error::EntropyFailure);
        }
        let mut drbg = HmacDrbg {
            k: [0x00; 32],
            v: [0x01; 32],
            reseed_counter: 1,
        };
        drbg.update(entropy, nonce, personalization)?;
        Ok(drbg)
    }

    /// The HMAC_DRBG_Update function over the concatenation of the three
    /// provided-data slices.
    fn update(&mut self, p0: &[u8], p1: &[u8], p2: &[u8]) -> Result<(), Error> {
        let nonempty = !(p0.is_empty() && p1.is_empty() && p2.is_empty());
        self.k = hmac(&self.k, &[&self.v, &[0x00], p0, p1, p2])?;
        self.v = hmac(&self.k, &[&self.v])?;
        if nonempty {
            self.k = hmac(&self.k, &[&self.v, &[0x01], p0, p1, p2])?;
            self.v = hmac(&self.k, &[&self.v])?;
        }
        Ok(())
    }

    /// Mix fresh entropy into the state and reset the reseed counter.
    pub fn reseed(&mut self, entropy: &[u8]) -> Result<(), Error> {
        if entropy.is_empty() {
            return Err(Error::EntropyFailure);
        }
        self.update(entropy, &[], &[])?;
        self.reseed_counter = 1;
        Ok(())
    }

    /// Fill `out` with generated bytes.  Fails with `EntropyFailure` once
    /// the reseed interval is exhausted.
    pub fn generate(&mut self, out: &mut [u8]) -> Result<(), Error> {
        if self.reseed_counter > RESEED_INTERVAL {
            return Err(Error::EntropyFailure);
        }
        let mut filled = 0;
        while filled < out.len() {
            self.v = hmac(&self.k, &[&self.v])?;
            let take = core::cmp::min(32, out.len() - filled);
            out[filled..filled + take].copy_from_slice(&self.v[..take]);
            filled += take;
        }
        self.update(&[], &[], &[])?;
        self.reseed_counter += 1;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn exhaust(&mut self) {
        self.reseed_counter = RESEED_INTERVAL + 1;
    }
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_answer() {
        let entropy: [u8; 32] = core::array::from_fn(|i| i as u8);
        let nonce: [u8; 16] = core::array::from_fn(|i| 32 + i as u8);
        let mut drbg = HmacDrbg::new(&entropy, &nonce, b"weierstrass-dalek test").unwrap();

        let mut out = [0u8; 32];
        drbg.generate(&mut out).unwrap();
        assert_eq!(
            hex::encode(out),
            "d6684d58736b4e0425485e4aaa33b5fa3808e75f646c924d8b8a2d107380c409"
        );
        drbg.generate(&mut out).unwrap();
        assert_eq!(
            hex::encode(out),
            "11d3d8e66202992d3ffde4c4bfcb8bf4d05ee5587efd86dac6d628570046800b"
        );
    }

    #[test]
    fn empty_entropy_rejected() {
        assert!(HmacDrbg::new(&[], &[], &[]).is_err());
        assert!(HmacDrbg::new(&[0xaa; 32], &[], &[]).unwrap().reseed(&[]).is_err());
    }

    #[test]
    fn exhaustion_signals_entropy_failure() {
        let mut drbg = HmacDrbg::new(&[0xaa; 32], &[], &[]).unwrap();
        drbg.exhaust();
        let mut out = [0u8; 32];
        assert_eq!(drbg.generate(&mut out), Err(Error::EntropyFailure));
        // Reseeding recovers.
        drbg.reseed(&[0xbb; 32]).unwrap();
        assert!(drbg.generate(&mut out).is_ok());
    }
}
