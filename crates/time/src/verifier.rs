//! Verification of [`TimeSig`]s.
//!
//! Verification is total: every input, however malformed, yields `true` or
//! `false` and nothing else.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use tracing::debug;

use crate::clock::ClockReader;
use crate::config::TimeConfig;
use crate::timesig::{signed_message, validate_digest, TimeSig};

/// How far ahead of the corrected clock a signed time may lie.
pub const DEFAULT_PLAUSIBILITY_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Public-key signature check over raw bytes.
pub trait SignatureScheme: Send + Sync {
    /// `false` for any malformed key or signature.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool;
}

/// Ed25519 with strict (non-malleable) verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let Ok(public_key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(public_key) = VerifyingKey::from_bytes(&public_key_bytes) else {
            return false;
        };

        let signature = Signature::from_bytes(&signature_bytes);
        public_key.verify_strict(message, &signature).is_ok()
    }
}

/// Checks `(digest, TimeSig, public_key)` triples against a clock.
#[derive(Debug, Clone)]
pub struct TimestampVerifier<S = Ed25519Scheme> {
    clock: ClockReader,
    tolerance: chrono::Duration,
    scheme: S,
}

impl TimestampVerifier<Ed25519Scheme> {
    pub fn new(clock: ClockReader) -> Self {
        Self::with_scheme(clock, Ed25519Scheme)
    }

    pub fn from_config(config: &TimeConfig, clock: ClockReader) -> Self {
        Self::new(clock).with_tolerance(config.plausibility_tolerance())
    }
}

impl<S: SignatureScheme> TimestampVerifier<S> {
    pub fn with_scheme(clock: ClockReader, scheme: S) -> Self {
        Self {
            clock,
            tolerance: chrono::Duration::seconds(DEFAULT_PLAUSIBILITY_TOLERANCE.as_secs() as i64),
            scheme,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn tolerance(&self) -> chrono::Duration {
        self.tolerance
    }

    /// `true` only if `sig` was produced for exactly this `digest` by the
    /// holder of `public_key`, at a time not implausibly far in the future.
    pub fn verify(&self, digest: &[u8], sig: &TimeSig, public_key: &[u8]) -> bool {
        if let Err(reason) = validate_digest(digest) {
            debug!(%reason, "rejecting TimeSig: bad digest");
            return false;
        }
        if !self.is_plausible(sig.time) {
            debug!(time = %sig.time, "rejecting TimeSig: time is in the future");
            return false;
        }

        let message = signed_message(digest, sig.time);
        let valid = self.scheme.verify(&message, &sig.signature, public_key);
        if !valid {
            debug!(time = %sig.time, "rejecting TimeSig: signature mismatch");
        }
        valid
    }

    /// A signed time is plausible unless it lies more than the tolerance
    /// beyond the corrected clock.
    pub fn is_plausible(&self, time: DateTime<Utc>) -> bool {
        match self.clock.now().checked_add_signed(self.tolerance) {
            Some(latest) => time <= latest,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockContext, FixedWallClock};
    use crate::signer::LocalAuthority;
    use chrono::TimeZone;
    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;
    use std::sync::Arc;

    const SEED: [u8; 32] = [42u8; 32];
    const DIGEST: [u8; 32] = [0x5Au8; 32];

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 15, 46, 52).unwrap()
    }

    fn clock_at(at: DateTime<Utc>) -> ClockReader {
        Arc::new(ClockContext::new(Arc::new(FixedWallClock::new(at)))).reader()
    }

    fn signed() -> (TimeSig, [u8; 32]) {
        let authority = LocalAuthority::from_seed(&SEED, clock_at(anchor()));
        let sig = TimeSig::from(authority.sign_now(&DIGEST).unwrap());
        (sig, authority.public_key_bytes())
    }

    fn verifier() -> TimestampVerifier {
        TimestampVerifier::new(clock_at(anchor()))
    }

    #[test]
    fn genuine_signature_verifies_repeatedly() {
        let (sig, public_key) = signed();
        let verifier = verifier();
        assert!(verifier.verify(&DIGEST, &sig, &public_key));
        assert!(verifier.verify(&DIGEST, &sig, &public_key));
    }

    #[test]
    fn wrong_key_fails() {
        let (sig, _) = signed();
        let other = SigningKey::from_bytes(&[1u8; 32]).verifying_key().to_bytes();
        assert!(!verifier().verify(&DIGEST, &sig, &other));
    }

    #[test]
    fn every_digest_byte_is_bound() {
        let (sig, public_key) = signed();
        let verifier = verifier();
        for i in 0..DIGEST.len() {
            let mut tampered = DIGEST;
            tampered[i] ^= 0x01;
            assert!(!verifier.verify(&tampered, &sig, &public_key), "digest byte {i}");
        }
    }

    #[test]
    fn every_signature_byte_is_bound() {
        let (sig, public_key) = signed();
        let verifier = verifier();
        for i in 0..sig.signature.len() {
            let mut tampered = sig.clone();
            tampered.signature[i] ^= 0x80;
            assert!(!verifier.verify(&DIGEST, &tampered, &public_key), "signature byte {i}");
        }
    }

    #[test]
    fn every_encoded_time_byte_is_bound() {
        let (sig, public_key) = signed();
        let verifier = verifier();
        for byte in 0..8 {
            let mut encoded = sig.time_us().to_be_bytes();
            encoded[byte] ^= 0x01;
            let Some(time) = DateTime::from_timestamp_micros(i64::from_be_bytes(encoded)) else {
                continue;
            };
            let tampered = TimeSig { time, ..sig.clone() };
            assert!(!verifier.verify(&DIGEST, &tampered, &public_key), "time byte {byte}");
        }
    }

    #[test]
    fn future_time_outside_tolerance_is_rejected() {
        let (sig, public_key) = signed();

        let lagging = TimestampVerifier::new(clock_at(anchor() - chrono::Duration::minutes(6)));
        assert!(!lagging.verify(&DIGEST, &sig, &public_key));

        let slightly_behind =
            TimestampVerifier::new(clock_at(anchor() - chrono::Duration::minutes(4)));
        assert!(slightly_behind.verify(&DIGEST, &sig, &public_key));

        let strict = TimestampVerifier::new(clock_at(anchor() - chrono::Duration::seconds(1)))
            .with_tolerance(Duration::ZERO);
        assert!(!strict.verify(&DIGEST, &sig, &public_key));
    }

    #[test]
    fn tolerance_comes_from_config() {
        let config = TimeConfig {
            plausibility_tolerance_secs: 30,
            ..TimeConfig::default()
        };
        let verifier = TimestampVerifier::from_config(&config, clock_at(anchor()));
        assert_eq!(verifier.tolerance(), chrono::Duration::seconds(30));
        assert_eq!(
            TimestampVerifier::new(clock_at(anchor())).tolerance(),
            chrono::Duration::minutes(5)
        );
    }

    #[test]
    fn old_signatures_stay_valid() {
        let (sig, public_key) = signed();
        let much_later = TimestampVerifier::new(clock_at(anchor() + chrono::Duration::days(3650)));
        assert!(much_later.verify(&DIGEST, &sig, &public_key));
    }

    #[test]
    fn malformed_inputs_fail_closed() {
        let (sig, public_key) = signed();
        let verifier = verifier();

        for len in [0usize, 1, 32, 63, 65, 128] {
            let truncated = TimeSig {
                signature: vec![0xAB; len],
                ..sig.clone()
            };
            assert!(!verifier.verify(&DIGEST, &truncated, &public_key));
        }
        assert!(!verifier.verify(&DIGEST, &sig, &[]));
        assert!(!verifier.verify(&DIGEST, &sig, &public_key[..31]));
        assert!(!verifier.verify(&[], &sig, &public_key));
        assert!(!verifier.verify(&[0u8; 65], &sig, &public_key));
    }

    #[test]
    fn unsigned_timesig_never_verifies() {
        let (_, public_key) = signed();
        let forged = TimeSig {
            time: anchor(),
            signature: Vec::new(),
            signer_key_id: None,
        };
        assert!(!verifier().verify(&DIGEST, &forged, &public_key));
    }

    #[test]
    fn signature_over_other_encoding_is_rejected() {
        // Signing the digest alone, without the time suffix, must not verify.
        let key = SigningKey::from_bytes(&SEED);
        let bare = key.sign(&DIGEST);
        let sig = TimeSig {
            time: anchor(),
            signature: bare.to_bytes().to_vec(),
            signer_key_id: None,
        };
        assert!(!verifier().verify(&DIGEST, &sig, &key.verifying_key().to_bytes()));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(
            digest in proptest::collection::vec(any::<u8>(), 0..80),
            signature in proptest::collection::vec(any::<u8>(), 0..100),
            public_key in proptest::collection::vec(any::<u8>(), 0..40),
            time_us in any::<i64>(),
        ) {
            let time = DateTime::from_timestamp_micros(time_us).unwrap_or(DateTime::UNIX_EPOCH);
            let sig = TimeSig { time, signature, signer_key_id: None };
            let _ = verifier().verify(&digest, &sig, &public_key);
        }
    }
}
