//! TimeTrust time library
//!
//! Corrects the local clock against an authoritative UTC source and issues
//! verifiable signed timestamps over caller-held digests.
//!
//! # Features
//! - Ordered source chain: daytime protocol (port 13) first, HTTP `Date`
//!   header as fallback
//! - Lock-free corrected clock reads, single-flight sync rounds
//! - TimeSig: an authority signature over `digest || time_us`
//! - Fail-closed verification with a future-time plausibility window

pub mod clock;
pub mod config;
pub mod daytime;
pub mod error;
pub mod http_date;
pub mod signer;
pub mod source;
pub mod sync;
pub mod timesig;
pub mod verifier;

pub use clock::{
    global_context, now, now_us, offset, ClockContext, ClockReader, FixedWallClock,
    SystemWallClock, WallClock,
};
pub use config::{SourceConfig, TimeConfig};
pub use error::{ConfigError, SigningError, SyncUnavailable, TimeSourceError};
pub use signer::{
    AuthorityReceipt, HttpAuthority, LocalAuthority, SignRequest, SignResponse,
    TimestampAuthority, TimestampSigner,
};
pub use source::{TimeSource, TimeSourceClient, TimeSourceKind};
pub use sync::{sync, ClockSync, SyncOutcome, SyncReport};
pub use timesig::{digest_payload, signed_message, TimeSig};
pub use verifier::{Ed25519Scheme, SignatureScheme, TimestampVerifier};
