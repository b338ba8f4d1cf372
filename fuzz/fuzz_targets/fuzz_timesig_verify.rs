#![no_main]
use std::sync::Arc;

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use timetrust_time::{ClockContext, TimeSig, TimestampVerifier};

// Layout: [digest_len][time_us: 8][public_key: 32][digest][signature...]
fuzz_target!(|data: &[u8]| {
    let verifier = TimestampVerifier::new(Arc::new(ClockContext::system()).reader());

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(sig) = TimeSig::from_json(text) {
            let _ = verifier.verify(&[0u8; 32], &sig, &[0u8; 32]);
        }
    }

    if data.len() < 41 {
        return;
    }
    let digest_len = usize::from(data[0]);
    let mut time_us = [0u8; 8];
    time_us.copy_from_slice(&data[1..9]);
    let public_key = &data[9..41];
    let rest = &data[41..];
    let split = digest_len.min(rest.len());
    let (digest, signature) = rest.split_at(split);

    let time = DateTime::from_timestamp_micros(i64::from_be_bytes(time_us))
        .unwrap_or(DateTime::UNIX_EPOCH);
    let sig = TimeSig {
        time,
        signature: signature.to_vec(),
        signer_key_id: None,
    };
    let _ = verifier.verify(digest, &sig, public_key);
});
