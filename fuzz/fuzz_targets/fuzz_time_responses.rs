#![no_main]
use libfuzzer_sys::fuzz_target;
use timetrust_time::daytime::parse_daytime;
use timetrust_time::http_date::parse_http_date;

// Untrusted server replies must parse or fail, never panic.
fuzz_target!(|data: &[u8]| {
    let _ = parse_daytime(data);

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_http_date(text);
    }
});
