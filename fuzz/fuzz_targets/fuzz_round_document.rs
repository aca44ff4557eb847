#![no_main]

use libfuzzer_sys::fuzz_target;
use pass_pong::Round;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Round>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(round) = serde_json::from_str::<Round>(s) {
            let _ = round.is_expired(i64::MAX, u64::MAX);
            let _ = round.is_expired(i64::MIN, 0);
        }
    }
});
