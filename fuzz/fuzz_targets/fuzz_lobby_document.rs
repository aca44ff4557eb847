#![no_main]

use libfuzzer_sys::fuzz_target;
use pass_pong::{compute_order, Lobby};

fuzz_target!(|data: &[u8]| {
    let Ok(lobby) = serde_json::from_slice::<Lobby>(data) else {
        return;
    };

    // Whatever a browser wrote, the derived order must be usable.
    let order = compute_order(&lobby.seats);
    assert!(order.len() <= lobby.seats.len());
    let _ = lobby.all_seated_done();
    let _ = lobby.all_seats_filled();

    // Our own encoding has to read back the same.
    if let Ok(encoded) = serde_json::to_vec(&lobby) {
        let decoded = serde_json::from_slice::<Lobby>(&encoded);
        assert!(decoded.is_ok());
    }
});
