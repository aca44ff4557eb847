#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Wire-format tests: documents written by browser clients decode into the
//! typed records, and records we write keep the browser layout.

mod common;

use pass_pong::{
    compute_order, next_in_order, BallState, Direction, Lobby, PlayerRecord, Round, SeatSlot,
};
use serde_json::json;

use common::{browser_lobby_json, browser_round_json};

#[test]
fn browser_lobby_decodes() {
    let lobby: Lobby = serde_json::from_value(browser_lobby_json()).unwrap();

    assert!(lobby.is_host("host-1"));
    assert_eq!(lobby.players.len(), 3);
    assert_eq!(lobby.seats.len(), 5);
    assert_eq!(compute_order(&lobby.seats), vec!["host-1", "guest-3"]);
    assert!(!lobby.all_seats_filled());
    assert!(lobby.any_done());
    assert!(!lobby.all_seated_done());

    let guest = &lobby.players["guest-2"];
    assert_eq!(guest.seat, None);
    assert!(guest.is_blocked(1_700_000_008_999));
    assert!(!guest.is_blocked(1_700_000_009_000));
}

#[test]
fn browser_round_decodes() {
    let round: Round = serde_json::from_value(browser_round_json()).unwrap();
    assert_eq!(round.current_player, "guest-3");
    assert_eq!(round.round_duration, Some(84_211));
    assert_eq!(
        round.ball_state,
        Some(BallState {
            dx: -3.25,
            entry_side: Direction::Right
        })
    );
    assert!(!round.game_over);
}

#[test]
fn lobby_encodes_browser_layout() {
    let mut lobby = Lobby::new("h", PlayerRecord::new("Host", 5), 3);
    lobby.seats.insert(2, SeatSlot::Occupied("h".into()));
    lobby.players.get_mut("h").unwrap().seat = Some(2);

    let value = serde_json::to_value(&lobby).unwrap();
    assert_eq!(
        value,
        json!({
            "hostId": "h",
            "players": { "h": { "name": "Host", "joinedAt": 5, "seat": 2 } },
            "seats": { "1": 0, "2": "h", "3": 0 },
            "gameStarted": false
        })
    );
}

#[test]
fn decoded_seats_drive_rotation() {
    let lobby: Lobby = serde_json::from_value(json!({
        "hostId": "a",
        "players": {},
        "seats": { "12": "d", "2": "b", "1": "a", "7": "c", "3": "0" }
    }))
    .unwrap();
    let order = compute_order(&lobby.seats);
    assert_eq!(order, vec!["a", "b", "c", "d"]);
    assert_eq!(next_in_order(&order, "d", Direction::Left), "a");
    assert_eq!(next_in_order(&order, "a", Direction::Right), "d");
}

#[test]
fn malformed_documents_are_rejected() {
    assert!(serde_json::from_value::<Round>(json!({ "startTime": 1 })).is_err());
    assert!(serde_json::from_value::<Round>(json!({
        "currentPlayer": "a",
        "startTime": 1,
        "ballState": { "dx": 1.0, "entrySide": "up" }
    }))
    .is_err());
    assert!(serde_json::from_value::<Lobby>(json!({ "seats": { "one": "a" } })).is_err());
}
