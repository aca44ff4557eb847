#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Lobby membership, seat arbitration and host operations against the
//! in-memory store.

mod common;

use std::sync::Arc;

use pass_pong::{
    ClockSync, ErrorCode, LobbyClient, ManualClock, MemoryStore, PassPongError, SeatSlot,
    SessionConfig,
};

use common::{guest, host};

#[tokio::test]
async fn create_writes_default_lobby_and_presence() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;

    let lobby = h.lobby.snapshot().await.unwrap();
    assert!(lobby.is_host("h"));
    assert_eq!(lobby.players["h"].name, "Host");
    assert_eq!(lobby.seats.len(), 5);
    assert!(lobby.seats.values().all(SeatSlot::is_empty));
    assert!(!lobby.game_started);

    let presence = store
        .snapshot(&format!("presence/{}", h.lobby.code()))
        .unwrap();
    assert_eq!(presence, serde_json::json!({ "h": true }));
}

#[tokio::test]
async fn join_normalizes_code_and_keeps_existing_name() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let code = h.lobby.code().to_string().to_lowercase();

    let g = guest(&store, &format!("  {code} "), "g", SessionConfig::default()).await;
    assert_eq!(g.lobby.snapshot().await.unwrap().players["g"].name, "Player");
    g.lobby.rename("  Gus ").await.unwrap();

    let again = guest(&store, &code, "g", SessionConfig::default()).await;
    assert_eq!(again.lobby.snapshot().await.unwrap().players["g"].name, "Gus");
}

#[tokio::test]
async fn join_unknown_or_invalid_code_fails() {
    let store = MemoryStore::new();
    let conn = Arc::new(store.connect());
    let clock = ClockSync::with_fixed_offset(Arc::new(ManualClock::new(0)), 0);

    let err = LobbyClient::join(conn.clone(), clock.clone(), "ZZZZZZ", "g", SessionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::LobbyNotFound);
    // No stub lobby is left behind.
    assert_eq!(store.snapshot("lobbies/ZZZZZZ"), None);

    let err = LobbyClient::join(conn, clock, "nope", "g", SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PassPongError::InvalidLobbyCode(_)));
}

#[tokio::test]
async fn rename_rejects_blank_names() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    assert!(matches!(
        h.lobby.rename("   ").await,
        Err(PassPongError::InvalidName)
    ));
}

#[tokio::test]
async fn seat_conflicts_and_blocking() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(10_000));
    let h = host(&store, "h", SessionConfig::default()).await;
    let conn = Arc::new(store.connect());
    let g = LobbyClient::join(
        conn,
        ClockSync::with_fixed_offset(clock.clone(), 0),
        h.lobby.code().as_str(),
        "g",
        SessionConfig::default(),
    )
    .await
    .unwrap();

    h.lobby.sit(1).await.unwrap();
    assert!(matches!(
        g.sit(1).await,
        Err(PassPongError::SeatTaken { seat: 1 })
    ));
    assert!(matches!(
        g.sit(9).await,
        Err(PassPongError::NoSuchSeat { seat: 9 })
    ));

    g.sit(2).await.unwrap();
    g.unseat().await.unwrap();
    assert!(matches!(
        g.sit(3).await,
        Err(PassPongError::SeatBlocked { until: 13_000 })
    ));
    clock.advance(std::time::Duration::from_secs(3));
    g.sit(3).await.unwrap();

    let lobby = h.lobby.snapshot().await.unwrap();
    assert_eq!(lobby.seat_of("g"), Some(3));
    assert_eq!(lobby.seats[&2], SeatSlot::Empty);
}

#[tokio::test]
async fn host_only_operations_are_refused_to_guests() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let g = guest(&store, h.lobby.code().as_str(), "g", SessionConfig::default()).await;

    for result in [
        g.lobby.kick("h").await,
        g.lobby.unseat_player("h").await,
        g.lobby.set_seat_count(3).await,
        g.lobby.start_game().await,
        g.lobby.close().await,
    ] {
        assert!(matches!(result, Err(PassPongError::NotHost)));
    }
    tokio_test::assert_ok!(h.lobby.snapshot().await);
}

#[tokio::test]
async fn kick_and_forced_unseat() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let code = h.lobby.code().to_string();
    let a = guest(&store, &code, "a", SessionConfig::default()).await;
    let b = guest(&store, &code, "b", SessionConfig::default()).await;
    a.lobby.sit(2).await.unwrap();
    b.lobby.sit(3).await.unwrap();

    h.lobby.unseat_player("a").await.unwrap();
    h.lobby.kick("b").await.unwrap();

    let lobby = h.lobby.snapshot().await.unwrap();
    assert_eq!(lobby.seat_of("a"), None);
    assert!(lobby.players["a"].blocked_until.is_some());
    assert!(!lobby.players.contains_key("b"));
    assert_eq!(lobby.seats[&3], SeatSlot::Empty);

    assert!(matches!(
        h.lobby.kick("h").await,
        Err(PassPongError::HostCannotLeave)
    ));
}

#[tokio::test]
async fn seat_count_bounds_and_shrinking() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let g = guest(&store, h.lobby.code().as_str(), "g", SessionConfig::default()).await;
    g.lobby.sit(5).await.unwrap();

    for bad in [0, 13] {
        assert!(matches!(
            h.lobby.set_seat_count(bad).await,
            Err(PassPongError::InvalidSeatCount { max: 12, .. })
        ));
    }

    h.lobby.set_seat_count(2).await.unwrap();
    let lobby = h.lobby.snapshot().await.unwrap();
    assert_eq!(lobby.seats.len(), 2);
    assert_eq!(lobby.seat_of("g"), None);
    assert_eq!(lobby.players["g"].seat, None);
}

#[tokio::test]
async fn start_game_needs_every_seat() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let g = guest(&store, h.lobby.code().as_str(), "g", SessionConfig::default()).await;
    h.lobby.set_seat_count(2).await.unwrap();
    h.lobby.sit(1).await.unwrap();

    assert!(matches!(
        h.lobby.start_game().await,
        Err(PassPongError::SeatsNotFilled)
    ));
    g.lobby.sit(2).await.unwrap();
    h.lobby.start_game().await.unwrap();
    assert!(matches!(
        h.lobby.start_game().await,
        Err(PassPongError::GameAlreadyStarted)
    ));
    assert!(g.lobby.snapshot().await.unwrap().game_started);
}

#[tokio::test]
async fn leave_and_close() {
    let store = MemoryStore::new();
    let h = host(&store, "h", SessionConfig::default()).await;
    let code = h.lobby.code().to_string();
    let g = guest(&store, &code, "g", SessionConfig::default()).await;
    g.lobby.sit(1).await.unwrap();

    assert!(matches!(
        h.lobby.leave().await,
        Err(PassPongError::HostCannotLeave)
    ));

    g.lobby.leave().await.unwrap();
    let lobby = h.lobby.snapshot().await.unwrap();
    assert!(!lobby.players.contains_key("g"));
    assert_eq!(lobby.seats[&1], SeatSlot::Empty);
    assert_eq!(
        store.snapshot(&format!("presence/{code}")),
        Some(serde_json::json!({ "h": true }))
    );

    h.lobby.close().await.unwrap();
    assert_eq!(store.snapshot(&format!("lobbies/{code}")), None);
    assert!(matches!(
        h.lobby.snapshot().await,
        Err(PassPongError::LobbyNotFound { .. })
    ));
}
