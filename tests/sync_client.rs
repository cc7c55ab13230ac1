use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use banchess_sync::{
    Action, ActionKind, CloseFrame, ConnectionState, Delivery, Identity, LinkStatus,
    MemoryTransport, MessageKind, Role, SendActionError, ServerMessage, SyncClient, SyncConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn state_frame(game_id: &str, ply: u32, phase: &str) -> String {
    json!({
        "type": "state",
        "gameId": game_id,
        "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "players": {
            "white": {"id": "alice", "username": "Alice"},
            "black": {"id": "bob", "username": "Bob"}
        },
        "activePlayer": "black",
        "phase": phase,
        "ply": ply
    })
    .to_string()
}

fn connected_as(user_id: &str) -> (SyncClient, MemoryTransport) {
    let probe = MemoryTransport::new();
    let client = SyncClient::new(SyncConfig::new("ws://test"), probe.clone());
    client.connect(Identity::new(user_id, user_id));
    client.handle_open();
    client.handle_frame(&json!({"type": "authenticated", "userId": user_id}).to_string());
    probe.clear_frames();
    (client, probe)
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

#[test]
fn black_bans_then_is_blocked_in_move_phase() {
    let (client, probe) = connected_as("bob");
    client.handle_frame(&state_frame("g1", 0, "ban"));

    let ban: Action = "b:e2e4".parse().unwrap();
    assert_eq!(client.send_action("g1", ban), Ok(Delivery::Sent));
    assert_eq!(
        probe.frames_json(),
        vec![json!({"type": "action", "gameId": "g1", "action": "b:e2e4"})]
    );

    client.handle_frame(&state_frame("g1", 0, "move"));
    probe.clear_frames();

    let result = client.send_action("g1", ban);
    assert_eq!(
        result,
        Err(SendActionError::NotPermitted {
            game_id: "g1".to_string(),
            action: ActionKind::Ban,
            role: Role::Black,
        })
    );
    assert!(probe.frames().is_empty());
}

#[test]
fn state_without_phase_derives_it_from_ply() {
    let (client, probe) = connected_as("bob");
    let frame = json!({
        "type": "state",
        "gameId": "g2",
        "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "players": {"white": {"id": "alice"}, "black": {"id": "bob"}},
        "activePlayer": "black",
        "ply": 0,
        "gameOver": false,
        "inCheck": false,
        "history": []
    });
    client.handle_frame(&frame.to_string());

    assert!(client.game_state("g2").is_some());
    assert!(client.user_role("g2").can_ban);
    assert_eq!(client.send_action("g2", "b:e2e4".parse().unwrap()), Ok(Delivery::Sent));
    assert_eq!(probe.frame_types(), vec!["action"]);
}

#[test]
fn write_failure_does_not_reorder_sends() {
    let (client, probe) = connected_as("bob");

    probe.set_fail_sends(true);
    assert_eq!(client.join_queue(), Delivery::Queued);
    probe.set_fail_sends(false);
    assert_eq!(client.leave_queue(), Delivery::Sent);

    assert_eq!(probe.frame_types(), vec!["join-queue", "leave-queue"]);
}

#[test]
fn white_cannot_act_on_blacks_turn() {
    let (client, probe) = connected_as("alice");
    client.handle_frame(&state_frame("g1", 0, "ban"));

    let role = client.user_role("g1");
    assert_eq!(role.role, Role::White);
    assert!(!role.can_ban && !role.can_move);
    assert!(client.send_action("g1", "m:e2e4".parse().unwrap()).is_err());
    assert!(probe.frames().is_empty());
}

#[test]
fn stale_snapshot_is_ignored() {
    let (client, _probe) = connected_as("bob");
    client.handle_frame(&state_frame("g1", 5, "ban"));
    client.handle_frame(&state_frame("g1", 3, "move"));

    let state = client.game_state("g1").unwrap();
    assert_eq!(state.ply, 5);
    assert!(client.user_role("g1").can_ban);
}

#[test]
fn duplicate_message_ids_are_applied_once() {
    let (client, _probe) = connected_as("bob");
    let seen = Rc::new(RefCell::new(0));
    let s = Rc::clone(&seen);
    let _sub = client.subscribe(MessageKind::Queued, move |_| *s.borrow_mut() += 1);

    let frame = json!({"type": "queued", "position": 3, "messageId": "q-1"}).to_string();
    client.handle_frame(&frame);
    client.handle_frame(&frame);
    client.handle_frame(&json!({"type": "queued", "messageId": 7}).to_string());

    assert_eq!(*seen.borrow(), 2);
}

#[test]
fn offline_sends_flush_in_order_after_authentication() {
    let probe = MemoryTransport::new();
    let client = SyncClient::new(SyncConfig::new("ws://test"), probe.clone());

    assert_eq!(client.join_queue(), Delivery::Queued);
    assert_eq!(client.join_game("g7"), Delivery::Queued);
    assert_eq!(client.give_time("g7", 15), Delivery::Queued);
    assert!(probe.frames().is_empty());

    client.connect(Identity::new("bob", "Bob"));
    client.handle_open();

    assert_eq!(
        probe.frame_types(),
        vec!["authenticate", "join-queue", "join-game", "give-time"]
    );
}

#[test]
fn reconnect_backs_off_and_resets_on_open() {
    let probe = MemoryTransport::new();
    let client = SyncClient::new(SyncConfig::new("ws://test"), probe.clone());
    client.connect(Identity::new("bob", "Bob"));

    let mut delays = Vec::new();
    for _ in 0..6 {
        client.handle_close(CloseFrame::abnormal());
        delays.push(client.connection().pending_reconnect_delay().unwrap());
        client.poll_timers(far_future());
    }

    let expected: Vec<Duration> = [2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
    assert_eq!(delays, expected);
    assert_eq!(probe.opens().len(), 7);

    client.handle_open();
    assert_eq!(client.connection_state().reconnect_attempts, 0);
}

#[test]
fn reconnect_reauthenticates() {
    let (client, probe) = connected_as("bob");
    client.handle_close(CloseFrame::abnormal());
    assert!(!client.is_connected());

    client.poll_timers(far_future());
    client.handle_open();
    assert_eq!(probe.frame_types(), vec!["authenticate"]);
}

#[test]
fn disconnect_stops_reconnecting() {
    let (client, probe) = connected_as("bob");
    client.disconnect();
    client.handle_close(CloseFrame::normal());
    client.poll_timers(far_future());

    assert_eq!(probe.opens().len(), 1);
    assert_eq!(client.connection_state().status, LinkStatus::Disconnected);
}

#[test]
fn game_end_revokes_permissions() {
    let (client, _probe) = connected_as("bob");
    client.handle_frame(&state_frame("g1", 4, "ban"));

    let roles = Rc::new(RefCell::new(Vec::new()));
    let r = Rc::clone(&roles);
    let _sub = client.subscribe_to_role("g1", move |role| r.borrow_mut().push(role.can_ban));

    client.handle_frame(
        &json!({"type": "game-ended", "gameId": "g1", "result": "1-0", "reason": "resignation"})
            .to_string(),
    );

    assert_eq!(*roles.borrow(), vec![true, false]);
    let state = client.game_state("g1").unwrap();
    assert!(state.game_over);
    assert_eq!(state.result.as_deref(), Some("1-0"));
}

#[test]
fn panicking_listener_does_not_block_others() {
    let (client, _probe) = connected_as("bob");
    let reached = Rc::new(RefCell::new(Vec::new()));

    let _bad = client.subscribe_to_game("g1", |_| panic!("listener failure"));
    let r = Rc::clone(&reached);
    let _good = client.subscribe_to_game("g1", move |state| r.borrow_mut().push(state.ply));

    client.handle_frame(&state_frame("g1", 2, "ban"));
    client.handle_frame(&state_frame("g1", 3, "move"));
    assert_eq!(*reached.borrow(), vec![2, 3]);
}

#[test]
fn dropped_subscription_stops_delivery() {
    let (client, _probe) = connected_as("bob");
    let count = Rc::new(RefCell::new(0));
    let c = Rc::clone(&count);
    let sub = client.subscribe_to_game("g1", move |_| *c.borrow_mut() += 1);

    client.handle_frame(&state_frame("g1", 1, "ban"));
    drop(sub);
    client.handle_frame(&state_frame("g1", 2, "ban"));

    assert_eq!(*count.borrow(), 1);
    assert!(!client.games().is_observed("g1"));
}

#[test]
fn wildcard_sees_every_message() {
    let (client, _probe) = connected_as("bob");
    let kinds = Rc::new(RefCell::new(Vec::new()));
    let k = Rc::clone(&kinds);
    let _sub = client.subscribe(
        banchess_sync::Topic::All,
        move |msg: &ServerMessage| k.borrow_mut().push(msg.kind()),
    );

    client.handle_frame(&json!({"type": "matched", "gameId": "g9", "color": "white"}).to_string());
    client.handle_frame(&state_frame("g9", 0, "ban"));
    client.handle_frame(r#"{"type":"error","message":"nope"}"#);

    assert_eq!(
        *kinds.borrow(),
        vec![MessageKind::Matched, MessageKind::State, MessageKind::Error]
    );
}

#[test]
fn connection_state_listener_tracks_transitions() {
    let probe = MemoryTransport::new();
    let client = SyncClient::new(SyncConfig::new("ws://test"), probe);
    let states: Rc<RefCell<Vec<ConnectionState>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&states);
    let _sub = client.subscribe_to_connection_state(move |state| s.borrow_mut().push(state.clone()));

    client.connect(Identity::new("bob", "Bob"));
    client.handle_open();
    client.handle_frame(r#"{"type":"authenticated","userId":"bob"}"#);

    let statuses: Vec<LinkStatus> = states.borrow().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            LinkStatus::Disconnected,
            LinkStatus::Connecting,
            LinkStatus::Connected { authenticated: false },
            LinkStatus::Connected { authenticated: true },
        ]
    );
    assert!(states.borrow().last().unwrap().authenticated);
}
