use super::*;
use crate::state::{SessionHandle, SessionInbox};
use crate::state::test_helpers::{MANAGER, assert_channel_empty, assert_channel_has_frame, dot, drain_frames, test_session};
use frames::message::{SYSCALL_CLEAR, SYSCALL_KICK, SYSCALL_OPEN, SYSCALL_QUIT, SYSCALL_SHAPE, SYSCALL_USERS};

/// Register `names` in order and throw away the join-time roster frames.
async fn join_all(board: &BoardCoordinator, names: &[&str]) -> Vec<SessionInbox> {
    let mut inboxes = Vec::new();
    for name in names {
        let (handle, inbox) = test_session(name);
        board.register(handle).await.expect("register");
        inboxes.push(inbox);
    }
    for inbox in &mut inboxes {
        drain_frames(&mut inbox.frames);
    }
    inboxes
}

fn message(frame: &Frame) -> Message {
    Message::from_frame(frame).expect("protocol message")
}

#[tokio::test]
async fn shape_reaches_everyone_but_the_sender_and_clear_empties_the_board() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["a", "b", "c"]).await;
    let (a, c) = (inboxes[0].id, inboxes[2].id);

    assert!(board.add_shape(dot(1.0, 1.0), a).await);
    for inbox in &mut inboxes[1..] {
        let frame = assert_channel_has_frame(&mut inbox.frames).await;
        assert_eq!(frame.syscall, SYSCALL_SHAPE);
        assert_eq!(frame.from.as_deref(), Some("a"));
        assert_eq!(message(&frame), Message::Shape(dot(1.0, 1.0)));
        assert_channel_empty(&mut inbox.frames).await;
    }
    assert_channel_empty(&mut inboxes[0].frames).await;

    assert!(board.clear_all(c).await);
    for inbox in &mut inboxes[..2] {
        let frame = assert_channel_has_frame(&mut inbox.frames).await;
        assert_eq!(frame.syscall, SYSCALL_CLEAR);
    }
    assert_channel_empty(&mut inboxes[2].frames).await;
    assert!(board.shapes().await.is_empty());
}

#[tokio::test]
async fn clear_then_add_leaves_exactly_that_shape() {
    let board = BoardCoordinator::new();
    let inboxes = join_all(&board, &["a"]).await;
    let a = inboxes[0].id;

    board.add_shape(dot(0.0, 0.0), a).await;
    board.add_shape(dot(5.0, 5.0), a).await;
    board.clear_all(a).await;
    board.add_shape(dot(9.0, 9.0), a).await;

    assert_eq!(board.shapes().await, vec![dot(9.0, 9.0)]);
}

#[tokio::test]
async fn newcomer_gets_roster_then_history_and_nobody_else_gets_history() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["a"]).await;
    board.add_shape(dot(1.0, 2.0), inboxes[0].id).await;

    let (late, mut late_inbox) = test_session("late");
    board.register(late).await.expect("register");

    let roster = assert_channel_has_frame(&mut late_inbox.frames).await;
    assert_eq!(message(&roster), Message::UserList { usernames: vec!["a".into(), "late".into()] });
    let history = assert_channel_has_frame(&mut late_inbox.frames).await;
    assert_eq!(message(&history), Message::Open { shapes: vec![dot(1.0, 2.0)] });

    let a_roster = assert_channel_has_frame(&mut inboxes[0].frames).await;
    assert_eq!(a_roster.syscall, SYSCALL_USERS);
    assert_channel_empty(&mut inboxes[0].frames).await;
}

#[tokio::test]
async fn empty_board_sends_no_history() {
    let board = BoardCoordinator::new();
    let (handle, mut inbox) = test_session("solo");
    board.register(handle).await.expect("register");

    assert_eq!(assert_channel_has_frame(&mut inbox.frames).await.syscall, SYSCALL_USERS);
    assert_channel_empty(&mut inbox.frames).await;
}

#[tokio::test]
async fn duplicate_username_is_rejected_without_side_effects() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["alice"]).await;

    let (dup, _dup_inbox) = test_session("alice");
    let err = board.register(dup).await.expect_err("duplicate");
    assert!(matches!(err, RegisterError::UsernameTaken(ref name) if name == "alice"));
    assert_eq!(err.error_code(), "E_USERNAME_TAKEN");

    assert_eq!(board.session_count().await, 1);
    assert_channel_empty(&mut inboxes[0].frames).await;
}

#[tokio::test]
async fn concurrent_identical_joins_admit_exactly_one() {
    let board = BoardCoordinator::new();
    let (first, _i1) = test_session("twin");
    let (second, _i2) = test_session("twin");

    let (r1, r2) = tokio::join!(board.register(first), board.register(second));
    assert_eq!(usize::from(r1.is_ok()) + usize::from(r2.is_ok()), 1);
    assert_eq!(board.user_list_snapshot().await, vec!["twin"]);
}

#[tokio::test]
async fn user_list_is_broadcast_on_join_and_leave() {
    let board = BoardCoordinator::new();
    let (a, mut a_inbox) = test_session("a");
    board.register(a).await.expect("a");
    assert_eq!(message(&assert_channel_has_frame(&mut a_inbox.frames).await), Message::UserList { usernames: vec!["a".into()] });

    let (b, b_inbox) = test_session("b");
    board.register(b).await.expect("b");
    assert_eq!(
        message(&assert_channel_has_frame(&mut a_inbox.frames).await),
        Message::UserList { usernames: vec!["a".into(), "b".into()] }
    );

    assert!(board.unregister(b_inbox.id).await);
    assert_eq!(message(&assert_channel_has_frame(&mut a_inbox.frames).await), Message::UserList { usernames: vec!["a".into()] });

    assert!(!board.unregister(b_inbox.id).await, "second unregister is a no-op");
    assert_channel_empty(&mut a_inbox.frames).await;
}

#[tokio::test]
async fn kick_notifies_closes_and_updates_roster() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &[MANAGER, "bob"]).await;

    assert!(board.kick("bob").await);

    let bob = &mut inboxes[1];
    let hangup = bob.closed.borrow().clone();
    assert!(hangup.is_requested());
    let notice = hangup.final_frame().expect("kick notice");
    assert_eq!(notice.syscall, SYSCALL_KICK);
    assert_eq!(message(notice), Message::Kick { username: "bob".into() });
    assert!(drain_frames(&mut bob.frames).is_empty());

    let roster = assert_channel_has_frame(&mut inboxes[0].frames).await;
    assert_eq!(message(&roster), Message::UserList { usernames: vec![MANAGER.into()] });
}

#[tokio::test]
async fn kicking_an_absent_user_changes_nothing() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["a", "b"]).await;
    board.add_shape(dot(3.0, 3.0), inboxes[0].id).await;
    drain_frames(&mut inboxes[1].frames);

    assert!(!board.kick("ghost").await);

    for inbox in &mut inboxes {
        assert_channel_empty(&mut inbox.frames).await;
        assert!(!inbox.closed.borrow().is_requested());
    }
    assert_eq!(board.user_list_snapshot().await, vec!["a", "b"]);
    assert_eq!(board.shapes().await, vec![dot(3.0, 3.0)]);
}

#[tokio::test]
async fn kicked_session_can_no_longer_mutate_the_board() {
    let board = BoardCoordinator::new();
    let inboxes = join_all(&board, &["a", "b"]).await;
    board.kick("b").await;

    assert!(!board.add_shape(dot(1.0, 1.0), inboxes[1].id).await);
    assert!(!board.clear_all(inboxes[1].id).await);
    assert!(board.shapes().await.is_empty());
}

#[tokio::test]
async fn open_board_sends_clear_then_full_board() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["a", "b"]).await;
    let a = inboxes[0].id;
    board.add_shape(dot(0.0, 0.0), a).await;
    drain_frames(&mut inboxes[1].frames);

    let replacement = vec![dot(1.0, 1.0), dot(2.0, 2.0)];
    assert!(board.open_board(replacement.clone(), a).await);

    let peer = &mut inboxes[1];
    let clear = assert_channel_has_frame(&mut peer.frames).await;
    let open = assert_channel_has_frame(&mut peer.frames).await;
    assert_eq!(clear.syscall, SYSCALL_CLEAR);
    assert_eq!(open.syscall, SYSCALL_OPEN);
    assert_eq!(message(&open), Message::Open { shapes: replacement.clone() });
    assert!(clear.seq < open.seq);

    assert_channel_empty(&mut inboxes[0].frames).await;
    assert_eq!(board.shapes().await, replacement);
}

#[tokio::test]
async fn replace_appends_in_order() {
    let board = BoardCoordinator::new();
    let inboxes = join_all(&board, &["a"]).await;
    let a = inboxes[0].id;

    board.clear_all(a).await;
    board.replace_shapes(vec![dot(1.0, 0.0), dot(2.0, 0.0)], a).await;
    assert_eq!(board.shapes().await, vec![dot(1.0, 0.0), dot(2.0, 0.0)]);
}

#[tokio::test]
async fn chat_reaches_everyone_including_the_originator() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["a", "b"]).await;

    board.broadcast_chat("a: hello").await;
    for inbox in &mut inboxes {
        let frame = assert_channel_has_frame(&mut inbox.frames).await;
        assert_eq!(message(&frame), Message::Chat { text: "a: hello".into() });
    }
}

#[tokio::test]
async fn shutdown_notifies_everyone_but_the_manager_exactly_once() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &[MANAGER, "x", "y"]).await;

    assert_eq!(board.shutdown_sessions(MANAGER).await, 2);
    assert_eq!(board.shutdown_sessions(MANAGER).await, 0);

    // The handles are gone now, so read what was queued instead of waiting.
    let manager = &mut inboxes[0];
    assert!(drain_frames(&mut manager.frames).is_empty());
    assert!(manager.closed.borrow().is_requested());
    assert!(manager.closed.borrow().final_frame().is_none());

    for inbox in &mut inboxes[1..] {
        assert!(drain_frames(&mut inbox.frames).iter().all(|f| f.syscall != SYSCALL_QUIT));
        let hangup = inbox.closed.borrow().clone();
        assert_eq!(hangup.final_frame().map(|f| f.syscall.as_str()), Some(SYSCALL_QUIT));
    }
    assert_eq!(board.session_count().await, 0);
}

#[tokio::test]
async fn terminal_notices_survive_a_full_outbound_queue() {
    let board = BoardCoordinator::new();
    let (manager, _manager_inbox) = test_session(MANAGER);
    board.register(manager).await.expect("manager");

    // Capacity 1: the join-time roster fills the queue and later roster
    // broadcasts are dropped.
    let (alice, alice_inbox) = SessionHandle::channel("alice", 1);
    board.register(alice).await.expect("alice");
    let (bob, bob_inbox) = SessionHandle::channel("bob", 1);
    board.register(bob).await.expect("bob");

    assert!(board.kick("bob").await);
    let kick = bob_inbox.closed.borrow().final_frame().cloned().expect("kick notice");
    assert_eq!(message(&kick), Message::Kick { username: "bob".into() });

    assert_eq!(board.shutdown_sessions(MANAGER).await, 1);
    let quit = alice_inbox.closed.borrow().final_frame().cloned().expect("quit notice");
    assert_eq!(quit.syscall, SYSCALL_QUIT);
}

#[tokio::test]
async fn departed_sessions_are_not_counted_as_notified() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &[MANAGER, "x", "y"]).await;
    drop(inboxes.pop());

    assert_eq!(board.shutdown_sessions(MANAGER).await, 1);
}

#[tokio::test]
async fn registration_fails_once_shutdown_began() {
    let board = BoardCoordinator::new();
    board.shutdown_sessions(MANAGER).await;

    let (late, _inbox) = test_session("late");
    let err = board.register(late).await.expect_err("closing");
    assert!(matches!(err, RegisterError::ShutdownInProgress));
    assert_eq!(board.session_count().await, 0);
}

#[tokio::test]
async fn concurrent_adds_keep_every_shape_and_per_sender_order() {
    let board = BoardCoordinator::new();
    let mut inboxes = join_all(&board, &["s0", "s1", "s2", "watcher"]).await;
    let senders: Vec<Uuid> = inboxes[..3].iter().map(|i| i.id).collect();

    let mut tasks = Vec::new();
    for (n, sender) in (0u32..).zip(senders.iter().copied()) {
        let board = board.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                board.add_shape(dot(f64::from(n), f64::from(i)), sender).await;
            }
        }));
    }
    for task in tasks {
        task.await.expect("sender task");
    }

    let shapes = board.shapes().await;
    assert_eq!(shapes.len(), 30);
    for n in 0..3 {
        let own: Vec<f64> = shapes
            .iter()
            .filter_map(|s| match s {
                Shape::Circle { origin, .. } if (origin.x - f64::from(n)).abs() < f64::EPSILON => Some(origin.y),
                _ => None,
            })
            .collect();
        assert_eq!(own, (0..10).map(f64::from).collect::<Vec<_>>());
    }

    // The watcher sees the same order the board applied, with rising seq.
    let seen = drain_frames(&mut inboxes[3].frames);
    let seen_shapes: Vec<Shape> = seen
        .iter()
        .map(|f| match message(f) {
            Message::Shape(shape) => shape,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(seen_shapes, shapes);
    assert!(seen.windows(2).all(|w| w[0].seq < w[1].seq));

    // No sender ever got its own shape back.
    for inbox in &mut inboxes[..3] {
        let own_id = inbox.id;
        let frames = drain_frames(&mut inbox.frames);
        let name = ["s0", "s1", "s2"][senders.iter().position(|s| *s == own_id).expect("sender")];
        assert!(frames.iter().all(|f| f.from.as_deref() != Some(name)));
    }
}
