//! End-to-end session lifecycle tests against a real PTY.
//!
//! `cat` stands in for the assistant binary: it echoes its input and stays
//! alive until killed, which is exactly the shape the manager expects.

use session_core::{
    CreateSessionParams, SessionError, SessionLimits, SessionManager, SessionManagerConfig,
    CLIENT_QUEUE_CAPACITY,
};
use std::path::PathBuf;
use std::time::Duration;
use terminal_proto::{ServerFrame, SessionPhase};
use tokio::sync::mpsc;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn test_manager(ttl: Duration, max_per_user: usize, max_total: usize) -> SessionManager {
    SessionManager::new(SessionManagerConfig {
        claude_path: "cat".to_string(),
        disconnected_ttl: ttl,
        limits: SessionLimits {
            max_per_user,
            max_total,
        },
    })
}

fn params(user: &str, workdir: PathBuf) -> CreateSessionParams {
    CreateSessionParams {
        user_email: user.to_string(),
        repo_id: "roots/demo".to_string(),
        branch: None,
        workdir,
        name: None,
        cols: Some(80),
        rows: Some(24),
    }
}

fn client_channel() -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
    mpsc::channel(CLIENT_QUEUE_CAPACITY)
}

async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("frame channel closed")
}

/// Drain frames until output containing `needle` has been observed.
async fn await_output_containing(rx: &mut mpsc::Receiver<ServerFrame>, needle: &str) -> String {
    let mut seen = String::new();
    loop {
        match recv_frame(rx).await {
            ServerFrame::Output { data } => {
                seen.push_str(&data);
                if seen.contains(needle) {
                    return seen;
                }
            }
            _ => continue,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn attach_new_observes_full_lifecycle_and_echo() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");

    match recv_frame(&mut rx).await {
        ServerFrame::Status {
            state, session_id, ..
        } => {
            assert_eq!(state, SessionPhase::Starting);
            assert_eq!(session_id.as_deref(), Some(session.id.as_str()));
        }
        other => panic!("expected starting status, got {other:?}"),
    }

    assert!(matches!(recv_frame(&mut rx).await, ServerFrame::Replay { .. }));

    // The running transition is broadcast once the spawn has completed.
    loop {
        match recv_frame(&mut rx).await {
            ServerFrame::Status { state, .. } => {
                assert_eq!(state, SessionPhase::Running);
                break;
            }
            ServerFrame::Output { .. } => continue,
            other => panic!("expected running status, got {other:?}"),
        }
    }

    manager
        .input(&session.id, b"hello\r".to_vec())
        .await
        .expect("input");
    await_output_containing(&mut rx, "hello").await;

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn reattach_replays_previous_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");

    // Wait until running, then feed input and watch the echo land.
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx).await
        {
            break;
        }
    }
    manager
        .input(&session.id, b"marker-42\r".to_vec())
        .await
        .expect("input");
    await_output_containing(&mut rx, "marker-42").await;

    manager.detach(&session.id, "client-1");

    let (tx2, mut rx2) = client_channel();
    manager
        .attach(&session.id, "u@x", "roots/demo", "client-2", tx2, None)
        .expect("reattach");

    match recv_frame(&mut rx2).await {
        ServerFrame::Status { state, .. } => assert_eq!(state, SessionPhase::Running),
        other => panic!("expected status first, got {other:?}"),
    }
    match recv_frame(&mut rx2).await {
        ServerFrame::Replay { data } => assert!(
            data.contains("marker-42"),
            "replay should contain earlier output, got {data:?}"
        ),
        other => panic!("expected replay second, got {other:?}"),
    }

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_reaches_all_attached_clients() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let (tx1, mut rx1) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx1)
        .expect("attach");
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx1).await
        {
            break;
        }
    }

    let (tx2, mut rx2) = client_channel();
    manager
        .attach(&session.id, "u@x", "roots/demo", "client-2", tx2, None)
        .expect("second attach");
    // Drain the second client's status + replay preamble.
    recv_frame(&mut rx2).await;
    recv_frame(&mut rx2).await;

    manager
        .input(&session.id, b"both\r".to_vec())
        .await
        .expect("input");

    await_output_containing(&mut rx1, "both").await;
    await_output_containing(&mut rx2, "both").await;

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn per_user_capacity_is_enforced_before_spawn() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 2, 20);

    let s1 = manager
        .create(params("u@x", temp.path().to_path_buf()))
        .expect("first");
    let s2 = manager
        .create(params("u@x", temp.path().to_path_buf()))
        .expect("second");

    let err = manager
        .create(params("u@x", temp.path().to_path_buf()))
        .expect_err("third must fail");
    assert!(matches!(err, SessionError::PerUserLimit(2)));

    // Another user is unaffected by the per-user cap.
    let s3 = manager
        .create(params("v@x", temp.path().to_path_buf()))
        .expect("other user");

    for id in [&s1.id, &s2.id, &s3.id] {
        manager.terminate(id).expect("terminate");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn global_capacity_is_enforced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 1);

    let s1 = manager
        .create(params("u@x", temp.path().to_path_buf()))
        .expect("first");
    let err = manager
        .create(params("v@x", temp.path().to_path_buf()))
        .expect_err("second must fail");
    assert!(matches!(err, SessionError::GlobalLimit(1)));

    manager.terminate(&s1.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn detach_is_idempotent_and_reap_fires_after_ttl() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_millis(200), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx).await
        {
            break;
        }
    }

    manager.detach(&session.id, "client-1");
    manager.detach(&session.id, "client-1");

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(
        manager.get(&session.id).is_none(),
        "session should be reaped after the disconnect TTL"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reattach_cancels_pending_reap() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_millis(300), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx).await
        {
            break;
        }
    }

    manager.detach(&session.id, "client-1");

    let (tx2, _rx2) = client_channel();
    manager
        .attach(&session.id, "u@x", "roots/demo", "client-2", tx2, None)
        .expect("reattach");

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(
        manager.get(&session.id).is_some(),
        "reattached session must not be reaped"
    );

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn terminate_broadcasts_final_status_and_removes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx).await
        {
            break;
        }
    }

    manager.terminate(&session.id).expect("terminate");

    loop {
        match recv_frame(&mut rx).await {
            ServerFrame::Status { state, message, .. } => {
                assert_eq!(state, SessionPhase::Exited);
                assert_eq!(message.as_deref(), Some("terminated"));
                break;
            }
            ServerFrame::Output { .. } => continue,
            other => panic!("expected exited status, got {other:?}"),
        }
    }

    assert!(manager.get(&session.id).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_clears_replay_and_reenters_starting() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let (tx, mut rx) = client_channel();

    let session = manager
        .attach_new(params("u@x", temp.path().to_path_buf()), "client-1", tx)
        .expect("attach");
    loop {
        if let ServerFrame::Status {
            state: SessionPhase::Running,
            ..
        } = recv_frame(&mut rx).await
        {
            break;
        }
    }
    manager
        .input(&session.id, b"before-restart\r".to_vec())
        .await
        .expect("input");
    await_output_containing(&mut rx, "before-restart").await;

    manager.restart(&session.id).expect("restart");

    let mut saw_starting = false;
    loop {
        match recv_frame(&mut rx).await {
            ServerFrame::Status { state, .. } => match state {
                SessionPhase::Starting => saw_starting = true,
                SessionPhase::Running => break,
                SessionPhase::Exited => panic!("unexpected exit during restart"),
            },
            _ => continue,
        }
    }
    assert!(saw_starting, "clients should observe starting before running");

    // A fresh attach sees a ring without the pre-restart output.
    let (tx2, mut rx2) = client_channel();
    manager
        .attach(&session.id, "u@x", "roots/demo", "client-2", tx2, None)
        .expect("reattach");
    recv_frame(&mut rx2).await;
    match recv_frame(&mut rx2).await {
        ServerFrame::Replay { data } => {
            assert!(!data.contains("before-restart"));
        }
        other => panic!("expected replay, got {other:?}"),
    }

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn attach_rejects_foreign_sessions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 3, 20);

    let session = manager
        .create(params("owner@x", temp.path().to_path_buf()))
        .expect("create");

    let (tx, _rx) = client_channel();
    let err = manager
        .attach(&session.id, "intruder@x", "roots/demo", "client-1", tx, None)
        .expect_err("must fail");
    assert!(matches!(err, SessionError::NotOwner));

    manager.terminate(&session.id).expect("terminate");
}

#[tokio::test(flavor = "multi_thread")]
async fn input_requires_running_session() {
    let manager = test_manager(Duration::from_secs(60), 3, 20);
    let err = manager
        .input("no-such-session", b"x".to_vec())
        .await
        .expect_err("must fail");
    assert!(matches!(err, SessionError::SessionNotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn listings_are_scoped_to_user_and_repo() {
    let temp = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(Duration::from_secs(60), 5, 20);

    let mut p_other_repo = params("u@x", temp.path().to_path_buf());
    p_other_repo.repo_id = "roots/other".to_string();

    let s1 = manager
        .create(params("u@x", temp.path().to_path_buf()))
        .expect("s1");
    let s2 = manager.create(p_other_repo).expect("s2");
    let s3 = manager
        .create(params("v@x", temp.path().to_path_buf()))
        .expect("s3");

    let demo = manager.list_for_repo("u@x", "roots/demo");
    assert_eq!(demo.len(), 1);
    assert_eq!(demo[0].id, s1.id);
    assert_eq!(demo[0].name, "Session 1");

    let all = manager.list_for_user("u@x");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|s| s.repo_id.is_some()));

    for id in [&s1.id, &s2.id, &s3.id] {
        manager.terminate(id).expect("terminate");
    }
}
