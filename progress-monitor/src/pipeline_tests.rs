//! End-to-end tests: writer → progress file → discovery/tailer → viewers,
//! and the in-process path through the broadcast logger and question bridge.

use crate::bridge::{BroadcastLogger, InputCollector, QuestionBridge};
use crate::progress::{Logger, ProgressLogConfig, ProgressLogger, find_resumable_sessions};
use crate::sessions::{Session, SessionManager, SessionOptions, TailerConfig, plan_progress_path, session_id_from_path};
use progress_types::{Event, EventKind, Phase, SessionState};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

fn fast_options() -> SessionOptions {
    SessionOptions {
        tailer: TailerConfig {
            poll_interval: Duration::from_millis(10),
            ..TailerConfig::default()
        },
        ..SessionOptions::default()
    }
}

fn log_config(path: &Path, mode: &str) -> ProgressLogConfig {
    ProgressLogConfig {
        path: path.to_path_buf(),
        plan_description: "add rate limiting".into(),
        branch: "feature-rate-limit".into(),
        mode: mode.into(),
        append: false,
    }
}

async fn recv_until<F>(sub: &mut crate::events::Subscription, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    timeout(Duration::from_secs(3), async {
        loop {
            let event = sub.recv().await.expect("subscription closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

#[tokio::test]
async fn test_external_writer_is_discovered_tailed_and_completed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress-rate-limit.txt");
    let mut writer = ProgressLogger::create(log_config(&path, "full")).unwrap();
    writer.print_section("Task 1");
    writer.print("writing middleware");

    let manager = SessionManager::with_options(fast_options());
    assert_eq!(manager.discover(dir.path()).unwrap(), vec!["rate-limit"]);
    let session = manager.get("rate-limit").unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.metadata().branch, "feature-rate-limit");

    let mut sub = session.hub().subscribe().unwrap();
    session.start_tailing(true).unwrap();

    // history replayed from the top
    recv_until(&mut sub, |e| e.text() == Some("writing middleware")).await;

    writer.set_phase(Phase::Review);
    writer.print_section("Review");
    writer.log_signal("REVIEW_DONE");
    let signal = recv_until(&mut sub, |e| matches!(e.kind, EventKind::Signal { .. })).await;
    assert_eq!(signal.kind, EventKind::Signal { signal: "REVIEW_DONE".into() });
    assert_eq!(signal.phase, Phase::Review);

    writer.finish().unwrap();
    manager.discover(dir.path()).unwrap();
    assert_eq!(session.state(), SessionState::Completed);
    assert!(!session.is_tailing());

    let texts: Vec<String> = session
        .buffer()
        .all()
        .iter()
        .filter_map(|e| e.text().map(String::from))
        .collect();
    assert!(texts.contains(&"writing middleware".to_string()));
    assert!(texts.last().is_some_and(|t| t.starts_with("Completed: ")));
    assert!(session.buffer().all().iter().any(|e| e.kind == EventKind::Signal { signal: "REVIEW_DONE".into() }));

    manager.close();
    timeout(Duration::from_secs(1), async { while sub.recv().await.is_some() {} })
        .await
        .expect("viewer queue was not closed");
}

#[tokio::test]
async fn test_in_process_plan_session_with_question() {
    let dir = TempDir::new().unwrap();
    let path = plan_progress_path(dir.path(), "add rate limiting");
    let id = session_id_from_path(&path).unwrap();
    assert!(id.starts_with("plan-add-rate-limiting-"));

    let writer = ProgressLogger::create(log_config(&path, "plan")).unwrap();
    let session = Arc::new(Session::with_options(id.clone(), &path, fast_options()));
    session.set_state(SessionState::Active);

    let manager = SessionManager::with_options(fast_options());
    manager.register(session.clone());
    let mut sub = session.hub().subscribe().unwrap();

    let mut logger = BroadcastLogger::new(writer, session.clone());
    logger.set_phase(Phase::Plan);
    logger.print("exploring codebase");

    let bridge = Arc::new(QuestionBridge::new(session.clone()));
    let asker = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let options = vec!["Token bucket".to_string(), "Sliding window".to_string()];
            bridge
                .ask_question(&CancellationToken::new(), "Which algorithm?", &options)
                .await
        })
    };

    let question = recv_until(&mut sub, |e| matches!(e.kind, EventKind::Question { .. })).await;
    let EventKind::Question { question_id, options, .. } = question.kind else {
        unreachable!()
    };
    assert_eq!(options, vec!["Token bucket", "Sliding window"]);
    bridge.submit_answer(&question_id, "Sliding window").unwrap();

    let answer = asker.await.unwrap().unwrap();
    assert_eq!(answer, "Sliding window");
    recv_until(&mut sub, |e| matches!(e.kind, EventKind::QuestionAnswered { .. })).await;

    // record the exchange in the file the way the executor does
    let mut writer = logger.into_inner();
    writer.log_question("Which algorithm?", &["Token bucket".to_string(), "Sliding window".to_string()]);
    writer.log_answer(&answer);

    // still locked by this process, so not resumable yet
    assert!(find_resumable_sessions(&[dir.path()]).is_empty());

    // an interrupted run leaves no footer and becomes resumable
    drop(writer);
    let resumable = find_resumable_sessions(&[dir.path()]);
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].plan_description, "add rate limiting");
    assert_eq!(resumable[0].qa_count, 1);
    assert!(resumable[0].pending_question.is_none());

    let buffered = session.buffer().all();
    assert!(buffered.iter().any(|e| e.text() == Some("exploring codebase")));
    assert!(buffered.iter().all(|e| e.phase == Phase::Plan));
}

#[tokio::test]
async fn test_slow_viewer_does_not_stall_others() {
    let session = Session::with_options(
        "busy",
        "/tmp/progress-busy.txt",
        SessionOptions {
            subscriber_capacity: 4,
            ..fast_options()
        },
    );
    let _slow = session.hub().subscribe().unwrap();
    let mut fast = session.hub().subscribe().unwrap();

    for i in 0..10 {
        session.publish(Event::output(Phase::Task, format!("line {}", i)));
        assert!(fast.recv().await.is_some());
    }

    assert_eq!(session.hub().dropped_events(), 6);
    assert_eq!(session.buffer().count(), 10);
}
