//! Transfer orchestrator scenarios
//!
//! Cover the waiting states, first delivery, no-change reruns, unmapped
//! labels, partial failure recovery and restarts sharing the ledger.

mod helpers;

use helpers::{at_offset, test_config, Harness, DEVICE_LABEL, DEVICE_SERIAL, REMOTE_ROOT};
use postrelay_agent::services::ledger::{NO_FILE, TASK_COMPLETE_FILE};
use postrelay_common::config::DeviceConfig;
use postrelay_common::{OutcomeCode, TaskKey};
use tempfile::TempDir;

fn future_task() -> TaskKey {
    TaskKey::new(DEVICE_LABEL, at_offset(60))
}

#[tokio::test]
async fn test_missing_media_folder_is_waiting_media() {
    let h = Harness::new(vec![]).await;
    let task = future_task();

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::WaitingMedia);
    assert!(!report.success);
    assert!(h.transport.pushes().is_empty());
    assert!(h.agent.ledger.entries(&task).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_media_folder_is_no_media_files() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.materializer().materialize(&task).unwrap();

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::NoMediaFiles);
    assert!(h.transport.pushes().is_empty());
}

#[tokio::test]
async fn test_first_delivery_pushes_all_and_writes_sentinel() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "b.jpg", b"bbb");
    h.write_media(&task, "a.png", b"aaa");
    h.write_media(&task, "notes.txt", b"ignored");

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::Success);
    assert_eq!(report.pushed, vec!["a.png", "b.jpg"]);
    assert!(report.failed.is_empty());

    let canonical = task.dir_name();
    assert_eq!(
        h.transport.pushed_remotes(),
        vec![
            format!("{}/{}/a.png", REMOTE_ROOT, canonical),
            format!("{}/{}/b.jpg", REMOTE_ROOT, canonical),
        ]
    );
    assert!(h.transport.pushes().iter().all(|(serial, _, _)| serial == DEVICE_SERIAL));

    let entries = h.agent.ledger.entries(&task).await.unwrap();
    let files: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(files, vec!["a.png", "b.jpg", TASK_COMPLETE_FILE]);
    assert!(entries.iter().all(|e| e.success));
    assert!(entries[0].content_hash.is_some());
    assert!(h.agent.ledger.is_task_complete(&task).await);

    let log = std::fs::read_to_string(h.ledger_log()).unwrap();
    assert_eq!(log.matches("结果: 成功").count(), 3);
}

#[tokio::test]
async fn test_rerun_without_changes_is_no_changes() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.write_media(&task, "b.png", b"bbb");

    h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;
    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::NoChanges);
    assert!(report.success);
    assert!(report.pushed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(h.transport.pushes().len(), 2);
    assert_eq!(h.agent.ledger.entries(&task).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unmapped_label_touches_nothing() {
    let h = Harness::new(vec![]).await;
    let task = TaskKey::new("ghost", at_offset(60));

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::DeviceNotFound);
    assert_eq!(h.transport.reachability_checks(), 0);
    assert!(!h.config.uploads_root.join("ghost").exists());
    assert!(!h.ledger_log().exists());
    assert!(h.agent.ledger.entries(&task).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_device_without_remote_path_is_invalid_path() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.devices.insert(
        "bare".to_string(),
        DeviceConfig {
            serial: DEVICE_SERIAL.to_string(),
            remote_path: Some("  ".to_string()),
        },
    );
    let h = Harness::with_config(dir, config, vec![]).await;

    let report = h.agent.orchestrator.transfer("bare", at_offset(60)).await;
    assert_eq!(report.outcome, OutcomeCode::InvalidPath);
    assert_eq!(h.transport.reachability_checks(), 0);
}

#[tokio::test]
async fn test_unreachable_device_records_outcome() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.transport.set_reachable(DEVICE_SERIAL, false);

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::DeviceNotConnected);
    assert!(h.transport.pushes().is_empty());
    let entries = h.agent.ledger.entries(&task).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, NO_FILE);
    assert_eq!(entries[0].status_code, "DEVICE_NOT_CONNECTED");
    assert!(!entries[0].success);
}

#[tokio::test]
async fn test_partial_failure_then_retry_only_outstanding() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.write_media(&task, "b.png", b"bbb");
    h.transport.fail_file("b.png");

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;
    assert_eq!(report.outcome, OutcomeCode::TransferIncomplete);
    assert_eq!(report.pushed, vec!["a.png"]);
    assert_eq!(report.failed, vec![("b.png".to_string(), OutcomeCode::TransferFailed)]);
    assert!(!h.agent.ledger.is_task_complete(&task).await);

    h.transport.clear_failures();
    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;
    assert_eq!(report.outcome, OutcomeCode::Success);
    assert_eq!(report.pushed, vec!["b.png"]);
    assert_eq!(report.skipped, vec!["a.png"]);
    assert!(h.agent.ledger.is_task_complete(&task).await);

    let pushed: Vec<String> = h.transport.pushed_remotes();
    assert_eq!(pushed.len(), 2);
    assert!(pushed[1].ends_with("/b.png"));
}

#[tokio::test]
async fn test_all_files_failing_reports_first_failure() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.transport.fail_file("a.png");

    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;
    assert_eq!(report.outcome, OutcomeCode::TransferFailed);
    assert!(report.pushed.is_empty());

    let log = std::fs::read_to_string(h.ledger_log()).unwrap();
    assert!(log.contains("结果: 失败"));
    assert!(log.contains("错误信息: injected failure"));
}

#[tokio::test]
async fn test_restart_skips_files_with_delivered_content() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.write_media(&task, "b.png", b"bbb");
    h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    let restarted = h.restarted_orchestrator();
    let report = restarted.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::Success);
    assert!(report.pushed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(h.transport.pushes().len(), 2);
    // No second sentinel when nothing was pushed
    let sentinels = h
        .agent
        .ledger
        .entries(&task)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.file_name == TASK_COMPLETE_FILE)
        .count();
    assert_eq!(sentinels, 1);
}

#[tokio::test]
async fn test_modified_file_is_pushed_again() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.write_media(&task, "b.png", b"bbb");
    h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    h.write_media(&task, "a.png", b"edited");
    let report = h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    assert_eq!(report.outcome, OutcomeCode::Success);
    assert_eq!(report.pushed, vec!["a.png"]);
    assert_eq!(report.skipped, vec!["b.png"]);
    assert_eq!(h.transport.pushes().len(), 3);
}

#[tokio::test]
async fn test_new_file_after_completion_is_pushed() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "a.png", b"aaa");
    h.agent.orchestrator.transfer(&task.post_label, task.scheduled).await;

    h.write_media(&task, "c.png", b"ccc");
    let report = h.agent.orchestrator.handle_media_created(&task).await;

    assert_eq!(report.outcome, OutcomeCode::Success);
    assert_eq!(report.pushed, vec!["c.png"]);
}

#[tokio::test]
async fn test_remote_media_paths_follow_local_folder() {
    let h = Harness::new(vec![]).await;
    let task = future_task();
    h.write_media(&task, "b.png", b"b");
    h.write_media(&task, "a.png", b"a");

    let paths = h.agent.orchestrator.remote_media_paths(&task);
    assert_eq!(
        paths,
        vec![
            format!("{}/{}/a.png", REMOTE_ROOT, task.dir_name()),
            format!("{}/{}/b.png", REMOTE_ROOT, task.dir_name()),
        ]
    );
}
