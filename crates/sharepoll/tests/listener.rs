//! Directory listener behaviour against a local share.

mod harness;

use chrono::{TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use harness::{expect_message, fast_listener, wait_until, TestEnv, DELIVERY_TIMEOUT};
use sharepoll::{
    ChannelConsumer, ListenerState, MatchPolicy, MatcherCriteria, Outcome, PostActionConfig,
};
use std::sync::Arc;
use std::time::Duration;

const WATCHME_CONTENT: &str = "who watches the watchmen?";

/// Wait until the listener has finished `extra` full poll cycles.
fn settle(handle: &sharepoll::ListenerHandle, extra: u64) {
    let target = handle.polls() + extra;
    assert!(wait_until(DELIVERY_TIMEOUT, || handle.polls() >= target));
}

#[test]
fn matcherless_listener_delivers_file() {
    let env = TestEnv::new();
    env.write_file("matcherless/watchme.txt", WATCHME_CONTENT);

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(
            fast_listener("watchme", "matcherless").with_poll_interval(Duration::from_secs(1)),
            Arc::new(consumer),
        )
        .unwrap();

    let message = expect_message(&rx);
    assert_eq!(message.path(), "matcherless/watchme.txt");
    assert_eq!(message.payload_as_str(), WATCHME_CONTENT);
    assert_eq!(message.attributes.size, Some(WATCHME_CONTENT.len() as u64));
}

#[test]
fn same_content_observable_after_server_restart() {
    let env = TestEnv::new();
    env.write_file("matcherless/watchme.txt", WATCHME_CONTENT);

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(fast_listener("first", "matcherless"), Arc::new(consumer))
        .unwrap();
    assert_eq!(expect_message(&rx).payload_as_str(), WATCHME_CONTENT);
    assert!(env.connector.stop_listener("first"));

    env.share.stop();
    env.share.start();

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(fast_listener("second", "matcherless"), Arc::new(consumer))
        .unwrap();
    assert_eq!(expect_message(&rx).payload_as_str(), WATCHME_CONTENT);
}

#[test]
fn reconnects_without_redelivery() {
    let env = TestEnv::new();
    env.write_file("inbox/a.txt", "A");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(fast_listener("inbox", "inbox"), Arc::new(consumer))
        .unwrap();
    assert_eq!(expect_message(&rx).payload_as_str(), "A");

    env.share.stop();
    assert!(wait_until(DELIVERY_TIMEOUT, || handle.state()
        == ListenerState::Unavailable));

    env.write_file("inbox/b.txt", "B");
    env.share.start();

    let second = expect_message(&rx);
    assert_eq!(second.path(), "inbox/b.txt");
    assert_eq!(second.payload_as_str(), "B");

    settle(&handle, 3);
    assert!(rx.try_recv().is_err());
    assert_eq!(handle.watermarks().len(), 2);
    assert_ne!(handle.state(), ListenerState::Unavailable);
}

#[test]
fn auto_delete_after_success() {
    let env = TestEnv::new();
    env.write_file("in/done.txt", "payload");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(
            fast_listener("deleter", "in").with_post_action(PostActionConfig::delete()),
            Arc::new(consumer),
        )
        .unwrap();

    expect_message(&rx);
    assert!(wait_until(DELIVERY_TIMEOUT, || !env.exists("in/done.txt")));
}

#[test]
fn failed_file_untouched_when_post_action_skipped() {
    let env = TestEnv::new();
    env.write_file("in/bad.txt", "payload");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(
            fast_listener("guarded", "in")
                .with_post_action(PostActionConfig::delete().with_apply_when_failed(false)),
            Arc::new(consumer.with_outcome(Outcome::Failure)),
        )
        .unwrap();

    expect_message(&rx);
    settle(&handle, 3);
    assert!(env.exists("in/bad.txt"));
    assert!(rx.try_recv().is_err());
}

#[test]
fn failed_file_post_processed_by_default() {
    let env = TestEnv::new();
    env.write_file("in/bad.txt", "payload");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(
            fast_listener("failing", "in").with_post_action(PostActionConfig::move_to("failed")),
            Arc::new(consumer.with_outcome(Outcome::Failure)),
        )
        .unwrap();

    expect_message(&rx);
    assert!(wait_until(DELIVERY_TIMEOUT, || env.exists("failed/bad.txt")));
    assert!(!env.exists("in/bad.txt"));
}

#[test]
fn move_and_rename_after_success() {
    let env = TestEnv::new();
    env.write_file("in/report.csv", "1,2,3");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    env.connector
        .start_listener(
            fast_listener("mover", "in").with_post_action(
                PostActionConfig::move_to("processed/2024").with_rename_to("report.done.csv"),
            ),
            Arc::new(consumer),
        )
        .unwrap();

    expect_message(&rx);
    assert!(wait_until(DELIVERY_TIMEOUT, || env
        .exists("processed/2024/report.done.csv")));
    assert!(!env.exists("in/report.csv"));
    assert_eq!(env.read_file("processed/2024/report.done.csv"), "1,2,3");
}

#[test]
fn matcher_filters_deliveries() {
    let env = TestEnv::new();
    let old = env.write_file("in/old.csv", "old");
    env.write_file("in/new.csv", "new");
    env.write_file("in/notes.txt", "skip me");
    env.write_file("in/sub/nested.csv", "nested");

    let pinned = Utc.with_ymd_and_hms(1983, 4, 20, 21, 15, 0).unwrap().timestamp();
    set_file_mtime(&old, FileTime::from_unix_time(pinned, 0)).unwrap();

    let criteria = MatcherCriteria::default()
        .with_filename_pattern("*.csv")
        .with_timestamp_until(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap())
        .with_regular_files(MatchPolicy::Require);

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(
            fast_listener("csv", "in").with_matcher(criteria),
            Arc::new(consumer),
        )
        .unwrap();

    let message = expect_message(&rx);
    assert_eq!(message.path(), "in/old.csv");
    settle(&handle, 3);
    assert!(rx.try_recv().is_err());
}

#[test]
fn non_recursive_listener_ignores_subdirectories() {
    let env = TestEnv::new();
    env.write_file("in/top.txt", "top");
    env.write_file("in/sub/deep.txt", "deep");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(
            fast_listener("flat", "in").with_recursive(false),
            Arc::new(consumer),
        )
        .unwrap();

    assert_eq!(expect_message(&rx).path(), "in/top.txt");
    settle(&handle, 3);
    assert!(rx.try_recv().is_err());
}

#[test]
fn rewritten_file_is_delivered_again() {
    let env = TestEnv::new();
    let path = env.write_file("in/state.txt", "v1");
    set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(fast_listener("rewrite", "in"), Arc::new(consumer))
        .unwrap();
    assert_eq!(expect_message(&rx).payload_as_str(), "v1");
    settle(&handle, 2);

    env.write_file("in/state.txt", "version 2");
    set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    assert_eq!(expect_message(&rx).payload_as_str(), "version 2");
}

#[test]
fn listener_on_missing_directory_keeps_polling() {
    let env = TestEnv::new();

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(fast_listener("late", "later"), Arc::new(consumer))
        .unwrap();
    settle(&handle, 2);
    assert_ne!(handle.state(), ListenerState::Unavailable);

    env.write_file("later/arrived.txt", "hi");
    assert_eq!(expect_message(&rx).path(), "later/arrived.txt");
}

#[test]
fn post_action_failure_keeps_watermark() {
    let env = TestEnv::new();
    env.write_file("in/a.txt", "fresh");
    env.write_file("done/a.txt", "already here");

    let (consumer, rx) = ChannelConsumer::bounded(64);
    let handle = env
        .connector
        .start_listener(
            fast_listener("blocked", "in").with_post_action(PostActionConfig::move_to("done")),
            Arc::new(consumer),
        )
        .unwrap();

    assert_eq!(expect_message(&rx).payload_as_str(), "fresh");
    settle(&handle, 3);
    assert!(rx.try_recv().is_err());
    assert_eq!(env.read_file("in/a.txt"), "fresh");
    assert_eq!(env.read_file("done/a.txt"), "already here");
    assert_eq!(handle.watermarks().len(), 1);
}
