//! Connector wiring, configuration files and the pool contract.

mod harness;

use harness::{TestEnv, HOST};
use sharepoll::{
    ConnectionConfig, Connector, ConnectorConfig, ConnectorError, ListenerConfig, LocalShare,
    LocalShareFactory, PostActionConfig, WriteMode,
};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn invalid_session_return_is_an_error() {
    let env = TestEnv::new();
    let session = env.connector.pool().checkout().unwrap();

    env.share.stop();
    env.share.start();

    let err = session.release().unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidSessionReturned(_)));
    assert_eq!(env.connector.pool().outstanding(), 0);

    env.connector
        .write("after.txt", b"ok", WriteMode::Overwrite, false)
        .unwrap();
    assert!(env.exists("after.txt"));
}

#[test]
fn bad_credentials_report_connection_context() {
    let temp = TempDir::new().unwrap();
    let share = LocalShare::open_with_credentials(temp.path(), Some("CORP"), "svc", "right").unwrap();
    let factory = LocalShareFactory::new().with_share(HOST, share);
    let connection = ConnectionConfig::new(HOST)
        .with_domain("CORP")
        .with_credentials("svc", "wrong-password")
        .with_share_root("data");
    let connector = Connector::new(ConnectorConfig::new(connection), Arc::new(factory)).unwrap();

    let message = connector.list("", false).unwrap_err().to_string();
    assert!(message.starts_with("Could not establish share connection (host: 'fileserver'"));
    assert!(message.contains("user: svc"));
    assert!(!message.contains("wrong-password"));
}

#[test]
fn config_file_round_trip_drives_connector() {
    let temp = TempDir::new().unwrap();
    let share_dir = temp.path().join("share");
    let config_path = temp.path().join("sharepoll.toml");

    let mut config = ConnectorConfig::new(ConnectionConfig::new(HOST).with_share_root("data"));
    config.listeners.push(
        ListenerConfig::new("inbox", "in").with_post_action(PostActionConfig::move_to("done")),
    );
    config.save(&config_path).unwrap();

    let loaded = ConnectorConfig::load(&config_path).unwrap();
    assert_eq!(loaded, config);

    let share = LocalShare::open(&share_dir).unwrap();
    std::fs::create_dir_all(share_dir.join("data")).unwrap();
    let factory = LocalShareFactory::new().with_share(HOST, share);
    let connector = Connector::new(loaded, Arc::new(factory)).unwrap();

    connector.create_directory("in").unwrap();
    assert!(share_dir.join("data/in").is_dir());
    assert_eq!(connector.config().listener("inbox").unwrap().directory, "in");
    connector.shutdown();
}

#[test]
fn invalid_listener_config_rejected_before_io() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("bad.toml");
    std::fs::write(
        &config_path,
        r#"
        [connection]
        host = "fileserver"

        [[listeners]]
        name = "inbox"
        directory = "in"

        [listeners.matcher]
        regular_files = "REQUIRE"
        directories = "REQUIRE"
        "#,
    )
    .unwrap();

    let config = ConnectorConfig::load(&config_path).unwrap();
    let err = Connector::new(config, Arc::new(LocalShareFactory::new())).unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}
