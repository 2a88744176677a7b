use dmxp_transport::Transport::{ConfigError, RecvConfig, SendConfig, ShardingKind};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_recv_defaults() {
    let conf = RecvConfig::from_toml_str("").unwrap();
    assert_eq!(conf, RecvConfig::default());
    assert_eq!(conf.queue_count(), conf.work_threads * conf.queues_per_worker);
    assert_eq!(conf.max_body(), conf.recvq.size - 16);
    assert_eq!(conf.idle_timeout(), conf.keepalive() * conf.idle_multiplier);
}

#[test]
fn test_recv_partial_override() {
    let conf = RecvConfig::from_toml_str(
        r#"
        name = "crawler"
        port = 9000
        work_threads = 3
        sharding = "modulo"
        keepalive_ms = 500

        [recvq]
        max = 64

        [cpu]
        enabled = true
        start = 2
        "#,
    )
    .unwrap();

    assert_eq!(conf.name, "crawler");
    assert_eq!(conf.port, 9000);
    assert_eq!(conf.work_threads, 3);
    assert_eq!(conf.sharding, ShardingKind::Modulo);
    assert_eq!(conf.recvq.max, 64);
    // Unset fields of a table keep their defaults
    assert_eq!(conf.recvq.size, 4096);
    assert!(conf.cpu.enabled);
    assert_eq!(conf.cpu.start, 2);
    assert_eq!(conf.keepalive(), Duration::from_millis(500));
    assert_eq!(conf.recv_threads, RecvConfig::default().recv_threads);
}

#[test]
fn test_unknown_field_rejected() {
    assert!(matches!(
        RecvConfig::from_toml_str("recv_thread = 4"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        SendConfig::from_toml_str("[sendq]\nmaxx = 4"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_recv_validation() {
    for text in [
        "recv_threads = 0",
        "work_threads = 0",
        "queues_per_worker = 0",
        "notify_interval = 0",
        "idle_multiplier = 0",
        "keepalive_ms = 0",
        "name = \"\"",
        "name = \"a/b\"",
        "[recvq]\nsize = 16",
        "[recvq]\nmax = 0",
    ] {
        let err = RecvConfig::from_toml_str(text).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid(_)),
            "{:?} should be invalid, got {}",
            text,
            err
        );
    }
}

#[test]
fn test_send_validation() {
    let conf = SendConfig::from_toml_str("reconnect_min_ms = 100\nreconnect_max_ms = 800").unwrap();
    assert_eq!(conf.reconnect_min(), Duration::from_millis(100));
    assert_eq!(conf.reconnect_max(), Duration::from_millis(800));
    assert_eq!(conf.sendq_name(1), "dmxp-sendq-1");

    for text in [
        "send_threads = 0",
        "reconnect_min_ms = 0",
        "reconnect_min_ms = 900\nreconnect_max_ms = 800",
        "connect_timeout_ms = 0",
        "[sendq]\nsize = 8",
    ] {
        assert!(
            matches!(SendConfig::from_toml_str(text), Err(ConfigError::Invalid(_))),
            "{:?} should be invalid",
            text
        );
    }
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name = \"from-file\"\nsend_threads = 2").unwrap();
    let conf = SendConfig::from_file(file.path()).unwrap();
    assert_eq!(conf.name, "from-file");
    assert_eq!(conf.send_threads, 2);

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        RecvConfig::from_file(&missing),
        Err(ConfigError::Read { .. })
    ));
}
