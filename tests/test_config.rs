// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport configuration parsing.

use evring::{
    segment_len, ConfigError, Error, StalePolicy, SyncDiscipline, TransportConfig,
    RING_HEADER_SIZE,
};

fn parse(s: &str) -> Result<TransportConfig, ConfigError> {
    s.parse()
}

#[test]
fn defaults() {
    let cfg = TransportConfig::default();
    assert_eq!(cfg.name, "evring");
    assert_eq!(cfg.buffers, 5);
    assert_eq!(cfg.buffer_size, 4096);
    assert_eq!(cfg.sync, SyncDiscipline::LockFree);
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.retries, 128);
    assert_eq!(cfg.timeout_ms, 100);
    assert_eq!(cfg.max_skip, 64);
    assert_eq!(cfg.stale, StalePolicy::Skip);
    assert!(cfg.platform.starts_with(std::env::consts::OS));
    assert_eq!(cfg.segment_len(), RING_HEADER_SIZE + 5 * 4096);
}

#[test]
fn every_key_is_applied() {
    let cfg = parse(
        "transport=shm,name=telemetry,buffers=8,buffer_size=65536,sync=synchronized,\
         platform=linux-aarch64,version=3,retries=16,timeout_ms=5,max_skip=2,stale=error",
    )
    .unwrap();
    assert_eq!(cfg.name, "telemetry");
    assert_eq!(cfg.buffers, 8);
    assert_eq!(cfg.buffer_size, 65536);
    assert_eq!(cfg.sync, SyncDiscipline::Synchronized);
    assert_eq!(cfg.platform, "linux-aarch64");
    assert_eq!(cfg.version, 3);
    assert_eq!(cfg.retries, 16);
    assert_eq!(cfg.timeout_ms, 5);
    assert_eq!(cfg.max_skip, 2);
    assert_eq!(cfg.stale, StalePolicy::Error);
    assert_eq!(cfg.segment_len(), segment_len(8, 65536));
}

#[test]
fn display_round_trips() {
    for s in ["", "sync=exclusive,buffers=2", "name=a,stale=error,max_skip=0"] {
        let cfg = parse(s).unwrap();
        assert_eq!(parse(&cfg.to_string()).unwrap(), cfg);
    }
    assert!(TransportConfig::default().to_string().starts_with("transport=shm,"));
}

#[test]
fn unknown_key() {
    assert_eq!(parse("colour=blue"), Err(ConfigError::UnknownKey("colour".into())));
}

#[test]
fn malformed_entries() {
    assert_eq!(parse("buffers"), Err(ConfigError::Malformed("buffers".into())));
    assert_eq!(parse("=5"), Err(ConfigError::Malformed("=5".into())));
    assert!(matches!(parse("buffers=2,,sync=lockfree"), Err(ConfigError::Malformed(_))));
}

#[test]
fn duplicate_key() {
    assert_eq!(
        parse("buffers=2,buffers=3"),
        Err(ConfigError::Duplicate("buffers".into()))
    );
}

#[test]
fn invalid_values() {
    for (s, key) in [
        ("buffers=0", "buffers"),
        ("buffers=many", "buffers"),
        ("buffer_size=0", "buffer_size"),
        ("buffer_size=4294967295", "buffer_size"),
        ("retries=0", "retries"),
        ("name=", "name"),
        ("name=a/b", "name"),
        ("platform=", "platform"),
        ("timeout_ms=-1", "timeout_ms"),
    ] {
        match parse(s) {
            Err(ConfigError::InvalidValue { key: k, .. }) => assert_eq!(k, key, "{s}"),
            other => panic!("{s}: {other:?}"),
        }
    }
}

#[test]
fn unsupported_values() {
    for (s, key) in [
        ("transport=tcp", "transport"),
        ("sync=optimistic", "sync"),
        ("stale=ignore", "stale"),
    ] {
        match parse(s) {
            Err(ConfigError::Unsupported { key: k, .. }) => assert_eq!(k, key, "{s}"),
            other => panic!("{s}: {other:?}"),
        }
    }
}

#[test]
fn discipline_names() {
    for d in [
        SyncDiscipline::Synchronized,
        SyncDiscipline::Exclusive,
        SyncDiscipline::LockFree,
    ] {
        assert_eq!(d.as_str().parse::<SyncDiscipline>().unwrap(), d);
    }
}

#[test]
fn config_error_converts() {
    let err: Error = parse("buffers=0").unwrap_err().into();
    assert!(matches!(err, Error::Config(ConfigError::InvalidValue { key: "buffers", .. })));
    assert!(err.to_string().contains("buffers"));
}
