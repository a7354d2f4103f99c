//! Configuration tests

use tiercache::{CacheConfig, CacheError, TierConfig};

#[test]
fn test_config_defaults() {
  let config = CacheConfig::default();
  assert_eq!(config.address(), "127.0.0.1:3000");
  assert_eq!(config.logging.level, "info");
  assert_eq!(
    config.tiers,
    vec![TierConfig::Memory {
      ttl_secs: 600,
      renew_on_read: true,
    }]
  );
}

#[test]
fn test_config_parse_tiers() {
  let yaml = r#"
tiers:
  - kind: memory
    ttl_secs: 30
  - kind: sqlite
    path: /tmp/cache.db
    table: responses
    ttl_secs: 3600
  - kind: redis
    url: redis://cache:6379/1
server:
  port: 8080
"#;
  let config = CacheConfig::from_yaml(yaml).unwrap();
  assert_eq!(config.tiers.len(), 3);
  assert_eq!(
    config.tiers[0],
    TierConfig::Memory {
      ttl_secs: 30,
      renew_on_read: false,
    }
  );
  assert_eq!(
    config.tiers[1],
    TierConfig::Sqlite {
      path: "/tmp/cache.db".into(),
      table: "responses".into(),
      ttl_secs: Some(3600),
    }
  );
  assert_eq!(
    config.tiers[2],
    TierConfig::Redis {
      url: "redis://cache:6379/1".into(),
      table: "tiercache".into(),
      ttl_secs: None,
    }
  );
  assert_eq!(config.server.port, 8080);
  assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn test_config_empty_tiers_fall_back_to_memory() {
  let config = CacheConfig::from_yaml("tiers: []\n").unwrap();
  assert_eq!(config.tiers.len(), 1);
  assert_eq!(config.tiers[0].kind(), "memory");
}

#[test]
fn test_config_env_expansion() {
  std::env::set_var("TIERCACHE_TEST_TABLE", "from_env");
  let yaml = r#"
tiers:
  - kind: sqlite
    table: ${TIERCACHE_TEST_TABLE}
"#;
  let config = CacheConfig::from_yaml(yaml).unwrap();
  match &config.tiers[0] {
    TierConfig::Sqlite { table, .. } => assert_eq!(table, "from_env"),
    other => panic!("unexpected tier: {:?}", other),
  }
}

#[test]
fn test_config_non_ascii_content() {
  std::env::set_var("TIERCACHE_TEST_PORT", "3100");
  let yaml = "# café cache ☕\nserver:\n  host: \"hôte-$TIERCACHE_TEST_PORT\"\n  port: $TIERCACHE_TEST_PORT\n";
  let config = CacheConfig::from_yaml(yaml).unwrap();
  assert_eq!(config.server.port, 3100);
  assert_eq!(config.server.host, "hôte-3100");
}

#[test]
fn test_config_unknown_kind() {
  assert!(CacheConfig::from_yaml("tiers:\n  - kind: memcached\n").is_err());
}

#[tokio::test]
async fn test_build_cache_from_config() {
  let config = CacheConfig::from_yaml("tiers:\n  - kind: memory\n    ttl_secs: 60\n").unwrap();
  let cache = config.build_cache().await.unwrap();
  assert_eq!(cache.len(), 1);

  cache.set("1", "One").await.unwrap();
  assert_eq!(cache.get::<String>("1").await.unwrap(), "One");
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_build_cache_with_sqlite_tier() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("cache.db");
  let yaml = format!(
    "tiers:\n  - kind: memory\n  - kind: sqlite\n    path: {}\n    ttl_secs: 60\n",
    path.display()
  );

  let cache = CacheConfig::from_yaml(&yaml)
    .unwrap()
    .build_cache()
    .await
    .unwrap();
  assert_eq!(cache.len(), 2);
  assert!(path.exists());

  cache.set("1", &42u32).await.unwrap();
  assert_eq!(cache.get::<u32>("1").await.unwrap(), 42);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_build_cache_rejects_empty_table() {
  let dir = tempfile::tempdir().unwrap();
  let yaml = format!(
    "tiers:\n  - kind: sqlite\n    path: {}\n    table: \"\"\n",
    dir.path().join("cache.db").display()
  );

  let err = CacheConfig::from_yaml(&yaml)
    .unwrap()
    .build_cache()
    .await
    .unwrap_err();
  assert!(matches!(
    err.downcast_ref::<CacheError>(),
    Some(CacheError::Config(_))
  ));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_build_cache_rejects_zero_durable_ttl() {
  let dir = tempfile::tempdir().unwrap();
  let yaml = format!(
    "tiers:\n  - kind: sqlite\n    path: {}\n    ttl_secs: 0\n",
    dir.path().join("cache.db").display()
  );

  let err = CacheConfig::from_yaml(&yaml)
    .unwrap()
    .build_cache()
    .await
    .unwrap_err();
  assert!(matches!(
    err.downcast_ref::<CacheError>(),
    Some(CacheError::Config(_))
  ));
}
