use httpagent::config::{Config, EngineConfig};

#[test]
fn test_config_listen_address_from_env() {
    // One test owns LISTEN; tests run in parallel.
    unsafe {
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load();
    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");

    let cfg = Config::from_yaml_str("listen_addr: 127.0.0.1:9000\n").unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");

    unsafe {
        std::env::remove_var("LISTEN");
    }
}

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.protocol, "HTTP/1.1");

    let engine = EngineConfig::default();
    assert_eq!(engine.body_limit, 1_048_576);
    assert_eq!(engine.header_limit, 16 * 1024);
    assert_eq!(engine.worker_threads, 4);
}

#[test]
fn test_config_yaml_overrides_engine() {
    let yaml = "
protocol: HTTP/1.0
engine:
  worker_threads: 2
  body_limit: 4096
";
    let cfg = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(cfg.protocol, "HTTP/1.0");
    assert_eq!(cfg.engine.worker_threads, 2);
    assert_eq!(cfg.engine.body_limit, 4096);
    assert_eq!(cfg.engine.header_limit, EngineConfig::default().header_limit);
}

#[test]
fn test_config_rejects_bad_yaml() {
    assert!(Config::from_yaml_str("engine: [1, 2]").is_err());
}

#[test]
fn test_config_from_missing_file() {
    let err = Config::from_file("/nonexistent/httpagent.yaml").unwrap_err();
    assert!(err.to_string().contains("reading"));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
    assert_eq!(cfg1.engine, cfg2.engine);
}
