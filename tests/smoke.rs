use metlo_capture::config::AppConfig;

#[test]
fn dev_config_loads() {
    let manifest_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let path = manifest_dir.join("config").join("dev.yaml");
    let config = AppConfig::load_from_file(path).expect("dev config should load");

    assert_eq!(config.listen, "127.0.0.1:8080");
    assert_eq!(config.capture.server_port, 8080);
    assert_eq!(config.capture.environment, "development");
    assert_eq!(config.capture.max_body_bytes, 10 * 1024);
    assert_eq!(config.sampling.traces_per_minute, 600);
}
