use super::*;
use std::time::Instant;
use tempfile::TempDir;

fn gpio_config(path: &std::path::Path, active_low: bool) -> DriverConfig {
    DriverConfig {
        kind: DriverKind::Gpio,
        gpio_value_path: Some(path.display().to_string()),
        active_low,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_gpio_driver_toggles_value_file() {
    let dir = TempDir::new().unwrap();
    let value = dir.path().join("value");
    std::fs::write(&value, "0").unwrap();

    let driver = build_driver(&gpio_config(&value, false)).unwrap();
    assert_eq!(driver.name(), "gpio");

    driver.enter_transmit().await.unwrap();
    assert_eq!(std::fs::read_to_string(&value).unwrap(), "1");

    driver.enter_receive().await.unwrap();
    assert_eq!(std::fs::read_to_string(&value).unwrap(), "0");
}

#[tokio::test]
async fn test_gpio_active_low_inverts_levels() {
    let dir = TempDir::new().unwrap();
    let value = dir.path().join("value");

    let driver = build_driver(&gpio_config(&value, true)).unwrap();
    driver.enter_transmit().await.unwrap();
    assert_eq!(std::fs::read_to_string(&value).unwrap(), "0");

    driver.shutdown().await.unwrap();
    assert_eq!(std::fs::read_to_string(&value).unwrap(), "1");
}

#[tokio::test]
async fn test_gpio_missing_directory_is_io_error() {
    let dir = TempDir::new().unwrap();
    let value = dir.path().join("no-such-gpio").join("value");
    let driver = build_driver(&gpio_config(&value, false)).unwrap();

    let err = driver.enter_transmit().await.unwrap_err();
    assert!(matches!(err, DriverError::Io { .. }));
}

#[tokio::test]
async fn test_noop_driver_honours_delays() {
    let driver = NoopDriver::new(Duration::from_millis(30), Duration::from_millis(30));

    let started = Instant::now();
    driver.enter_transmit().await.unwrap();
    driver.enter_receive().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn test_missing_device_path_rejected() {
    let gpio = DriverConfig {
        kind: DriverKind::Gpio,
        ..Default::default()
    };
    assert!(matches!(
        build_driver(&gpio),
        Err(DriverError::InvalidConfig(_))
    ));

    let serial = DriverConfig {
        kind: DriverKind::SerialRts,
        ..Default::default()
    };
    assert!(matches!(
        build_driver(&serial),
        Err(DriverError::InvalidConfig(_))
    ));
}

#[test]
fn test_driver_kind_deserialization() {
    let kind: DriverKind = serde_json::from_str("\"serial_rts\"").unwrap();
    assert_eq!(kind, DriverKind::SerialRts);
    assert_eq!(DriverKind::default(), DriverKind::Noop);
}

#[tokio::test]
async fn test_serial_rts_reports_missing_port() {
    let driver = SerialRtsDriver::new(
        "/dev/sirenbus-does-not-exist",
        false,
        Duration::ZERO,
        Duration::ZERO,
    );
    let err = driver.enter_transmit().await.unwrap_err();
    assert!(matches!(err, DriverError::Io { .. }));
    // shutdown of a never-opened port is harmless
    driver.shutdown().await.unwrap();
}
