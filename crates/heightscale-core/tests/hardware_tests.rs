//! Hardware integration tests for heightscale-core
//!
//! These tests require a Bluetooth adapter and a scale in range, and
//! should be run with:
//! ```
//! cargo test --package heightscale-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the scale via the `HEIGHTSCALE_DEVICE` environment variable
//! (MAC address, or peripheral UUID on macOS). The factory address is used
//! if it is unset. Step on the scale while the monitoring test runs.

use std::env;
use std::time::Duration;

use heightscale_core::{
    AdapterState, BleTransport, BtleplugTransport, ScaleAddress, ScaleSession, SessionConfig,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn scale_address() -> ScaleAddress {
    env::var("HEIGHTSCALE_DEVICE")
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("heightscale_core=debug")
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Adapter Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_is_powered_on() {
    init_logging();
    let transport = BtleplugTransport::new().await.expect("no Bluetooth adapter");
    assert_eq!(transport.adapter_state().await, AdapterState::PoweredOn);
    assert!(transport.request_permissions().await);
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_survey_lists_advertisers() {
    init_logging();
    let transport = BtleplugTransport::new().await.expect("no Bluetooth adapter");
    let session = ScaleSession::new(transport, SessionConfig::default());

    let result = timeout(BLE_TIMEOUT, session.survey(Duration::from_secs(10))).await;

    match result {
        Ok(Ok(devices)) => {
            println!("Survey found {} devices:", devices.len());
            for device in &devices {
                println!(
                    "  - {} ({}){}",
                    device.name.as_deref().unwrap_or("Unknown"),
                    device.address,
                    if device.looks_like_scale() { " [scale]" } else { "" }
                );
            }
        }
        Ok(Err(e)) => panic!("Survey failed: {}", e),
        Err(_) => panic!("Survey timed out"),
    }
    session.teardown().await;
}

// =============================================================================
// Connection Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_monitor() {
    init_logging();
    let transport = BtleplugTransport::new().await.expect("no Bluetooth adapter");
    let config = SessionConfig::default()
        .address(scale_address())
        .scan_timeout(Duration::from_secs(20));
    let session = ScaleSession::new(transport, config);

    match timeout(BLE_TIMEOUT, session.connect()).await {
        Ok(Ok(())) => println!("Connected to {}", session.config().address),
        Ok(Err(e)) => panic!("Connect failed (is someone standing on the scale?): {}", e),
        Err(_) => panic!("Connect timed out"),
    }
    assert!(session.is_connected());

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    session.start_monitoring(tx).await.expect("subscribe failed");

    match timeout(Duration::from_secs(60), rx.recv()).await {
        Ok(Some(m)) => {
            println!(
                "Weight {:.2} kg, impedance {} ohm, height {:.3} m",
                m.weight(),
                m.impedance(),
                m.height()
            );
            assert!(m.weight() > 0.0);
            assert!(m.impedance() < 3000);
        }
        Ok(None) => panic!("Monitoring ended without a measurement"),
        Err(_) => println!("No stabilized measurement within 60 s"),
    }

    session.teardown().await;
    assert!(!session.is_connected());
}
