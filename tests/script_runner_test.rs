//! Tests for script execution: step dispatch, fault aborts, and the
//! single-teardown guarantee.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::ScriptedDriver;
use instrument_control::controller::Controller;
use instrument_control::error::ControlError;
use instrument_control::script::Script;

#[tokio::test]
async fn runs_steps_in_order_and_tears_down() {
    let driver = ScriptedDriver::with_states(&["DRIVER_STATE_COMMAND"]);
    let controller = Controller::new(Arc::clone(&driver));

    let script = Script::from_str(
        r#"
- start_driver
- configure: { addr: localhost, port: 1234 }
- connect
- execute: DRIVER_EVENT_ACQUIRE_SAMPLE
"#,
    )
    .unwrap();
    controller.run_script(&script).await.unwrap();

    assert_eq!(
        driver.calls(),
        vec![
            "start",
            "configure",
            "connect",
            "execute:\"DRIVER_EVENT_ACQUIRE_SAMPLE\"",
            "stop",
        ]
    );
    assert_eq!(driver.stop_calls(), 1);
}

#[tokio::test]
async fn exception_reply_aborts_the_script_but_still_stops_the_driver() {
    let driver = ScriptedDriver::with_states(&["DRIVER_STATE_COMMAND"]);
    driver.set_execute_reply(json!({
        "type": "DRIVER_EXCEPTION_EVENT",
        "value": ["InstrumentTimeoutException"]
    }));
    let controller = Controller::new(Arc::clone(&driver));

    let script = Script::from_str("- execute: DRIVER_EVENT_ACQUIRE_SAMPLE\n- connect\n").unwrap();
    let result = controller.run_script(&script).await;

    match result {
        Err(ControlError::DriverFault { value }) => {
            assert_eq!(value[0], "InstrumentTimeoutException");
        }
        other => panic!("expected driver fault, got {other:?}"),
    }
    // The step after the fault never ran, and teardown still happened once.
    assert!(!driver.calls().contains(&"connect".to_string()));
    assert_eq!(driver.stop_calls(), 1);
}

#[tokio::test]
async fn explicit_stop_step_does_not_double_stop() {
    let driver = ScriptedDriver::with_states(&["DRIVER_STATE_COMMAND"]);
    let controller = Controller::new(Arc::clone(&driver));

    let script = Script::from_str("- connect\n- stop_driver\n- sleep: 0\n").unwrap();
    controller.run_script(&script).await.unwrap();
    assert_eq!(driver.stop_calls(), 1);
}

#[tokio::test]
async fn run_script_starts_from_an_empty_store() {
    let driver = ScriptedDriver::with_states(&["DRIVER_STATE_COMMAND"]);
    let controller = Controller::new(Arc::clone(&driver));
    controller
        .samples()
        .insert("ctdbp_sample", 1.0, json!({"stale": true}));

    let script = Script::from_str("[]").unwrap();
    controller.run_script(&script).await.unwrap();
    assert!(controller.samples().is_empty());
}

#[tokio::test]
async fn script_file_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.yaml");
    std::fs::write(&path, "- start_driver\n- sleep: 0.1\n- stop_driver\n").unwrap();

    let script = Script::load(&path).unwrap();
    assert_eq!(script.steps().len(), 3);
}
