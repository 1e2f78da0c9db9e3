//! Coordinated shutdown: one failing block stops the whole pipeline and
//! every block still runs `finish()` exactly once.

use super::{Calls, Collector, Fault, Faulty, Journal, finishes};
use rig_common::device::DeviceSettings;
use rig_engine::blocks::{Generator, IoBlock};
use rig_engine::path::{Path, SegmentConfig};
use rig_engine::pipeline::{IoConfig, PerChannel};
use rig_engine::{EngineError, LinkOptions, Orchestrator, Schedule, StopReason};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

/// Generator holding 1.0 forever.
fn hold() -> Generator {
    let path = Path::from_config(
        &[SegmentConfig::Constant {
            value: Some(1.0),
            condition: None,
        }],
        0.0,
    )
    .unwrap();
    Generator::new(path, "cmd")
}

/// Actuator starting at 0.5 and parking at 0.0.
fn actuator() -> (IoBlock, Calls) {
    let config = IoConfig {
        device: "journal".into(),
        labels: None,
        cmd_labels: vec!["cmd".into()],
        streamer: false,
        initial_cmd: Some(PerChannel::All(0.5)),
        exit_values: Some(PerChannel::Each(vec![0.0])),
        device_settings: DeviceSettings::new(),
    };
    let (device, calls) = Journal::new();
    (IoBlock::from_config(&config, device).unwrap(), calls)
}

/// `gen -> act` plus a faulty block.
fn pipeline(fault: Fault) -> (Orchestrator, Calls, Arc<AtomicUsize>) {
    let mut o = Orchestrator::new();
    o.add_block("gen", Box::new(hold()), Schedule::at(200.0)).unwrap();

    let (actuator, calls) = actuator();
    o.add_block("act", Box::new(actuator), Schedule::free()).unwrap();

    let (faulty, finished) = Faulty::new(fault);
    o.add_block("faulty", Box::new(faulty), Schedule::at(100.0)).unwrap();

    o.connect("gen", &["act"], LinkOptions::default()).unwrap();
    (o, calls, finished)
}

fn assert_parked(calls: &Calls) {
    let calls = calls.lock();
    assert_eq!(calls.first().map(String::as_str), Some("open"));
    assert_eq!(calls.get(1).map(String::as_str), Some("set_cmd [0.5]"));
    let n = calls.len();
    assert!(n >= 4, "unexpected journal {calls:?}");
    assert_eq!(calls[n - 2], "set_cmd [0.0]");
    assert_eq!(calls[n - 1], "close");
    assert_eq!(calls.iter().filter(|c| *c == "close").count(), 1);
}

#[test]
fn runtime_error_stops_every_block() {
    let (o, calls, finished) = pipeline(Fault::ErrorAt(5));
    let start = Instant::now();
    let err = o.run().unwrap_err();

    assert!(
        matches!(&err, EngineError::BlockFailed { block, .. } if block == "faulty"),
        "unexpected error {err}"
    );
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(finishes(&finished), 1);
    assert_parked(&calls);
}

#[test]
fn panic_in_a_block_is_a_fatal_error() {
    let (o, calls, finished) = pipeline(Fault::PanicAt(2));
    let err = o.run().unwrap_err();

    match err {
        EngineError::BlockFailed { block, source } => {
            assert_eq!(block, "faulty");
            assert!(source.to_string().contains("driver crashed"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(finishes(&finished), 1);
    assert_parked(&calls);
}

#[test]
fn prepare_failure_aborts_before_t0() {
    let (mut o, _calls, finished) = pipeline(Fault::Prepare);
    let (collector, records, collected) = Collector::new();
    o.add_block("collect", Box::new(collector), Schedule::free()).unwrap();
    o.connect("gen", &["collect"], LinkOptions::named("gen-copy")).unwrap();

    let err = o.run().unwrap_err();
    assert!(matches!(&err, EngineError::PrepareFailed { block, .. } if block == "faulty"));

    // No block looped, yet each one was finished.
    assert!(records.lock().is_empty());
    assert_eq!(finishes(&finished), 1);
    assert_eq!(finishes(&collected), 1);
}

#[test]
fn external_cancel_ends_the_run_cleanly() {
    let (mut o, calls, _) = pipeline(Fault::ErrorAt(u64::MAX));
    let (collector, _records, collected) = Collector::new();
    o.add_block("collect", Box::new(collector), Schedule::free()).unwrap();
    o.connect("gen", &["collect"], LinkOptions::named("gen-copy")).unwrap();

    let cancel = o.cancel_token();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });
    let summary = o.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.reason, StopReason::Interrupted);
    assert!(summary.report("gen").unwrap().loops > 0);
    assert_eq!(finishes(&collected), 1);
    assert_parked(&calls);
}
