//! Whole pipelines: a ramp generator driving an actuator, and a pipeline
//! file driving the simulated motor into a recorder.

use super::{Collector, Journal, finishes};
use rig_common::config::ConfigLoader;
use rig_common::device::DeviceSettings;
use rig_engine::blocks::{Generator, IoBlock, Reader};
use rig_engine::path::{Path, SegmentConfig};
use rig_engine::pipeline::{IoConfig, PerChannel};
use rig_engine::registry;
use rig_engine::{LinkOptions, OnExhausted, Orchestrator, PipelineConfig, Schedule, StopReason};
use std::sync::atomic::Ordering;

fn ramp(delay: f64) -> Generator {
    let path = Path::from_config(
        &[SegmentConfig::Ramp {
            speed: 1.0,
            condition: Some(format!("delay={delay}")),
            cmd: Some(0.0),
        }],
        0.0,
    )
    .unwrap();
    Generator::new(path, "cmd")
}

#[test]
fn ramp_drives_actuator_and_parks_it_at_exit() {
    let mut o = Orchestrator::new();
    o.add_block(
        "gen",
        Box::new(ramp(0.5)),
        Schedule::at(100.0).on_exhausted(OnExhausted::Cascade),
    )
    .unwrap();

    let (device, calls) = Journal::new();
    let config = IoConfig {
        device: "journal".into(),
        labels: None,
        cmd_labels: vec!["cmd".into()],
        streamer: false,
        initial_cmd: None,
        exit_values: Some(PerChannel::All(0.0)),
        device_settings: DeviceSettings::new(),
    };
    let actuator = IoBlock::from_config(&config, device).unwrap();
    o.add_block("act", Box::new(actuator), Schedule::at(100.0)).unwrap();

    let (collector, records, collected) = Collector::new();
    o.add_block("collect", Box::new(collector), Schedule::free()).unwrap();

    // Built-in logger, paced slower than the generator: whatever is still
    // queued at shutdown is logged by its finish().
    let reader = Reader::new("log");
    let logged = reader.counter();
    o.add_block("log", Box::new(reader), Schedule::at(5.0)).unwrap();

    o.connect("gen", &["act", "collect", "log"], LinkOptions::default())
        .unwrap();

    let summary = o.run().unwrap();
    assert_eq!(
        summary.reason,
        StopReason::Exhausted {
            block: "gen".into()
        }
    );

    // The collector saw every command the generator sent, in order.
    let records = records.lock();
    let gen_loops = summary.report("gen").unwrap().loops;
    assert_eq!(records.len() as u64, gen_loops);
    assert_eq!(logged.load(Ordering::SeqCst), gen_loops);
    assert!(records.len() >= 30, "only {} records", records.len());
    let times: Vec<f64> = records.iter().filter_map(|r| r.time()).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    // The command tracks elapsed time since the segment started.
    let first_t = times[0];
    for record in records.iter() {
        let t = record.time().unwrap();
        let cmd = record.scalar("cmd").unwrap();
        assert!((cmd - (t - first_t)).abs() < 1e-9, "cmd {cmd} at {t}");
        assert!(cmd < 0.5 + 1e-9);
    }
    assert_eq!(finishes(&collected), 1);

    let calls = calls.lock();
    assert_eq!(calls[0], "open");
    assert_eq!(calls[1], "set_cmd [0.0]");
    assert!(calls.len() > 3);
    assert_eq!(calls[calls.len() - 2], "set_cmd [0.0]");
    assert_eq!(calls[calls.len() - 1], "close");
}

#[test]
fn pipeline_file_runs_simulated_motor_into_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("motor.jsonl");
    let file = dir.path().join("pipeline.toml");
    std::fs::write(
        &file,
        format!(
            r#"
[shared]
name = "bench"

[[blocks]]
name = "gen"
kind = "generator"
freq = 200
cmd_label = "volts"
path = [{{ type = "constant", value = 1.0, condition = "delay=0.3" }}]

[[blocks]]
name = "motor"
kind = "io"
freq = 200
device = "fake_motor"
labels = ["t(s)", "rpm", "pos"]
cmd_labels = ["volts"]
exit_values = 0.0

[[blocks]]
name = "rec"
kind = "recorder"
path = {output:?}

[[links]]
from = "gen"
to = "motor"

[[links]]
from = "motor"
to = "rec"
"#
        ),
    )
    .unwrap();

    let config = PipelineConfig::load(&file).unwrap();
    let o = Orchestrator::from_config(&config, registry::builtin()).unwrap();
    assert_eq!(o.block_names(), vec!["gen", "motor", "rec"]);

    let summary = o.run().unwrap();
    assert!(matches!(summary.reason, StopReason::Exhausted { ref block } if block == "gen"));

    let content = std::fs::read_to_string(&output).unwrap();
    let rows: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(!rows.is_empty());
    assert_eq!(
        rows.len() as u64,
        summary.report("motor").unwrap().loops,
        "recorder must keep every sample"
    );
    let first = rows.first().unwrap()["rpm"].as_f64().unwrap();
    let last = rows.last().unwrap()["rpm"].as_f64().unwrap();
    assert!(last > first, "motor did not spin up: {first} -> {last}");
}
