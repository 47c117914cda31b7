use std::collections::HashMap;
use std::time::Duration;

use easyservo::catalog;
use easyservo::codec::with_crc;
use easyservo::scope::SAMPLE_COUNT;
use easyservo::{
    AxisTrace, Calibration, CommandChannel, Monitor, SampleBatch, ScopeSession, ScriptedTransport,
};

fn begin_ack() -> Vec<u8> {
    with_crc(&[0x01, 0x06, 0x00, 0x14, 0x00, 0x01])
}

fn status(byte: u8) -> Vec<u8> {
    with_crc(&[0x01, 0x03, 0x02, 0x00, byte])
}

fn sample_frame(word: u16) -> Vec<u8> {
    let mut frame = vec![0x01, 0x03, 0x90];
    for _ in 0..SAMPLE_COUNT {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    with_crc(&frame)
}

fn axis(monitor: &mut Monitor, name: &str) -> ScriptedTransport {
    let transport = ScriptedTransport::new();
    let session = ScopeSession::new(CommandChannel::new(transport.clone()), Calibration::default());
    monitor.add_axis(name, session, 5.0);
    transport
}

#[test]
fn polls_axes_in_turn_and_retriggers_before_delivery() {
    let mut monitor = Monitor::new(Duration::ZERO);
    let x = axis(&mut monitor, "x-axis");
    let y = axis(&mut monitor, "y-axis");

    // x completes on the first poll, y needs two
    x.push_reply(begin_ack())
        .push_reply(status(0x02))
        .push_reply(sample_frame(4000))
        .push_reply(begin_ack());
    y.push_reply(begin_ack())
        .push_reply(status(0x01))
        .push_reply(status(0x02))
        .push_reply(sample_frame(0xF05F))
        .push_reply(begin_ack());

    let handles: HashMap<&str, ScriptedTransport> =
        [("x-axis", x.clone()), ("y-axis", y.clone())].into_iter().collect();
    let mut seen = Vec::new();
    let mut sink = |name: &str, trace: &AxisTrace, batch: &SampleBatch| {
        let last_write = handles[name].writes().last().cloned();
        assert_eq!(last_write, Some(catalog::scope_begin().encode()));
        assert_eq!(trace.len(), batch.len());
        seen.push((name.to_string(), batch.values()[0]));
    };

    let delivered = monitor.run(&mut sink, Some(2)).unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(seen, vec![("x-axis".to_string(), 5.0), ("y-axis".to_string(), -5.0)]);

    assert_eq!(x.pending_replies(), 0);
    assert_eq!(y.pending_replies(), 0);
    // x was polled once more while y was still capturing
    assert_eq!(x.writes().len(), 5);
    assert_eq!(y.writes().len(), 5);
}

#[test]
fn lost_frame_is_retriggered_on_the_next_pass() {
    let mut monitor = Monitor::new(Duration::ZERO);
    let z = axis(&mut monitor, "z-axis");
    z.push_reply(begin_ack())
        .push_reply(status(0x02))
        .push_reply(vec![0x01, 0x03])
        .push_reply(begin_ack());

    monitor.start().unwrap();
    let mut calls = 0;
    let mut sink = |_: &str, _: &AxisTrace, _: &SampleBatch| calls += 1;
    assert_eq!(monitor.poll_once(&mut sink).unwrap(), 0);
    assert_eq!(monitor.poll_once(&mut sink).unwrap(), 0);
    assert_eq!(calls, 0);

    let writes = z.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[3], catalog::scope_begin().encode());
    assert!(monitor.axis("z-axis").unwrap().trace.is_empty());
}

#[test]
fn run_stops_mid_pass_at_the_batch_limit() {
    let mut monitor = Monitor::new(Duration::ZERO);
    let x = axis(&mut monitor, "x-axis");
    let y = axis(&mut monitor, "y-axis");
    for transport in [&x, &y] {
        transport
            .push_reply(begin_ack())
            .push_reply(status(0x02))
            .push_reply(sample_frame(0))
            .push_reply(begin_ack());
    }

    let mut names = Vec::new();
    let mut sink = |name: &str, _: &AxisTrace, _: &SampleBatch| names.push(name.to_string());
    assert_eq!(monitor.run(&mut sink, Some(1)).unwrap(), 1);
    assert_eq!(names, vec!["x-axis".to_string()]);

    // y was triggered by start() but never polled
    assert_eq!(y.writes(), vec![catalog::scope_begin().encode()]);
    assert_eq!(y.pending_replies(), 3);
}
