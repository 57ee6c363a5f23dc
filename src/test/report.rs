use serde_json::Value;

use crate::error::Error;
use crate::report::{ReportEventKind, RunReport, SegmentSummary};
use crate::sim::SimTime;

fn summary() -> SegmentSummary {
    SegmentSummary {
        src_port: 40_000,
        dst_port: 49_152,
        seq: 1,
        ack: 2,
        flags: "PSH|ACK".into(),
        len: 11,
    }
}

#[test]
fn events_serialize_flat_with_a_kind_tag() {
    let mut report = RunReport::default();
    report.push(SimTime::from_millis(4), ReportEventKind::Matched(summary()));
    report.push(
        SimTime::from_millis(606),
        ReportEventKind::Interval {
            probe: 1,
            elapsed_ns: 400_000_000,
            lower_ns: 202_000_000,
            upper_ns: 808_000_000,
        },
    );
    report.verdict(SimTime::from_secs(7), None);

    let v: Value = serde_json::from_str(&report.to_json().expect("json")).expect("parse");
    let events = v["events"].as_array().expect("events array");
    assert_eq!(events.len(), 3);

    assert_eq!(events[0]["kind"], "matched");
    assert_eq!(events[0]["t_ns"], 4_000_000);
    assert_eq!(events[0]["flags"], "PSH|ACK");

    assert_eq!(events[1]["kind"], "interval");
    assert_eq!(events[1]["lower_ns"], 202_000_000);

    assert_eq!(events[2]["kind"], "verdict");
    assert_eq!(events[2]["pass"], true);
    assert!(events[2].get("message").is_none());

    let back: RunReport = serde_json::from_value(v).expect("back");
    assert_eq!(back, report);
}

#[test]
fn passed_follows_the_last_verdict() {
    let mut report = RunReport::default();
    assert_eq!(report.passed(), None);

    let err = Error::TimingViolation {
        probe: 1,
        observed: SimTime::from_millis(200),
        lower: SimTime::from_millis(202),
    };
    report.verdict(SimTime::from_secs(1), Some(&err));
    assert_eq!(report.passed(), Some(false));
    match &report.events[0].kind {
        ReportEventKind::Verdict { message: Some(m), .. } => {
            assert!(m.starts_with("retransmit came sooner"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(report.intervals().count(), 0);
}
