use std::time::Duration;

use crate::sim::SimTime;

#[test]
fn sim_time_unit_conversions() {
    assert_eq!(SimTime::from_micros(1), SimTime(1_000));
    assert_eq!(SimTime::from_millis(1), SimTime(1_000_000));
    assert_eq!(SimTime::from_secs(1), SimTime(1_000_000_000));
}

#[test]
fn sim_time_unit_conversions_saturate_on_overflow() {
    assert_eq!(SimTime::from_micros(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_millis(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_secs(u64::MAX), SimTime(u64::MAX));
}

#[test]
fn sim_time_round_trips_through_duration() {
    let d = Duration::from_micros(1_500);
    assert_eq!(SimTime::from_duration(d), SimTime(1_500_000));
    assert_eq!(SimTime(1_500_000).as_duration(), d);
}

#[test]
fn sim_time_arithmetic_saturates() {
    assert_eq!(SimTime(5).saturating_sub(SimTime(7)), SimTime::ZERO);
    assert_eq!(SimTime::MAX.saturating_add(SimTime(1)), SimTime::MAX);
    assert_eq!(SimTime(3).saturating_mul(4), SimTime(12));
    assert_eq!(SimTime::from_millis(200).mul_f64(2.0), SimTime::from_millis(400));
    assert_eq!(SimTime(10).mul_f64(-1.0), SimTime::ZERO);
    assert_eq!(SimTime::MAX.mul_f64(2.0), SimTime::MAX);
}
