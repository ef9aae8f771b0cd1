//! Simulating plans against the banana farm.

use banananation::{model, ProducerMapper};
use hifitime::TimeUnits;
use kestrel::*;

fn plan_start() -> Time {
    Time::from_gregorian_utc_at_midnight(2026, 1, 1)
}

fn run(schedule: &Schedule, horizon: Duration) -> SimulationResults {
    let (mission, _) = model().unwrap();
    let simulator = Simulator::new(&mission, plan_start());
    match simulator.simulate(schedule, horizon, || false).unwrap() {
        SimulationOutcome::Completed(results) => results,
        SimulationOutcome::Canceled { .. } => panic!("run was canceled unexpectedly"),
    }
}

fn fruit_at(results: &SimulationResults, at: Duration) -> f64 {
    results.real_profiles["/fruit"].at(at).unwrap().initial
}

fn peel_at(results: &SimulationResults, at: Duration) -> f64 {
    results.real_profiles["/peel"].at(at).unwrap().initial
}

fn producer_at(results: &SimulationResults, at: Duration) -> RegisterState<String> {
    ProducerMapper
        .deserialize(results.discrete_profiles["/producer"].at(at).unwrap())
        .unwrap()
}

#[test]
fn peel_then_bite() {
    let (schedule, _) = Schedule::empty().plus(
        0.seconds(),
        Directive::new("PeelBanana").argument("peelDirection", "fromStem"),
    );
    let (schedule, _) = schedule.plus(
        500.milliseconds(),
        Directive::new("BiteBanana").argument("biteSize", 0.5),
    );
    let results = run(&schedule, 2.seconds());

    assert_eq!(3.0, fruit_at(&results, 0.seconds()));
    assert_eq!(3.0, peel_at(&results, 0.seconds()));
    assert_eq!(2.5, fruit_at(&results, 500.milliseconds()));
    assert_eq!(2.5, fruit_at(&results, 2.seconds()));
    assert_eq!(3.0, peel_at(&results, 2.seconds()));

    assert_eq!(2, results.simulated_activities.len());
    let bite = results
        .simulated_activities
        .values()
        .find(|a| a.type_name == "BiteBanana")
        .unwrap();
    assert_eq!(plan_start() + 500.milliseconds(), bite.start);
    assert_eq!(Duration::ZERO, bite.duration);
    assert_eq!(
        SerializedValue::Map(std::collections::BTreeMap::from([(
            "biteSize".to_string(),
            SerializedValue::Real(0.5),
        )])),
        bite.computed_attributes
    );
}

#[test]
fn peeling_from_the_tip_spares_the_peel() {
    let (schedule, _) = Schedule::empty().plus(
        0.seconds(),
        Directive::new("PeelBanana").argument("peelDirection", "fromTip"),
    );
    let results = run(&schedule, 1.minutes());

    assert_eq!(3.0, fruit_at(&results, 0.seconds()));
    assert_eq!(4.0, peel_at(&results, 0.seconds()));
}

#[test]
fn growing_takes_time() {
    let (schedule, _) = Schedule::empty().plus(
        10.seconds(),
        Directive::new("GrowBanana")
            .argument("quantity", 2.0)
            .argument("growingDuration", 5_000_000i64),
    );
    let results = run(&schedule, 1.minutes());

    assert_eq!(4.0, fruit_at(&results, 10.seconds()));
    assert_eq!(6.0, fruit_at(&results, 15.seconds()));

    let grow = results.simulated_activities.values().next().unwrap();
    assert_eq!(5.seconds(), grow.duration);
}

#[test]
fn a_bunch_grows_concurrently() {
    let (schedule, _) = Schedule::empty().plus(
        0.seconds(),
        Directive::new("GrowBunch")
            .argument("quantity", 1.0)
            .argument("count", 3i64),
    );
    let results = run(&schedule, 1.minutes());

    // One banana lands each second; the parent spans the whole bunch.
    assert_eq!(4.0, fruit_at(&results, 0.seconds()));
    assert_eq!(5.0, fruit_at(&results, 1.seconds()));
    assert_eq!(6.0, fruit_at(&results, 2.seconds()));
    assert_eq!(7.0, fruit_at(&results, 3.seconds()));

    assert_eq!(4, results.simulated_activities.len());
    let bunch = results
        .simulated_activities
        .values()
        .find(|a| a.type_name == "GrowBunch")
        .unwrap();
    assert_eq!(3.seconds(), bunch.duration);
    assert_eq!(3, bunch.children.len());
}

#[test]
fn producer_conflicts_surface_and_clear() {
    let (schedule, _) = Schedule::empty().plus(
        1.seconds(),
        Directive::new("ChangeProducer").argument("producer", "Dole"),
    );
    let (schedule, _) = schedule.plus(
        1.seconds(),
        Directive::new("ChangeProducer").argument("producer", "Fyffes"),
    );
    let (schedule, _) = schedule.plus(
        2.seconds(),
        Directive::new("ChangeProducer").argument("producer", "Del Monte"),
    );
    let results = run(&schedule, 1.minutes());

    let initial = producer_at(&results, 0.seconds());
    assert_eq!("Chiquita", initial.value);
    assert!(!initial.conflicted);

    let during = producer_at(&results, 1.seconds());
    assert!(during.conflicted);
    assert_eq!("Chiquita", during.value);

    let after = producer_at(&results, 2.seconds());
    assert!(!after.conflicted);
    assert_eq!("Del Monte", after.value);
}

#[test]
fn rot_is_contained() {
    let (schedule, _) = Schedule::empty().plus(5.seconds(), Directive::new("RottenBanana"));
    let (schedule, _) = schedule.plus(
        5.seconds(),
        Directive::new("GrowBanana")
            .argument("quantity", 1.0)
            .argument("growingDuration", 1_000_000i64),
    );
    let results = run(&schedule, 1.minutes());

    let rotten = results
        .simulated_activities
        .values()
        .find(|a| a.type_name == "RottenBanana")
        .unwrap();
    let failure = rotten.failure.as_deref().unwrap();
    assert!(failure.contains("rotten"), "{failure}");

    // The spoilage landed, and the concurrent grow was unaffected.
    assert_eq!(3.0, fruit_at(&results, 5.seconds()));
    assert_eq!(4.0, fruit_at(&results, 6.seconds()));
}

#[test]
fn the_same_plan_simulates_identically() {
    let (schedule, _) = Schedule::empty().plus(
        0.seconds(),
        Directive::new("GrowBunch")
            .argument("quantity", 0.5)
            .argument("count", 2i64),
    );
    let (schedule, _) = schedule.plus(
        1.seconds(),
        Directive::new("BiteBanana").argument("biteSize", 1.5),
    );
    let (schedule, _) = schedule.plus(
        1.seconds(),
        Directive::new("ChangeProducer").argument("producer", "Dole"),
    );

    let first = run(&schedule, 1.minutes());
    let second = run(&schedule, 1.minutes());
    assert_eq!(first, second);
}

#[test]
fn invalid_directions_fail_instantiation() {
    let (schedule, _) = Schedule::empty().plus(
        0.seconds(),
        Directive::new("PeelBanana").argument("peelDirection", "sideways"),
    );
    let (mission, _) = model().unwrap();
    let simulator = Simulator::new(&mission, plan_start());
    assert!(simulator.simulate(&schedule, 1.minutes(), || false).is_err());
}
