//! Plan resolution through a sealed registry.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use detqa::configurator::ConfigError;

use crate::components::{image, Components};

#[test]
fn report_pulls_transitive_checks_in_dependency_order() {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .check("CHK_B", &["CHK_A"], true)
        .report("REP_1", Some("CHK_B"), &[]);
    let configurator = components.configurator(&["REP_1"]);

    let plan = configurator
        .get_configuration(&image("a.fits[1]", "TEST"))
        .expect("plan");
    assert_eq!(plan.check_names(), vec!["CHK_A", "CHK_B"]);
    assert_eq!(plan.report_names(), vec!["REP_1"]);
}

#[test]
fn shared_dependency_appears_once_at_first_position() {
    let mut components = Components::new();
    components
        .check("BASE", &[], true)
        .check("LEFT", &["BASE"], true)
        .check("RIGHT", &["BASE"], true)
        .report("REP_L", Some("LEFT"), &[])
        .report("REP_R", Some("RIGHT"), &[])
        .report("REP_BASE", Some("BASE"), &[]);
    let configurator = components.configurator(&["REP_L", "REP_R", "REP_BASE"]);

    let plan = configurator
        .get_configuration(&image("a.fits[1]", "TEST"))
        .expect("plan");
    assert_eq!(plan.check_names(), vec!["BASE", "LEFT", "RIGHT"]);
    assert_eq!(plan.report_names(), vec!["REP_L", "REP_R", "REP_BASE"]);
}

#[test]
fn unregistered_names_are_skipped() {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .report("REP_1", Some("CHK_A"), &[])
        .report("REP_DANGLING", Some("CHK_GONE"), &[]);
    let configurator = components.configurator(&["MISSING", "REP_1", "REP_DANGLING"]);

    let plan = configurator
        .get_configuration(&image("a.fits[1]", "TEST"))
        .expect("missing names are not an error");
    assert_eq!(plan.report_names(), vec!["REP_1", "REP_DANGLING"]);
    assert_eq!(plan.check_names(), vec!["CHK_A"]);
}

#[test]
fn unknown_instrument_resolves_to_empty_plan() {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .report("REP_1", Some("CHK_A"), &[]);
    let configurator = components.configurator(&["REP_1"]);

    let plan = configurator
        .get_configuration(&image("b.fits[1]", "OTHER"))
        .expect("plan");
    assert!(plan.is_empty());
    assert!(plan.checks.is_empty());
    assert!(plan.reports.is_empty());
}

#[test]
fn check_cycle_fails_fast_with_path() {
    let mut components = Components::new();
    components
        .check("CHK_X", &["CHK_Y"], true)
        .check("CHK_Y", &["CHK_X"], true)
        .report("REP", Some("CHK_X"), &[]);
    let configurator = components.configurator(&["REP"]);

    match configurator.get_configuration(&image("a.fits[1]", "TEST")) {
        Err(ConfigError::Cycle(path)) => assert_eq!(path, ["CHK_X", "CHK_Y", "CHK_X"]),
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn report_dependencies_run_first() {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .report("REP_1", Some("CHK_A"), &[])
        .report("REP_SUMMARY", None, &["REP_1"]);
    let configurator = components.configurator(&["REP_SUMMARY"]);

    let plan = configurator
        .get_configuration(&image("a.fits[1]", "TEST"))
        .expect("plan");
    assert_eq!(plan.report_names(), vec!["REP_1", "REP_SUMMARY"]);
    assert_eq!(plan.check_names(), vec!["CHK_A"]);
}

#[test]
fn cached_components_are_shared_across_images() {
    let mut components = Components::new();
    components
        .check("CHK_A", &[], true)
        .report("REP_1", Some("CHK_A"), &[]);
    let constructed = Arc::clone(&components.constructed);
    let configurator = components.configurator(&["REP_1"]);
    assert_eq!(constructed.load(Ordering::SeqCst), 1, "built once at seal");

    let first = configurator
        .get_configuration(&image("a.fits[1]", "TEST"))
        .expect("plan");
    let second = configurator
        .get_configuration(&image("a.fits[2]", "TEST"))
        .expect("plan");
    let (a, b) = (first.checks.first(), second.checks.first());
    assert!(matches!((a, b), (Some(a), Some(b)) if Arc::ptr_eq(a, b)));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
}

#[test]
fn uncached_components_are_built_per_call() {
    let mut components = Components::new();
    components.check("CHK_FRESH", &[], false);
    let constructed = Arc::clone(&components.constructed);
    let configurator = components.configurator(&[]);
    assert_eq!(constructed.load(Ordering::SeqCst), 0);

    let registry = configurator.registry();
    let a = registry.build_check("CHK_FRESH").expect("build");
    let b = registry.build_check("CHK_FRESH").expect("build");
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}
