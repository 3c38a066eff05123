use netmesh_types::CoherenceSpecification;
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn default_is_adaptive_hour_week() {
    match CoherenceSpecification::default() {
        CoherenceSpecification::AdaptivePeriodic {
            fallback_ms,
            max_ms,
            factor,
        } => {
            assert_eq!(fallback_ms, 3_600_000);
            assert_eq!(max_ms, 604_800_000);
            assert_eq!(factor, 1.1);
        }
        other => panic!("Expected AdaptivePeriodic, got {other:?}"),
    }
}

#[test]
fn external_forms() {
    assert_eq!(
        CoherenceSpecification::OneTimeOnly.to_external_form(),
        "one-time-only"
    );
    assert_eq!(
        CoherenceSpecification::Periodic { period_ms: 500 }.to_external_form(),
        "periodic{500}"
    );
    assert_eq!(
        CoherenceSpecification::from_external_form("adaptive-periodic{10,100,2.0}").unwrap(),
        CoherenceSpecification::AdaptivePeriodic {
            fallback_ms: 10,
            max_ms: 100,
            factor: 2.0
        }
    );
}

#[test]
fn invalid_external_forms() {
    for bad in [
        "",
        "periodic",
        "periodic{}",
        "periodic{abc}",
        "periodic{1,2}",
        "adaptive-periodic{1,2}",
        "adaptive-periodic{1,2,0.5}",
        "weekly{1}",
    ] {
        assert!(
            CoherenceSpecification::from_external_form(bad).is_err(),
            "accepted {bad:?}"
        );
    }
}

#[test]
fn one_time_only_never_reruns() {
    let spec = CoherenceSpecification::OneTimeOnly;
    assert_eq!(spec.initial_delay(), None);
    assert_eq!(spec.next_delay(None, true), None);
}

#[test]
fn periodic_is_constant() {
    let spec = CoherenceSpecification::Periodic { period_ms: 250 };
    assert_eq!(spec.initial_delay(), Some(Duration::from_millis(250)));
    assert_eq!(
        spec.next_delay(Some(Duration::from_secs(9)), false),
        Some(Duration::from_millis(250))
    );
}

#[test]
fn adaptive_grows_when_unchanged_and_resets_when_changed() {
    let spec = CoherenceSpecification::AdaptivePeriodic {
        fallback_ms: 100,
        max_ms: 300,
        factor: 2.0,
    };
    let d1 = spec.next_delay(Some(Duration::from_millis(100)), false).unwrap();
    assert_eq!(d1, Duration::from_millis(200));
    let d2 = spec.next_delay(Some(d1), false).unwrap();
    assert_eq!(d2, Duration::from_millis(300), "capped at max");
    let d3 = spec.next_delay(Some(d2), true).unwrap();
    assert_eq!(d3, Duration::from_millis(100), "reset to fallback");
}

proptest! {
    #[test]
    fn periodic_external_form_roundtrip(period in 0u64..u64::MAX) {
        let spec = CoherenceSpecification::Periodic { period_ms: period };
        let back = CoherenceSpecification::from_external_form(&spec.to_external_form()).unwrap();
        prop_assert_eq!(back, spec);
    }

    #[test]
    fn adaptive_external_form_roundtrip(
        fallback in 0u64..1_000_000,
        max in 0u64..10_000_000,
        factor in 1.0f64..10.0,
    ) {
        let spec = CoherenceSpecification::AdaptivePeriodic { fallback_ms: fallback, max_ms: max, factor };
        let back = CoherenceSpecification::from_external_form(&spec.to_external_form()).unwrap();
        prop_assert_eq!(back, spec);
    }
}
