use proptest::prelude::*;
use tracer_core::{
    CalibrationTable, EstimatorCfg, PositionEstimator, SpeedCfg, SpeedController, mix,
};

proptest! {
    #[test]
    fn speed_stays_in_band(errors in proptest::collection::vec(-100i32..=100, 1..400)) {
        let cfg = SpeedCfg::default();
        let mut sc = SpeedController::new(cfg.clone());
        for e in errors {
            let v = sc.update(e);
            prop_assert!(v >= cfg.turn_speed && v <= cfg.max_speed, "speed {v}");
            if e.abs() > cfg.turn_threshold {
                prop_assert_eq!(v, cfg.turn_speed);
                prop_assert!(sc.state().is_turning);
            }
        }
    }

    #[test]
    fn precision_mode_never_exceeds_slow_speed(
        errors in proptest::collection::vec(-100i32..=100, 1..400),
    ) {
        let cfg = SpeedCfg::default();
        let mut sc = SpeedController::new(cfg.clone());
        sc.toggle_mode();
        for e in errors {
            let v = sc.update(e);
            prop_assert!(v <= cfg.slow_speed, "precision speed {v}");
        }
    }

    #[test]
    fn speed_changes_are_rate_limited_outside_turns(
        errors in proptest::collection::vec(-60i32..=60, 2..300),
    ) {
        // Within the turn threshold the only jumps are accel/brake ramps plus boost.
        let cfg = SpeedCfg::default();
        let mut sc = SpeedController::new(cfg.clone());
        let mut prev = sc.update(0);
        for e in errors {
            let v = sc.update(e);
            prop_assert!(v - prev <= cfg.accel_step + cfg.boost_increment, "{prev} -> {v}");
            prop_assert!(prev - v <= cfg.brake_step, "{prev} -> {v}");
            prev = v;
        }
    }

    #[test]
    fn mixed_powers_are_bounded(speed in 0i32..=255, correction in -10_000.0f32..10_000.0) {
        let cmd = mix(speed, correction);
        prop_assert!((-255..=255).contains(&cmd.left));
        prop_assert!((-255..=255).contains(&cmd.right));
        if correction >= 0.0 {
            prop_assert!(cmd.left >= cmd.right);
        } else {
            prop_assert!(cmd.left <= cmd.right);
        }
    }

    #[test]
    fn position_is_bounded_and_detection_matches_threshold(
        snapshot in proptest::array::uniform6(0u16..=1023),
    ) {
        let cfg = EstimatorCfg::default();
        let threshold = cfg.line_threshold;
        let mut est = PositionEstimator::new(cfg, CalibrationTable::default());
        let s = est.estimate(&snapshot);
        prop_assert!((-100..=100).contains(&s.position));
        if !snapshot.iter().any(|&r| r < threshold) {
            prop_assert!(!s.line_detected);
            prop_assert_eq!(s.position.abs(), 100);
        }
    }
}
