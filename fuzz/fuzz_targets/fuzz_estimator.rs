#![no_main]
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tracer_core::{CalibrationTable, EstimatorCfg, PositionEstimator};

#[derive(Debug, Arbitrary)]
struct Input {
    min: [u16; 6],
    max: [u16; 6],
    frames: Vec<[u16; 6]>,
}

// Any calibration and any raw frames keep the position within bounds.
fuzz_target!(|input: Input| {
    let table = CalibrationTable {
        min: input.min,
        max: input.max,
    };
    let mut est = PositionEstimator::new(EstimatorCfg::default(), table);
    for frame in &input.frames {
        let s = est.estimate(frame);
        assert!((-100..=100).contains(&s.position), "{s:?}");
    }
});
