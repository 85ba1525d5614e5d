//! Whole-tick behaviour of the navigator driven by scripted collaborators and
//! a manual clock (1 kHz loop, marker sampled every 2 ms).

use std::error::Error;
use std::sync::{Arc, Mutex};

use rstest::rstest;
use tracer_core::mocks::NoopLineSensors;
use tracer_core::{CalibrationTable, DriveStatus, Navigator, StopPhase};
use tracer_traits::{
    LineSensors, ManualClock, MarkerReading, MarkerSensors, Motors, PerformanceSample,
    SensorSnapshot, Telemetry,
};

const CLEAR: MarkerReading = MarkerReading { left: 900, right: 900 };
/// Left channel on tape: packs to `RightOnly`, the lap marker code.
const LAP: MarkerReading = MarkerReading { left: 100, right: 900 };
/// Right channel on tape: packs to `LeftOnly`, the mode marker code.
const MODE: MarkerReading = MarkerReading { left: 900, right: 100 };
const CROSS: MarkerReading = MarkerReading { left: 100, right: 100 };

const CENTERED: SensorSnapshot = [900, 900, 100, 100, 900, 900];
const FAR_RIGHT: SensorSnapshot = [900, 900, 900, 900, 300, 100];
const NO_LINE: SensorSnapshot = [900; 6];

/// Replays marker readings, one per sample; the last one repeats.
struct Script {
    readings: Vec<MarkerReading>,
    next: usize,
}

impl MarkerSensors for Script {
    fn read(&mut self) -> Result<MarkerReading, Box<dyn Error + Send + Sync>> {
        let r = self.readings[self.next.min(self.readings.len() - 1)];
        self.next += 1;
        Ok(r)
    }
}

#[derive(Clone, Default)]
struct MotorLog(Arc<Mutex<Vec<(i32, i32)>>>);

impl MotorLog {
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
    fn last(&self) -> Option<(i32, i32)> {
        self.0.lock().unwrap().last().copied()
    }
    fn all(&self) -> Vec<(i32, i32)> {
        self.0.lock().unwrap().clone()
    }
}

impl Motors for MotorLog {
    fn set_power(&mut self, left: i32, right: i32) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.lock().unwrap().push((left, right));
        Ok(())
    }
}

fn navigator(markers: Vec<MarkerReading>) -> (ManualClock, MotorLog, Navigator) {
    let clock = ManualClock::new();
    let motors = MotorLog::default();
    let mut nav = Navigator::builder()
        .with_line_sensors(NoopLineSensors)
        .with_marker_sensors(Script {
            readings: markers,
            next: 0,
        })
        .with_motors(motors.clone())
        .with_clock(Box::new(clock.clone()))
        .build()
        .expect("navigator build");
    nav.begin();
    (clock, motors, nav)
}

fn tick(nav: &mut Navigator, snapshot: &SensorSnapshot) -> DriveStatus {
    nav.step_with_snapshot(snapshot)
        .unwrap_or_else(|e| panic!("tick: {e}"))
}

fn run_ticks(nav: &mut Navigator, n: usize, snapshot: &SensorSnapshot) {
    for _ in 0..n {
        tick(nav, snapshot);
    }
}

#[rstest]
fn centered_line_drives_straight() {
    let (_c, motors, mut nav) = navigator(vec![CLEAR]);
    run_ticks(&mut nav, 200, &CENTERED);
    assert_eq!(nav.last_sample().position, 0);
    let (l, r) = motors.last().unwrap();
    assert_eq!(l, r);
    assert_eq!(l, 200, "ramped to the fast baseline");
}

#[rstest]
fn line_right_of_center_steers_right() {
    let (_c, motors, mut nav) = navigator(vec![CLEAR]);
    tick(&mut nav, &FAR_RIGHT);
    assert!(nav.last_sample().position > 60);
    assert!(nav.motion().is_turning);
    let (l, r) = motors.last().unwrap();
    assert!(l > r, "left wheel faster turns right: {l} {r}");
}

#[rstest]
fn lost_line_keeps_turning_toward_last_side() {
    let (_c, _m, mut nav) = navigator(vec![CLEAR]);
    tick(&mut nav, &FAR_RIGHT);
    tick(&mut nav, &NO_LINE);
    let s = nav.last_sample();
    assert_eq!(s.position, 100);
    assert!(!s.line_detected);
}

#[rstest]
fn single_finish_line_counts_one_lap() {
    // The CLEAR read after the tape completes the pattern and counts it.
    let (_c, _m, mut nav) = navigator(vec![LAP, CLEAR, CLEAR]);
    run_ticks(&mut nav, 2, &CENTERED);
    assert_eq!(nav.lap_count(), 0);
    tick(&mut nav, &CENTERED);
    assert_eq!(nav.lap_count(), 1);
    run_ticks(&mut nav, 20, &CENTERED);
    assert_eq!(nav.lap_count(), 1);
    assert_eq!(nav.phase(), StopPhase::Running);
}

#[rstest]
fn mode_marker_toggles_precision_and_resets_motion() {
    let (_c, _m, mut nav) = navigator(vec![CLEAR, CLEAR, CLEAR, MODE, CLEAR, MODE]);
    // Sharp turn then straight: exiting a turn with boost armed.
    tick(&mut nav, &FAR_RIGHT); // read 0
    tick(&mut nav, &CENTERED);
    assert!(nav.motion().is_exiting_turn);
    assert!(nav.motion().boost_countdown > 0);
    // Reads 1..=4 happen on ticks 2, 4, 6, 8; the toggle fires on read 4.
    run_ticks(&mut nav, 6, &CENTERED);
    assert!(!nav.motion().is_precision_mode);
    tick(&mut nav, &FAR_RIGHT);
    assert!(nav.motion().is_precision_mode);
    // The turn on the same tick re-flags turning after the reset.
    assert!(nav.motion().is_turning);
    run_ticks(&mut nav, 2, &CENTERED);
    let m = nav.motion();
    assert!(m.is_precision_mode);
    assert!(!m.is_turning);
    assert_eq!(nav.lap_count(), 0);
}

#[rstest]
fn mode_toggle_sets_slow_baseline() {
    let (_c, motors, mut nav) = navigator(vec![MODE, CLEAR, MODE]);
    run_ticks(&mut nav, 300, &CENTERED);
    assert!(nav.motion().is_precision_mode);
    assert_eq!(nav.motion().current_speed, 140);
    assert_eq!(motors.last(), Some((140, 140)));
}

#[rstest]
fn second_finish_arms_stop_and_vehicle_halts_after_stop_delay() {
    let (clock, motors, mut nav) = navigator(vec![LAP, CLEAR, LAP, CLEAR, LAP, CLEAR]);
    run_ticks(&mut nav, 6, &CENTERED);
    assert_eq!(nav.lap_count(), 1);
    // Read 3 on tick 6 is the second finish.
    tick(&mut nav, &CENTERED);
    assert_eq!(nav.lap_count(), 2);
    assert_eq!(nav.phase(), StopPhase::Slowing);
    assert_eq!(motors.last(), Some((60, 60)), "brake speed while slowing");

    let mut ticks = 0;
    while tick(&mut nav, &CENTERED) == DriveStatus::Running {
        ticks += 1;
        assert!(ticks < 1000, "never stopped");
    }
    // Armed at 6 ms, cut 300 ms later.
    assert_eq!(clock.elapsed().as_millis(), 306);
    assert!(nav.is_robot_stopped());
    assert_eq!(motors.last(), Some((0, 0)));
    assert_eq!(nav.motion().current_speed, 0);

    // Terminal: nothing else reaches the motors.
    let commands = motors.len();
    for _ in 0..50 {
        assert_eq!(tick(&mut nav, &FAR_RIGHT), DriveStatus::Stopped);
    }
    assert_eq!(motors.len(), commands);
    assert_eq!(nav.motion().current_speed, 0);
}

#[rstest]
fn third_finish_does_not_rearm() {
    let script = vec![LAP, CLEAR, LAP, CLEAR, LAP, CLEAR];
    let (clock, _m, mut nav) = navigator(script);
    while tick(&mut nav, &CENTERED) == DriveStatus::Running {}
    assert_eq!(nav.lap_count(), 3);
    // Armed by the second crossing at 6 ms; the third at 10 ms changes nothing.
    assert_eq!(clock.elapsed().as_millis(), 306);
}

#[rstest]
fn phase_only_moves_forward() {
    let (_c, _m, mut nav) = navigator(vec![LAP, CLEAR, LAP, CLEAR, LAP, CLEAR]);
    let mut last = nav.phase();
    for _ in 0..600 {
        tick(&mut nav, &CENTERED);
        assert!(nav.phase() >= last);
        last = nav.phase();
    }
    assert_eq!(last, StopPhase::Stopped);
}

#[rstest]
fn intersection_is_counted_without_touching_motion() {
    let (_c, _m, mut nav) = navigator(vec![CROSS, CLEAR]);
    run_ticks(&mut nav, 2, &CENTERED);
    let before = *nav.motion();
    tick(&mut nav, &CENTERED); // read 1: CROSS -> CLEAR puts Both in history
    assert_eq!(nav.intersections(), 1);
    assert_eq!(nav.lap_count(), 0);
    assert_eq!(nav.motion().is_precision_mode, before.is_precision_mode);
}

#[rstest]
fn begin_resets_run_state_but_keeps_calibration() {
    let table = CalibrationTable {
        min: [100; 6],
        max: [900; 6],
    };
    let clock = ManualClock::new();
    let mut nav = Navigator::builder()
        .with_line_sensors(NoopLineSensors)
        .with_marker_sensors(Script {
            readings: vec![LAP, CLEAR, LAP, CLEAR, LAP],
            next: 0,
        })
        .with_motors(MotorLog::default())
        .with_calibration(table)
        .with_clock(Box::new(clock))
        .build()
        .unwrap();
    nav.begin();
    run_ticks(&mut nav, 20, &CENTERED);
    assert_eq!(nav.lap_count(), 2);
    nav.begin();
    assert_eq!(nav.lap_count(), 0);
    assert_eq!(nav.phase(), StopPhase::Running);
    assert_eq!(*nav.calibration(), table);
}

struct Sweep {
    frames: Vec<SensorSnapshot>,
    n: usize,
}

impl LineSensors for Sweep {
    fn read(&mut self) -> Result<SensorSnapshot, Box<dyn Error + Send + Sync>> {
        let f = self.frames[self.n % self.frames.len()];
        self.n += 1;
        Ok(f)
    }
}

#[rstest]
fn calibrate_samples_and_installs_table() {
    let clock = ManualClock::new();
    let mut nav = Navigator::builder()
        .with_line_sensors(Sweep {
            frames: vec![[120, 130, 140, 150, 160, 170], [880, 870, 860, 850, 840, 830]],
            n: 0,
        })
        .with_marker_sensors(Script {
            readings: vec![CLEAR],
            next: 0,
        })
        .with_motors(MotorLog::default())
        .with_clock(Box::new(clock.clone()))
        .build()
        .unwrap();
    let table = nav.calibrate().unwrap();
    assert_eq!(table.min, [120, 130, 140, 150, 160, 170]);
    assert_eq!(table.max, [880, 870, 860, 850, 840, 830]);
    assert_eq!(*nav.calibration(), table);
    // 400 samples, 30 ms apart.
    assert_eq!(clock.elapsed().as_millis(), 12_000);
}

#[derive(Clone, Default)]
struct Recorder {
    samples: Arc<Mutex<Vec<PerformanceSample>>>,
    processed: Arc<Mutex<u32>>,
}

impl Telemetry for Recorder {
    fn is_logging(&self) -> bool {
        true
    }
    fn log_performance(&mut self, sample: &PerformanceSample) {
        self.samples.lock().unwrap().push(*sample);
    }
    fn process(&mut self) {
        *self.processed.lock().unwrap() += 1;
    }
}

#[rstest]
fn telemetry_sees_final_values_with_flags() {
    let rec = Recorder::default();
    let motors = MotorLog::default();
    let mut nav = Navigator::builder()
        .with_line_sensors(NoopLineSensors)
        .with_marker_sensors(Script {
            readings: vec![CLEAR],
            next: 0,
        })
        .with_motors(motors.clone())
        .with_telemetry(rec.clone())
        .with_clock(Box::new(ManualClock::new()))
        .build()
        .unwrap();
    nav.begin();
    tick(&mut nav, &FAR_RIGHT);
    tick(&mut nav, &CENTERED);

    let samples = rec.samples.lock().unwrap().clone();
    assert_eq!(samples.len(), 2);
    assert_eq!(*rec.processed.lock().unwrap(), 2);
    let cmds = motors.all();
    for (s, (l, r)) in samples.iter().zip(cmds) {
        assert_eq!((s.left_power, s.right_power), (l, r));
    }
    assert_eq!(samples[0].state_flags & 0b10, 0b10, "turn flag");
    assert_eq!(samples[1].state_flags, 0);
    assert_eq!(samples[0].error, samples[0].position);
}
