//! Deterministic track and vehicle simulation.
//!
//! The vehicle is tracked in track coordinates: arc length `s` along the line,
//! lateral offset `d` (positive to the right of the line) and heading error
//! `psi` (positive when pointing right of the tangent). Time comes from the
//! injected clock; the world integrates up to "now" whenever a handle touches
//! it, so a `ManualClock` makes whole runs reproducible.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracer_traits::{
    Clock, LINE_SENSOR_COUNT, LineSensors, MarkerReading, MarkerSensors, Motors, SensorSnapshot,
};

use crate::error::HwError;

/// Lateral position of each line sensor relative to the array centre (mm).
pub const SENSOR_X_MM: [f32; LINE_SENSOR_COUNT] = [-30.0, -18.0, -6.0, 6.0, 18.0, 30.0];
/// Lateral distance of each marker sensor (and marker tape) from the centre (mm).
pub const MARKER_X_MM: f32 = 45.0;
/// Raw reading over bare floor.
pub const WHITE: u16 = 900;
/// Raw reading over tape.
pub const BLACK: u16 = 100;

/// Width of the grey band at each tape edge (mm).
const EDGE_MM: f32 = 4.0;
const MAX_STEP: Duration = Duration::from_millis(1);

/// A piece of track with constant curvature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub length_mm: f32,
    /// 1/radius in 1/mm. Positive bends right.
    pub curvature: f32,
}

impl Segment {
    pub fn straight(length_mm: f32) -> Self {
        Self {
            length_mm,
            curvature: 0.0,
        }
    }

    /// Circular arc sweeping `degrees`; positive bends right.
    pub fn arc(radius_mm: f32, degrees: f32) -> Self {
        let radius = radius_mm.abs().max(1.0);
        Self {
            length_mm: radius * degrees.abs().to_radians(),
            curvature: degrees.signum() / radius,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Start/finish tape on the left side.
    Lap,
    /// Precision-section tape on the right side.
    Mode,
    /// Tape on both sides.
    Cross,
}

impl MarkerKind {
    /// (left, right) sides carrying tape.
    fn sides(self) -> (bool, bool) {
        match self {
            MarkerKind::Lap => (true, false),
            MarkerKind::Mode => (false, true),
            MarkerKind::Cross => (true, true),
        }
    }
}

/// Marker tape starting at `s_mm` along the line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMarker {
    pub s_mm: f32,
    pub kind: MarkerKind,
}

/// A closed loop of segments with a line of fixed width and side markers.
#[derive(Debug, Clone)]
pub struct SimTrack {
    segments: Vec<Segment>,
    markers: Vec<TrackMarker>,
    line_width_mm: f32,
    marker_length_mm: f32,
    marker_width_mm: f32,
    length_mm: f32,
}

impl SimTrack {
    pub fn new(segments: Vec<Segment>, mut markers: Vec<TrackMarker>) -> Self {
        let length_mm = segments.iter().map(|s| s.length_mm.max(0.0)).sum();
        markers.sort_by(|a, b| a.s_mm.total_cmp(&b.s_mm));
        Self {
            segments,
            markers,
            line_width_mm: 20.0,
            marker_length_mm: 20.0,
            marker_width_mm: 30.0,
            length_mm,
        }
    }

    pub fn with_line_width(mut self, mm: f32) -> Self {
        self.line_width_mm = mm.max(1.0);
        self
    }

    /// Two 1.5 m straights joined by right-hand half circles of 400 mm radius.
    ///
    /// The finish line sits 200 mm ahead of the start. A pair of mode markers
    /// brackets the first bend and a crossing marks the back straight.
    pub fn oval() -> Self {
        let straight = 1500.0;
        let bend = Segment::arc(400.0, 180.0);
        let back = straight + bend.length_mm;
        Self::new(
            vec![Segment::straight(straight), bend, Segment::straight(straight), bend],
            vec![
                TrackMarker {
                    s_mm: 200.0,
                    kind: MarkerKind::Lap,
                },
                TrackMarker {
                    s_mm: straight - 100.0,
                    kind: MarkerKind::Mode,
                },
                TrackMarker {
                    s_mm: back + 100.0,
                    kind: MarkerKind::Mode,
                },
                TrackMarker {
                    s_mm: back + 750.0,
                    kind: MarkerKind::Cross,
                },
            ],
        )
    }

    pub fn length_mm(&self) -> f32 {
        self.length_mm
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn markers(&self) -> &[TrackMarker] {
        &self.markers
    }

    pub fn line_width_mm(&self) -> f32 {
        self.line_width_mm
    }

    /// Map an unwrapped arc length onto the loop.
    pub fn wrap(&self, s: f32) -> f32 {
        if self.length_mm <= 0.0 {
            s
        } else {
            s.rem_euclid(self.length_mm)
        }
    }

    pub fn curvature_at(&self, s: f32) -> f32 {
        let mut s = self.wrap(s);
        for seg in &self.segments {
            if s < seg.length_mm {
                return seg.curvature;
            }
            s -= seg.length_mm;
        }
        self.segments.last().map_or(0.0, |seg| seg.curvature)
    }

    /// Reflectance `y` mm from the line centre.
    pub fn line_reflectance(&self, y: f32) -> u16 {
        tape_reflectance(y.abs() - self.line_width_mm / 2.0)
    }

    /// Reflectance of the marker band at arc length `s`, lateral offset `y`.
    pub fn marker_reflectance(&self, s: f32, y: f32) -> u16 {
        let half = self.marker_width_mm / 2.0;
        let mut best = f32::INFINITY;
        for m in &self.markers {
            let along = self.wrap(s - m.s_mm);
            if along >= self.marker_length_mm {
                continue;
            }
            let (left, right) = m.kind.sides();
            if left {
                best = best.min((y + MARKER_X_MM).abs() - half);
            }
            if right {
                best = best.min((y - MARKER_X_MM).abs() - half);
            }
        }
        tape_reflectance(best)
    }
}

/// `outside` is the signed distance past the tape edge.
fn tape_reflectance(outside: f32) -> u16 {
    let half = EDGE_MM / 2.0;
    if outside <= -half {
        BLACK
    } else if outside >= half {
        WHITE
    } else {
        let t = (outside + half) / EDGE_MM;
        let span = f32::from(WHITE - BLACK);
        BLACK + (t * span).round() as u16
    }
}

/// Geometry and drive train of the simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParams {
    /// Wheel surface speed at power 255 (mm/s).
    pub max_wheel_speed_mm_s: f32,
    pub wheelbase_mm: f32,
    /// Distance from the axle to the sensor row (mm).
    pub sensor_offset_mm: f32,
    /// First-order lag of the wheel speed (ms). Zero means instant.
    pub motor_tau_ms: f32,
    /// Beyond this lateral offset the sensors only see floor.
    pub off_track_mm: f32,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            max_wheel_speed_mm_s: 1500.0,
            wheelbase_mm: 130.0,
            sensor_offset_mm: 70.0,
            motor_tau_ms: 25.0,
            off_track_mm: 200.0,
        }
    }
}

/// Vehicle position in track coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    /// Arc length along the loop, wrapped to `[0, length)`.
    pub s_mm: f32,
    pub d_mm: f32,
    /// Heading error in radians, `(-pi, pi]`.
    pub psi: f32,
}

/// Observable state of the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimState {
    pub pose: Pose,
    /// Completed loops of the track.
    pub laps: u32,
    pub distance_mm: f32,
    pub power: (i32, i32),
    pub elapsed: Duration,
}

struct World {
    track: SimTrack,
    params: VehicleParams,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    last: Instant,
    /// Unwrapped arc length.
    s_total: f32,
    d: f32,
    psi: f32,
    wheel: [f32; 2],
    power: (i32, i32),
    distance_mm: f32,
    off_track: bool,
}

impl World {
    fn laps(&self) -> u32 {
        if self.track.length_mm <= 0.0 {
            return 0;
        }
        (self.s_total / self.track.length_mm).floor().max(0.0) as u32
    }

    fn advance(&mut self) {
        let now = self.clock.now();
        let mut remaining = now.saturating_duration_since(self.last);
        self.last = now;
        while !remaining.is_zero() {
            let dt = remaining.min(MAX_STEP);
            self.integrate(dt.as_secs_f32());
            remaining -= dt;
        }
    }

    fn integrate(&mut self, dt: f32) {
        let p = self.params;
        let target = [
            power_to_speed(self.power.0, p.max_wheel_speed_mm_s),
            power_to_speed(self.power.1, p.max_wheel_speed_mm_s),
        ];
        let k = if p.motor_tau_ms > 0.0 {
            (dt * 1000.0 / p.motor_tau_ms).min(1.0)
        } else {
            1.0
        };
        for (w, t) in self.wheel.iter_mut().zip(target) {
            *w += (t - *w) * k;
        }

        let v = (self.wheel[0] + self.wheel[1]) / 2.0;
        // Positive yaw rate turns right.
        let omega = (self.wheel[0] - self.wheel[1]) / p.wheelbase_mm;
        let kappa = self.track.curvature_at(self.s_total);
        let s_dot = v * self.psi.cos() / (1.0 - kappa * self.d).max(0.1);

        let laps_before = self.laps();
        self.s_total += s_dot * dt;
        self.d += v * self.psi.sin() * dt;
        self.psi = wrap_angle(self.psi + (omega - kappa * s_dot) * dt);
        self.distance_mm += v.abs() * dt;

        let laps = self.laps();
        if laps > laps_before {
            tracing::debug!(laps, distance_mm = self.distance_mm, "sim lap complete");
        }
        let off = self.d.abs() > p.off_track_mm;
        if off && !self.off_track {
            tracing::warn!(d_mm = self.d, s_mm = self.track.wrap(self.s_total), "sim vehicle left the track");
        }
        self.off_track = off;
    }

    /// Lateral offset of a point `x` mm right of the sensor-row centre,
    /// relative to the line at the sensor row, and the arc length there.
    fn sensor_frame(&self, x: f32) -> (f32, f32) {
        let l = self.params.sensor_offset_mm;
        let kappa = self.track.curvature_at(self.s_total);
        let y = self.d + l * self.psi.sin() + x * self.psi.cos() - kappa * l * l / 2.0;
        let s = self.s_total + l * self.psi.cos() - x * self.psi.sin();
        (y, s)
    }

    fn line_snapshot(&self) -> SensorSnapshot {
        let mut out = [WHITE; LINE_SENSOR_COUNT];
        if self.off_track {
            return out;
        }
        for (raw, x) in out.iter_mut().zip(SENSOR_X_MM) {
            let (y, _) = self.sensor_frame(x);
            *raw = self.track.line_reflectance(y);
        }
        out
    }

    fn marker_reading(&self) -> MarkerReading {
        if self.off_track {
            return MarkerReading {
                left: WHITE,
                right: WHITE,
            };
        }
        let (yl, sl) = self.sensor_frame(-MARKER_X_MM);
        let (yr, sr) = self.sensor_frame(MARKER_X_MM);
        MarkerReading {
            left: self.track.marker_reflectance(sl, yl),
            right: self.track.marker_reflectance(sr, yr),
        }
    }

    fn state(&self) -> SimState {
        SimState {
            pose: Pose {
                s_mm: self.track.wrap(self.s_total),
                d_mm: self.d,
                psi: self.psi,
            },
            laps: self.laps(),
            distance_mm: self.distance_mm,
            power: self.power,
            elapsed: self.last.saturating_duration_since(self.epoch),
        }
    }
}

fn power_to_speed(power: i32, max: f32) -> f32 {
    power.clamp(-255, 255) as f32 / 255.0 * max
}

fn wrap_angle(a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let w = (a + PI).rem_euclid(TAU) - PI;
    if w <= -PI { w + TAU } else { w }
}

type Shared = Arc<Mutex<World>>;

fn lock(world: &Shared) -> Result<MutexGuard<'_, World>, HwError> {
    world
        .lock()
        .map_err(|_| HwError::Sim("world lock poisoned".into()))
}

/// Handle to a simulated world. Cloning shares the same world.
#[derive(Clone)]
pub struct Sim {
    world: Shared,
}

impl core::fmt::Debug for Sim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sim").field("state", &self.state().ok()).finish()
    }
}

impl Sim {
    pub fn new(track: SimTrack, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self::with_params(track, VehicleParams::default(), clock)
    }

    /// Vehicle parked on the line at the start, facing along it.
    pub fn with_params(
        track: SimTrack,
        params: VehicleParams,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let now = clock.now();
        let world = World {
            track,
            params,
            clock,
            epoch: now,
            last: now,
            s_total: 0.0,
            d: 0.0,
            psi: 0.0,
            wheel: [0.0; 2],
            power: (0, 0),
            distance_mm: 0.0,
            off_track: false,
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    pub fn line_sensors(&self) -> SimLineSensors {
        SimLineSensors {
            world: self.world.clone(),
        }
    }

    pub fn marker_sensors(&self) -> SimMarkerSensors {
        SimMarkerSensors {
            world: self.world.clone(),
        }
    }

    pub fn motors(&self) -> SimMotors {
        SimMotors {
            world: self.world.clone(),
        }
    }

    /// Bring the world up to the clock and report it.
    pub fn state(&self) -> Result<SimState, HwError> {
        let mut w = lock(&self.world)?;
        w.advance();
        Ok(w.state())
    }

    /// Teleport the vehicle, at rest. Lap counting restarts from `pose.s_mm`.
    pub fn place(&self, pose: Pose) -> Result<(), HwError> {
        let mut w = lock(&self.world)?;
        w.advance();
        w.s_total = w.track.wrap(pose.s_mm);
        w.d = pose.d_mm;
        w.psi = wrap_angle(pose.psi);
        w.wheel = [0.0; 2];
        w.off_track = w.d.abs() > w.params.off_track_mm;
        Ok(())
    }
}

pub struct SimLineSensors {
    world: Shared,
}

impl LineSensors for SimLineSensors {
    fn read(&mut self) -> Result<SensorSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        let mut w = lock(&self.world)?;
        w.advance();
        Ok(w.line_snapshot())
    }
}

pub struct SimMarkerSensors {
    world: Shared,
}

impl MarkerSensors for SimMarkerSensors {
    fn read(&mut self) -> Result<MarkerReading, Box<dyn std::error::Error + Send + Sync>> {
        let mut w = lock(&self.world)?;
        w.advance();
        Ok(w.marker_reading())
    }
}

pub struct SimMotors {
    world: Shared,
}

impl Motors for SimMotors {
    fn set_power(
        &mut self,
        left: i32,
        right: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut w = lock(&self.world)?;
        w.advance();
        w.power = (left.clamp(-255, 255), right.clamp(-255, 255));
        tracing::trace!(left, right, "sim motors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tracer_traits::ManualClock;

    #[rstest]
    #[case(-20.0, BLACK)]
    #[case(-3.0, BLACK)]
    #[case(-1.0, 300)]
    #[case(0.0, 500)]
    #[case(1.0, 700)]
    #[case(5.0, WHITE)]
    #[case(20.0, WHITE)]
    fn tape_edge_is_graded(#[case] outside: f32, #[case] raw: u16) {
        assert_eq!(tape_reflectance(outside), raw);
    }

    #[rstest]
    fn arc_length_and_sign() {
        let a = Segment::arc(400.0, -90.0);
        assert!((a.length_mm - 628.318_5).abs() < 0.01);
        assert!((a.curvature + 1.0 / 400.0).abs() < 1e-9);
    }

    #[rstest]
    fn oval_curvature_by_section() {
        let t = SimTrack::oval();
        assert!((t.length_mm() - (3000.0 + 800.0 * std::f32::consts::PI)).abs() < 0.5);
        assert_eq!(t.curvature_at(100.0), 0.0);
        assert!(t.curvature_at(1600.0) > 0.0);
        assert_eq!(t.curvature_at(t.length_mm() + 100.0), 0.0);
    }

    #[rstest]
    #[case(0.5, 0.5)]
    #[case(4.0, 4.0 - std::f32::consts::TAU)]
    #[case(-4.0, -4.0 + std::f32::consts::TAU)]
    fn angles_wrap(#[case] a: f32, #[case] expected: f32) {
        assert!((wrap_angle(a) - expected).abs() < 1e-5);
    }

    #[rstest]
    fn markers_only_on_their_side() {
        let t = SimTrack::oval();
        assert_eq!(t.marker_reflectance(210.0, -MARKER_X_MM), BLACK);
        assert_eq!(t.marker_reflectance(210.0, MARKER_X_MM), WHITE);
        assert_eq!(t.marker_reflectance(1410.0, MARKER_X_MM), BLACK);
        assert_eq!(t.marker_reflectance(1410.0, -MARKER_X_MM), WHITE);
        assert_eq!(t.marker_reflectance(600.0, -MARKER_X_MM), WHITE);
    }

    #[rstest]
    fn parked_vehicle_does_not_move() {
        let clock = ManualClock::new();
        let sim = Sim::new(SimTrack::oval(), Arc::new(clock.clone()));
        clock.advance(Duration::from_secs(2));
        let s = sim.state().unwrap();
        assert_eq!(s.pose, Pose::default());
        assert_eq!(s.elapsed, Duration::from_secs(2));
    }
}
