//! Simulated scanning instrument for closed-loop testing
//!
//! [`SimulatedSem`] is a cloneable handle to one shared instrument state and
//! implements both [`Emitter`] and [`Detector`], so the same instrument can be
//! handed to an estimator twice. Each subscription triggers one scan on a
//! worker thread: the frame is rendered from a textured [`Specimen`] at the
//! current emitter settings, displaced by the drift profile at the current
//! simulated time, and delivered while the subscription is still live.
//!
//! Simulated time advances by pixel count x dwell time per scan and through
//! explicit [`SimulatedSem::advance`] calls; it never follows the wall clock.

use anchor_drift::hardware::{
    pixel_count, Detector, Emitter, Frame, FrameCallback, ScannerError, ScannerResult,
    SubscriptionId,
};
use anchor_drift::test_patterns::Specimen;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::drift_profiles::{DriftProfile, StaticDrift};

/// Detector counts per unit specimen intensity
const DEFAULT_GAIN: f64 = 2000.0;

struct SemState {
    shape: (usize, usize),
    scale: (f64, f64),
    resolution: (usize, usize),
    translation: (f64, f64),
    dwell_time: Duration,
    specimen: Specimen,
    drift: Box<dyn DriftProfile>,
    time: Duration,
    gain: f64,
    read_noise: Option<Normal<f64>>,
    rng: ChaCha8Rng,
    emit_sentinel: bool,
    duplicate_frames: bool,
    silent: bool,
    subscribers: HashMap<SubscriptionId, FrameCallback>,
    next_id: SubscriptionId,
    frames_rendered: usize,
}

impl SemState {
    /// Render one frame at the current settings and advance the clock
    fn scan(&mut self) -> Array2<u16> {
        let (width, height) = self.resolution;
        let (dx, dy) = self.drift.drift_at(self.time);
        let (tx, ty) = self.translation;
        let (sx, sy) = self.scale;

        // Pixel (row, col) sits at translation + (index - center) * scale in
        // field pixels; the specimen has moved by the drift.
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let image = if self.scale == (1.0, 1.0) {
            self.specimen
                .render(width, height, (tx - cx - dx, ty - cy - dy))
        } else {
            Array2::from_shape_fn((height, width), |(row, col)| {
                self.specimen.intensity(
                    tx + (col as f64 - cx) * sx - dx,
                    ty + (row as f64 - cy) * sy - dy,
                )
            })
        };

        let gain = self.gain;
        let frame = match self.read_noise {
            Some(noise) => {
                let rng = &mut self.rng;
                image.mapv(|v| {
                    (v * gain + noise.sample(rng))
                        .round()
                        .clamp(0.0, u16::MAX as f64) as u16
                })
            }
            None => image.mapv(|v| (v * gain).round().clamp(0.0, u16::MAX as f64) as u16),
        };

        let pixels = u32::try_from(pixel_count(self.resolution)).unwrap_or(u32::MAX);
        let scan_time = self.dwell_time * pixels;
        log::trace!(
            "Simulated scan {} at {:?}: translation {:?}, drift ({dx:.3}, {dy:.3}), took {:?}",
            self.frames_rendered,
            self.time,
            self.translation,
            scan_time
        );
        self.time += scan_time;
        self.frames_rendered += 1;
        frame
    }
}

fn lock_state(state: &Mutex<SemState>) -> MutexGuard<'_, SemState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Simulated drifting scanner
#[derive(Clone)]
pub struct SimulatedSem {
    state: Arc<Mutex<SemState>>,
}

impl SimulatedSem {
    /// Instrument with a `shape` field over the specimen generated from `seed`.
    /// Starts with no drift; see [`SimulatedSem::with_drift`].
    pub fn new(shape: (usize, usize), seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SemState {
                shape,
                scale: (1.0, 1.0),
                resolution: shape,
                translation: (0.0, 0.0),
                dwell_time: Duration::from_micros(1),
                specimen: Specimen::new(seed),
                drift: Box::new(StaticDrift::default()),
                time: Duration::ZERO,
                gain: DEFAULT_GAIN,
                read_noise: None,
                rng: ChaCha8Rng::seed_from_u64(seed),
                emit_sentinel: false,
                duplicate_frames: false,
                silent: false,
                subscribers: HashMap::new(),
                next_id: 0,
                frames_rendered: 0,
            })),
        }
    }

    pub fn with_drift(self, drift: Box<dyn DriftProfile>) -> Self {
        self.lock().drift = drift;
        self
    }

    /// Add Gaussian read noise with `sigma` counts. Non-positive disables it.
    pub fn with_read_noise(self, sigma: f64) -> Self {
        self.lock().read_noise = if sigma > 0.0 {
            Normal::new(0.0, sigma).ok()
        } else {
            None
        };
        self
    }

    /// Precede every frame with a 1x1 scan-start marker frame
    pub fn with_sentinel_frames(self) -> Self {
        self.lock().emit_sentinel = true;
        self
    }

    /// Deliver every frame twice
    pub fn with_duplicate_frames(self) -> Self {
        self.lock().duplicate_frames = true;
        self
    }

    /// Never deliver frames
    pub fn silent(self) -> Self {
        self.lock().silent = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SemState> {
        lock_state(&self.state)
    }

    /// Move simulated time forward, e.g. while the main acquisition runs
    pub fn advance(&self, dt: Duration) {
        self.lock().time += dt;
    }

    /// Current simulated time
    pub fn time(&self) -> Duration {
        self.lock().time
    }

    /// Sample displacement at the current simulated time
    pub fn true_drift(&self) -> (f64, f64) {
        let state = self.lock();
        state.drift.drift_at(state.time)
    }

    /// Sample displacement at an arbitrary simulated time
    pub fn drift_at(&self, t: Duration) -> (f64, f64) {
        self.lock().drift.drift_at(t)
    }

    pub fn frames_rendered(&self) -> usize {
        self.lock().frames_rendered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drift profile description
    pub fn drift_description(&self) -> String {
        self.lock().drift.description().to_string()
    }
}

impl Emitter for SimulatedSem {
    fn shape(&self) -> (usize, usize) {
        self.lock().shape
    }

    fn scale(&self) -> (f64, f64) {
        self.lock().scale
    }

    fn set_scale(&mut self, scale: (f64, f64)) -> ScannerResult<()> {
        if !(scale.0 > 0.0 && scale.1 > 0.0) {
            return Err(ScannerError::OutOfRange {
                setting: "scale",
                message: format!("{scale:?} must be positive"),
            });
        }
        self.lock().scale = scale;
        Ok(())
    }

    fn resolution(&self) -> (usize, usize) {
        self.lock().resolution
    }

    fn set_resolution(&mut self, resolution: (usize, usize)) -> ScannerResult<()> {
        let mut state = self.lock();
        let (width, height) = resolution;
        if width == 0 || height == 0 || width > state.shape.0 || height > state.shape.1 {
            return Err(ScannerError::OutOfRange {
                setting: "resolution",
                message: format!("{resolution:?} outside field {:?}", state.shape),
            });
        }
        state.resolution = resolution;
        Ok(())
    }

    fn translation(&self) -> (f64, f64) {
        self.lock().translation
    }

    fn set_translation(&mut self, translation: (f64, f64)) -> ScannerResult<()> {
        let mut state = self.lock();
        let half = (state.shape.0 as f64 / 2.0, state.shape.1 as f64 / 2.0);
        if translation.0.abs() > half.0 || translation.1.abs() > half.1 {
            return Err(ScannerError::OutOfRange {
                setting: "translation",
                message: format!("{translation:?} outside field half-extent {half:?}"),
            });
        }
        state.translation = translation;
        Ok(())
    }

    fn dwell_time(&self) -> Duration {
        self.lock().dwell_time
    }

    fn set_dwell_time(&mut self, dwell_time: Duration) -> ScannerResult<()> {
        if dwell_time.is_zero() {
            return Err(ScannerError::OutOfRange {
                setting: "dwell_time",
                message: "dwell time must be positive".to_string(),
            });
        }
        self.lock().dwell_time = dwell_time;
        Ok(())
    }
}

impl Detector for SimulatedSem {
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, callback);
        if state.silent {
            return Ok(id);
        }
        drop(state);

        let shared = self.state.clone();
        thread::spawn(move || {
            let (frame, emit_sentinel, duplicate) = {
                let mut state = lock_state(&shared);
                (
                    Arc::new(state.scan()),
                    state.emit_sentinel,
                    state.duplicate_frames,
                )
            };

            let mut deliveries: Vec<Frame> = Vec::new();
            if emit_sentinel {
                deliveries.push(Arc::new(Array2::zeros((1, 1))));
            }
            deliveries.push(frame.clone());
            if duplicate {
                deliveries.push(frame);
            }

            for delivery in deliveries {
                // Callbacks run without the state lock held
                let callback = lock_state(&shared).subscribers.get(&id).cloned();
                match callback {
                    Some(callback) => callback(delivery),
                    None => break,
                }
            }
        });

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift_profiles::LinearDrift;
    use anchor_drift::compute_drift;
    use approx::assert_relative_eq;
    use crossbeam_channel::unbounded;

    fn capture(sem: &SimulatedSem) -> Frame {
        let (tx, rx) = unbounded();
        let id = sem
            .subscribe(Arc::new(move |frame: Frame| {
                let _ = tx.send(frame);
            }))
            .unwrap();
        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        sem.unsubscribe(id);
        frame
    }

    #[test]
    fn test_scan_advances_time() {
        let mut sem = SimulatedSem::new((200, 200), 1);
        sem.set_resolution((40, 25)).unwrap();
        sem.set_dwell_time(Duration::from_micros(10)).unwrap();

        let frame = capture(&sem);
        assert_eq!(frame.dim(), (25, 40));
        assert_eq!(sem.time(), Duration::from_millis(10));
        assert_eq!(sem.frames_rendered(), 1);

        sem.advance(Duration::from_secs(1));
        assert_eq!(sem.time(), Duration::from_millis(1010));
    }

    #[test]
    fn test_drift_moves_content() {
        let mut sem = SimulatedSem::new((200, 200), 4)
            .with_drift(Box::new(LinearDrift::new((2.0, -1.0))));
        sem.set_resolution((48, 48)).unwrap();

        let first = capture(&sem);
        sem.advance(Duration::from_secs(1));
        let second = capture(&sem);

        // Sample moved by (+2, -1): content appears at x + 2, so
        // second(x) = first(x - 2, y + 1)
        let drift = compute_drift(&first.view(), &second.view(), 10);
        assert_relative_eq!(drift.x, -2.0, epsilon = 0.2);
        assert_relative_eq!(drift.y, 1.0, epsilon = 0.2);
    }

    #[test]
    fn test_translation_follows_specimen() {
        let mut sem = SimulatedSem::new((200, 200), 9);
        sem.set_resolution((48, 48)).unwrap();
        let first = capture(&sem);
        sem.set_translation((3.0, 2.0)).unwrap();
        let second = capture(&sem);

        let drift = compute_drift(&first.view(), &second.view(), 10);
        assert_relative_eq!(drift.x, 3.0, epsilon = 0.2);
        assert_relative_eq!(drift.y, 2.0, epsilon = 0.2);
    }

    #[test]
    fn test_rejects_out_of_field_settings() {
        let mut sem = SimulatedSem::new((100, 100), 1);
        assert!(sem.set_resolution((101, 10)).is_err());
        assert!(sem.set_translation((0.0, 60.0)).is_err());
        assert!(sem.set_dwell_time(Duration::ZERO).is_err());
        assert!(sem.set_scale((0.0, 1.0)).is_err());
    }

    #[test]
    fn test_silent_never_renders() {
        let sem = SimulatedSem::new((100, 100), 1).silent();
        let (tx, rx) = unbounded::<Frame>();
        let id = sem
            .subscribe(Arc::new(move |frame: Frame| {
                let _ = tx.send(frame);
            }))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(sem.unsubscribe(id));
        assert_eq!(sem.frames_rendered(), 0);
    }

    #[test]
    fn test_read_noise_is_seeded() {
        let make = || {
            let mut sem = SimulatedSem::new((100, 100), 3).with_read_noise(25.0);
            sem.set_resolution((32, 32)).unwrap();
            sem
        };
        let a = capture(&make());
        let b = capture(&make());
        assert_eq!(a, b);

        let mut clean = SimulatedSem::new((100, 100), 3);
        clean.set_resolution((32, 32)).unwrap();
        assert_ne!(capture(&clean), a);
    }
}
