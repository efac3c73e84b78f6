//! Scripted scanner for tests
//!
//! [`MockScanner`] hands out an emitter and a detector sharing one state. The
//! emitter records every write; the detector replays scripted frames from a
//! producer thread, one per subscription, optionally preceded by 1x1 sentinel
//! frames and followed by a duplicate delivery.

use ndarray::Array2;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::hardware::{
    Detector, Emitter, Frame, FrameCallback, ScannerError, ScannerResult, SubscriptionId,
};

/// One emitter write, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum EmitterWrite {
    Scale((f64, f64)),
    Resolution((usize, usize)),
    Translation((f64, f64)),
    DwellTime(Duration),
}

struct MockState {
    shape: (usize, usize),
    scale: (f64, f64),
    resolution: (usize, usize),
    translation: (f64, f64),
    dwell_time: Duration,
    writes: Vec<EmitterWrite>,
    frames: VecDeque<Array2<u16>>,
    repeat_last: bool,
    sentinels_per_scan: usize,
    duplicate_delivery: bool,
    delivery_delay: Duration,
    subscribers: HashMap<SubscriptionId, FrameCallback>,
    next_id: SubscriptionId,
    subscribe_count: usize,
}

/// Shared-state mock instrument
#[derive(Clone)]
pub struct MockScanner {
    state: Arc<Mutex<MockState>>,
}

impl MockScanner {
    /// Mock over a `shape` field that delivers `frames` in order, one per scan.
    /// Once the script is exhausted no more frames are delivered.
    pub fn new(shape: (usize, usize), frames: Vec<Array2<u16>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                shape,
                scale: (1.0, 1.0),
                resolution: shape,
                translation: (0.0, 0.0),
                dwell_time: Duration::from_micros(1),
                writes: Vec::new(),
                frames: frames.into(),
                repeat_last: false,
                sentinels_per_scan: 0,
                duplicate_delivery: false,
                delivery_delay: Duration::from_millis(1),
                subscribers: HashMap::new(),
                next_id: 0,
                subscribe_count: 0,
            })),
        }
    }

    /// Mock delivering the same frame on every scan
    pub fn new_repeating(shape: (usize, usize), frame: Array2<u16>) -> Self {
        let scanner = Self::new(shape, vec![frame]);
        scanner.lock().repeat_last = true;
        scanner
    }

    /// Mock whose detector never delivers anything
    pub fn new_silent(shape: (usize, usize)) -> Self {
        Self::new(shape, Vec::new())
    }

    /// Deliver `count` 1x1 frames before each real frame
    pub fn with_sentinel_frames(self, count: usize) -> Self {
        self.lock().sentinels_per_scan = count;
        self
    }

    /// Deliver each real frame twice
    pub fn with_duplicate_delivery(self) -> Self {
        self.lock().duplicate_delivery = true;
        self
    }

    pub fn with_delivery_delay(self, delay: Duration) -> Self {
        self.lock().delivery_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn emitter(&self) -> MockEmitter {
        MockEmitter {
            state: self.state.clone(),
        }
    }

    pub fn detector(&self) -> MockDetector {
        MockDetector {
            state: self.state.clone(),
        }
    }

    /// All emitter writes so far
    pub fn writes(&self) -> Vec<EmitterWrite> {
        self.lock().writes.clone()
    }

    /// Currently registered frame callbacks
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Total subscriptions ever made
    pub fn subscribe_count(&self) -> usize {
        self.lock().subscribe_count
    }

    pub fn translation(&self) -> (f64, f64) {
        self.lock().translation
    }
}

/// Emitter half of a [`MockScanner`]
pub struct MockEmitter {
    state: Arc<Mutex<MockState>>,
}

impl MockEmitter {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Emitter for MockEmitter {
    fn shape(&self) -> (usize, usize) {
        self.lock().shape
    }

    fn scale(&self) -> (f64, f64) {
        self.lock().scale
    }

    fn set_scale(&mut self, scale: (f64, f64)) -> ScannerResult<()> {
        let mut state = self.lock();
        state.writes.push(EmitterWrite::Scale(scale));
        state.scale = scale;
        Ok(())
    }

    fn resolution(&self) -> (usize, usize) {
        self.lock().resolution
    }

    fn set_resolution(&mut self, resolution: (usize, usize)) -> ScannerResult<()> {
        let mut state = self.lock();
        if resolution.0 > state.shape.0 || resolution.1 > state.shape.1 {
            return Err(ScannerError::OutOfRange {
                setting: "resolution",
                message: format!("{resolution:?} exceeds field {:?}", state.shape),
            });
        }
        state.writes.push(EmitterWrite::Resolution(resolution));
        state.resolution = resolution;
        Ok(())
    }

    fn translation(&self) -> (f64, f64) {
        self.lock().translation
    }

    fn set_translation(&mut self, translation: (f64, f64)) -> ScannerResult<()> {
        let mut state = self.lock();
        state.writes.push(EmitterWrite::Translation(translation));
        state.translation = translation;
        Ok(())
    }

    fn dwell_time(&self) -> Duration {
        self.lock().dwell_time
    }

    fn set_dwell_time(&mut self, dwell_time: Duration) -> ScannerResult<()> {
        let mut state = self.lock();
        state.writes.push(EmitterWrite::DwellTime(dwell_time));
        state.dwell_time = dwell_time;
        Ok(())
    }
}

/// Detector half of a [`MockScanner`]
pub struct MockDetector {
    state: Arc<Mutex<MockState>>,
}

impl MockDetector {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Detector for MockDetector {
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribe_count += 1;
        state.subscribers.insert(id, callback);

        let frame = if state.repeat_last && state.frames.len() == 1 {
            state.frames.front().cloned()
        } else {
            state.frames.pop_front()
        };
        let Some(frame) = frame else {
            log::debug!("Mock detector has no frame for subscription {id}");
            return Ok(id);
        };

        let mut deliveries: Vec<Frame> = (0..state.sentinels_per_scan)
            .map(|_| Arc::new(Array2::zeros((1, 1))))
            .collect();
        let frame = Arc::new(frame);
        deliveries.push(frame.clone());
        if state.duplicate_delivery {
            deliveries.push(frame);
        }
        let delay = state.delivery_delay;
        let shared = self.state.clone();

        thread::spawn(move || {
            for delivery in deliveries {
                thread::sleep(delay);
                // Look the callback up again so nothing arrives after unsubscribe
                let callback = shared
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .subscribers
                    .get(&id)
                    .cloned();
                match callback {
                    Some(callback) => callback(delivery),
                    None => {
                        log::trace!("Subscription {id} released, dropping remaining frames");
                        return;
                    }
                }
            }
        });

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }
}
