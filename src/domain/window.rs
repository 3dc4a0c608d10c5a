//! Fixed-capacity circular timestamp log.
//!
//! An [`EventWindow`] remembers the last `capacity` event timestamps and
//! answers "did the k-th most recent event happen within `d` of now?" in
//! constant time. It backs local admission control and any detector that
//! needs to ask "was this the N-th event inside the window?".

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Error returned when an [`EventWindow`] is misconfigured or queried with
/// parameters it cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// Capacity must be greater than zero
    ZeroCapacity,
    /// Lookback `k` must be at least 1
    ZeroLookback,
    /// Window duration must be greater than zero
    ZeroDuration,
    /// Lookback reaches further back than the window remembers
    LookbackOutOfRange {
        /// Requested lookback
        k: usize,
        /// Current window capacity
        capacity: usize,
    },
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowError::ZeroCapacity => write!(f, "window capacity must be greater than 0"),
            WindowError::ZeroLookback => write!(f, "lookback must be at least 1"),
            WindowError::ZeroDuration => write!(f, "window duration must be greater than 0"),
            WindowError::LookbackOutOfRange { k, capacity } => write!(
                f,
                "lookback of {} events exceeds window capacity {}",
                k, capacity
            ),
        }
    }
}

impl std::error::Error for WindowError {}

#[derive(Debug)]
struct Slots {
    /// `None` is the "infinitely old" sentinel for slots never written.
    stamps: Vec<Option<Instant>>,
    cursor: usize,
}

impl Slots {
    fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![None; capacity],
            cursor: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.stamps.len()
    }

    /// Slot `back` positions behind the cursor.
    fn behind(&self, back: usize) -> Option<Instant> {
        let cap = self.capacity();
        self.stamps[(self.cursor + cap - back % cap) % cap]
    }
}

/// Thread-safe circular log of event timestamps.
///
/// # Example
/// ```
/// use dispatch_throttle::EventWindow;
/// use std::time::{Duration, Instant};
///
/// let window = EventWindow::new(3).unwrap();
/// let start = Instant::now();
///
/// window.record(start);
/// window.record(start + Duration::from_secs(1));
/// window.record(start + Duration::from_secs(2));
///
/// // The 3rd most recent event (t=0) happened 2s before t=2.
/// let now = start + Duration::from_secs(2);
/// assert!(window.check_within(3, Duration::from_secs(2), now).unwrap());
/// assert!(!window.check_within(3, Duration::from_secs(1), now).unwrap());
/// ```
#[derive(Debug)]
pub struct EventWindow {
    slots: Mutex<Slots>,
}

impl EventWindow {
    /// Create a window remembering the last `capacity` events.
    ///
    /// # Errors
    /// Returns `WindowError::ZeroCapacity` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        NonZeroUsize::new(capacity)
            .map(Self::with_capacity)
            .ok_or(WindowError::ZeroCapacity)
    }

    /// Create a window from a capacity already known to be positive.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            slots: Mutex::new(Slots::new(capacity.get())),
        }
    }

    // Critical sections never panic, so a poisoned lock still holds consistent slots.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of events the window remembers.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Record an event, overwriting the oldest remembered one.
    pub fn record(&self, timestamp: Instant) {
        let mut slots = self.lock();
        let cap = slots.capacity();
        slots.cursor = (slots.cursor + 1) % cap;
        let cursor = slots.cursor;
        slots.stamps[cursor] = Some(timestamp);
    }

    /// Check whether the `k`-th most recent event occurred within `duration`
    /// of `now`.
    ///
    /// Used to pre-authorize an action before it is recorded: `true` means
    /// `k` actions already happened inside the window, so a new one should be
    /// denied. Slots never written count as infinitely old.
    ///
    /// # Errors
    /// `ZeroLookback` for `k == 0`, `LookbackOutOfRange` for `k > capacity`.
    pub fn check_within(
        &self,
        k: usize,
        duration: Duration,
        now: Instant,
    ) -> Result<bool, WindowError> {
        let slots = self.lock();
        validate_lookback(k, slots.capacity())?;
        Ok(match slots.behind(k - 1) {
            Some(stamp) => now.saturating_duration_since(stamp) <= duration,
            None => false,
        })
    }

    /// Check whether the newest recorded event happened within `duration` of
    /// the event `k` positions before it.
    ///
    /// Assumes the event under test has already been recorded, so this
    /// answers "was this just the (k+1)-th event inside the window?".
    ///
    /// # Errors
    /// `ZeroLookback` for `k == 0`, `LookbackOutOfRange` for `k >= capacity`.
    pub fn check_after_record(&self, k: usize, duration: Duration) -> Result<bool, WindowError> {
        let slots = self.lock();
        if k == 0 {
            return Err(WindowError::ZeroLookback);
        }
        if k >= slots.capacity() {
            return Err(WindowError::LookbackOutOfRange {
                k,
                capacity: slots.capacity(),
            });
        }
        Ok(match (slots.behind(0), slots.behind(k)) {
            (Some(newest), Some(earlier)) => {
                newest.saturating_duration_since(earlier) <= duration
            }
            _ => false,
        })
    }

    /// Replace the slot storage with one of `new_capacity`, keeping as much
    /// recent history as fits.
    ///
    /// # Errors
    /// Returns `WindowError::ZeroCapacity` if `new_capacity` is zero.
    pub fn resize(&self, new_capacity: usize) -> Result<(), WindowError> {
        if new_capacity == 0 {
            return Err(WindowError::ZeroCapacity);
        }
        let mut slots = self.lock();
        let kept = slots.capacity().min(new_capacity);
        let mut resized = Slots::new(new_capacity);
        for back in 0..kept {
            resized.stamps[kept - 1 - back] = slots.behind(back);
        }
        resized.cursor = kept - 1;
        *slots = resized;
        Ok(())
    }

    /// Timestamp of the most recent event, if any was recorded.
    pub fn latest(&self) -> Option<Instant> {
        self.lock().behind(0)
    }
}

fn validate_lookback(k: usize, capacity: usize) -> Result<(), WindowError> {
    if k == 0 {
        return Err(WindowError::ZeroLookback);
    }
    if k > capacity {
        return Err(WindowError::LookbackOutOfRange { k, capacity });
    }
    Ok(())
}
