use crate::encoder::EncoderProgress;
use serde::{Deserialize, Serialize};

/// `(elapsed seconds, value)`
pub type Sample = (f64, f64);

/// Progress samples of one run plus its running-time accounting.
///
/// All times are seconds since the Unix epoch. `elapsed` holds the running
/// time completed before the current interval; it only grows when the task
/// leaves `running`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLedger {
    pub time: Vec<Sample>,
    pub frame: Vec<Sample>,
    pub size: Vec<Sample>,
    pub last_started: f64,
    pub elapsed: f64,
    pub last_paused: f64,
}

impl ProgressLedger {
    /// Clear everything for a new run starting at `now`
    pub fn start(&mut self, now: f64) {
        *self = Self {
            last_started: now,
            last_paused: now,
            ..Self::default()
        };
        self.time.push((0.0, 0.0));
        self.frame.push((0.0, 0.0));
        self.size.push((0.0, 0.0));
    }

    /// Running time at `now`, counting the current interval
    pub fn running_secs(&self, now: f64) -> f64 {
        now - self.last_started + self.elapsed
    }

    /// Append a progress report; returns its elapsed-time stamp
    pub fn record(&mut self, now: f64, progress: &EncoderProgress) -> f64 {
        let t = self.running_secs(now);
        self.time.push((t, progress.time));
        self.frame.push((t, progress.frame));
        self.size.push((t, progress.size));
        t
    }

    pub fn pause(&mut self, now: f64) {
        self.last_paused = now;
        self.elapsed += now - self.last_started;
    }

    pub fn resume(&mut self, now: f64) {
        self.last_started = now;
    }

    /// Close the final running interval
    pub fn finish(&mut self, now: f64) {
        self.elapsed += now - self.last_started;
        self.last_started = now;
    }

    /// Encoded media time of the latest sample
    pub fn latest_media_time(&self) -> Option<f64> {
        self.time.last().map(|&(_, value)| value)
    }
}
