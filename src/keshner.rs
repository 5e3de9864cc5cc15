// Keshner motion: a sum-of-sines angular velocity stimulus
//
//   speed(t)    = Σ A_i · sin(2π·f0·n_i·(t − φ))
//   position(t) = Σ −A_i / (2π·f0·n_i) · cos(2π·f0·n_i·(t − φ))
//
// The profile samples both on a fixed grid once, rounded to two decimals,
// and is read-only afterwards. A new sampling grid means a new profile.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::Write;

use crate::chair::error::{ChairError, Result};
use crate::chair::units::round_hundredths;

/// Upper bound on samples per profile (a 400 s run at 10 ms is 40 001)
pub const MAX_SAMPLES: usize = 1_000_000;

/// Base frequency of the standard stimulus (Hz), period 20 s
pub const KESHNER_FUNDAMENTAL_HZ: f64 = 0.05;

/// Phase offset (s) that puts the standard stimulus at rest at t = 0
pub const KESHNER_TIME_SHIFT_S: f64 = 2.3878;

/// (order, amplitude in deg/s) of the standard stimulus
const KESHNER_HARMONICS: [(u32, f64); 10] = [
    (3, 20.0),
    (5, 16.0),
    (7, 12.0),
    (11, 10.0),
    (13, 8.0),
    (17, 6.0),
    (23, 5.0),
    (29, 4.0),
    (37, 3.0),
    (47, 2.0),
];

/// One sinusoidal component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    /// Multiple of the fundamental frequency, at least 1
    pub order: u32,
    /// Peak angular velocity, deg/s
    pub amplitude: f64,
}

/// Fixed harmonic content of a stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicSet {
    pub fundamental_frequency: f64,
    pub time_shift: f64,
    pub harmonics: Vec<Harmonic>,
}

impl HarmonicSet {
    /// The standard ten-component stimulus
    pub fn keshner() -> Self {
        Self {
            fundamental_frequency: KESHNER_FUNDAMENTAL_HZ,
            time_shift: KESHNER_TIME_SHIFT_S,
            harmonics: KESHNER_HARMONICS
                .iter()
                .map(|&(order, amplitude)| Harmonic { order, amplitude })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fundamental_frequency.is_finite() && self.fundamental_frequency > 0.0) {
            return Err(ChairError::invalid(format!(
                "fundamental frequency must be > 0, got {}",
                self.fundamental_frequency
            )));
        }
        if !self.time_shift.is_finite() {
            return Err(ChairError::invalid("time shift must be finite"));
        }
        if self.harmonics.is_empty() {
            return Err(ChairError::invalid("harmonic set is empty"));
        }
        for h in &self.harmonics {
            if h.order == 0 || !h.amplitude.is_finite() {
                return Err(ChairError::invalid(format!("bad harmonic {:?}", h)));
            }
        }
        Ok(())
    }

    fn omega(&self, order: u32) -> f64 {
        2.0 * PI * self.fundamental_frequency * order as f64
    }

    /// Angular velocity at `t` seconds, deg/s, unrounded
    pub fn speed_at(&self, t: f64) -> f64 {
        self.harmonics
            .iter()
            .map(|h| h.amplitude * (self.omega(h.order) * (t - self.time_shift)).sin())
            .sum()
    }

    /// Angle at `t` seconds, deg, unrounded
    pub fn position_at(&self, t: f64) -> f64 {
        self.harmonics
            .iter()
            .map(|h| {
                let w = self.omega(h.order);
                -h.amplitude / w * (w * (t - self.time_shift)).cos()
            })
            .sum()
    }

    /// Bound on |speed|, the sum of the amplitudes
    pub fn peak_speed(&self) -> f64 {
        self.harmonics.iter().map(|h| h.amplitude.abs()).sum()
    }
}

impl Default for HarmonicSet {
    fn default() -> Self {
        Self::keshner()
    }
}

#[derive(Serialize)]
struct ProfileRow {
    time_s: f64,
    speed_deg_s: f64,
    position_deg: f64,
}

/// Sampled speed/position tables for one run
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProfile {
    harmonics: HarmonicSet,
    sampling_interval: f64,
    total_duration: f64,
    time_table: Vec<f64>,
    speed_table: Vec<f64>,
    position_table: Vec<f64>,
}

impl MotionProfile {
    /// Sample `harmonics` every `sampling_interval` s over `[0, total_duration]`
    pub fn new(harmonics: HarmonicSet, sampling_interval: f64, total_duration: f64) -> Result<Self> {
        harmonics.validate()?;
        if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
            return Err(ChairError::invalid(format!(
                "sampling interval must be > 0, got {}",
                sampling_interval
            )));
        }
        if !(total_duration.is_finite() && total_duration > 0.0) {
            return Err(ChairError::invalid(format!(
                "total duration must be > 0, got {}",
                total_duration
            )));
        }
        let steps = (total_duration / sampling_interval).floor();
        if steps >= MAX_SAMPLES as f64 {
            return Err(ChairError::invalid(format!(
                "{} s at {} s per sample is too many samples",
                total_duration, sampling_interval
            )));
        }
        let len = steps as usize + 1;

        // i·Δt can land one ulp past T on the last sample
        let time_table: Vec<f64> = (0..len)
            .map(|i| (i as f64 * sampling_interval).min(total_duration))
            .collect();
        let speed_table = time_table
            .iter()
            .map(|&t| round_hundredths(harmonics.speed_at(t)))
            .collect();
        let position_table = time_table
            .iter()
            .map(|&t| round_hundredths(harmonics.position_at(t)))
            .collect();

        Ok(Self {
            harmonics,
            sampling_interval,
            total_duration,
            time_table,
            speed_table,
            position_table,
        })
    }

    /// Same stimulus on a different grid
    pub fn resampled(&self, sampling_interval: f64) -> Result<Self> {
        Self::new(self.harmonics.clone(), sampling_interval, self.total_duration)
    }

    pub fn harmonics(&self) -> &HarmonicSet {
        &self.harmonics
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn len(&self) -> usize {
        self.time_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_table.is_empty()
    }

    pub fn time_table(&self) -> &[f64] {
        &self.time_table
    }

    pub fn speed_table(&self) -> &[f64] {
        &self.speed_table
    }

    pub fn position_table(&self) -> &[f64] {
        &self.position_table
    }

    /// (time, speed) pairs in streaming order
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time_table
            .iter()
            .copied()
            .zip(self.speed_table.iter().copied())
    }

    /// Continuous speed for diagnostics, not rounded
    pub fn speed_at(&self, t: f64) -> f64 {
        self.harmonics.speed_at(t)
    }

    /// Continuous position for diagnostics, not rounded
    pub fn position_at(&self, t: f64) -> f64 {
        self.harmonics.position_at(t)
    }

    /// Write the tables as `;`-separated CSV with a header row
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);
        for i in 0..self.len() {
            wtr.serialize(ProfileRow {
                time_s: self.time_table[i],
                speed_deg_s: self.speed_table[i],
                position_deg: self.position_table[i],
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}
