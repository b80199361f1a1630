// ============================================================
//  click.rs — Sample du clic de métronome
//
//  - Clic synthétisé intégré (bloc de bois : sinus amorti + bruit)
//  - Chargement d'un fichier WAV via hound (mixage mono)
//  - Rééchantillonnage linéaire vers le taux de la sortie
// ============================================================

use std::f32::consts::PI;
use std::path::Path;
use std::time::Duration;

use crate::audio::AudioError;

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const CLICK_DURATION: f32 = 0.06;
const CLICK_FREQ: f32 = 1_600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClickSample {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl ClickSample {
    // ─── Génération du clic intégré ──────────────────────────────────────────

    pub fn synthesize(sample_rate: u32) -> Self {
        let len = (CLICK_DURATION * sample_rate as f32) as usize;
        let mut samples = Vec::with_capacity(len);

        for i in 0..len {
            let t = i as f32 / sample_rate as f32;
            let tone = (2.0 * PI * CLICK_FREQ * t).sin() * (-t * 90.0).exp();
            // Transitoire de bruit sur les 3 premières ms
            let noise = if t < 0.003 {
                (rand::random::<f32>() * 2.0 - 1.0) * (1.0 - t / 0.003)
            } else {
                0.0
            };
            let fade_out = ((CLICK_DURATION - t) * 200.0).min(1.0);
            samples.push((tone * 0.7 + noise * 0.2) * fade_out);
        }

        ClickSample { samples, sample_rate }
    }

    // ─── Lecture WAV ─────────────────────────────────────────────────────────

    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<Result<_, _>>()?
            }
        };

        // Mix multicanal → mono
        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        if samples.is_empty() {
            return Err(AudioError::EmptySample);
        }

        log::debug!(
            "clic chargé depuis {} : {} Hz, {} canaux, {} trames",
            path.as_ref().display(),
            spec.sample_rate,
            channels,
            samples.len()
        );

        Ok(ClickSample {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Interpolation linéaire vers `target_rate`.
    pub fn resampled(&self, target_rate: u32) -> Self {
        if target_rate == self.sample_rate || self.samples.is_empty() {
            return ClickSample {
                samples: self.samples.clone(),
                sample_rate: target_rate,
            };
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let len = ((self.samples.len() as f64) / ratio).round() as usize;
        let last = self.samples.len() - 1;

        let samples = (0..len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = (pos - idx as f64) as f32;
                self.samples[idx] * (1.0 - frac) + self.samples[next] * frac
            })
            .collect();

        ClickSample {
            samples,
            sample_rate: target_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}
