// ============================================================
//  audio.rs — Lecture du clic via cpal
//
//  - Détection de la sortie audio au démarrage
//  - Un flux de sortie ouvert par clic, libéré à la fin du clic
//  - Support : WASAPI (Windows), CoreAudio (macOS), ALSA (Linux)
// ============================================================

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::click::ClickSample;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("aucune sortie audio disponible")]
    NoOutputDevice,
    #[error("formats de sortie illisibles : {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("format de sortie par défaut introuvable : {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("ouverture du flux audio impossible : {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("démarrage du flux audio impossible : {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("lecture du fichier WAV impossible : {0}")]
    Decode(#[from] hound::Error),
    #[error("le sample de clic est vide")]
    EmptySample,
}

// ─── Capacité de lecture ──────────────────────────────────────────────────────

/// Un clic en cours de lecture. Le relâcher libère le flux audio.
pub trait ClickPlayback {
    fn is_finished(&self) -> bool;
}

/// Joue un clic de manière asynchrone et rend la main immédiatement.
pub trait ClickOutput: Send + 'static {
    fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError>;
}

// ─── Implémentation cpal ──────────────────────────────────────────────────────

pub struct CpalClickOutput {
    device: cpal::Device,
    config: StreamConfig,
    // Buffer multicanal interleaved, prêt à copier dans le callback
    frames: Arc<Vec<f32>>,
    device_name: String,
}

impl CpalClickOutput {
    /// Cherche la sortie par défaut et prépare le clic à son format.
    /// N'ouvre aucun flux : un échec ici désactive le métronome pour la session.
    pub fn open(sample: &ClickSample) -> Result<Self, AudioError> {
        if sample.is_empty() {
            return Err(AudioError::EmptySample);
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoOutputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "Inconnu".into());

        let config = find_output_config(&device, SampleRate(sample.sample_rate))?;
        let rate = config.sample_rate.0;
        let mono = if rate == sample.sample_rate {
            sample.samples.clone()
        } else {
            log::info!(
                "{} Hz non supporté par « {} », rééchantillonnage vers {} Hz",
                sample.sample_rate,
                device_name,
                rate
            );
            sample.resampled(rate).samples
        };

        let channels = config.channels as usize;
        log::info!(
            "sortie « {} » : {} canaux, {} Hz, clic de {} ms",
            device_name,
            channels,
            rate,
            sample.duration().as_millis()
        );

        Ok(CpalClickOutput {
            device,
            config,
            frames: Arc::new(duplicate_to_channels(&mono, channels)),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

struct CpalPlayback {
    _stream: cpal::Stream,
    position: Arc<AtomicUsize>,
    len: usize,
}

impl ClickPlayback for CpalPlayback {
    fn is_finished(&self) -> bool {
        self.position.load(Ordering::Acquire) >= self.len
    }
}

impl ClickOutput for CpalClickOutput {
    fn play(&mut self) -> Result<Box<dyn ClickPlayback>, AudioError> {
        let channels = self.config.channels as usize;
        let frames = Arc::clone(&self.frames);
        let position = Arc::new(AtomicUsize::new(0));
        let pos = Arc::clone(&position);

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _| {
                for frame in data.chunks_mut(channels) {
                    let p = pos.load(Ordering::Relaxed);
                    if p + channels <= frames.len() {
                        frame.copy_from_slice(&frames[p..p + channels]);
                        pos.store(p + channels, Ordering::Release);
                    } else {
                        frame.fill(0.0);
                    }
                }
            },
            |e| log::warn!("erreur sortie audio : {}", e),
            None,
        )?;
        stream.play()?;

        Ok(Box::new(CpalPlayback {
            _stream: stream,
            position,
            len: self.frames.len(),
        }))
    }
}

// ─── Utilitaires internes ─────────────────────────────────────────────────────

/// Recopie un signal mono sur tous les canaux (interleaved).
fn duplicate_to_channels(mono: &[f32], num_channels: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(mono.len() * num_channels);
    for &s in mono {
        out.extend(std::iter::repeat(s).take(num_channels));
    }
    out
}

/// Cherche une config F32 au taux natif du clic — préfère la stéréo.
/// À défaut, garde la config par défaut du périphérique.
fn find_output_config(device: &cpal::Device, desired_rate: SampleRate) -> Result<StreamConfig, AudioError> {
    let mut fallback_channels = None;
    for supported in device.supported_output_configs()? {
        if supported.sample_format() != SampleFormat::F32
            || supported.min_sample_rate() > desired_rate
            || supported.max_sample_rate() < desired_rate
        {
            continue;
        }
        if supported.channels() == 2 {
            return Ok(StreamConfig {
                channels: 2,
                sample_rate: desired_rate,
                buffer_size: cpal::BufferSize::Default,
            });
        }
        fallback_channels.get_or_insert(supported.channels());
    }

    if let Some(channels) = fallback_channels {
        return Ok(StreamConfig {
            channels,
            sample_rate: desired_rate,
            buffer_size: cpal::BufferSize::Default,
        });
    }

    let conf = device.default_output_config()?;
    Ok(StreamConfig {
        channels: conf.channels(),
        sample_rate: conf.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_is_copied_on_every_channel() {
        let out = duplicate_to_channels(&[0.5, -0.25], 3);
        assert_eq!(out, vec![0.5, 0.5, 0.5, -0.25, -0.25, -0.25]);
    }
}
