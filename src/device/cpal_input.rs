//! Mikrofon-Capture mit cpal
//!
//! cpal-Streams sind nicht `Send`. Jeder Capture-Stream lebt deshalb auf
//! einem eigenen Thread, der ihn hält bis der `MediaStream` beendet wird.

use super::{DeviceError, DeviceLayer};
use crate::audio::{resample, MediaStream, SAMPLE_RATE};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use std::time::Duration;
use tokio::sync::oneshot;

/// Wie oft der Capture-Thread prüft, ob der Stream beendet wurde
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Geräte über den Standard-Host von cpal
#[derive(Debug, Default)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }

    fn find_device(device_id: Option<&str>) -> Result<Device, DeviceError> {
        let host = cpal::default_host();
        match device_id {
            None => host.default_input_device().ok_or(DeviceError::NoInputDevice),
            Some(id) => host
                .input_devices()
                .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?
                .find(|d| d.name().map(|name| name == id).unwrap_or(false))
                .ok_or_else(|| DeviceError::DeviceNotFound(id.to_string())),
        }
    }

    /// Wählt die beste Konfiguration: 48kHz F32, sonst F32 mit max. Rate
    fn select_best_config(device: &Device) -> Result<StreamConfig, DeviceError> {
        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?
            .collect();
        let target_rate = cpal::SampleRate(SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        configs
            .iter()
            .find(|c| c.sample_format() == SampleFormat::F32)
            .map(|c| c.with_max_sample_rate().into())
            .ok_or_else(|| {
                DeviceError::UnsupportedConfig("No F32 input configuration found".to_string())
            })
    }

    /// Baut den Capture-Stream und hält ihn bis `media.stop()`
    fn run_capture(
        device_id: Option<String>,
        media: MediaStream,
        ready: oneshot::Sender<Result<(), DeviceError>>,
    ) {
        let setup = || -> Result<cpal::Stream, DeviceError> {
            let device = Self::find_device(device_id.as_deref())?;
            let config = Self::select_best_config(&device)?;

            tracing::info!(
                "Starting audio capture: {} Hz, {} channels",
                config.sample_rate.0,
                config.channels
            );

            let channels = config.channels as usize;
            let source_rate = config.sample_rate.0;
            let sink = media.clone();

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono: Vec<f32> = data
                            .chunks(channels.max(1))
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect();
                        sink.push_samples(&resample(&mono, source_rate, SAMPLE_RATE));
                    },
                    |err| {
                        tracing::error!("Audio capture error: {}", err);
                    },
                    None,
                )
                .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

            stream
                .play()
                .map_err(|e| DeviceError::StreamPlayError(e.to_string()))?;
            Ok(stream)
        };

        match setup() {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                while !media.is_ended() {
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
                drop(stream);
                tracing::info!("Audio capture stopped");
            }
            Err(e) => {
                let _ = ready.send(Err(e));
            }
        }
    }
}

#[async_trait]
impl DeviceLayer for CpalDevices {
    async fn resolve_input_device(&self, preferred: Option<&str>) -> Result<String, DeviceError> {
        let preferred = preferred.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            if let Some(id) = preferred {
                if Self::find_device(Some(&id)).is_ok() {
                    return Ok(id);
                }
                tracing::warn!("Input device {} not available, using default", id);
            }
            Self::find_device(None)?
                .name()
                .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))
        })
        .await
        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?
    }

    async fn open_input(&self, device_id: Option<&str>) -> Result<MediaStream, DeviceError> {
        let media = MediaStream::new(format!("local-{}", device_id.unwrap_or("default")));
        let (ready_tx, ready_rx) = oneshot::channel();
        let device_id = device_id.map(str::to_string);
        let capture_media = media.clone();

        std::thread::Builder::new()
            .name("qall-capture".to_string())
            .spawn(move || Self::run_capture(device_id, capture_media, ready_tx))
            .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| DeviceError::StreamBuildError("Capture thread exited".to_string()))??;
        Ok(media)
    }
}
