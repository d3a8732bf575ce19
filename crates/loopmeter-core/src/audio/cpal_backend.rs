//! Audio subsystem backed by cpal
//!
//! On PulseAudio and PipeWire hosts the monitor of every sink is exposed as an
//! input device whose name contains "monitor". On Windows, WASAPI can open an
//! input stream on an output device (loopback), so output devices are listed
//! as monitors of themselves.

use crate::audio::backend::{
    AudioBackend, BackendConnection, BackendError, ConnectRequest, ContextState, DataCallback,
};
use crate::audio::types::{SampleSpec, SourceInfo};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// cpal-based audio subsystem
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    host_id: Option<cpal::HostId>,
}

impl CpalBackend {
    /// Use the platform's default host
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific cpal host
    pub fn with_host(host_id: cpal::HostId) -> Self {
        Self {
            host_id: Some(host_id),
        }
    }
}

impl AudioBackend for CpalBackend {
    type Connection = CpalConnection;

    fn connect(&self, request: &ConnectRequest) -> Result<Self::Connection, BackendError> {
        if let Some(server) = &request.server {
            tracing::warn!(server = %server, "cpal always uses the local audio server");
        }

        let host = match self.host_id {
            Some(id) => {
                cpal::host_from_id(id).map_err(|e| BackendError::ConnectionFailed(e.to_string()))?
            }
            None => cpal::default_host(),
        };
        tracing::info!(host = ?host.id(), "Audio host ready");

        Ok(CpalConnection {
            host,
            spec: request.spec,
            stream_name: request.stream_name.clone(),
            stream: None,
            failed: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }
}

/// Live cpal host plus the capture stream, if any
pub struct CpalConnection {
    host: cpal::Host,
    spec: SampleSpec,
    stream_name: String,
    stream: Option<cpal::Stream>,
    failed: Arc<AtomicBool>,
    closed: bool,
}

impl CpalConnection {
    fn find_device(&self, name: &str) -> Result<Device, BackendError> {
        let inputs = self
            .host
            .input_devices()
            .map_err(|e| BackendError::SourceList(e.to_string()))?;
        for device in inputs {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        #[cfg(windows)]
        {
            let outputs = self
                .host
                .output_devices()
                .map_err(|e| BackendError::SourceList(e.to_string()))?;
            for device in outputs {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(device);
                }
            }
        }

        Err(BackendError::RecordConnect {
            source_name: name.to_string(),
            reason: "device disappeared".to_string(),
        })
    }
}

impl BackendConnection for CpalConnection {
    fn state(&self) -> ContextState {
        if self.closed {
            ContextState::Terminated
        } else if self.failed.load(Ordering::Acquire) {
            ContextState::Failed
        } else {
            ContextState::Ready
        }
    }

    fn list_sources(&mut self) -> Result<Vec<SourceInfo>, BackendError> {
        let mut sources = Vec::new();

        let inputs = self
            .host
            .input_devices()
            .map_err(|e| BackendError::SourceList(e.to_string()))?;
        for device in inputs {
            if let Ok(name) = device.name() {
                sources.push(classify_input(name));
            }
        }

        #[cfg(windows)]
        {
            if let Ok(outputs) = self.host.output_devices() {
                for device in outputs {
                    if let Ok(name) = device.name() {
                        let description = format!("Loopback of {}", name);
                        sources.push(
                            SourceInfo::monitor(name.clone(), name).with_description(description),
                        );
                    }
                }
            }
        }

        Ok(sources)
    }

    fn open_record_stream(
        &mut self,
        source: &SourceInfo,
        on_data: DataCallback,
    ) -> Result<(), BackendError> {
        let device = self.find_device(&source.name)?;

        let config = StreamConfig {
            channels: self.spec.channels,
            sample_rate: SampleRate(self.spec.rate),
            buffer_size: BufferSize::Default,
        };

        // The device's native type decides the callback type; samples are
        // converted to S16 before delivery
        let native = device
            .default_input_config()
            .or_else(|_| device.default_output_config())
            .map_err(|e| BackendError::StreamCreation(e.to_string()))?
            .sample_format();

        tracing::info!(
            source = %source.name,
            stream = %self.stream_name,
            channels = config.channels,
            rate = self.spec.rate,
            native = ?native,
            "Opening capture stream"
        );

        let failed = Arc::clone(&self.failed);
        let stream = match native {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, on_data, failed),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, on_data, failed),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, on_data, failed),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, on_data, failed),
            other => return Err(BackendError::UnsupportedFormat(format!("{:?}", other))),
        }
        .map_err(|e| BackendError::RecordConnect {
            source_name: source.name.clone(),
            reason: e.to_string(),
        })?;

        stream.play().map_err(|e| BackendError::RecordConnect {
            source_name: source.name.clone(),
            reason: e.to_string(),
        })?;

        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "Failed to pause capture stream");
            }
            drop(stream);
            tracing::debug!("Capture stream disconnected");
        }
    }

    fn teardown(mut self) {
        self.disconnect();
        self.closed = true;
        tracing::debug!(host = ?self.host.id(), "Audio host released");
    }
}

/// Name-based monitor detection for PulseAudio/PipeWire device names
fn classify_input(name: String) -> SourceInfo {
    let lower = name.to_lowercase();
    if !lower.contains("monitor") {
        return SourceInfo::input(name);
    }
    let sink = name
        .strip_suffix(".monitor")
        .or_else(|| name.strip_prefix("Monitor of "))
        .unwrap_or(&name)
        .to_string();
    let description = format!("Monitor of {}", sink);
    SourceInfo::monitor(name, sink).with_description(description)
}

/// Build an input stream for native sample type `T`, delivering S16
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut on_data: DataCallback,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::Sample + cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let mut converted: Vec<i16> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|&s| <i16 as cpal::Sample>::from_sample(s)));
            on_data(&converted);
        },
        move |err| {
            tracing::error!(error = %err, "Capture stream error");
            failed.store(true, Ordering::Release);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pulse_monitor() {
        let source = classify_input("alsa_output.pci.analog-stereo.monitor".to_string());
        assert!(source.is_monitor());
        assert_eq!(
            source.monitor_of_sink.as_deref(),
            Some("alsa_output.pci.analog-stereo")
        );
        assert_eq!(
            source.description.as_deref(),
            Some("Monitor of alsa_output.pci.analog-stereo")
        );
    }

    #[test]
    fn test_classify_descriptive_monitor() {
        let source = classify_input("Monitor of Built-in Audio".to_string());
        assert!(source.is_monitor());
        assert_eq!(source.monitor_of_sink.as_deref(), Some("Built-in Audio"));
        assert_eq!(source.label(), "Monitor of Built-in Audio");
    }

    #[test]
    fn test_classify_plain_input() {
        let source = classify_input("Built-in Microphone".to_string());
        assert!(!source.is_monitor());
        assert_eq!(source.label(), "Built-in Microphone");
    }
}
