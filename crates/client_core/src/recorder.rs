use std::{io::Cursor, sync::Arc, time::Duration};

use chrono::Utc;
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    attachment::FileUpload,
    error::{CaptureError, EmptyCaptureError, RecordingError},
    session::SessionInput,
    timer::{TimerFired, TimerKind, TimerSlot},
};

pub const VOICE_MIME_TYPE: &str = "audio/wav";

/// Requested capture settings. `None` leaves the choice to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConstraints {
    pub fn preferred() -> Self {
        Self {
            sample_rate: Some(44_100),
            channels: Some(1),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    /// Fallback used once the preferred set was rejected.
    pub fn minimal() -> Self {
        Self {
            sample_rate: None,
            channels: None,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Microphone access.
pub trait AudioInput: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints)
        -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live capture buffering interleaved 16-bit samples until finished.
pub trait CaptureStream: Send {
    fn format(&self) -> CaptureFormat;
    fn finish(self: Box<Self>) -> Vec<i16>;
}

/// `Idle` ⇄ `Recording`. A hard cap stops a recording whose stop signal
/// never arrives.
pub struct VoiceRecorder {
    input: Arc<dyn AudioInput>,
    active: Option<Box<dyn CaptureStream>>,
    min_bytes: usize,
    max_duration: Duration,
    cap: TimerSlot,
}

impl VoiceRecorder {
    pub fn new(
        input: Arc<dyn AudioInput>,
        min_bytes: usize,
        max_duration: Duration,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> Self {
        Self {
            input,
            active: None,
            min_bytes,
            max_duration,
            cap: TimerSlot::new(TimerKind::RecordingCap, inputs),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        let stream = match self.input.open(&CaptureConstraints::preferred()) {
            Ok(stream) => stream,
            Err(CaptureError::ConstraintsUnsatisfiable(reason)) => {
                warn!(reason = %reason, "recorder: preferred constraints rejected, retrying with minimal set");
                self.input.open(&CaptureConstraints::minimal())?
            }
            Err(err) => return Err(err),
        };
        let format = stream.format();
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            cap_ms = self.max_duration.as_millis() as u64,
            "recorder: recording started"
        );
        self.active = Some(stream);
        self.cap.arm(self.max_duration);
        Ok(())
    }

    /// Ends the recording and encodes it for upload.
    pub fn stop(&mut self) -> Result<FileUpload, RecordingError> {
        let stream = self.active.take().ok_or(CaptureError::NotRecording)?;
        self.cap.cancel();
        let format = stream.format();
        let samples = stream.finish();
        let bytes = encode_wav(format, &samples)?;
        if bytes.len() < self.min_bytes {
            info!(bytes = bytes.len(), minimum = self.min_bytes, "recorder: nothing captured");
            return Err(EmptyCaptureError {
                bytes: bytes.len(),
                minimum: self.min_bytes,
            }
            .into());
        }
        info!(bytes = bytes.len(), "recorder: recording finished");
        Ok(FileUpload::new(
            format!("voice-message-{}.wav", Utc::now().timestamp_millis()),
            VOICE_MIME_TYPE,
            bytes,
        ))
    }

    /// Discards an in-progress recording. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        self.cap.cancel();
        match self.active.take() {
            Some(stream) => {
                drop(stream.finish());
                debug!("recorder: recording discarded");
                true
            }
            None => false,
        }
    }

    /// The hard cap behaves like an explicit stop.
    pub fn on_cap_expired(&mut self, fired: TimerFired) -> Option<Result<FileUpload, RecordingError>> {
        if !self.cap.accept(fired) || self.active.is_none() {
            return None;
        }
        warn!(cap_ms = self.max_duration.as_millis() as u64, "recorder: maximum duration reached");
        Some(self.stop())
    }
}

fn encode_wav(format: CaptureFormat, samples: &[i16]) -> Result<Vec<u8>, CaptureError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|err| CaptureError::Encode(err.to_string()))?;
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|err| CaptureError::Encode(err.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|err| CaptureError::Encode(err.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
#[path = "tests/recorder_tests.rs"]
mod tests;
