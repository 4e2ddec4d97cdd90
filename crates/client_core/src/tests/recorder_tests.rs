use std::sync::Mutex;

use tokio::time::{self, Instant};

use super::*;

struct FakeStream {
    samples: usize,
}

impl CaptureStream for FakeStream {
    fn format(&self) -> CaptureFormat {
        CaptureFormat {
            sample_rate: 16_000,
            channels: 1,
        }
    }

    fn finish(self: Box<Self>) -> Vec<i16> {
        (0..self.samples).map(|i| (i % 128) as i16).collect()
    }
}

#[derive(Default)]
struct FakeMicrophone {
    samples: usize,
    reject_preferred: bool,
    fail_with: Option<CaptureError>,
    requests: Mutex<Vec<CaptureConstraints>>,
}

impl FakeMicrophone {
    fn with_samples(samples: usize) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<CaptureConstraints> {
        self.requests.lock().expect("requests").clone()
    }
}

impl AudioInput for FakeMicrophone {
    fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        self.requests.lock().expect("requests").push(constraints.clone());
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        if self.reject_preferred && constraints == &CaptureConstraints::preferred() {
            return Err(CaptureError::ConstraintsUnsatisfiable(
                "sampleRate 44100 unsupported".to_string(),
            ));
        }
        Ok(Box::new(FakeStream {
            samples: self.samples,
        }))
    }
}

fn recorder(
    mic: Arc<FakeMicrophone>,
) -> (VoiceRecorder, mpsc::UnboundedReceiver<SessionInput>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        VoiceRecorder::new(mic, 1_024, Duration::from_secs(10), tx),
        rx,
    )
}

#[tokio::test(start_paused = true)]
async fn stop_produces_wav_upload() {
    let mic = Arc::new(FakeMicrophone::with_samples(4_000));
    let (mut recorder, _rx) = recorder(mic.clone());

    recorder.start().expect("start");
    assert!(recorder.is_recording());
    assert_eq!(recorder.start(), Err(CaptureError::AlreadyRecording));

    let upload = recorder.stop().expect("stop");
    assert!(!recorder.is_recording());
    assert_eq!(upload.mime_type, "audio/wav");
    assert!(upload.file_name.starts_with("voice-message-"));
    assert!(upload.file_name.ends_with(".wav"));
    assert_eq!(&upload.bytes[..4], b"RIFF");

    let reader = hound::WavReader::new(Cursor::new(upload.bytes)).expect("wav");
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.len(), 4_000);
    assert_eq!(mic.requests(), vec![CaptureConstraints::preferred()]);
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_minimal_constraints() {
    let mic = Arc::new(FakeMicrophone {
        samples: 4_000,
        reject_preferred: true,
        ..Default::default()
    });
    let (mut recorder, _rx) = recorder(mic.clone());

    recorder.start().expect("fallback start");
    assert_eq!(
        mic.requests(),
        vec![CaptureConstraints::preferred(), CaptureConstraints::minimal()]
    );
}

#[tokio::test(start_paused = true)]
async fn permission_denied_is_reported_without_fallback() {
    let mic = Arc::new(FakeMicrophone {
        fail_with: Some(CaptureError::PermissionDenied),
        ..Default::default()
    });
    let (mut recorder, _rx) = recorder(mic.clone());

    assert_eq!(recorder.start(), Err(CaptureError::PermissionDenied));
    assert!(!recorder.is_recording());
    assert_eq!(mic.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsatisfiable_even_when_minimal_gives_up() {
    let mic = Arc::new(FakeMicrophone {
        fail_with: Some(CaptureError::ConstraintsUnsatisfiable("none".to_string())),
        ..Default::default()
    });
    let (mut recorder, _rx) = recorder(mic.clone());

    assert!(matches!(
        recorder.start(),
        Err(CaptureError::ConstraintsUnsatisfiable(_))
    ));
    assert_eq!(mic.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn tiny_capture_is_rejected_as_empty() {
    let mic = Arc::new(FakeMicrophone::with_samples(10));
    let (mut recorder, _rx) = recorder(mic);

    recorder.start().expect("start");
    match recorder.stop() {
        Err(RecordingError::Empty(err)) => {
            assert!(err.bytes < 1_024);
            assert_eq!(err.minimum, 1_024);
        }
        other => panic!("expected empty capture, got {other:?}"),
    }
    assert!(!recorder.is_recording());
}

#[tokio::test(start_paused = true)]
async fn stop_without_recording_fails() {
    let (mut recorder, _rx) = recorder(Arc::new(FakeMicrophone::with_samples(10)));
    assert!(matches!(
        recorder.stop(),
        Err(RecordingError::Capture(CaptureError::NotRecording))
    ));
    assert!(!recorder.cancel());
}

#[tokio::test(start_paused = true)]
async fn cap_stops_recording_after_max_duration() {
    let (mut recorder, mut rx) = recorder(Arc::new(FakeMicrophone::with_samples(4_000)));
    let start = Instant::now();
    recorder.start().expect("start");

    let Some(SessionInput::Timer(fired)) = rx.recv().await else {
        panic!("expected cap timer");
    };
    assert_eq!(fired.kind, TimerKind::RecordingCap);
    assert!(start.elapsed() >= Duration::from_secs(10));

    let upload = recorder
        .on_cap_expired(fired)
        .expect("cap fired")
        .expect("upload");
    assert!(!recorder.is_recording());
    assert!(upload.bytes.len() > 1_024);
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_and_disarms_cap() {
    let (mut recorder, mut rx) = recorder(Arc::new(FakeMicrophone::with_samples(4_000)));
    recorder.start().expect("start");
    assert!(recorder.cancel());
    assert!(!recorder.is_recording());

    time::sleep(Duration::from_secs(20)).await;
    assert!(rx.try_recv().is_err());
}
