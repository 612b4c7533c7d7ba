//! Microphone capture.
//!
//! The cpal stream is not `Send`, so each capture runs on its own thread:
//! the device callback downmixes into a ring buffer, and the thread drains
//! it into 16 kHz frames for the session.

use async_trait::async_trait;
use cpal::{
    SampleFormat, SampleRate, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use facetalk_core::{
    AudioFrame, SessionError,
    audio::{CAPTURE_CHANNELS, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES, FrameAssembler, FrameThrottle},
};
use ringbuf::{
    HeapCons, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::{
    sync::mpsc as std_mpsc,
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DRAIN_CHUNK: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,
    #[error("could not configure input device: {0}")]
    Config(String),
    #[error("could not open input stream: {0}")]
    Build(String),
    #[error("could not start input stream: {0}")]
    Play(String),
    #[error("capture thread exited before the stream started")]
    ThreadGone,
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        SessionError::Device(e.to_string())
    }
}

/// What the session asks of the device. Processing flags are advisory: cpal
/// exposes no echo cancellation, so they are only reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: CAPTURE_CHANNELS,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A running capture. Releasing stops the device; it is safe to call twice.
pub trait MicrophoneCapture: Send {
    fn release(&mut self);
}

/// Source of microphone frames. Frames are delivered on `frames` until the
/// returned capture is released.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn acquire(
        &self,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn MicrophoneCapture>, CaptureError>;
}

#[derive(Debug, Default, Clone)]
pub struct CpalMicrophone {
    constraints: CaptureConstraints,
}

impl CpalMicrophone {
    pub fn new(constraints: CaptureConstraints) -> Self {
        Self { constraints }
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn acquire(
        &self,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn MicrophoneCapture>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let constraints = self.constraints.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(constraints, frames, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Build(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(e)
            }
            Err(_) => Err(CaptureError::ThreadGone),
        }
    }
}

struct CpalCapture {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneCapture for CpalCapture {
    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let join = move || {
                if thread.join().is_err() {
                    warn!("Capture thread panicked");
                }
            };
            // The thread notices the stop within one poll interval; never wait
            // for it on an async worker.
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(join);
                }
                Err(_) => join(),
            }
            info!("Microphone released");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_capture(
    constraints: CaptureConstraints,
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<(), CaptureError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let (stream, mut consumer, input_rate) = match open_stream(&constraints) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut assembler = match FrameAssembler::new(input_rate, FRAME_SAMPLES) {
        Ok(assembler) => assembler,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Config(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::Play(e.to_string())));
        return;
    }
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut throttle = FrameThrottle::default();
    let mut scratch = vec![0f32; DRAIN_CHUNK];
    loop {
        match stop.recv_timeout(POLL_INTERVAL) {
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
        pump(&mut consumer, &mut assembler, &mut throttle, &frames, &mut scratch);
    }
    drop(stream);
    debug!("Capture thread finished");
}

/// Moves buffered samples into frames and hands admitted frames to `frames`.
/// Returns how many frames were delivered.
fn pump(
    consumer: &mut HeapCons<f32>,
    assembler: &mut FrameAssembler,
    throttle: &mut FrameThrottle,
    frames: &mpsc::Sender<AudioFrame>,
    scratch: &mut [f32],
) -> usize {
    loop {
        let n = consumer.pop_slice(scratch);
        if n == 0 {
            break;
        }
        assembler.push(&scratch[..n]);
    }
    let mut delivered = 0;
    while let Some(frame) = assembler.next_frame() {
        if !throttle.admit(Instant::now()) {
            continue;
        }
        match frames.try_send(frame) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => debug!("Session busy; dropping frame"),
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    delivered
}

fn open_stream(
    constraints: &CaptureConstraints,
) -> Result<(cpal::Stream, HeapCons<f32>, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let (config, format) = choose_config(&device, constraints)?;
    info!(
        device = %name,
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        echo_cancellation = constraints.echo_cancellation,
        noise_suppression = constraints.noise_suppression,
        auto_gain_control = constraints.auto_gain_control,
        "Opening microphone"
    );

    let channels = config.channels as usize;
    // Two seconds of mono audio at the device rate.
    let ring = HeapRb::<f32>::new(config.sample_rate.0 as usize * 2);
    let (mut producer, consumer) = ring.split();
    let on_error = |e: cpal::StreamError| error!(error = %e, "Microphone stream error");

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                producer.push_iter(mono(data, channels, |s| s));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                producer.push_iter(mono(data, channels, |s| s as f32 / 32768.0));
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Config(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }
    .map_err(|e| CaptureError::Build(e.to_string()))?;

    Ok((stream, consumer, config.sample_rate.0))
}

/// Prefers the constrained rate and channel count, else the device default.
fn choose_config(
    device: &cpal::Device,
    constraints: &CaptureConstraints,
) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let wanted = SampleRate(constraints.sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            let usable = matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16);
            if usable
                && range.channels() == constraints.channels
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                let supported = range.with_sample_rate(wanted);
                return Ok((supported.config(), supported.sample_format()));
            }
        }
    }
    let fallback = device
        .default_input_config()
        .map_err(|e| CaptureError::Config(e.to_string()))?;
    debug!(
        sample_rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "Constrained format unavailable; using device default"
    );
    Ok((fallback.config(), fallback.sample_format()))
}

/// Averages interleaved samples down to one channel.
fn mono<'a, T: Copy>(
    data: &'a [T],
    channels: usize,
    to_f32: impl Fn(T) -> f32 + 'a,
) -> impl Iterator<Item = f32> + 'a {
    let channels = channels.max(1);
    data.chunks_exact(channels)
        .map(move |frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_averages_channels() {
        let stereo = [0.5f32, -0.5, 1.0, 0.0];
        let out: Vec<f32> = mono(&stereo, 2, |s| s).collect();
        assert_eq!(out, vec![0.0, 0.5]);

        let pcm = [16384i16, 16384];
        let out: Vec<f32> = mono(&pcm, 1, |s| s as f32 / 32768.0).collect();
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_pump_cuts_frames_from_ring_buffer() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(FRAME_SAMPLES * 2).split();
        let mut assembler = FrameAssembler::new(CAPTURE_SAMPLE_RATE, FRAME_SAMPLES).unwrap();
        let mut throttle = FrameThrottle::default();
        let (frames_tx, mut frames_rx) = mpsc::channel(4);
        let mut scratch = vec![0f32; DRAIN_CHUNK];

        producer.push_iter(std::iter::repeat_n(0.25f32, FRAME_SAMPLES + 10));
        let delivered = pump(
            &mut consumer,
            &mut assembler,
            &mut throttle,
            &frames_tx,
            &mut scratch,
        );

        assert_eq!(delivered, 1);
        let frame = frames_rx.try_recv().unwrap();
        assert_eq!(frame.samples().len(), FRAME_SAMPLES);
        assert!(frame.has_audio());
        assert!(frames_rx.try_recv().is_err());
    }

    #[test]
    fn test_pump_throttles_back_to_back_frames() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(FRAME_SAMPLES * 3).split();
        let mut assembler = FrameAssembler::new(CAPTURE_SAMPLE_RATE, FRAME_SAMPLES).unwrap();
        let mut throttle = FrameThrottle::default();
        let (frames_tx, _frames_rx) = mpsc::channel(4);
        let mut scratch = vec![0f32; DRAIN_CHUNK];

        producer.push_iter(std::iter::repeat_n(0.1f32, FRAME_SAMPLES * 2));
        let delivered = pump(
            &mut consumer,
            &mut assembler,
            &mut throttle,
            &frames_tx,
            &mut scratch,
        );
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_device_error_maps_to_session_error() {
        let e: SessionError = CaptureError::NoDevice.into();
        assert!(matches!(e, SessionError::Device(_)));
        assert!(!e.is_retryable());
    }
}
