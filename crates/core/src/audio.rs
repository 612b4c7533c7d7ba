//! PCM audio helpers shared by the capture path and the conversation relay.
//!
//! Captured audio is mono `f32` at 16 kHz, cut into fixed-size frames. Audio
//! sent to the conversation service is PCM16 little-endian, base64 encoded.

use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
pub const CAPTURE_CHANNELS: u16 = 1;
pub const FRAME_SAMPLES: usize = 4096;
/// Minimum wall-clock spacing between two delivered frames.
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(100);
/// Absolute sample value above which a frame "has audio".
pub const PEAK_THRESHOLD: f32 = 0.01;
/// Level above which a frame counts as speech.
pub const SPEAKING_LEVEL_THRESHOLD: u8 = 5;
/// Largest byte slice handed to the base64 encoder at once. A multiple of 3,
/// so the encoded slices concatenate without inner padding.
pub const ENCODE_SLICE_BYTES: usize = 8190;

const RESAMPLER_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Invalid base64 audio payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Failed to create resampler: {0}")]
    Resampler(#[from] rubato::ResamplerConstructionError),
}

/// Per-frame signals derived from the samples. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameAnalysis {
    /// RMS mapped to `0..=100`.
    pub level: u8,
    /// True if any sample exceeds [`PEAK_THRESHOLD`].
    pub has_audio: bool,
}

impl FrameAnalysis {
    pub fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum / samples.len() as f64).sqrt();
        let level = (rms * 1000.0).floor().min(100.0) as u8;
        let has_audio = samples.iter().any(|s| s.abs() > PEAK_THRESHOLD);
        Self { level, has_audio }
    }

    pub fn is_speaking(&self) -> bool {
        self.level > SPEAKING_LEVEL_THRESHOLD
    }
}

/// An immutable block of mono PCM samples at [`CAPTURE_SAMPLE_RATE`].
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    analysis: FrameAnalysis,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        let analysis = FrameAnalysis::of(&samples);
        Self {
            samples: samples.into(),
            analysis,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }

    pub fn channels(&self) -> u16 {
        CAPTURE_CHANNELS
    }

    pub fn analysis(&self) -> FrameAnalysis {
        self.analysis
    }

    pub fn level(&self) -> u8 {
        self.analysis.level
    }

    pub fn has_audio(&self) -> bool {
        self.analysis.has_audio
    }

    pub fn is_speaking(&self) -> bool {
        self.analysis.is_speaking()
    }
}

/// Policy deciding whether a captured frame is worth sending upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGate {
    /// A sample above the peak threshold *and* a level above the speaking threshold.
    #[default]
    Strict,
    /// Level above the speaking threshold only.
    Level,
}

impl VoiceGate {
    pub fn admits(self, analysis: FrameAnalysis) -> bool {
        match self {
            VoiceGate::Strict => analysis.has_audio && analysis.is_speaking(),
            VoiceGate::Level => analysis.is_speaking(),
        }
    }
}

impl fmt::Display for VoiceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceGate::Strict => write!(f, "strict"),
            VoiceGate::Level => write!(f, "level"),
        }
    }
}

impl FromStr for VoiceGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(VoiceGate::Strict),
            "level" => Ok(VoiceGate::Level),
            other => Err(format!("'{}' is not a voice gate (expected 'strict' or 'level')", other)),
        }
    }
}

/// Bounds frame delivery to one per interval, whatever the device cadence.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Returns true and records `now` if a frame may be delivered.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(MIN_FRAME_INTERVAL)
    }
}

/// Collects mono samples at the device rate and cuts them into 16 kHz frames.
pub struct FrameAssembler {
    resampler: Option<FastFixedIn<f32>>,
    pending_in: Vec<f32>,
    pending_out: Vec<f32>,
    frame_len: usize,
}

impl FrameAssembler {
    pub fn new(input_rate: u32, frame_len: usize) -> Result<Self, AudioError> {
        let resampler = if input_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                input_rate as f64,
                CAPTURE_SAMPLE_RATE as f64,
                RESAMPLER_CHUNK,
            )?)
        };
        Ok(Self {
            resampler,
            pending_in: Vec::new(),
            pending_out: Vec::with_capacity(frame_len * 2),
            frame_len,
        })
    }

    pub fn push(&mut self, mono: &[f32]) {
        let Some(resampler) = self.resampler.as_mut() else {
            self.pending_out.extend_from_slice(mono);
            return;
        };
        self.pending_in.extend_from_slice(mono);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending_in.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending_in.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(out) => self.pending_out.extend_from_slice(&out[0]),
                Err(e) => tracing::warn!(error = %e, "Resampling failed; dropping chunk"),
            }
        }
    }

    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.pending_out.len() < self.frame_len {
            return None;
        }
        let samples: Vec<f32> = self.pending_out.drain(..self.frame_len).collect();
        Some(AudioFrame::new(samples))
    }
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Converts `[-1, 1]` floats to PCM16 (clamped, scaled by `i16::MAX`, floored).
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample.clamp(-1.0, 1.0) * i16::MAX as f32).floor() as i16)
        .collect()
}

/// Encodes float samples as base64 PCM16 LE, in slices of at most
/// [`ENCODE_SLICE_BYTES`] bytes.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let bytes: Vec<u8> = convert_f32_to_i16(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect();
    encode_bytes_base64(&bytes)
}

pub fn encode_bytes_base64(bytes: &[u8]) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut encoded = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for slice in bytes.chunks(ENCODE_SLICE_BYTES) {
        engine.encode_string(slice, &mut encoded);
    }
    encoded
}

pub fn decode_base64(fragment: &str) -> Result<Vec<u8>, AudioError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(fragment)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_silence_analysis() {
        let analysis = FrameAnalysis::of(&vec![0.0; FRAME_SAMPLES]);
        assert_eq!(analysis.level, 0);
        assert!(!analysis.has_audio);
        assert!(!analysis.is_speaking());

        assert_eq!(FrameAnalysis::of(&[]), FrameAnalysis::default());
    }

    #[test]
    fn test_level_is_bounded_rms() {
        // Constant 0.003 -> rms 0.003 -> floor(3.0) = 3, below the peak threshold.
        let quiet = FrameAnalysis::of(&vec![0.003; 128]);
        assert_eq!(quiet.level, 3);
        assert!(!quiet.has_audio);

        let loud = FrameAnalysis::of(&vec![0.5; 128]);
        assert_eq!(loud.level, 100);
        assert!(loud.has_audio);
        assert!(loud.is_speaking());
    }

    #[test]
    fn test_single_spike_has_audio_but_is_not_speech() {
        let mut samples = vec![0.0; 4096];
        samples[10] = 0.2;
        let analysis = FrameAnalysis::of(&samples);
        assert!(analysis.has_audio);
        assert!(!analysis.is_speaking());
    }

    #[test]
    fn test_voice_gates() {
        let spike_only = FrameAnalysis {
            level: 2,
            has_audio: true,
        };
        let level_only = FrameAnalysis {
            level: 40,
            has_audio: false,
        };
        let both = FrameAnalysis {
            level: 40,
            has_audio: true,
        };

        assert!(!VoiceGate::Strict.admits(spike_only));
        assert!(!VoiceGate::Strict.admits(level_only));
        assert!(VoiceGate::Strict.admits(both));

        assert!(!VoiceGate::Level.admits(spike_only));
        assert!(VoiceGate::Level.admits(level_only));
        assert!(VoiceGate::Level.admits(both));
    }

    #[test]
    fn test_voice_gate_parsing() {
        assert_eq!("strict".parse::<VoiceGate>(), Ok(VoiceGate::Strict));
        assert_eq!(" LEVEL ".parse::<VoiceGate>(), Ok(VoiceGate::Level));
        assert!("loose".parse::<VoiceGate>().is_err());
        assert_eq!(VoiceGate::default(), VoiceGate::Strict);
    }

    #[test]
    fn test_throttle_spacing() {
        let start = Instant::now();
        let mut throttle = FrameThrottle::default();

        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(40)));
        assert!(!throttle.admit(start + Duration::from_millis(99)));
        assert!(throttle.admit(start + Duration::from_millis(100)));
        assert!(!throttle.admit(start + Duration::from_millis(150)));
        assert!(throttle.admit(start + Duration::from_millis(356)));
    }

    #[test]
    fn test_zero_frame_round_trip() {
        let encoded = encode_pcm16_base64(&vec![0.0; FRAME_SAMPLES]);
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, vec![0u8; FRAME_SAMPLES * 2]);
    }

    #[test]
    fn test_conversion_clamps_and_floors() {
        let pcm = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0, -0.5]);
        assert_eq!(pcm, vec![32767, -32767, 0, 32767, -32767, -16384]);
    }

    #[test]
    fn test_sliced_encoding_matches_single_pass() {
        // 10_000 samples -> 20_000 bytes, three encoder slices.
        let samples: Vec<f32> = (0..10_000).map(|i| ((i % 200) as f32 / 100.0) - 1.0).collect();
        let bytes: Vec<u8> = convert_f32_to_i16(&samples)
            .into_iter()
            .flat_map(i16::to_le_bytes)
            .collect();
        let single = base64::engine::general_purpose::STANDARD.encode(&bytes);
        assert_eq!(encode_pcm16_base64(&samples), single);
        assert_eq!(decode_base64(&single).unwrap(), bytes);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(decode_base64("not base64!"), Err(AudioError::Decode(_))));
        assert!(decode_base64("").unwrap().is_empty());
    }

    #[test]
    fn test_assembler_cuts_fixed_frames_at_native_rate() {
        let mut assembler = FrameAssembler::new(CAPTURE_SAMPLE_RATE, FRAME_SAMPLES).unwrap();
        assembler.push(&vec![0.1; 3000]);
        assert!(assembler.next_frame().is_none());
        assembler.push(&vec![0.1; 6000]);

        let frame = assembler.next_frame().unwrap();
        assert_eq!(frame.samples().len(), FRAME_SAMPLES);
        assert_eq!(frame.sample_rate(), 16000);
        assert_eq!(frame.channels(), 1);
        assert!(assembler.next_frame().is_some());
        assert!(assembler.next_frame().is_none());
    }

    #[test]
    fn test_assembler_resamples_device_rate() {
        let mut assembler = FrameAssembler::new(48000, FRAME_SAMPLES).unwrap();
        // One second at 48 kHz becomes roughly one second at 16 kHz: three full frames.
        for _ in 0..48 {
            assembler.push(&vec![0.25; 1000]);
        }
        let mut frames = Vec::new();
        while let Some(frame) = assembler.next_frame() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        // Past the resampler's start-up delay a constant input stays constant.
        assert_abs_diff_eq!(frames[2].samples()[FRAME_SAMPLES / 2], 0.25, epsilon = 0.01);
    }

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 16000.0, 1024).is_ok());
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
    }
}
