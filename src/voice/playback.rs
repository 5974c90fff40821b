//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::tts::AudioSink;
use super::{AudioClip, AudioFormat};
use crate::{Error, Result};

/// Plays mono samples on the default output device
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
    sample_rate: u32,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supports = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        };

        let supported_config = supports(1)
            .or_else(|| supports(2))
            .ok_or_else(|| Error::Audio(format!("no output config at {sample_rate} Hz")))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            sample_rate,
        })
    }

    /// Play samples, blocking until they finish
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails to start
    pub fn play_blocking(&self, samples: Vec<f32>) -> Result<()> {
        self.play_until(samples, &AtomicBool::new(false))
    }

    /// Play samples, blocking until they finish or `stop` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails to start
    pub fn play_until(&self, samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let total = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                        if pos >= samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(self.sample_rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        if wait_for_playback(&finished, stop, deadline) {
            tracing::debug!(samples = total, "playback stopped early");
        } else {
            // let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
            tracing::debug!(samples = total, "playback complete");
        }

        drop(stream);
        Ok(())
    }
}

/// Poll until `finished`, `stop` or `deadline`; returns whether `stop` ended it
fn wait_for_playback(finished: &AtomicBool, stop: &AtomicBool, deadline: Instant) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        if finished.load(Ordering::Acquire) || Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Raises its flag when dropped
///
/// Held by the async side of a blocking playback so that abandoning the
/// future (a timeout, say) silences the speaker too.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Decode a clip to mono f32 samples and its sample rate
///
/// # Errors
///
/// Returns error for undecodable data or unsupported containers
pub fn decode(clip: &AudioClip) -> Result<(Vec<f32>, u32)> {
    match clip.format {
        AudioFormat::Mp3 => decode_mp3(&clip.data),
        AudioFormat::Wav => decode_wav(&clip.data),
        AudioFormat::WebM => Err(Error::Audio("WebM playback not supported".to_string())),
    }
}

#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 24000_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Raise (factor > 1) or lower the pitch by resampling
///
/// Played back at `sample_rate`, the output sounds `factor` times higher
/// and correspondingly shorter.
///
/// # Errors
///
/// Returns error if the resampler cannot be built
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn pitch_shift(samples: &[f32], sample_rate: u32, factor: f32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if (factor - 1.0).abs() < 0.01 || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if !(0.25..=4.0).contains(&factor) {
        return Err(Error::Audio(format!("pitch factor {factor} out of range")));
    }

    let from_rate = (sample_rate as f32 * factor).round() as usize;
    let to_rate = sample_rate as usize;

    let mut resampler = FftFixedIn::<f32>::new(from_rate, to_rate, 1024, 2, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
    let chunk_size = resampler.input_frames_next();

    let mut output = Vec::with_capacity((samples.len() as f32 / factor) as usize + chunk_size);
    for chunk in samples.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let expected = (samples.len() as f32 / factor).round() as usize;
    output.truncate(expected);
    Ok(output)
}

/// [`AudioSink`] that plays through the system speakers
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerSink;

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&self, clip: AudioClip, pitch: f32) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(Arc::clone(&stop));

        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode(&clip)?;
            let samples = pitch_shift(&samples, sample_rate, pitch)?;
            AudioPlayback::new(sample_rate)?.play_until(samples, &stop)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}
