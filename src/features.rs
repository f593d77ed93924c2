use std::fs::File;
use std::path::Path;

use mel_filter::{mel, NormalizationFactor};
use minimp3::{Decoder, Error as Mp3Error, Frame};
use ndarray::{s, Array2, Axis};
use rubato::{FftFixedInOut, Resampler};
use rustdct::DctPlanner;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::FeatureConfig;
use crate::error::{Error, Result};

fn audio_err(path: &Path, message: impl ToString) -> Error {
    Error::Audio {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Convert a raw i16 audio sample to a normalized f32 value in [-1.0, 1.0]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.iter().map(|&s| i16_to_f32(s)).collect();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().map(|&s| i16_to_f32(s)).sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Load a 16-bit WAV file as mono samples and its sample rate.
pub fn load_wav_samples(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| audio_err(path, e))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 {
        return Err(audio_err(path, "only 16-bit audio is supported"));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| audio_err(path, e))?;
    Ok((downmix(&samples, spec.channels as usize), spec.sample_rate))
}

/// Decode an MP3 file to mono samples and its sample rate.
pub fn load_mp3_samples(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut decoder = Decoder::new(File::open(path)?);
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;
    loop {
        match decoder.next_frame() {
            Ok(Frame {
                data,
                sample_rate: sr,
                channels,
                ..
            }) => {
                if sample_rate == 0 {
                    sample_rate = sr as u32;
                }
                samples.extend(downmix(&data, channels));
            }
            Err(Mp3Error::Eof) => break,
            Err(e) => return Err(audio_err(path, e)),
        }
    }
    if sample_rate == 0 {
        return Err(audio_err(path, "no frames decoded"));
    }
    Ok((samples, sample_rate))
}

/// Resample mono samples from `from_rate` to `to_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, 1024, 1)
        .map_err(|e| Error::Resample(e.to_string()))?;
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(delay + expected + 1024);
    let mut pos = 0;
    // Keep feeding zeros past the end until the delayed tail has been flushed.
    while out.len() < delay + expected {
        let need = resampler.input_frames_next();
        let end = (pos + need).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();
        chunk.resize(need, 0.0);
        let input = vec![chunk];
        let output = resampler
            .process(&input, None)
            .map_err(|e| Error::Resample(e.to_string()))?;
        out.extend_from_slice(&output[0]);
        pos = end;
    }
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

/// Load audio from either a WAV or MP3 file depending on the file
/// extension, resampled to `sample_rate`.
pub fn load_audio_samples(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    let (samples, rate) = if is_mp3 {
        load_mp3_samples(path)?
    } else {
        load_wav_samples(path)?
    };
    resample(&samples, rate, sample_rate)
}

/// Split samples into windows and compute MFCC features for each window.
///
/// Returns a `(frames, n_coeffs)` matrix; a trailing partial window is
/// dropped.
pub fn mfcc_frames(samples: &[f32], config: &FeatureConfig) -> Array2<f32> {
    let window = config.window_size;
    let mel_filters = mel::<f32>(
        config.sample_rate as usize,
        window,
        Some(config.n_mels),
        None,
        None,
        false,
        NormalizationFactor::One,
    );
    let mut fft_planner = FftPlanner::<f32>::new();
    let fft = fft_planner.plan_fft_forward(window);
    let mut dct_planner = DctPlanner::<f32>::new();
    let dct = dct_planner.plan_dct2(config.n_mels);

    let frames = samples.len() / window;
    let mut out = Array2::<f32>::zeros((frames, config.n_coeffs));
    let mut buffer = vec![Complex::<f32>::new(0.0, 0.0); window];
    for (chunk, mut row) in samples.chunks_exact(window).zip(out.outer_iter_mut()) {
        for (slot, &val) in buffer.iter_mut().zip(chunk) {
            *slot = Complex::new(val, 0.0);
        }
        fft.process(&mut buffer);
        let power: Vec<f32> = buffer
            .iter()
            .take(window / 2 + 1)
            .map(|c| c.norm_sqr())
            .collect();

        let mut coeffs: Vec<f32> = mel_filters
            .iter()
            .map(|filt| {
                let sum: f32 = filt.iter().zip(&power).map(|(w, p)| w * p).sum();
                sum.max(1e-12).ln()
            })
            .collect();
        coeffs.resize(config.n_mels, 1e-12f32.ln());
        dct.process_dct2(&mut coeffs);
        for (dst, src) in row.iter_mut().zip(&coeffs) {
            *dst = *src;
        }
    }
    out
}

/// Cut a `(frames, coeffs)` matrix into non-overlapping slices of
/// `segment_frames` rows. A shorter tail is dropped.
pub fn segment(frames: &Array2<f32>, segment_frames: usize) -> Vec<Array2<f32>> {
    if segment_frames == 0 {
        return Vec::new();
    }
    let count = frames.len_of(Axis(0)) / segment_frames;
    (0..count)
        .map(|i| {
            frames
                .slice(s![i * segment_frames..(i + 1) * segment_frames, ..])
                .to_owned()
        })
        .collect()
}

/// All feature slices of one recording.
pub fn extract_segments(path: &Path, config: &FeatureConfig) -> Result<Vec<Array2<f32>>> {
    let samples = load_audio_samples(path, config.sample_rate)?;
    Ok(segment(&mfcc_frames(&samples, config), config.segment_frames))
}
