//! WAV assembly for multi-speaker segments.
//!
//! Conversation slots synthesize one WAV per dialogue turn; turns are
//! concatenated sample-wise with a fixed silence gap. All inputs must be
//! 16-bit integer PCM with identical sample rate and channel count.

use std::io::Cursor;
use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::{StationError, StationResult};

/// Silence inserted between dialogue turns.
pub const INTER_TURN_SILENCE: Duration = Duration::from_millis(800);

static RE_SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SOURCE:\s*[^\]]+\]\s*").unwrap());

/// Strip citation tags before synthesis so they are never spoken.
pub fn strip_source_tags(text: &str) -> String {
    RE_SOURCE_TAG.replace_all(text, "").trim().to_string()
}

/// sha-256 of audio bytes, lowercase hex. Drives asset dedupe.
pub fn audio_content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn read_pcm(bytes: &[u8]) -> StationResult<(WavSpec, Vec<i16>)> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| StationError::Audio(format!("bad wav: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(StationError::Audio(format!(
            "expected 16-bit integer PCM, got {:?}/{} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StationError::Audio(format!("bad wav samples: {e}")))?;
    Ok((spec, samples))
}

/// Measured duration of a WAV, in seconds.
pub fn wav_duration_sec(bytes: &[u8]) -> StationResult<f64> {
    let (spec, samples) = read_pcm(bytes)?;
    let frames = samples.len() as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}

/// Concatenate turn WAVs with [`INTER_TURN_SILENCE`] between them.
pub fn concat_wav_turns(turns: &[Bytes], gap: Duration) -> StationResult<Bytes> {
    let Some(first) = turns.first() else {
        return Err(StationError::Audio("no turns to assemble".to_string()));
    };

    let (spec, mut samples) = read_pcm(first)?;
    let gap_samples =
        (spec.sample_rate as f64 * gap.as_secs_f64()) as usize * spec.channels as usize;

    for turn in &turns[1..] {
        let (turn_spec, turn_samples) = read_pcm(turn)?;
        if turn_spec != spec {
            return Err(StationError::Audio(format!(
                "mismatched wav formats: {spec:?} vs {turn_spec:?}"
            )));
        }
        samples.extend(std::iter::repeat(0i16).take(gap_samples));
        samples.extend(turn_samples);
    }

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut out, spec)
            .map_err(|e| StationError::Audio(format!("wav writer: {e}")))?;
        for sample in &samples {
            writer
                .write_sample(*sample)
                .map_err(|e| StationError::Audio(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| StationError::Audio(format!("wav finalize: {e}")))?;
    }
    Ok(Bytes::from(out.into_inner()))
}

/// Build a mono 16-bit PCM WAV of the given duration (test and fixture
/// helper; the tone makes files audibly distinct per frequency).
pub fn sine_wav(duration: Duration, sample_rate: u32, frequency: f64) -> Bytes {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut out, spec).expect("wav writer");
        let frames = (sample_rate as f64 * duration.as_secs_f64()) as usize;
        for n in 0..frames {
            let t = n as f64 / sample_rate as f64;
            let value = (t * frequency * 2.0 * std::f64::consts::PI).sin();
            writer
                .write_sample((value * i16::MAX as f64 * 0.3) as i16)
                .expect("wav write");
        }
        writer.finalize().expect("wav finalize");
    }
    Bytes::from(out.into_inner())
}
