use coach_core::RecordedAudio;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Rate recordings are converted to before upload. Speech models want 16 kHz mono.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

/// Resamples a whole mono buffer in one go.
pub fn resample(samples: &[f32], from: u32, to: u32) -> anyhow::Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = create_resampler(from as f64, to as f64, RESAMPLE_CHUNK_SIZE)?;
    let expected = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    let chunk_size = resampler.input_frames_next();

    let mut resampled = Vec::with_capacity(expected + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let frames = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = frames.first() {
            resampled.extend_from_slice(channel);
        }
    }
    // The zero padding of the last chunk comes out as trailing silence.
    resampled.truncate(expected);
    Ok(resampled)
}

/// Root-mean-square level of a buffer, 0.0 for silence.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Converts a recording to the rate the transcription service expects.
pub fn prepare_for_transcription(audio: RecordedAudio) -> anyhow::Result<RecordedAudio> {
    if audio.sample_rate() == TRANSCRIPTION_SAMPLE_RATE {
        return Ok(audio);
    }
    let samples = resample(audio.samples(), audio.sample_rate(), TRANSCRIPTION_SAMPLE_RATE)?;
    Ok(RecordedAudio::new(samples, TRANSCRIPTION_SAMPLE_RATE))
}
