//! Segment byte format: mono 32-bit float WAV.
//!
//! Segments cross the session boundary as opaque bytes; WAV keeps them
//! self-describing so remote peers can decode without extra metadata.

use crate::error::Result;
use crate::graph::AudioData;
use std::io::Cursor;

/// Encode mono PCM into WAV bytes.
pub fn encode_wav(audio: &AudioData) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in &audio.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode WAV bytes into mono PCM. Multi-channel input keeps channel 0.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioData> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = ((1u64 << (spec.bits_per_sample - 1)) as f32).recip();
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_recovers_samples() {
        let audio = AudioData {
            samples: (0..441).map(|i| (i as f32 / 441.0).sin()).collect(),
            sample_rate: 44100,
        };

        let bytes = encode_wav(&audio).unwrap();
        let decoded = decode_wav(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.samples.len(), audio.samples.len());
        assert_eq!(decoded.samples[100], audio.samples[100]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(&[0u8; 16]).is_err());
    }
}
