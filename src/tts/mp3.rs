//! MP3 frame walking for exact track offsets.
//!
//! Concatenated blocks only stay in sync with the timing table if each
//! block's real duration is known, and Polly's MP3 output does not carry
//! one. Frame headers do: every Layer III frame encodes its bitrate and
//! sample rate, which give both the frame's byte length and its play time.
//! Walking the headers is exact regardless of encoder padding, unlike
//! dividing byte size by nominal bitrate.

/// Total play time of an MP3 byte stream, in milliseconds.
///
/// Skips a leading ID3v2 tag, then walks frame headers, resynchronising
/// byte-by-byte across garbage. Returns `None` when no valid frame is
/// found.
pub(crate) fn mp3_duration_ms(bytes: &[u8]) -> Option<u64> {
    let mut pos = skip_id3v2(bytes);
    let mut micros: u64 = 0;
    let mut frames = 0usize;

    while pos + 4 <= bytes.len() {
        match parse_frame_header(&bytes[pos..]) {
            Some(frame) => {
                micros += frame.duration_micros;
                frames += 1;
                pos += frame.length;
            }
            None => pos += 1,
        }
    }

    if frames == 0 {
        None
    } else {
        Some(micros / 1000)
    }
}

struct FrameHeader {
    /// Whole frame length in bytes, header included.
    length: usize,
    duration_micros: u64,
}

// Layer III bitrates in kbit/s, indexed by the header's 4-bit field.
const BITRATES_V1: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const BITRATES_V2: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

fn parse_frame_header(bytes: &[u8]) -> Option<FrameHeader> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = (bytes[1] >> 3) & 0x3; // 0=2.5, 2=MPEG2, 3=MPEG1
    let layer = (bytes[1] >> 1) & 0x3; // 1=Layer III
    if version == 1 || layer != 1 {
        return None;
    }

    let bitrate_index = (bytes[2] >> 4) as usize;
    let samplerate_index = ((bytes[2] >> 2) & 0x3) as usize;
    let padding = ((bytes[2] >> 1) & 0x1) as usize;
    if bitrate_index == 0 || bitrate_index == 15 || samplerate_index == 3 {
        return None;
    }

    let (bitrate_kbps, samplerate, samples_per_frame) = match version {
        3 => (
            BITRATES_V1[bitrate_index],
            [44_100u32, 48_000, 32_000][samplerate_index],
            1152u64,
        ),
        2 => (
            BITRATES_V2[bitrate_index],
            [22_050u32, 24_000, 16_000][samplerate_index],
            576,
        ),
        _ => (
            BITRATES_V2[bitrate_index],
            [11_025u32, 12_000, 8_000][samplerate_index],
            576,
        ),
    };

    let length =
        (samples_per_frame as usize / 8) * (bitrate_kbps as usize * 1000) / samplerate as usize
            + padding;
    if length < 4 {
        return None;
    }

    Some(FrameHeader {
        length,
        duration_micros: samples_per_frame * 1_000_000 / samplerate as u64,
    })
}

fn skip_id3v2(bytes: &[u8]) -> usize {
    if bytes.len() >= 10 && &bytes[0..3] == b"ID3" {
        let size = ((bytes[6] as usize & 0x7F) << 21)
            | ((bytes[7] as usize & 0x7F) << 14)
            | ((bytes[8] as usize & 0x7F) << 7)
            | (bytes[9] as usize & 0x7F);
        (10 + size).min(bytes.len())
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One MPEG2 Layer III frame: 32 kbit/s at 24 kHz, 96 bytes, 24 ms.
    fn v2_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 96];
        frame[0] = 0xFF;
        frame[1] = 0xF3;
        frame[2] = 0x44;
        frame[3] = 0xC4;
        frame
    }

    #[test]
    fn ten_frames_are_240_ms() {
        let mut stream = Vec::new();
        for _ in 0..10 {
            stream.extend_from_slice(&v2_frame());
        }
        assert_eq!(mp3_duration_ms(&stream), Some(240));
    }

    #[test]
    fn id3_tag_is_skipped() {
        let mut stream = b"ID3\x04\x00\x00\x00\x00\x00\x0A".to_vec();
        stream.extend_from_slice(&[0u8; 10]); // tag body
        stream.extend_from_slice(&v2_frame());
        assert_eq!(mp3_duration_ms(&stream), Some(24));
    }

    #[test]
    fn resyncs_over_leading_garbage() {
        let mut stream = vec![0x00, 0x12, 0xFF, 0x00]; // looks sync-ish, is not
        stream.extend_from_slice(&v2_frame());
        assert_eq!(mp3_duration_ms(&stream), Some(24));
    }

    #[test]
    fn garbage_has_no_duration() {
        assert_eq!(mp3_duration_ms(&[0u8; 64]), None);
        assert_eq!(mp3_duration_ms(b""), None);
    }

    #[test]
    fn mpeg1_frame_length_uses_the_v1_table() {
        // 128 kbit/s at 44.1 kHz: frame is 417 bytes, 1152 samples.
        let mut frame = vec![0u8; 417];
        frame[0] = 0xFF;
        frame[1] = 0xFB;
        frame[2] = 0x90;
        let parsed = parse_frame_header(&frame).unwrap();
        assert_eq!(parsed.length, 417);
        assert_eq!(parsed.duration_micros, 1152 * 1_000_000 / 44_100);
    }
}
