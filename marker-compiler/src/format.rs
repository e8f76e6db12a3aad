use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use marker_core::{Descriptor, Keypoint, DESCRIPTOR_LEN};
use marker_fast::ScoredKeypoint;

/// Leading bytes of every compiled tracking file
pub const MAGIC: [u8; 4] = *b"TRAK";
/// Current envelope layout version
pub const FORMAT_VERSION: u32 = 1;
/// File extension carried by compiled artifacts
pub const ARTIFACT_EXT: &str = "track";

/// x, y, angle, response as f32 LE plus the descriptor bytes
const RECORD_SIZE: usize = 16 + DESCRIPTOR_LEN;

/// One keypoint and its descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRecord {
    pub point: ScoredKeypoint,
    pub descriptor: Descriptor,
}

/// Features extracted from one pyramid level
#[derive(Debug, Clone, PartialEq)]
pub struct LevelFeatureSet {
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub records: Vec<FeatureRecord>,
}

/// All per-level features for one marker image
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingFeatureSet {
    pub width: u32,
    pub height: u32,
    pub levels: Vec<LevelFeatureSet>,
}

#[derive(Debug)]
pub enum FormatError {
    BadMagic([u8; 4]),
    UnsupportedVersion(u32),
    BadDescriptorLength(u32),
    Truncated,
    TrailingBytes(usize),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::BadMagic(m) => write!(f, "Bad magic bytes: {:02x?}", m),
            FormatError::UnsupportedVersion(v) => write!(f, "Unsupported format version: {}", v),
            FormatError::BadDescriptorLength(n) => {
                write!(f, "Descriptor length {} does not match expected {}", n, DESCRIPTOR_LEN)
            }
            FormatError::Truncated => write!(f, "Buffer ends before the declared data"),
            FormatError::TrailingBytes(n) => write!(f, "{} unexpected bytes after the last record", n),
        }
    }
}

impl std::error::Error for FormatError {}

/// Serialize feature sets into the versioned little-endian envelope.
///
/// Layout: magic, version, descriptor length, image count; per image
/// width/height/level count; per level scale, width, height, keypoint
/// count and the flattened records.
pub fn encode(sets: &[TrackingFeatureSet]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_all(&MAGIC)?;
    buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    buf.write_u32::<LittleEndian>(DESCRIPTOR_LEN as u32)?;
    buf.write_u32::<LittleEndian>(sets.len() as u32)?;

    for set in sets {
        buf.write_u32::<LittleEndian>(set.width)?;
        buf.write_u32::<LittleEndian>(set.height)?;
        buf.write_u32::<LittleEndian>(set.levels.len() as u32)?;

        for level in &set.levels {
            buf.write_f32::<LittleEndian>(level.scale)?;
            buf.write_u32::<LittleEndian>(level.width)?;
            buf.write_u32::<LittleEndian>(level.height)?;
            buf.write_u32::<LittleEndian>(level.records.len() as u32)?;

            for record in &level.records {
                buf.write_f32::<LittleEndian>(record.point.keypoint.x)?;
                buf.write_f32::<LittleEndian>(record.point.keypoint.y)?;
                buf.write_f32::<LittleEndian>(record.point.keypoint.angle)?;
                buf.write_f32::<LittleEndian>(record.point.response)?;
                buf.write_all(&record.descriptor)?;
            }
        }
    }

    Ok(buf)
}

/// Decode a compiled tracking file back into feature sets, bit-exact
pub fn decode(bytes: &[u8]) -> Result<Vec<TrackingFeatureSet>, FormatError> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    read_exact(&mut cursor, &mut magic)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic));
    }

    let version = read_u32(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let descriptor_len = read_u32(&mut cursor)?;
    if descriptor_len as usize != DESCRIPTOR_LEN {
        return Err(FormatError::BadDescriptorLength(descriptor_len));
    }

    let image_count = read_u32(&mut cursor)? as usize;
    let mut sets = Vec::with_capacity(image_count.min(1024));

    for _ in 0..image_count {
        let width = read_u32(&mut cursor)?;
        let height = read_u32(&mut cursor)?;
        let level_count = read_u32(&mut cursor)? as usize;

        let mut levels = Vec::with_capacity(level_count.min(64));
        for _ in 0..level_count {
            let scale = read_f32(&mut cursor)?;
            let level_width = read_u32(&mut cursor)?;
            let level_height = read_u32(&mut cursor)?;
            let count = read_u32(&mut cursor)? as usize;

            // Guard allocation against counts the buffer cannot hold
            let remaining = bytes.len() - cursor.position() as usize;
            if remaining / RECORD_SIZE < count {
                return Err(FormatError::Truncated);
            }

            let mut records = Vec::with_capacity(count);
            for _ in 0..count {
                let x = read_f32(&mut cursor)?;
                let y = read_f32(&mut cursor)?;
                let angle = read_f32(&mut cursor)?;
                let response = read_f32(&mut cursor)?;
                let mut descriptor = [0u8; DESCRIPTOR_LEN];
                read_exact(&mut cursor, &mut descriptor)?;

                records.push(FeatureRecord {
                    point: ScoredKeypoint {
                        keypoint: Keypoint { x, y, angle },
                        response,
                    },
                    descriptor,
                });
            }

            levels.push(LevelFeatureSet {
                scale,
                width: level_width,
                height: level_height,
                records,
            });
        }

        sets.push(TrackingFeatureSet { width, height, levels });
    }

    let leftover = bytes.len() - cursor.position() as usize;
    if leftover > 0 {
        return Err(FormatError::TrailingBytes(leftover));
    }

    Ok(sets)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, FormatError> {
    cursor.read_u32::<LittleEndian>().map_err(|_| FormatError::Truncated)
}

fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32, FormatError> {
    cursor.read_f32::<LittleEndian>().map_err(|_| FormatError::Truncated)
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<(), FormatError> {
    cursor.read_exact(buf).map_err(|_| FormatError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(x: f32, y: f32, angle: f32, response: f32, fill: u8) -> FeatureRecord {
        FeatureRecord {
            point: ScoredKeypoint {
                keypoint: Keypoint { x, y, angle },
                response,
            },
            descriptor: [fill; DESCRIPTOR_LEN],
        }
    }

    fn sample_sets() -> Vec<TrackingFeatureSet> {
        vec![TrackingFeatureSet {
            width: 512,
            height: 384,
            levels: vec![
                LevelFeatureSet {
                    scale: 1.0,
                    width: 512,
                    height: 384,
                    records: vec![record(1.5, 2.5, 0.3, 12.0, 0xAB), record(100.0, 50.25, -1.2, 3.0, 0x01)],
                },
                LevelFeatureSet {
                    scale: 1.0 / 1.2,
                    width: 426,
                    height: 320,
                    records: vec![],
                },
            ],
        }]
    }

    #[test]
    fn round_trip_preserves_everything() {
        let sets = sample_sets();
        let encoded = encode(&sets).unwrap();
        assert_eq!(decode(&encoded).unwrap(), sets);
    }

    #[test]
    fn header_layout_is_stable() {
        let sets = sample_sets();
        let encoded = encode(&sets).unwrap();

        assert_eq!(&encoded[0..4], &MAGIC);
        assert_eq!(u32::from_le_bytes(encoded[4..8].try_into().unwrap()), FORMAT_VERSION);
        assert_eq!(u32::from_le_bytes(encoded[8..12].try_into().unwrap()), DESCRIPTOR_LEN as u32);
        assert_eq!(u32::from_le_bytes(encoded[12..16].try_into().unwrap()), 1);
    }

    #[test]
    fn zero_keypoint_level_round_trips() {
        let sets = vec![TrackingFeatureSet {
            width: 32,
            height: 32,
            levels: vec![LevelFeatureSet { scale: 1.0, width: 32, height: 32, records: vec![] }],
        }];
        let encoded = encode(&sets).unwrap();
        assert_eq!(decode(&encoded).unwrap(), sets);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = encode(&sample_sets()).unwrap();
        encoded[0] = b'X';
        assert!(matches!(decode(&encoded), Err(FormatError::BadMagic(_))));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut encoded = encode(&sample_sets()).unwrap();
        encoded[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(decode(&encoded), Err(FormatError::UnsupportedVersion(_))));
    }

    #[test]
    fn wrong_descriptor_length_is_rejected() {
        let mut encoded = encode(&sample_sets()).unwrap();
        encoded[8..12].copy_from_slice(&64u32.to_le_bytes());
        assert!(matches!(decode(&encoded), Err(FormatError::BadDescriptorLength(64))));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let encoded = encode(&sample_sets()).unwrap();
        for cut in [3, 10, 20, encoded.len() - 1] {
            assert!(
                matches!(decode(&encoded[..cut]), Err(FormatError::Truncated)),
                "cut at {} not detected",
                cut
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = encode(&sample_sets()).unwrap();
        encoded.push(0);
        assert!(matches!(decode(&encoded), Err(FormatError::TrailingBytes(1))));
    }

    fn arb_record() -> impl Strategy<Value = FeatureRecord> {
        (
            -4096.0f32..4096.0,
            -4096.0f32..4096.0,
            -3.2f32..3.2,
            0.0f32..1e6,
            any::<[u8; DESCRIPTOR_LEN]>(),
        )
            .prop_map(|(x, y, angle, response, descriptor)| FeatureRecord {
                point: ScoredKeypoint {
                    keypoint: Keypoint { x, y, angle },
                    response,
                },
                descriptor,
            })
    }

    fn arb_sets() -> impl Strategy<Value = Vec<TrackingFeatureSet>> {
        prop::collection::vec(
            (
                1u32..2048,
                1u32..2048,
                prop::collection::vec(
                    (0.01f32..1.0, 1u32..2048, 1u32..2048, prop::collection::vec(arb_record(), 0..8)),
                    1..4,
                ),
            )
                .prop_map(|(width, height, levels)| TrackingFeatureSet {
                    width,
                    height,
                    levels: levels
                        .into_iter()
                        .map(|(scale, w, h, records)| LevelFeatureSet { scale, width: w, height: h, records })
                        .collect(),
                }),
            1..3,
        )
    }

    proptest! {
        #[test]
        fn round_trip_for_arbitrary_sets(sets in arb_sets()) {
            let encoded = encode(&sets).unwrap();
            prop_assert_eq!(decode(&encoded).unwrap(), sets);
        }
    }
}
