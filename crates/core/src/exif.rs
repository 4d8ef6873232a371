//! Capture time and orientation from EXIF.

use std::io::Cursor;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use exif::{In, Tag, Value};
use tracing::debug;

use crate::error::FileError;

/// Rotation that turns the stored pixels upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    /// Orientation 6: top of the camera pointed left.
    Clockwise90,
    /// Orientation 3.
    Half,
    /// Orientation 8: top of the camera pointed right.
    CounterClockwise90,
}

impl Rotation {
    /// Only the pure rotations are corrected; mirrored variants are left as is.
    pub fn from_orientation(tag: Option<u32>) -> Self {
        match tag {
            Some(6) => Rotation::Clockwise90,
            Some(3) => Rotation::Half,
            Some(8) => Rotation::CounterClockwise90,
            _ => Rotation::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhotoMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub rotation: Rotation,
}

/// Best-effort metadata read; files without EXIF yield the defaults.
pub fn read_metadata(bytes: &[u8]) -> PhotoMetadata {
    match parse(bytes) {
        Ok(exif) => PhotoMetadata {
            captured_at: captured_at(&exif),
            rotation: Rotation::from_orientation(
                exif.get_field(Tag::Orientation, In::PRIMARY)
                    .and_then(|f| f.value.get_uint(0)),
            ),
        },
        Err(e) => {
            debug!("No usable EXIF: {e}");
            PhotoMetadata::default()
        }
    }
}

fn parse(bytes: &[u8]) -> Result<exif::Exif, FileError> {
    let mut cursor = Cursor::new(bytes);
    Ok(exif::Reader::new().read_from_container(&mut cursor)?)
}

/// `DateTimeOriginal` first, then the IFD0 `DateTime`. A recorded UTC offset
/// is honored; otherwise the wall-clock time is taken as UTC so keys do not
/// depend on the host time zone.
fn captured_at(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    let candidates = [
        (Tag::DateTimeOriginal, Tag::OffsetTimeOriginal),
        (Tag::DateTime, Tag::OffsetTime),
    ];
    candidates
        .iter()
        .find_map(|&(time_tag, offset_tag)| read_datetime(exif, time_tag, offset_tag))
}

fn read_datetime(exif: &exif::Exif, time_tag: Tag, offset_tag: Tag) -> Option<DateTime<Utc>> {
    let field = exif.get_field(time_tag, In::PRIMARY)?;
    let Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let mut dt = exif::DateTime::from_ascii(parts.first()?).ok()?;
    if let Some(offset_field) = exif.get_field(offset_tag, In::PRIMARY) {
        if let Value::Ascii(ref offset) = offset_field.value {
            if let Some(raw) = offset.first() {
                if let Err(e) = dt.parse_offset(raw) {
                    debug!("Ignoring malformed {offset_tag} value: {e}");
                }
            }
        }
    }

    let naive = NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_nano_opt(
            dt.hour.into(),
            dt.minute.into(),
            dt.second.into(),
            dt.nanosecond.unwrap_or(0),
        )?;
    match dt.offset {
        Some(minutes) => {
            let offset = FixedOffset::east_opt(i32::from(minutes) * 60)?;
            offset
                .from_local_datetime(&naive)
                .single()
                .map(|t| t.with_timezone(&Utc))
        }
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal big-endian TIFF with IFD0 `Orientation` and `DateTime`.
    pub(crate) fn exif_tiff(orientation: u16, datetime: &str) -> Vec<u8> {
        assert_eq!(datetime.len(), 19, "EXIF datetime is YYYY:MM:DD HH:MM:SS");
        let mut t = Vec::new();
        t.extend_from_slice(b"MM\x00\x2a");
        t.extend_from_slice(&8u32.to_be_bytes());
        // IFD0 with two entries.
        t.extend_from_slice(&2u16.to_be_bytes());
        // Orientation: SHORT, count 1, value left-justified.
        t.extend_from_slice(&0x0112u16.to_be_bytes());
        t.extend_from_slice(&3u16.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&orientation.to_be_bytes());
        t.extend_from_slice(&[0, 0]);
        // DateTime: ASCII, count 20, stored after the IFD.
        t.extend_from_slice(&0x0132u16.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        t.extend_from_slice(&20u32.to_be_bytes());
        t.extend_from_slice(&38u32.to_be_bytes());
        // No next IFD.
        t.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(t.len(), 38);
        t.extend_from_slice(datetime.as_bytes());
        t.push(0);
        t
    }

    /// Splice an APP1 Exif segment right after the JPEG SOI marker.
    pub(crate) fn with_exif(jpeg: &[u8], orientation: u16, datetime: &str) -> Vec<u8> {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let tiff = exif_tiff(orientation, datetime);
        let len = (2 + 6 + tiff.len()) as u16;
        let mut out = Vec::with_capacity(jpeg.len() + len as usize + 2);
        out.extend_from_slice(&jpeg[..2]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(&tiff);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    pub(crate) fn plain_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8])
        });
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn test_reads_datetime_and_orientation() {
        let bytes = with_exif(&plain_jpeg(16, 8), 6, "2020:01:01 10:00:00");
        let meta = read_metadata(&bytes);
        assert_eq!(meta.rotation, Rotation::Clockwise90);
        assert_eq!(
            meta.captured_at,
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_missing_exif_gives_defaults() {
        let meta = read_metadata(&plain_jpeg(8, 8));
        assert_eq!(meta, PhotoMetadata::default());
        assert_eq!(meta.captured_at, None);
    }

    #[test]
    fn test_garbage_gives_defaults() {
        assert_eq!(read_metadata(b"not a jpeg"), PhotoMetadata::default());
        assert_eq!(read_metadata(&[]), PhotoMetadata::default());
    }

    #[test]
    fn test_unparseable_datetime_is_none() {
        let bytes = with_exif(&plain_jpeg(8, 8), 1, "0000:00:00 00:00:00");
        let meta = read_metadata(&bytes);
        assert_eq!(meta.captured_at, None);
        assert_eq!(meta.rotation, Rotation::None);
    }

    /// IFD0 `DateTime` plus an Exif sub-IFD holding `OffsetTime`.
    fn tiff_with_offset(datetime: &str, offset: &str) -> Vec<u8> {
        let offset_len = offset.len() as u32 + 1;
        let mut t = Vec::new();
        t.extend_from_slice(b"MM\x00\x2a");
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        // DateTime at 38, Exif IFD at 58.
        t.extend_from_slice(&0x0132u16.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        t.extend_from_slice(&20u32.to_be_bytes());
        t.extend_from_slice(&38u32.to_be_bytes());
        t.extend_from_slice(&0x8769u16.to_be_bytes());
        t.extend_from_slice(&4u16.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&58u32.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t.extend_from_slice(datetime.as_bytes());
        t.push(0);
        assert_eq!(t.len(), 58);
        // OffsetTime at 76.
        t.extend_from_slice(&1u16.to_be_bytes());
        t.extend_from_slice(&0x9010u16.to_be_bytes());
        t.extend_from_slice(&2u16.to_be_bytes());
        t.extend_from_slice(&offset_len.to_be_bytes());
        t.extend_from_slice(&76u32.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(t.len(), 76);
        t.extend_from_slice(offset.as_bytes());
        t.push(0);
        t
    }

    #[test]
    fn test_recorded_offset_is_applied_and_malformed_one_ignored() {
        let read = |offset| {
            let tiff = tiff_with_offset("2020:01:01 10:00:00", offset);
            captured_at(&exif::Reader::new().read_raw(tiff).unwrap())
        };
        assert_eq!(read("+02:00"), Some(Utc.with_ymd_and_hms(2020, 1, 1, 8, 0, 0).unwrap()));
        assert_eq!(read("garbage"), Some(Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap()));
    }

    #[test]
    fn test_orientation_mapping() {
        assert_eq!(Rotation::from_orientation(Some(8)), Rotation::CounterClockwise90);
        assert_eq!(Rotation::from_orientation(Some(6)), Rotation::Clockwise90);
        assert_eq!(Rotation::from_orientation(Some(3)), Rotation::Half);
        assert_eq!(Rotation::from_orientation(Some(1)), Rotation::None);
        assert_eq!(Rotation::from_orientation(Some(5)), Rotation::None);
        assert_eq!(Rotation::from_orientation(None), Rotation::None);
    }
}
