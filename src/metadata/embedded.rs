// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Embedded EXIF reading and writing.
//!
//! Reading goes through `kamadak-exif`. Writing rebuilds the primary EXIF
//! IFD with updated GPS fields and swaps it into the image container through
//! `img-parts`, leaving image data untouched.
//!
//! Only JPEG and PNG containers are handled here.
//!
//! # See Also
//!
//! - [EXIF 2.32 GPS attribute information](https://www.cipa.jp/std/documents/e/DC-X008-Translation-2019-E.pdf)

use crate::metadata::Location;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use exif::{experimental::Writer, Exif, Field, In, Rational, Tag, Value};
use img_parts::{jpeg::Jpeg, png::Png, Bytes, ImageEXIF};
use std::io::Cursor;

/// Tags rewritten on every location write.
const GPS_TAGS: [Tag; 7] = [
    Tag::GPSVersionID,
    Tag::GPSLatitudeRef,
    Tag::GPSLatitude,
    Tag::GPSLongitudeRef,
    Tag::GPSLongitude,
    Tag::GPSAltitudeRef,
    Tag::GPSAltitude,
];

/// Tags the EXIF writer derives or cannot carry over.
const STRUCTURAL_TAGS: [Tag; 7] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// Image container supported by the embedded backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Jpeg,
    Png,
}

impl Container {
    /// Container for a lowercase file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// Parse EXIF from raw image bytes, or `None` if there is none.
pub fn read_exif(bytes: &[u8]) -> Option<Exif> {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
}

/// GPS position stored in EXIF.
pub fn location_from_exif(exif: &Exif) -> Option<Location> {
    let latitude = signed_dms(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let longitude = signed_dms(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    let elevation = first_rational(exif, Tag::GPSAltitude).map(|altitude| {
        let below = exif
            .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            == Some(1);
        if below {
            -altitude
        } else {
            altitude
        }
    });

    Some(Location::new(latitude, longitude, elevation)).filter(Location::is_valid)
}

/// UTC capture time stored in EXIF.
///
/// Prefer `DateTimeOriginal` with its offset tag. Fall back to the GPS date
/// and time stamps, which are UTC by definition. A local time without an
/// offset is never guessed at.
pub fn captured_on_from_exif(exif: &Exif) -> Option<DateTime<Utc>> {
    original_with_offset(exif).or_else(|| gps_timestamp(exif))
}

fn original_with_offset(exif: &Exif) -> Option<DateTime<Utc>> {
    let local = ascii(exif, Tag::DateTimeOriginal)?;
    let offset =
        ascii(exif, Tag::OffsetTimeOriginal).or_else(|| ascii(exif, Tag::OffsetTime))?;

    DateTime::parse_from_str(
        &format!("{} {}", local.trim(), offset.trim()),
        "%Y:%m:%d %H:%M:%S %:z",
    )
    .ok()
    .map(|time| time.with_timezone(&Utc))
}

fn gps_timestamp(exif: &Exif) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(ascii(exif, Tag::GPSDateStamp)?.trim(), "%Y:%m:%d").ok()?;
    let field = exif.get_field(Tag::GPSTimeStamp, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let [hour, minute, second] = parts.as_slice() else {
        return None;
    };

    let seconds = second.to_f64();
    let time = NaiveTime::from_hms_nano_opt(
        hour.to_f64() as u32,
        minute.to_f64() as u32,
        seconds.trunc() as u32,
        (seconds.fract() * 1e9) as u32,
    )?;

    Some(NaiveDateTime::new(date, time).and_utc())
}

/// Rewrite image bytes with new GPS fields.
///
/// Every primary IFD field other than the GPS position tags is preserved. A
/// JPEG thumbnail in IFD1 is carried over with its fields, an uncompressed
/// strip thumbnail is dropped.
///
/// # Errors
///
/// - Return [`EmbeddedError::Container`] if bytes do not form a valid
///   container.
/// - Return [`EmbeddedError::Exif`] if new EXIF data cannot be encoded.
pub fn write_location(
    bytes: Vec<u8>,
    container: Container,
    location: &Location,
) -> Result<Vec<u8>, EmbeddedError> {
    let existing = read_exif(&bytes);
    let mut fields: Vec<Field> = Vec::new();
    let mut thumbnail = None;
    if let Some(exif) = existing.as_ref() {
        fields.extend(carried(exif, In::PRIMARY).filter(|field| !GPS_TAGS.contains(&field.tag)));
        thumbnail = thumbnail_jpeg(exif);
        if thumbnail.is_some() {
            fields.extend(carried(exif, In::THUMBNAIL));
        }
    }
    fields.extend(gps_fields(location));

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    if let Some(jpeg) = thumbnail {
        writer.set_jpeg(jpeg, In::THUMBNAIL);
    }
    writer.write(&mut buffer, false)?;
    let exif_bytes = Bytes::from(buffer.into_inner());

    let output = match container {
        Container::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(bytes.into())
                .map_err(|err| EmbeddedError::Container(err.to_string()))?;
            jpeg.set_exif(Some(exif_bytes));
            jpeg.encoder().bytes()
        }
        Container::Png => {
            let mut png = Png::from_bytes(bytes.into())
                .map_err(|err| EmbeddedError::Container(err.to_string()))?;
            png.set_exif(Some(exif_bytes));
            png.encoder().bytes()
        }
    };

    Ok(output.to_vec())
}

/// Fields of target IFD the writer can reproduce as they are.
fn carried(exif: &Exif, ifd: In) -> impl Iterator<Item = Field> + '_ {
    exif.fields()
        .filter(move |field| field.ifd_num == ifd)
        .filter(|field| !STRUCTURAL_TAGS.contains(&field.tag))
        .filter(|field| !matches!(field.value, Value::Unknown(..)))
        .map(|kept| Field {
            tag: kept.tag,
            ifd_num: kept.ifd_num,
            value: kept.value.clone(),
        })
}

/// JPEG thumbnail bytes referenced from IFD1, if any.
fn thumbnail_jpeg(exif: &Exif) -> Option<&[u8]> {
    let uint = |tag: Tag| {
        exif.get_field(tag, In::THUMBNAIL)
            .and_then(|field| field.value.get_uint(0))
            .and_then(|value| usize::try_from(value).ok())
    };
    let offset = uint(Tag::JPEGInterchangeFormat)?;
    let length = uint(Tag::JPEGInterchangeFormatLength)?;
    exif.buf().get(offset..offset.checked_add(length)?)
}

/// GPS fields describing a location.
pub fn gps_fields(location: &Location) -> Vec<Field> {
    let latitude_ref = if location.latitude < 0.0 { "S" } else { "N" };
    let longitude_ref = if location.longitude < 0.0 { "W" } else { "E" };

    let mut fields = vec![
        field(Tag::GPSVersionID, Value::Byte(vec![2, 3, 0, 0])),
        field(Tag::GPSLatitudeRef, ascii_value(latitude_ref)),
        field(Tag::GPSLatitude, Value::Rational(to_dms(location.latitude))),
        field(Tag::GPSLongitudeRef, ascii_value(longitude_ref)),
        field(Tag::GPSLongitude, Value::Rational(to_dms(location.longitude))),
    ];

    if let Some(elevation) = location.elevation {
        let below = u8::from(elevation < 0.0);
        fields.push(field(Tag::GPSAltitudeRef, Value::Byte(vec![below])));
        fields.push(field(
            Tag::GPSAltitude,
            Value::Rational(vec![Rational {
                num: (elevation.abs() * 100.0).round() as u32,
                denom: 100,
            }]),
        ));
    }

    fields
}

/// Split absolute decimal degrees into degree, minute, second rationals.
fn to_dms(value: f64) -> Vec<Rational> {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = ((value - degrees) * 60.0).trunc();
    let seconds = ((value - degrees) * 60.0 - minutes) * 60.0;

    vec![
        Rational {
            num: degrees as u32,
            denom: 1,
        },
        Rational {
            num: minutes as u32,
            denom: 1,
        },
        Rational {
            num: (seconds * 10_000.0).round() as u32,
            denom: 10_000,
        },
    ]
}

fn field(tag: Tag, value: Value) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    }
}

fn ascii_value(text: &str) -> Value {
    Value::Ascii(vec![text.as_bytes().to_vec()])
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn first_rational(exif: &Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(parts) => parts.first().map(Rational::to_f64),
        _ => None,
    }
}

fn signed_dms(exif: &Exif, tag: Tag, ref_tag: Tag, negative: u8) -> Option<f64> {
    let Value::Rational(parts) = &exif.get_field(tag, In::PRIMARY)?.value else {
        return None;
    };

    let value = parts
        .iter()
        .take(3)
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, scale)| part.to_f64() / scale)
        .sum::<f64>();

    let is_negative = ascii(exif, ref_tag)
        .and_then(|text| text.bytes().next())
        .is_some_and(|byte| byte.eq_ignore_ascii_case(&negative));

    Some(if is_negative { -value } else { value })
}

/// Embedded backend error types.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddedError {
    /// EXIF data cannot be encoded.
    #[error(transparent)]
    Exif(#[from] exif::Error),

    /// Image container cannot be parsed.
    #[error("invalid image container: {0}")]
    Container(String),
}
