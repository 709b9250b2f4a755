// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use anyhow::{anyhow, Result};
use exif::{experimental::Writer, Field, In, Tag, Value};
use img_parts::{jpeg::Jpeg, png::Png, Bytes, ImageEXIF};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

/// Photo written to disk with chosen EXIF fields.
pub(crate) struct PhotoFixture {
    path: PathBuf,
    fields: Vec<Field>,
    kind: PhotoKind,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhotoKind {
    #[default]
    Png,

    Jpeg,
}

impl PhotoFixture {
    pub(crate) fn new(path: impl AsRef<Path>, kind: PhotoKind) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fields: Vec::new(),
            kind,
        }
    }

    /// Capture time as local time plus UTC offset, e.g. `+02:00`.
    pub(crate) fn captured(mut self, local: &str, offset: &str) -> Self {
        self.fields.push(ascii(Tag::DateTimeOriginal, local));
        self.fields.push(ascii(Tag::OffsetTimeOriginal, offset));
        self
    }

    /// Capture time without any offset information.
    pub(crate) fn captured_without_offset(mut self, local: &str) -> Self {
        self.fields.push(ascii(Tag::DateTimeOriginal, local));
        self
    }

    /// Existing location in the northern and eastern hemispheres.
    pub(crate) fn located(mut self, latitude: u32, longitude: u32) -> Self {
        let whole = |degrees: u32| {
            Value::Rational(vec![
                exif::Rational { num: degrees, denom: 1 },
                exif::Rational { num: 0, denom: 1 },
                exif::Rational { num: 0, denom: 1 },
            ])
        };
        self.fields.push(ascii(Tag::GPSLatitudeRef, "N"));
        self.fields.push(field(Tag::GPSLatitude, whole(latitude)));
        self.fields.push(ascii(Tag::GPSLongitudeRef, "E"));
        self.fields.push(field(Tag::GPSLongitude, whole(longitude)));
        self
    }

    pub(crate) fn write(self) -> Result<PathBuf> {
        let image = image::RgbImage::new(8, 8);
        let mut raw = Cursor::new(Vec::new());
        let format = match self.kind {
            PhotoKind::Png => image::ImageFormat::Png,
            PhotoKind::Jpeg => image::ImageFormat::Jpeg,
        };
        image.write_to(&mut raw, format)?;

        let exif = if self.fields.is_empty() {
            None
        } else {
            let mut buffer = Cursor::new(Vec::new());
            let mut writer = Writer::new();
            for field in &self.fields {
                writer.push_field(field);
            }
            writer.write(&mut buffer, false)?;
            Some(Bytes::from(buffer.into_inner()))
        };

        // INVARIANT: Leave image data alone, only swap the EXIF segment.
        let bytes = match self.kind {
            PhotoKind::Png => {
                let mut png = Png::from_bytes(raw.into_inner().into())
                    .map_err(|err| anyhow!("invalid PNG fixture: {err}"))?;
                png.set_exif(exif);
                png.encoder().bytes()
            }
            PhotoKind::Jpeg => {
                let mut jpeg = Jpeg::from_bytes(raw.into_inner().into())
                    .map_err(|err| anyhow!("invalid JPEG fixture: {err}"))?;
                jpeg.set_exif(exif);
                jpeg.encoder().bytes()
            }
        };

        std::fs::write(&self.path, bytes)?;
        Ok(self.path)
    }
}

/// Write GPX track at target path from `(time, lat, lon)` points.
pub(crate) fn write_track(path: impl AsRef<Path>, points: &[(&str, f64, f64)]) -> Result<PathBuf> {
    let mut body = String::new();
    for (time, latitude, longitude) in points {
        body.push_str(&format!(
            "      <trkpt lat=\"{latitude}\" lon=\"{longitude}\"><time>{time}</time></trkpt>\n"
        ));
    }

    let xml = format!(
        "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\" creator=\"fixture\">\n  <trk>\n    <trkseg>\n{body}    </trkseg>\n  </trk>\n</gpx>\n"
    );
    std::fs::write(path.as_ref(), xml)?;
    Ok(path.as_ref().to_path_buf())
}

fn field(tag: Tag, value: Value) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    }
}

fn ascii(tag: Tag, text: &str) -> Field {
    field(tag, Value::Ascii(vec![text.as_bytes().to_vec()]))
}
