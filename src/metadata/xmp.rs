// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! XMP sidecar reading.
//!
//! Raw formats and some editing workflows keep metadata beside the photo in
//! an `.xmp` file instead of inside it. Only properties relevant to geotags
//! are extracted. Properties may appear either as attributes of
//! `rdf:Description` or as child elements, so both forms are read.

use crate::metadata::Location;

use chrono::{DateTime, Utc};
use quick_xml::{events::Event, Reader};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

const LATITUDE: &str = "exif:GPSLatitude";
const LONGITUDE: &str = "exif:GPSLongitude";
const ALTITUDE: &str = "exif:GPSAltitude";
const ALTITUDE_REF: &str = "exif:GPSAltitudeRef";

/// Capture time properties in order of preference.
const CAPTURE_TIMES: [&str; 3] = [
    "exif:DateTimeOriginal",
    "xmp:CreateDate",
    "photoshop:DateCreated",
];

/// Sidecar candidates for a photo, in lookup order.
///
/// `IMG_1.jpg` yields `IMG_1.xmp`, `IMG_1.XMP`, and `IMG_1.jpg.xmp`.
pub fn sidecar_candidates(photo: &Path) -> Vec<PathBuf> {
    let mut appended = photo.as_os_str().to_os_string();
    appended.push(".xmp");

    vec![
        photo.with_extension("xmp"),
        photo.with_extension("XMP"),
        PathBuf::from(appended),
    ]
}

/// Locate the first sidecar that exists for a photo.
pub async fn find_sidecar(photo: &Path) -> Option<PathBuf> {
    for candidate in sidecar_candidates(photo) {
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            return Some(candidate);
        }
    }

    None
}

/// Geotag relevant properties of an XMP packet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct XmpSidecar {
    properties: HashMap<String, String>,
}

impl XmpSidecar {
    /// Raw value of a qualified property name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// GPS position recorded in the sidecar.
    pub fn location(&self) -> Option<Location> {
        let latitude = parse_xmp_coordinate(self.property(LATITUDE)?)?;
        let longitude = parse_xmp_coordinate(self.property(LONGITUDE)?)?;
        let elevation = self.property(ALTITUDE).and_then(parse_rational).map(|alt| {
            if self.property(ALTITUDE_REF).map(str::trim) == Some("1") {
                -alt
            } else {
                alt
            }
        });

        Some(Location::new(latitude, longitude, elevation)).filter(Location::is_valid)
    }

    /// First capture time that carries an explicit timezone.
    pub fn captured_on(&self) -> Option<DateTime<Utc>> {
        CAPTURE_TIMES
            .iter()
            .filter_map(|name| self.property(name))
            .find_map(parse_xmp_date)
    }
}

/// Parse XMP packet text.
///
/// Malformed XML yields whatever was read before the error.
pub fn parse_xmp(text: &str) -> XmpSidecar {
    let mut reader = Reader::from_str(text);
    let mut sidecar = XmpSidecar::default();
    let mut open: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                sidecar.insert_attributes(&e);
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                open = is_interesting(&name).then_some(name);
            }
            Ok(Event::Empty(e)) => sidecar.insert_attributes(&e),
            Ok(Event::Text(e)) => {
                if let Some(name) = open.take() {
                    let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                    if !text.is_empty() {
                        sidecar.properties.entry(name).or_insert(text);
                    }
                }
            }
            Ok(Event::End(_)) => open = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    sidecar
}

impl XmpSidecar {
    fn insert_attributes(&mut self, e: &quick_xml::events::BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if is_interesting(&key) {
                let value = String::from_utf8_lossy(&attr.value).trim().to_string();
                self.properties.entry(key).or_insert(value);
            }
        }
    }
}

fn is_interesting(name: &str) -> bool {
    matches!(name, LATITUDE | LONGITUDE | ALTITUDE | ALTITUDE_REF) || CAPTURE_TIMES.contains(&name)
}

/// Parse XMP GPS coordinate.
///
/// Accepts `DDD,MM.mmk`, `DDD,MM,SSk` (with `k` one of `NSEW`), or a plain
/// signed decimal.
pub fn parse_xmp_coordinate(text: &str) -> Option<f64> {
    let text = text.trim();
    let last = text.chars().last()?;
    let sign = match last.to_ascii_uppercase() {
        'N' | 'E' => 1.0,
        'S' | 'W' => -1.0,
        _ => return text.parse().ok(),
    };

    let body = &text[..text.len() - last.len_utf8()];
    let parts = body
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    let value = match parts.as_slice() {
        [degrees] => *degrees,
        [degrees, minutes] => degrees + minutes / 60.0,
        [degrees, minutes, seconds] => degrees + minutes / 60.0 + seconds / 3600.0,
        _ => return None,
    };

    Some(sign * value)
}

/// Parse XMP date, requiring an explicit timezone.
pub fn parse_xmp_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M%:z"))
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn parse_rational(text: &str) -> Option<f64> {
    match text.trim().split_once('/') {
        Some((num, denom)) => {
            let denom: f64 = denom.trim().parse().ok()?;
            (denom != 0.0).then_some(num.trim().parse::<f64>().ok()? / denom)
        }
        None => text.trim().parse().ok(),
    }
}
