//! Geometry-input boundary: WKB and EWKB buffers to `geo::Geometry`.
//!
//! Changed features arrive as well-known-binary buffers, either raw bytes or
//! hex-encoded when they come out of a database column. Decoding is delegated
//! to geozero, which understands both plain OGC WKB and the PostGIS EWKB
//! dialect (SRID headers are accepted and ignored; the caller chooses the
//! matching [`Projection`]).
//!
//! [`Projection`]: crate::Projection

use geo::Geometry;
use geozero::wkb::Ewkb;
use geozero::ToGeo;

use crate::{Error, Result};

/// Decode a WKB or EWKB buffer into a geometry.
pub fn wkb_to_geometry(wkb: &[u8]) -> Result<Geometry> {
    Ewkb(wkb.to_vec())
        .to_geo()
        .map_err(|error| Error::WkbDecode(error.to_string()))
}

/// Decode a hex string as produced by a database `geometry` column into raw
/// WKB bytes.
pub fn wkb_from_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(Error::InvalidHex("odd number of digits".to_string()));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
        .collect()
}

/// Decode a hex-encoded WKB or EWKB string straight into a geometry.
pub fn geometry_from_hex(hex: &str) -> Result<Geometry> {
    wkb_to_geometry(&wkb_from_hex(hex)?)
}

fn hex_digit(digit: u8) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(Error::InvalidHex(format!(
            "invalid digit {:?}",
            char::from(digit)
        ))),
    }
}
