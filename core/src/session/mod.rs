//! The persisted pipeline state record.
//!
//! Text-based and line-oriented: a header tag, the source file list, the
//! thumbnail and slice-resolution configuration, then the nested plane and
//! alignment geometry records. Restore rejects a record whose header does not
//! match rather than attempting partial recovery.

mod err;

pub use err::Error;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use winnow::{
    ascii::{line_ending, not_line_ending, space0},
    branch::alt,
    bytes::{tag, take_till1},
    combinator::eof,
    multi::count,
    sequence::{preceded, terminated},
    IResult, Parser,
};

use crate::field::plane::SlicePlane;
use crate::geom::{Vec2U, Vec3F};

/// Header tag identifying a slice-manager state record.
pub const HEADER: &str = "# Slice manager";

const PLANE_HEADER: &str = "# Plane";

/// The minimal configuration needed to reconstruct the pipeline: source file
/// list, interpretation and thumbnail flags, derived-product resolutions, and
/// plane geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub files: Vec<String>,
    pub files_as_slices: bool,
    pub has_thumbnails: bool,
    pub thumb_size: Vec2U,
    pub slice_resolution: Vec2U,
    pub plane: SlicePlane,
    pub alignment: SlicePlane,
}

impl SessionRecord {
    pub fn save(&self) -> String {
        self.to_string()
    }

    #[instrument(skip(input))]
    pub fn parse(input: &str) -> Result<SessionRecord, Error> {
        let (rest, header) = line(input)?;
        if header.trim() != HEADER {
            return Err(Error::BadHeader {
                found: header.trim().to_string(),
            });
        }
        let (_, record) = record_body(rest)?;
        Ok(record)
    }
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{HEADER}")?;
        writeln!(f, "{}", self.files.len())?;
        for file in &self.files {
            writeln!(f, "{file}")?;
        }
        writeln!(f, "{}", self.files_as_slices)?;
        writeln!(f, "{}", self.has_thumbnails)?;
        writeln!(f, "{}", self.thumb_size.x)?;
        writeln!(f, "{}", self.thumb_size.y)?;
        writeln!(f, "{}", self.slice_resolution.x)?;
        writeln!(f, "{}", self.slice_resolution.y)?;
        write_plane(f, &self.plane)?;
        write_plane(f, &self.alignment)
    }
}

fn write_plane(f: &mut fmt::Formatter<'_>, plane: &SlicePlane) -> fmt::Result {
    writeln!(f, "{PLANE_HEADER}")?;
    for corner in plane.corners() {
        writeln!(f, "{} {} {}", corner.x, corner.y, corner.z)?;
    }
    Ok(())
}

fn record_body(i: &str) -> IResult<&str, SessionRecord> {
    let (i, len) = usize_line(i)?;
    let (i, files) = count(path_line, len).parse_next(i)?;
    let (i, files_as_slices) = bool_line(i)?;
    let (i, has_thumbnails) = bool_line(i)?;
    let (i, thumb_w) = u32_line(i)?;
    let (i, thumb_h) = u32_line(i)?;
    let (i, slice_w) = u32_line(i)?;
    let (i, slice_h) = u32_line(i)?;
    let (i, plane) = plane_record(i)?;
    let (i, alignment) = plane_record(i)?;
    Ok((
        i,
        SessionRecord {
            files,
            files_as_slices,
            has_thumbnails,
            thumb_size: Vec2U::new(thumb_w, thumb_h),
            slice_resolution: Vec2U::new(slice_w, slice_h),
            plane,
            alignment,
        },
    ))
}

fn plane_record(i: &str) -> IResult<&str, SlicePlane> {
    let (i, _) = terminated(preceded(space0, tag(PLANE_HEADER)), line_end).parse_next(i)?;
    let (i, (a, b, c)) = (vec3_line, vec3_line, vec3_line).parse_next(i)?;
    Ok((i, SlicePlane::from_corners(a, b, c)))
}

fn line(i: &str) -> IResult<&str, &str> {
    terminated(not_line_ending, alt((line_ending, eof))).parse_next(i)
}

fn line_end(i: &str) -> IResult<&str, &str> {
    preceded(space0, alt((line_ending, eof))).parse_next(i)
}

fn path_line(i: &str) -> IResult<&str, String> {
    line.map(|s: &str| s.trim().to_string()).parse_next(i)
}

fn usize_line(i: &str) -> IResult<&str, usize> {
    line.try_map(|s: &str| s.trim().parse::<usize>())
        .parse_next(i)
}

fn u32_line(i: &str) -> IResult<&str, u32> {
    line.try_map(|s: &str| s.trim().parse::<u32>()).parse_next(i)
}

fn bool_line(i: &str) -> IResult<&str, bool> {
    line.try_map(|s: &str| s.trim().parse::<bool>())
        .parse_next(i)
}

fn f32_ws(i: &str) -> IResult<&str, f32> {
    preceded(space0, take_till1(|c: char| " \t\r\n".contains(c)))
        .try_map(str::parse::<f32>)
        .parse_next(i)
}

fn vec3_line(i: &str) -> IResult<&str, Vec3F> {
    terminated((f32_ws, f32_ws, f32_ws), line_end)
        .map(Vec3F::from)
        .parse_next(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            files: vec!["data/t0.tif".to_string(), "data/t1.tif".to_string()],
            files_as_slices: false,
            has_thumbnails: true,
            thumb_size: Vec2U::new(32, 24),
            slice_resolution: Vec2U::new(128, 96),
            plane: SlicePlane::from_corners(
                Vec3F::new(0.0, 0.0, 0.0),
                Vec3F::new(9.5, 0.0, 1.25),
                Vec3F::new(0.0, 7.0, 3.0),
            ),
            alignment: SlicePlane::from_corners(
                Vec3F::new(1.0, 1.0, 0.0),
                Vec3F::new(8.0, 1.0, 0.0),
                Vec3F::new(1.0, 8.0, 0.0),
            ),
        }
    }

    #[test]
    fn round_trip() {
        let record = record();
        let text = record.save();
        let parsed = SessionRecord::parse(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn round_trip_without_files() {
        let mut record = record();
        record.files.clear();
        let parsed = SessionRecord::parse(&record.save()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn wrong_header_is_rejected() {
        let text = record().save().replace(HEADER, "# Measurements");
        assert!(matches!(
            SessionRecord::parse(&text),
            Err(Error::BadHeader { .. })
        ));
    }

    #[test]
    fn truncated_record_is_rejected() {
        let text = record().save();
        let cut = &text[..text.len() / 2];
        assert!(matches!(
            SessionRecord::parse(cut),
            Err(Error::Truncated | Error::Syntax(_))
        ));
    }

    #[test]
    fn garbage_count_is_a_syntax_error() {
        let text = format!("{HEADER}\nnot-a-number\n");
        assert!(matches!(
            SessionRecord::parse(&text),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn windows_line_endings_parse() {
        let text = record().save().replace('\n', "\r\n");
        assert_eq!(SessionRecord::parse(&text).unwrap(), record());
    }
}
