// Licensed under the MIT License.

//! Minimal dataset text reader. The WKT/CSV parsing itself is out of scope
//! for the engine (it only consumes already-built `Shape` values); this is
//! the driver's own small, pragmatic collaborator that turns a dataset file
//! into shapes, not a general WKT grammar.
//!
//! One shape per line: `<recId> <GEOMETRY>`, where `<GEOMETRY>` is one of
//! `POINT(x y)`, `BOX(xMin yMin,xMax yMax)`, `LINESTRING(x y,x y,...)`, or
//! `POLYGON((x y,x y,...))`. Blank lines and lines starting with `#` are
//! skipped.

use std::fs;

use meridian_engine::shape::{Geometry, Shape};
use meridian_engine::{ErrorKind, Result};

fn parse_coords(body: &str) -> Result<Vec<(f64, f64)>> {
    body.trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(|pair| {
            let mut parts = pair.split_whitespace();
            let x: f64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ErrorKind::Filesystem.with_message("malformed coordinate"))?;
            let y: f64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ErrorKind::Filesystem.with_message("malformed coordinate"))?;
            Ok((x, y))
        })
        .collect()
}

fn parse_geometry(text: &str) -> Result<Geometry> {
    let text = text.trim();
    let open = text
        .find('(')
        .ok_or_else(|| ErrorKind::Filesystem.with_message(format!("no geometry body in '{text}'")))?;
    let (kind, body) = text.split_at(open);

    match kind.trim().to_ascii_uppercase().as_str() {
        "POINT" => {
            let coords = parse_coords(body)?;
            let &(x, y) = coords
                .first()
                .ok_or_else(|| ErrorKind::Filesystem.with_message("POINT with no coordinate"))?;
            Ok(Geometry::Point { x, y })
        }
        "BOX" => {
            let coords = parse_coords(body)?;
            if coords.len() != 2 {
                return Err(ErrorKind::Filesystem.with_message("BOX requires exactly two coordinates"));
            }
            Ok(Geometry::Box { min: coords[0], max: coords[1] })
        }
        "LINESTRING" => Ok(Geometry::LineString { coords: parse_coords(body)? }),
        "POLYGON" => {
            // Polygons carry an extra ring of parens; strip exactly one pair.
            let inner = body.trim().trim_start_matches('(').trim_end_matches(')');
            Ok(Geometry::Polygon { coords: parse_coords(inner)? })
        }
        other => Err(ErrorKind::Filesystem.with_message(format!("unknown geometry tag '{other}'"))),
    }
}

/// Reads every shape out of `path`. Empty lines and `#`-comments are
/// skipped; every remaining line must be `<recId> <geometry>`.
pub fn load_shapes(path: &str) -> Result<Vec<Shape>> {
    let contents = fs::read_to_string(path)?;
    let mut shapes = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id_text, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ErrorKind::Filesystem.with_message(format!("malformed dataset line '{line}'")))?;
        let rec_id: i64 = id_text
            .parse()
            .map_err(|_| ErrorKind::Filesystem.with_message(format!("'{id_text}' is not a valid recID")))?;
        shapes.push(Shape::new(rec_id, parse_geometry(rest)?));
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dataset(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_points_skipping_comments_and_blanks() {
        let file = write_dataset("# header\n\n1 POINT(1 2)\n2 POINT(3.5 4.5)\n");
        let shapes = load_shapes(file.path().to_str().unwrap()).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].rec_id, 1);
        assert!(matches!(shapes[0].geometry, Geometry::Point { x, y } if x == 1.0 && y == 2.0));
    }

    #[test]
    fn reads_box_and_polygon() {
        let file = write_dataset("1 BOX(0 0,1 1)\n2 POLYGON((0 0,1 0,1 1,0 1,0 0))\n");
        let shapes = load_shapes(file.path().to_str().unwrap()).unwrap();
        assert!(matches!(shapes[0].geometry, Geometry::Box { .. }));
        match &shapes[1].geometry {
            Geometry::Polygon { coords } => assert_eq!(coords.len(), 5),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn unknown_geometry_tag_is_a_filesystem_error() {
        let file = write_dataset("1 CIRCLE(0 0,1)\n");
        let err = load_shapes(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), meridian_engine::ErrorKind::Filesystem);
    }
}
