//! Probe-point table: grid layout, export and re-import.

use std::fmt::Write as _;
use thiserror::Error;

/// Printable bed area and probe grid, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedGeometry {
    pub width: f64,
    pub depth: f64,
    pub rows: usize,
    pub columns: usize,
    /// Distance kept from the bed edges by the outermost points.
    pub margin: f64,
}

impl Default for BedGeometry {
    fn default() -> Self {
        Self {
            width: 200.0,
            depth: 200.0,
            rows: 3,
            columns: 3,
            margin: 10.0,
        }
    }
}

impl BedGeometry {
    pub fn validate(&self) -> Result<(), String> {
        if self.rows == 0 || self.columns == 0 {
            return Err(format!("grid must have at least one row and column, got {}x{}", self.rows, self.columns));
        }
        if !(self.width.is_finite() && self.width > 0.0 && self.depth.is_finite() && self.depth > 0.0) {
            return Err(format!("bed size must be positive, got {} x {} mm", self.width, self.depth));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(format!("margin must not be negative, got {} mm", self.margin));
        }
        for (len, count, axis) in [(self.width, self.columns, "X"), (self.depth, self.rows, "Y")] {
            if count > 1 && 2.0 * self.margin >= len {
                return Err(format!("margin {} mm leaves no room on the {axis} axis ({len} mm)", self.margin));
            }
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.rows * self.columns
    }

    /// All probe points in visiting order (row-major).
    pub fn points(&self) -> Vec<ProbePoint> {
        let mut points = Vec::with_capacity(self.count());
        for row in 0..self.rows {
            for column in 0..self.columns {
                points.push(ProbePoint {
                    row,
                    column,
                    x: axis_position(self.width, self.columns, self.margin, column),
                    y: axis_position(self.depth, self.rows, self.margin, row),
                    z: None,
                });
            }
        }
        points
    }
}

fn axis_position(len: f64, count: usize, margin: f64, i: usize) -> f64 {
    if count <= 1 {
        return len / 2.0;
    }
    margin + i as f64 * (len - 2.0 * margin) / (count - 1) as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbePoint {
    pub row: usize,
    pub column: usize,
    pub x: f64,
    pub y: f64,
    /// Recorded offset; `None` until the point is saved.
    pub z: Option<f64>,
}

/// One line of an exported mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshEntry {
    pub row: usize,
    pub column: usize,
    pub z: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

/// Renders `row, column, z_offset` lines in visiting order.
/// Returns `None` while any point is still unsaved.
pub fn render_export(points: &[ProbePoint]) -> Option<String> {
    let mut out = String::new();
    for point in points {
        let z = point.z?;
        // `{}` on f64 prints the shortest text that parses back to the same value
        let _ = writeln!(out, "{}, {}, {}", point.row, point.column, z);
    }
    Some(out)
}

/// Reads text produced by [`render_export`]. Blank lines and `#` comments are skipped.
pub fn parse_export(text: &str) -> Result<Vec<MeshEntry>, ParseError> {
    let mut entries = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: String| ParseError { line: i + 1, reason };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [row, column, z] = fields[..] else {
            return Err(err(format!("expected 3 fields, found {}", fields.len())));
        };
        entries.push(MeshEntry {
            row: row.parse().map_err(|e| err(format!("bad row `{row}`: {e}")))?,
            column: column.parse().map_err(|e| err(format!("bad column `{column}`: {e}")))?,
            z: z.parse().map_err(|e| err(format!("bad z offset `{z}`: {e}")))?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn three_by_three_layout() {
        let points = BedGeometry::default().points();
        assert_eq!(points.len(), 9);
        assert_eq!((points[0].x, points[0].y), (10.0, 10.0));
        assert_eq!((points[1].x, points[1].y), (100.0, 10.0));
        assert_eq!((points[5].row, points[5].column), (1, 2));
        assert_eq!((points[8].x, points[8].y), (190.0, 190.0));
        assert!(points.iter().all(|p| p.z.is_none()));
    }

    #[test]
    fn single_point_sits_in_the_middle() {
        let geometry = BedGeometry {
            width: 220.0,
            depth: 180.0,
            rows: 1,
            columns: 1,
            margin: 10.0,
        };
        let points = geometry.points();
        assert_eq!(points.len(), 1);
        assert_eq!((points[0].x, points[0].y), (110.0, 90.0));
    }

    #[test]
    fn invalid_geometry() {
        let base = BedGeometry::default();
        assert!(BedGeometry { rows: 0, ..base }.validate().is_err());
        assert!(BedGeometry { columns: 0, ..base }.validate().is_err());
        assert!(BedGeometry { width: -1.0, ..base }.validate().is_err());
        assert!(BedGeometry { margin: 100.0, ..base }.validate().is_err());
        // one column never touches the margin
        assert!(BedGeometry { margin: 100.0, columns: 1, rows: 1, ..base }.validate().is_ok());
    }

    #[test]
    fn export_requires_every_point() {
        let mut points = BedGeometry::default().points();
        assert!(render_export(&points).is_none());
        for (i, p) in points.iter_mut().enumerate() {
            p.z = Some(i as f64 * 0.025 - 0.1);
        }
        let text = render_export(&points).unwrap();
        assert_eq!(text.lines().count(), 9);
        assert_eq!(text.lines().next(), Some("0, 0, -0.1"));
    }

    #[test]
    fn parse_skips_comments_and_reports_line_numbers() {
        let entries = parse_export("# mesh\n\n0, 0, 0.05\n0,1,-0.025\n").unwrap();
        assert_eq!(
            entries,
            [
                MeshEntry { row: 0, column: 0, z: 0.05 },
                MeshEntry { row: 0, column: 1, z: -0.025 },
            ]
        );

        let err = parse_export("0, 0, 0.05\n0, 1\n").unwrap_err();
        assert_eq!(err.line, 2);
        let err = parse_export("0, x, 0.05").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("column"));
    }

    proptest! {
        #[test]
        fn grid_is_row_major_and_unique(rows in 1usize..12, columns in 1usize..12) {
            let geometry = BedGeometry { rows, columns, ..BedGeometry::default() };
            let points = geometry.points();
            prop_assert_eq!(points.len(), rows * columns);

            let unique: HashSet<_> = points.iter().map(|p| (p.row, p.column)).collect();
            prop_assert_eq!(unique.len(), points.len());

            for (i, p) in points.iter().enumerate() {
                prop_assert_eq!((p.row, p.column), (i / columns, i % columns));
                prop_assert!(p.x >= 0.0 && p.x <= geometry.width);
                prop_assert!(p.y >= 0.0 && p.y <= geometry.depth);
            }
        }

        #[test]
        fn export_parses_back_in_order(zs in proptest::collection::vec(-2.0f64..2.0, 1..40)) {
            let columns = 5;
            let rows = zs.len().div_ceil(columns);
            let mut points = BedGeometry { rows, columns, ..BedGeometry::default() }.points();
            points.truncate(zs.len());
            for (p, z) in points.iter_mut().zip(&zs) {
                p.z = Some(*z);
            }

            let parsed = parse_export(&render_export(&points).unwrap()).unwrap();
            let expected: Vec<_> = points
                .iter()
                .map(|p| MeshEntry { row: p.row, column: p.column, z: p.z.unwrap() })
                .collect();
            prop_assert_eq!(parsed, expected);
        }
    }
}
