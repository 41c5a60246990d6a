use once_cell::sync::Lazy;
use regex::Regex;

use crate::NUMBER;

static POSITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^X:\s*({n})\s+Y:\s*({n})\s+Z:\s*({n})(?:\s+E:\s*({n}))?",
        n = NUMBER
    ))
    .expect("position pattern")
});

/// Toolhead position as reported by `M114`, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: Option<f64>,
}

/// Parses an `M114` report line such as
/// `X:10.00 Y:20.00 Z:5.00 E:0.00 Count X:800 Y:1600 Z:2000`.
pub fn parse_position(line: &str) -> Option<Position> {
    let caps = POSITION.captures(line.trim())?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    Some(Position {
        x: num(1)?,
        y: num(2)?,
        z: num(3)?,
        e: num(4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marlin_1_1_report() {
        let p = parse_position("X:10.00 Y:20.50 Z:5.00 E:0.00 Count X: 800 Y:1640 Z: 2000").unwrap();
        assert_eq!(p, Position { x: 10.0, y: 20.5, z: 5.0, e: Some(0.0) });
    }

    #[test]
    fn negative_and_missing_extruder() {
        let p = parse_position("X:-3.25 Y:0.00 Z:0.15").unwrap();
        assert_eq!(p.x, -3.25);
        assert_eq!(p.z, 0.15);
        assert_eq!(p.e, None);
    }

    #[test]
    fn rejects_other_lines() {
        assert!(parse_position("ok").is_none());
        assert!(parse_position("echo:busy: processing").is_none());
        assert!(parse_position("Count X:800 Y:1600 Z:2000").is_none());
    }
}
