use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::NUMBER;

static GRID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Num X,Y:\s*(\d+)\s*,\s*(\d+)$").expect("grid pattern"));

static Z_SEARCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^Z search height:\s*({n})$", n = NUMBER)).expect("z search pattern")
});

static Z_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^Z offset:\s*({n})$", n = NUMBER)).expect("z offset pattern")
});

/// Mesh state as printed by the firmware in answer to `G29 S0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeshReport {
    /// Probe counts along X and Y.
    pub grid: Option<(usize, usize)>,
    pub z_search_height: Option<f64>,
    pub z_offset: Option<f64>,
}

impl MeshReport {
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut report = Self::default();
        for line in lines {
            let line = line.trim();
            if let Some(caps) = GRID.captures(line) {
                let x = caps[1].parse().ok();
                let y = caps[2].parse().ok();
                if let (Some(x), Some(y)) = (x, y) {
                    report.grid = Some((x, y));
                }
            } else if let Some(caps) = Z_SEARCH.captures(line) {
                report.z_search_height = caps[1].parse().ok();
            } else if let Some(caps) = Z_OFFSET.captures(line) {
                report.z_offset = caps[1].parse().ok();
            }
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_none() && self.z_search_height.is_none() && self.z_offset.is_none()
    }
}

impl fmt::Display for MeshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("not reported");
        }
        let mut parts = Vec::new();
        if let Some((x, y)) = self.grid {
            parts.push(format!("{x}x{y} points"));
        }
        if let Some(z) = self.z_search_height {
            parts.push(format!("Z search {z:.2}"));
        }
        if let Some(z) = self.z_offset {
            parts.push(format!("Z offset {z:+.3}"));
        }
        f.write_str(&parts.join(", "))
    }
}
