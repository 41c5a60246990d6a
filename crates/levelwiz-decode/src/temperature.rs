use once_cell::sync::Lazy;
use regex::Regex;

use crate::NUMBER;

static HOTEND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?:^|\s)T0?:\s*({n})\s*/\s*({n})", n = NUMBER)).expect("hotend pattern")
});

static BED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?:^|\s)B:\s*({n})\s*/\s*({n})", n = NUMBER)).expect("bed pattern")
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub current: f64,
    pub target: f64,
}

/// Temperatures from an `M105` report or an auto-report line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Temperatures {
    pub hotend: Option<Reading>,
    pub bed: Option<Reading>,
}

fn reading(re: &Regex, line: &str) -> Option<Reading> {
    let caps = re.captures(line)?;
    Some(Reading {
        current: caps.get(1)?.as_str().parse().ok()?,
        target: caps.get(2)?.as_str().parse().ok()?,
    })
}

/// Parses lines like `ok T:21.3 /0.0 B:20.9 /60.0 @:0 B@:0`.
/// Returns `None` when the line carries neither reading.
pub fn parse_temperatures(line: &str) -> Option<Temperatures> {
    let line = line.trim();
    let line = line.strip_prefix("ok").unwrap_or(line);
    let temps = Temperatures {
        hotend: reading(&HOTEND, line),
        bed: reading(&BED, line),
    };
    if temps.hotend.is_none() && temps.bed.is_none() {
        None
    } else {
        Some(temps)
    }
}
