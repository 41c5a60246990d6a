/// How a single response line relates to the command that is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind<'a> {
    /// Acknowledgement; the command finished. Holds anything after the token.
    Ack(&'a str),
    /// Firmware rejected the command or hit a fault.
    Error(&'a str),
    /// Host keepalive while a long command runs.
    Busy,
    /// Anything else: echo lines, reports, boot chatter.
    Info(&'a str),
}

/// Tokens used to recognize acknowledgement, error and keepalive lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Tokens {
    pub ok: String,
    pub error_prefixes: Vec<String>,
    pub busy_prefix: String,
}

impl Default for Tokens {
    fn default() -> Self {
        Self {
            ok: "ok".to_string(),
            error_prefixes: vec![
                "Error:".to_string(),
                "!!".to_string(),
                "echo:Unknown command".to_string(),
            ],
            busy_prefix: "echo:busy:".to_string(),
        }
    }
}

impl Tokens {
    pub fn classify<'a>(&self, line: &'a str) -> LineKind<'a> {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix(self.ok.as_str()) {
            // "ok" alone, or "ok T:..." with a report attached, but not "okay"
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return LineKind::Ack(rest.trim_start());
            }
        }

        if self
            .error_prefixes
            .iter()
            .any(|p| !p.is_empty() && line.starts_with(p.as_str()))
        {
            return LineKind::Error(line);
        }

        if !self.busy_prefix.is_empty() && line.starts_with(self.busy_prefix.as_str()) {
            return LineKind::Busy;
        }

        LineKind::Info(line)
    }
}
