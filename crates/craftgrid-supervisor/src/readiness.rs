//! Readiness predicates over captured console output.

/// Decides whether a console line means the server is accepting players.
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self, line: &str) -> bool;
}

impl<F> ReadinessProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ready(&self, line: &str) -> bool {
        self(line)
    }
}

/// Matches any of a fixed set of substrings.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    markers: Vec<String>,
}

impl MarkerProbe {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MarkerProbe {
    /// Markers printed by the vanilla server once the world is loaded.
    fn default() -> Self {
        Self::new(["Done", "For help, type \"help\""])
    }
}

impl ReadinessProbe for MarkerProbe {
    fn is_ready(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }
}
