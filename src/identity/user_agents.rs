//! Built-in user-agent rotation.
//!
//! A small curated set of current desktop browser strings, rotated per
//! attempt. Callers can override the whole list through configuration.

use once_cell::sync::Lazy;
use rand::Rng;

/// Used when every other source of agents is empty or fails.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static BUILTIN_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    ]
});

/// Rotating source of user-agent strings.
#[derive(Debug, Clone)]
pub struct UserAgentRotator {
    custom: Vec<String>,
    index: usize,
}

impl UserAgentRotator {
    /// Build a rotator over the caller's agents, or over the built-in list
    /// when `custom` is empty. Rotation starts at a random offset so
    /// concurrent runs don't all lead with the same string.
    pub fn new(custom: Vec<String>) -> Self {
        let len = if custom.is_empty() {
            BUILTIN_AGENTS.len()
        } else {
            custom.len()
        };
        let index = rand::thread_rng().gen_range(0..len.max(1));
        Self { custom, index }
    }

    /// Next user agent, round-robin.
    pub fn next(&mut self) -> String {
        let agent = if self.custom.is_empty() {
            let agent = BUILTIN_AGENTS
                .get(self.index % BUILTIN_AGENTS.len())
                .copied()
                .unwrap_or(FALLBACK_USER_AGENT);
            agent.to_string()
        } else {
            self.custom[self.index % self.custom.len()].clone()
        };
        self.index = self.index.wrapping_add(1);
        agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_through_custom_list() {
        let mut rotator = UserAgentRotator::new(vec!["a".into(), "b".into()]);
        let first = rotator.next();
        let second = rotator.next();
        assert_ne!(first, second);
        assert_eq!(rotator.next(), first);
    }

    #[test]
    fn builtin_rotation_never_repeats_consecutively() {
        let mut rotator = UserAgentRotator::new(Vec::new());
        let mut previous = rotator.next();
        for _ in 0..16 {
            let next = rotator.next();
            assert_ne!(next, previous);
            previous = next;
        }
    }
}
