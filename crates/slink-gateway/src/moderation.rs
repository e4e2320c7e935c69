use regex::{Captures, Regex, RegexBuilder};

/// Rewrites message bodies before they are persisted.
pub trait Censor: Send + Sync + 'static {
    fn censor(&self, body: &str) -> String;
}

/// Masks whole-word, case-insensitive matches of a fixed word list with `*`,
/// one per character.
#[derive(Debug, Clone)]
pub struct WordListCensor {
    pattern: Option<Regex>,
}

impl WordListCensor {
    pub fn new<I, S>(words: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .map(|w| regex::escape(&w))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Parses a comma-separated list, e.g. from an environment variable.
    pub fn from_csv(list: &str) -> Result<Self, regex::Error> {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
    }
}

impl Censor for WordListCensor {
    fn censor(&self, body: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replace_all(body, |caps: &Captures| "*".repeat(caps[0].chars().count()))
                .into_owned(),
            None => body.to_string(),
        }
    }
}
