//! Keyword checks over detection results.
//!
//! All three checks are advisory: they shape the response and what gets
//! reported, but never block persistence of an upload that already reached
//! the bucket.

use crate::analysis::Analysis;
use crate::config::PolicyConfig;

/// How keyword lists are matched against detected strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Case-insensitive substring match per keyword
    Substring,
    /// Historical behavior: any non-empty input list matches
    Legacy,
}

/// Result of running every check on one analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub moderation_flagged: bool,
    pub error_text: bool,
    pub bug_label: bool,
}

#[derive(Debug, Clone)]
pub struct ContentPolicy {
    mode: MatchMode,
    moderation_keywords: Vec<String>,
    error_keywords: Vec<String>,
    bug_keywords: Vec<String>,
}

impl ContentPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        let mode = if config.legacy_keyword_matching {
            MatchMode::Legacy
        } else {
            MatchMode::Substring
        };

        Self {
            mode,
            moderation_keywords: lowercase_all(&config.moderation_keywords),
            error_keywords: lowercase_all(&config.error_keywords),
            bug_keywords: lowercase_all(&config.bug_keywords),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn is_moderation_flagged(&self, flags: &[String]) -> bool {
        self.matches(flags, &self.moderation_keywords)
    }

    pub fn has_error_text(&self, text_lines: &[String]) -> bool {
        self.matches(text_lines, &self.error_keywords)
    }

    pub fn has_bug_label(&self, labels: &[String]) -> bool {
        self.matches(labels, &self.bug_keywords)
    }

    pub fn evaluate(&self, analysis: &Analysis) -> PolicyVerdict {
        PolicyVerdict {
            moderation_flagged: self.is_moderation_flagged(&analysis.moderation_flags),
            error_text: self.has_error_text(&analysis.text_lines),
            bug_label: self.has_bug_label(&analysis.labels),
        }
    }

    fn matches(&self, values: &[String], keywords: &[String]) -> bool {
        match self.mode {
            MatchMode::Legacy => !values.is_empty(),
            MatchMode::Substring => values.iter().any(|value| {
                let value = value.to_lowercase();
                keywords.iter().any(|keyword| value.contains(keyword.as_str()))
            }),
        }
    }
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

fn lowercase_all(keywords: &[String]) -> Vec<String> {
    keywords.iter().map(|k| k.to_lowercase()).collect()
}
