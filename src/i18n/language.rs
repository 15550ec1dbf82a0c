//! Language codes: validated `xx` / `xx-YY` identifiers.

use crate::error::{PipelineError, PipelineResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

static CODE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Languages that build long compound nouns. Their prompts ask for
/// phrase-level translation instead of word-by-word.
const COMPOUNDING_LANGUAGES: &[&str] = &["de", "nl", "no", "nb", "nn", "sv", "da", "fi", "is"];

/// A language code matching `^[a-z]{2}(-[A-Z]{2})?$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    /// Parse and validate a language code.
    ///
    /// # Example
    /// ```ignore
    /// let norwegian = LanguageCode::parse("no")?;
    /// let brazilian = LanguageCode::parse("pt-BR")?;
    /// ```
    pub fn parse(code: &str) -> PipelineResult<Self> {
        let regex = CODE_REGEX.get_or_init(|| {
            Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").expect("language code pattern is valid")
        });

        if regex.is_match(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(PipelineError::validation(format!(
                "Invalid language code '{}': expected 'xx' or 'xx-YY'",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary subtag: `"pt-BR"` -> `"pt"`.
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Whether this language forms compound words.
    pub fn is_compounding(&self) -> bool {
        COMPOUNDING_LANGUAGES.contains(&self.primary())
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LanguageCode::parse(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

impl AsRef<str> for LanguageCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
