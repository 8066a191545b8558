//! Content-safety classification.
//!
//! A [`SafetyClassifier`] labels text against the Llama Guard 3 hazard
//! taxonomy. The [`Guard`] wrapper applies the deadline and the fail-closed
//! policy: a classifier that errors or does not answer in time yields an
//! unsafe verdict. Guard calls are never retried.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// The Llama Guard 3 hazard categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HazardCategory {
    ViolentCrimes,
    NonViolentCrimes,
    SexRelatedCrimes,
    ChildSexualExploitation,
    Defamation,
    SpecializedAdvice,
    Privacy,
    IntellectualProperty,
    IndiscriminateWeapons,
    Hate,
    SelfHarm,
    SexualContent,
    Elections,
    CodeInterpreterAbuse,
}

impl HazardCategory {
    /// Every category, in code order.
    pub const ALL: [HazardCategory; 14] = [
        Self::ViolentCrimes,
        Self::NonViolentCrimes,
        Self::SexRelatedCrimes,
        Self::ChildSexualExploitation,
        Self::Defamation,
        Self::SpecializedAdvice,
        Self::Privacy,
        Self::IntellectualProperty,
        Self::IndiscriminateWeapons,
        Self::Hate,
        Self::SelfHarm,
        Self::SexualContent,
        Self::Elections,
        Self::CodeInterpreterAbuse,
    ];

    /// The short code used by the model, `S1` through `S14`.
    pub fn code(self) -> &'static str {
        match self {
            Self::ViolentCrimes => "S1",
            Self::NonViolentCrimes => "S2",
            Self::SexRelatedCrimes => "S3",
            Self::ChildSexualExploitation => "S4",
            Self::Defamation => "S5",
            Self::SpecializedAdvice => "S6",
            Self::Privacy => "S7",
            Self::IntellectualProperty => "S8",
            Self::IndiscriminateWeapons => "S9",
            Self::Hate => "S10",
            Self::SelfHarm => "S11",
            Self::SexualContent => "S12",
            Self::Elections => "S13",
            Self::CodeInterpreterAbuse => "S14",
        }
    }

    /// Parse a code such as `S10` (case-insensitive, surrounding whitespace ignored).
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL.into_iter().find(|c| c.code().eq_ignore_ascii_case(code))
    }

    /// Human-readable category name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ViolentCrimes => "Violent Crimes",
            Self::NonViolentCrimes => "Non-Violent Crimes",
            Self::SexRelatedCrimes => "Sex-Related Crimes",
            Self::ChildSexualExploitation => "Child Sexual Exploitation",
            Self::Defamation => "Defamation",
            Self::SpecializedAdvice => "Specialized Advice",
            Self::Privacy => "Privacy",
            Self::IntellectualProperty => "Intellectual Property",
            Self::IndiscriminateWeapons => "Indiscriminate Weapons",
            Self::Hate => "Hate",
            Self::SelfHarm => "Suicide & Self-Harm",
            Self::SexualContent => "Sexual Content",
            Self::Elections => "Elections",
            Self::CodeInterpreterAbuse => "Code Interpreter Abuse",
        }
    }
}

impl fmt::Display for HazardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Unsafe,
}

/// The result of one guard check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// SHA-256 of the classified text, hex encoded.
    pub subject_hash: String,
    pub verdict: Verdict,
    /// Violated categories. May be empty even when unsafe.
    pub categories: BTreeSet<HazardCategory>,
    /// Whether the verdict was forced by a classifier failure or timeout.
    pub fail_closed: bool,
}

impl SafetyVerdict {
    pub fn safe(text: &str) -> Self {
        Self {
            subject_hash: subject_hash(text),
            verdict: Verdict::Safe,
            categories: BTreeSet::new(),
            fail_closed: false,
        }
    }

    pub fn unsafe_with(text: &str, categories: impl IntoIterator<Item = HazardCategory>) -> Self {
        Self {
            subject_hash: subject_hash(text),
            verdict: Verdict::Unsafe,
            categories: categories.into_iter().collect(),
            fail_closed: false,
        }
    }

    /// The verdict recorded when the classifier could not answer.
    pub fn fail_closed(text: &str) -> Self {
        Self { fail_closed: true, ..Self::unsafe_with(text, []) }
    }

    pub fn is_safe(&self) -> bool {
        self.verdict == Verdict::Safe
    }
}

/// Hex-encoded SHA-256 digest identifying a guarded text without storing it.
pub fn subject_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// A model or rule set that labels text as safe or unsafe.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &str;

    /// Classify `text`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ProviderUnavailable`] when the backing model cannot
    /// be reached. [`Guard`] turns any error into an unsafe verdict.
    async fn classify(&self, text: &str) -> Result<SafetyVerdict>;
}

/// Applies a deadline and the fail-closed policy to a [`SafetyClassifier`].
#[derive(Clone)]
pub struct Guard {
    classifier: Arc<dyn SafetyClassifier>,
    timeout: Duration,
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("classifier", &self.classifier.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Guard {
    pub fn new(classifier: Arc<dyn SafetyClassifier>, timeout: Duration) -> Self {
        Self { classifier, timeout }
    }

    /// Classify `text`. Never fails: errors and timeouts become an unsafe,
    /// fail-closed verdict.
    pub async fn check(&self, text: &str) -> SafetyVerdict {
        let classifier = self.classifier.name();
        match tokio::time::timeout(self.timeout, self.classifier.classify(text)).await {
            Ok(Ok(verdict)) => {
                debug!(
                    classifier,
                    safe = verdict.is_safe(),
                    categories = verdict.categories.len(),
                    "guard verdict"
                );
                verdict
            }
            Ok(Err(e)) => {
                warn!(classifier, error = %e, "guard unavailable, failing closed");
                SafetyVerdict::fail_closed(text)
            }
            Err(_) => {
                warn!(
                    classifier,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "guard timed out, failing closed"
                );
                SafetyVerdict::fail_closed(text)
            }
        }
    }
}

/// A local classifier matching case-insensitive regular expressions per
/// hazard category.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::{HazardCategory, KeywordClassifier};
///
/// let classifier = KeywordClassifier::new()
///     .with_pattern(HazardCategory::IndiscriminateWeapons, r"\bnerve agent\b")?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    rules: Vec<(HazardCategory, Regex)>,
}

impl KeywordClassifier {
    /// A classifier with no rules; everything is safe.
    pub fn new() -> Self {
        Self::default()
    }

    /// A small built-in blocklist covering the most clear-cut requests.
    pub fn with_default_rules() -> Self {
        const RULES: &[(HazardCategory, &str)] = &[
            (HazardCategory::IndiscriminateWeapons, r"\b(build|make|assemble)\b.{0,40}\b(bomb|explosive|nerve agent|bioweapon)s?\b"),
            (HazardCategory::ViolentCrimes, r"\b(how to|help me)\b.{0,30}\b(kill|murder|kidnap)\b"),
            (HazardCategory::SelfHarm, r"\b(kill myself|end my life|suicide method)s?\b"),
            (HazardCategory::ChildSexualExploitation, r"\bchild\b.{0,20}\b(porn|sexual)\b"),
            (HazardCategory::CodeInterpreterAbuse, r"\brm\s+-rf\s+/(\s|$)"),
        ];
        let rules = RULES
            .iter()
            .filter_map(|(category, pattern)| compile(pattern).ok().map(|re| (*category, re)))
            .collect();
        Self { rules }
    }

    /// Add a rule flagging `category` when `pattern` matches.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if the pattern does not compile.
    pub fn with_pattern(mut self, category: HazardCategory, pattern: &str) -> Result<Self> {
        self.rules.push((category, compile(pattern)?));
        Ok(self)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("invalid guard pattern '{pattern}': {e}")))
}

#[async_trait]
impl SafetyClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, text: &str) -> Result<SafetyVerdict> {
        let hits: BTreeSet<HazardCategory> =
            self.rules.iter().filter(|(_, re)| re.is_match(text)).map(|(c, _)| *c).collect();
        if hits.is_empty() {
            Ok(SafetyVerdict::safe(text))
        } else {
            Ok(SafetyVerdict::unsafe_with(text, hits))
        }
    }
}
