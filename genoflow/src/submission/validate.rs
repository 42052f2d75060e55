//! Rules for the named parts of a job submission.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

use crate::core::{file_extension, InputCategory, InputKind};
use crate::errors::ValidationErrors;

/// Field reported when neither genome part was submitted.
pub const GENOME_FIELD: &str = "genome";

/// A part that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPart {
    /// Which input the part carries.
    pub kind: InputKind,
    /// Sanitised file name to store it under.
    pub file_name: String,
}

/// Accumulates part-level checks so every rejected field is reported at once.
///
/// Parts are offered one at a time as they arrive; [`finish`](Self::finish)
/// applies the submission-level rules.
#[derive(Debug, Default)]
pub struct SubmissionValidator {
    seen: BTreeSet<InputKind>,
    errors: ValidationErrors,
}

impl SubmissionValidator {
    /// Creates an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one multipart part.
    ///
    /// Returns the accepted part, or `None` when the part was rejected or
    /// carried no file (an empty file name counts as not submitted).
    pub fn accept(&mut self, field: &str, file_name: Option<&str>) -> Option<AcceptedPart> {
        let Some(kind) = InputKind::from_field_name(field) else {
            self.errors.push(field, "unknown part name");
            return None;
        };

        let raw = file_name.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            debug!(field, "Part without file name ignored");
            return None;
        }

        if !self.seen.insert(kind) {
            self.errors.push(field, "submitted more than once");
            return None;
        }

        let Some(file_name) = sanitize_file_name(raw) else {
            self.errors.push(field, format!("file name '{raw}' is not usable"));
            return None;
        };

        if let Err(message) = check_extension(kind, &file_name) {
            self.errors.push(field, message);
            return None;
        }

        Some(AcceptedPart { kind, file_name })
    }

    /// Returns true if any part has been rejected so far.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Applies the submission-level rules and returns every rejection.
    ///
    /// A genome part that was offered but rejected already carries its own
    /// error, so the missing-genome rule only fires when none was offered.
    pub fn finish(mut self) -> Result<(), ValidationErrors> {
        let has_genome = self
            .seen
            .iter()
            .any(|kind| kind.category() == InputCategory::Genome);
        if !has_genome {
            self.errors.push(
                GENOME_FIELD,
                "at least one of hostGenome or parasiteGenome is required",
            );
        }
        self.errors.into_result()
    }
}

/// Validates a complete list of `(field, file name)` pairs.
pub fn validate_parts<'a>(
    parts: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
) -> Result<Vec<AcceptedPart>, ValidationErrors> {
    let mut validator = SubmissionValidator::new();
    let accepted: Vec<_> = parts
        .into_iter()
        .filter_map(|(field, file_name)| validator.accept(field, file_name))
        .collect();
    validator.finish()?;
    Ok(accepted)
}

/// Checks the file extension against the part's category, case-insensitively.
pub fn check_extension(kind: InputKind, file_name: &str) -> Result<(), String> {
    let allowed = kind.category().allowed_extensions();
    match file_extension(file_name) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(format!(
            "extension '.{ext}' is not allowed; expected one of {}",
            allowed.join(", ")
        )),
        None => Err(format!(
            "file has no extension; expected one of {}",
            allowed.join(", ")
        )),
    }
}

fn unsafe_chars() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]"))
        .as_ref()
        .ok()
}

/// Reduces a client-supplied file name to a safe, flat ASCII name.
///
/// Path separators become underscores, characters outside
/// `[A-Za-z0-9_.-]` are dropped, and leading or trailing dots and
/// underscores are stripped. Returns `None` if nothing usable remains.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let flattened: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");

    let cleaned = match unsafe_chars() {
        Some(pattern) => pattern.replace_all(&joined, "").into_owned(),
        None => joined
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            .collect(),
    };

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
