//! Structured response parser.
//!
//! Models answer in one of two historical shapes:
//! 1. Rich: labelled sections (`TYPE:`, `SUBJECT:`, ..., `EXTRACTED_TEXT:`)
//! 2. Legacy: only `DESCRIPTION:` and `EXTRACTED_TEXT:`
//!
//! The shape is sniffed from the text itself. Parsing never fails: text
//! without any recognised label becomes the description.

use std::collections::HashMap;

use tracing::debug;

use crate::taxonomy::DEFAULT_TYPES;

/// Longest subject kept, in characters.
pub const SUBJECT_MAX_CHARS: usize = 80;

/// Sentinel type used when the model gives none or an unknown one.
pub const OTHER: &str = "other";

/// A named field of a parsed answer. Doubles as the section label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Type,
    Subject,
    Category,
    Style,
    Mood,
    Medium,
    Composition,
    Palette,
    Colors,
    Tags,
    Description,
    ExtractedText,
}

impl Field {
    /// Canonical order of the rich format.
    pub const ALL: [Field; 12] = [
        Field::Type,
        Field::Subject,
        Field::Category,
        Field::Style,
        Field::Mood,
        Field::Medium,
        Field::Composition,
        Field::Palette,
        Field::Colors,
        Field::Tags,
        Field::Description,
        Field::ExtractedText,
    ];

    const LEGACY: [Field; 2] = [Field::Description, Field::ExtractedText];

    /// Upper-case label as it appears in model output, without the colon.
    pub fn label(self) -> &'static str {
        match self {
            Field::Type => "TYPE",
            Field::Subject => "SUBJECT",
            Field::Category => "CATEGORY",
            Field::Style => "STYLE",
            Field::Mood => "MOOD",
            Field::Medium => "MEDIUM",
            Field::Composition => "COMPOSITION",
            Field::Palette => "PALETTE",
            Field::Colors => "COLORS",
            Field::Tags => "TAGS",
            Field::Description => "DESCRIPTION",
            Field::ExtractedText => "EXTRACTED_TEXT",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    Rich,
    #[default]
    Legacy,
}

/// One model answer split into fields. Absent fields are empty strings,
/// except `kind` which falls back to `"other"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub format: ResponseFormat,
    pub kind: String,
    pub subject: String,
    pub category: String,
    pub style: String,
    pub mood: String,
    pub medium: String,
    pub composition: String,
    pub palette: String,
    pub colors: String,
    pub tags: String,
    pub description: String,
    pub extracted_text: String,
}

impl Default for ParsedResponse {
    fn default() -> Self {
        Self {
            format: ResponseFormat::Legacy,
            kind: OTHER.to_string(),
            subject: String::new(),
            category: String::new(),
            style: String::new(),
            mood: String::new(),
            medium: String::new(),
            composition: String::new(),
            palette: String::new(),
            colors: String::new(),
            tags: String::new(),
            description: String::new(),
            extracted_text: String::new(),
        }
    }
}

impl ParsedResponse {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Type => &self.kind,
            Field::Subject => &self.subject,
            Field::Category => &self.category,
            Field::Style => &self.style,
            Field::Mood => &self.mood,
            Field::Medium => &self.medium,
            Field::Composition => &self.composition,
            Field::Palette => &self.palette,
            Field::Colors => &self.colors,
            Field::Tags => &self.tags,
            Field::Description => &self.description,
            Field::ExtractedText => &self.extracted_text,
        }
    }

    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Type => &mut self.kind,
            Field::Subject => &mut self.subject,
            Field::Category => &mut self.category,
            Field::Style => &mut self.style,
            Field::Mood => &mut self.mood,
            Field::Medium => &mut self.medium,
            Field::Composition => &mut self.composition,
            Field::Palette => &mut self.palette,
            Field::Colors => &mut self.colors,
            Field::Tags => &mut self.tags,
            Field::Description => &mut self.description,
            Field::ExtractedText => &mut self.extracted_text,
        }
    }

    /// Overwrite fields with validator corrections.
    pub fn apply<'a, I>(&mut self, corrections: I)
    where
        I: IntoIterator<Item = (&'a Field, &'a String)>,
    {
        for (field, value) in corrections {
            *self.slot(*field) = value.clone();
        }
    }
}

/// Rich answer: every canonical section that was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichResponse {
    sections: HashMap<Field, String>,
}

/// Legacy answer: description and extracted text only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyResponse {
    /// Body of `DESCRIPTION:`, or the whole text when the label is missing.
    description: String,
    extracted_text: Option<String>,
}

/// A model answer, classified once by [`ModelAnswer::sniff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAnswer {
    Rich(RichResponse),
    Legacy(LegacyResponse),
}

impl ModelAnswer {
    /// Classify raw model text. Rich requires both `TYPE:` and `SUBJECT:`
    /// at the start of a line.
    pub fn sniff(raw: &str) -> Self {
        let text = strip_think_tags(raw);

        if is_rich(&text) {
            let sections = split_sections(&text, &Field::ALL);
            return ModelAnswer::Rich(RichResponse { sections });
        }

        let mut sections = split_sections(&text, &Field::LEGACY);
        let description = sections
            .remove(&Field::Description)
            .unwrap_or_else(|| text.trim().to_string());
        ModelAnswer::Legacy(LegacyResponse {
            description,
            extracted_text: sections.remove(&Field::ExtractedText),
        })
    }

    pub fn format(&self) -> ResponseFormat {
        match self {
            ModelAnswer::Rich(_) => ResponseFormat::Rich,
            ModelAnswer::Legacy(_) => ResponseFormat::Legacy,
        }
    }

    pub fn into_parsed(self) -> ParsedResponse {
        let mut parsed = ParsedResponse {
            format: self.format(),
            ..Default::default()
        };

        match self {
            ModelAnswer::Rich(rich) => {
                for (field, body) in rich.sections {
                    *parsed.slot(field) = clean_field(field, &body);
                }
            }
            ModelAnswer::Legacy(legacy) => {
                parsed.description = legacy.description;
                if let Some(text) = legacy.extracted_text {
                    parsed.extracted_text = clean_field(Field::ExtractedText, &text);
                }
            }
        }

        if parsed.kind.is_empty() {
            parsed.kind = OTHER.to_string();
        } else if !DEFAULT_TYPES.contains(&parsed.kind.as_str()) {
            debug!("Model returned unrecognised type '{}'", parsed.kind);
        }
        parsed
    }
}

/// Parse a model answer into fields.
pub fn parse_response(raw: &str) -> ParsedResponse {
    ModelAnswer::sniff(raw).into_parsed()
}

/// True when the text carries both `TYPE:` and `SUBJECT:` labels.
pub fn is_rich(text: &str) -> bool {
    let mut has_type = false;
    let mut has_subject = false;
    for line in text.lines() {
        match match_label(line, &[Field::Type, Field::Subject]) {
            Some((Field::Type, _)) => has_type = true,
            Some((Field::Subject, _)) => has_subject = true,
            _ => {}
        }
    }
    has_type && has_subject
}

/// Strip `<think>...</think>` blocks emitted by reasoning models.
///
/// Handles both complete and incomplete think blocks:
/// - `<think>reasoning</think>content` -> `content`
/// - `<think>reasoning without closing` -> `` (strips to end)
pub fn strip_think_tags(text: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find("<think>") {
        if let Some(end) = result[start..].find("</think>") {
            result = format!("{}{}", &result[..start], &result[start + end + 8..]);
        } else {
            result = result[..start].to_string();
            break;
        }
    }
    result
}

/// Split text into sections introduced by any of `labels`. Only a label
/// at the very start of a line, followed directly by a colon, opens a
/// section. The first occurrence of a label wins.
fn split_sections(text: &str, labels: &[Field]) -> HashMap<Field, String> {
    let mut ordered: Vec<(Field, Vec<&str>)> = Vec::new();

    for line in text.lines() {
        if let Some((field, rest)) = match_label(line, labels) {
            ordered.push((field, vec![rest]));
        } else if let Some((_, body)) = ordered.last_mut() {
            body.push(line);
        }
    }

    let mut sections = HashMap::new();
    for (field, body) in ordered {
        sections
            .entry(field)
            .or_insert_with(|| body.join("\n").trim().to_string());
    }
    sections
}

fn match_label<'a>(line: &'a str, labels: &[Field]) -> Option<(Field, &'a str)> {
    labels.iter().find_map(|field| {
        line.strip_prefix(field.label())
            .and_then(|rest| rest.strip_prefix(':'))
            .map(|rest| (*field, rest))
    })
}

fn clean_field(field: Field, body: &str) -> String {
    let body = body.trim();
    if field != Field::Description && body.eq_ignore_ascii_case("none") {
        return String::new();
    }
    match field {
        Field::Type => body.to_lowercase(),
        Field::Subject => truncate_subject(body),
        _ => body.to_string(),
    }
}

/// Single line, at most [`SUBJECT_MAX_CHARS`] characters.
fn truncate_subject(subject: &str) -> String {
    let single_line = subject.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= SUBJECT_MAX_CHARS {
        return single_line;
    }
    single_line
        .chars()
        .take(SUBJECT_MAX_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RICH: &str = "TYPE:\nphoto\n\nSUBJECT:\nA cat\n\nDESCRIPTION:\nA cat on a mat.\n\nEXTRACTED_TEXT:\nNone";

    #[test]
    fn empty_input_is_all_empty_with_other_type() {
        let parsed = parse_response("");
        assert_eq!(parsed.kind, "other");
        assert_eq!(parsed.description, "");
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.extracted_text, "");
    }

    #[test]
    fn rich_example() {
        let parsed = parse_response(RICH);
        assert_eq!(parsed.format, ResponseFormat::Rich);
        assert_eq!(parsed.kind, "photo");
        assert_eq!(parsed.subject, "A cat");
        assert_eq!(parsed.description, "A cat on a mat.");
        assert_eq!(parsed.extracted_text, "");
    }

    #[test]
    fn rich_sections_on_the_label_line() {
        let input = "TYPE: Screenshot\nSUBJECT: Settings dialog\nCATEGORY: technology, interface\nTAGS: ui, dark mode\nDESCRIPTION: A dialog.";
        let parsed = parse_response(input);
        assert_eq!(parsed.kind, "screenshot");
        assert_eq!(parsed.subject, "Settings dialog");
        assert_eq!(parsed.category, "technology, interface");
        assert_eq!(parsed.tags, "ui, dark mode");
        assert_eq!(parsed.description, "A dialog.");
    }

    #[test]
    fn unknown_type_is_kept_for_the_validator() {
        let parsed = parse_response("TYPE: MEME\nSUBJECT: x");
        assert_eq!(parsed.kind, "meme");
    }

    #[test]
    fn lookalike_labels_do_not_split_sections() {
        let input = "TYPE: diagram\nSUBJECT: Flow\nDESCRIPTION:\nSteps:\nNote: this is inline\n  TAGS: indented is not a label\ntype: lower case is not a label\nEXTRACTED_TEXT:\nStart: here";
        let parsed = parse_response(input);
        assert_eq!(
            parsed.description,
            "Steps:\nNote: this is inline\n  TAGS: indented is not a label\ntype: lower case is not a label"
        );
        assert_eq!(parsed.tags, "");
        assert_eq!(parsed.extracted_text, "Start: here");
    }

    #[test]
    fn multiline_bodies_keep_formatting() {
        let input = "TYPE: document\nSUBJECT: Memo\nEXTRACTED_TEXT:\n\n# Heading\n\n- **bold** item\n- second\n\n";
        let parsed = parse_response(input);
        assert_eq!(parsed.extracted_text, "# Heading\n\n- **bold** item\n- second");
    }

    #[test]
    fn none_fields_become_empty() {
        let input = "TYPE: photo\nSUBJECT: Beach\nSTYLE: none\nMOOD: NONE \nPALETTE: warm\nDESCRIPTION: Sand.\nEXTRACTED_TEXT: None";
        let parsed = parse_response(input);
        assert_eq!(parsed.style, "");
        assert_eq!(parsed.mood, "");
        assert_eq!(parsed.palette, "warm");
        assert_eq!(parsed.extracted_text, "");
    }

    #[test]
    fn description_none_is_literal() {
        let parsed = parse_response("DESCRIPTION: none");
        assert_eq!(parsed.description, "none");
    }

    #[test]
    fn subject_is_truncated_by_characters() {
        let long = "é".repeat(SUBJECT_MAX_CHARS + 20);
        let input = format!("TYPE: photo\nSUBJECT: {}\n", long);
        let parsed = parse_response(&input);
        assert_eq!(parsed.subject.chars().count(), SUBJECT_MAX_CHARS);
    }

    #[test]
    fn subject_is_single_line() {
        let parsed = parse_response("TYPE: photo\nSUBJECT:\nA cat\non a mat\n");
        assert_eq!(parsed.subject, "A cat on a mat");
    }

    #[test]
    fn legacy_format_only_knows_description_and_text() {
        let input = "DESCRIPTION:\nA chart of sales.\nCATEGORY: data\n\nEXTRACTED_TEXT:\nQ1 Q2";
        let parsed = parse_response(input);
        assert_eq!(parsed.format, ResponseFormat::Legacy);
        assert_eq!(parsed.kind, "other");
        assert_eq!(parsed.category, "");
        assert_eq!(parsed.description, "A chart of sales.\nCATEGORY: data");
        assert_eq!(parsed.extracted_text, "Q1 Q2");
    }

    #[test]
    fn type_without_subject_is_legacy() {
        let parsed = parse_response("TYPE: photo\nDESCRIPTION: hi");
        assert_eq!(parsed.format, ResponseFormat::Legacy);
        assert_eq!(parsed.kind, "other");
        assert_eq!(parsed.description, "hi");
    }

    #[test]
    fn unlabelled_text_becomes_description() {
        let parsed = parse_response("  Just a plain answer.\nSecond line.  ");
        assert_eq!(parsed.description, "Just a plain answer.\nSecond line.");
        assert_eq!(parsed.kind, "other");
    }

    #[test]
    fn think_blocks_are_ignored() {
        let input = "<think>TYPE: chart</think>TYPE: photo\nSUBJECT: Dog";
        let parsed = parse_response(input);
        assert_eq!(parsed.kind, "photo");
        assert_eq!(parsed.subject, "Dog");
    }

    #[test]
    fn first_duplicate_label_wins() {
        let parsed = parse_response("TYPE: photo\nSUBJECT: First\nSUBJECT: Second");
        assert_eq!(parsed.subject, "First");
    }

    #[test]
    fn apply_overwrites_only_given_fields() {
        let mut parsed = parse_response(RICH);
        let mut corrections = std::collections::BTreeMap::new();
        corrections.insert(Field::Type, "other".to_string());
        parsed.apply(&corrections);
        assert_eq!(parsed.kind, "other");
        assert_eq!(parsed.subject, "A cat");
    }

    #[test]
    fn strip_think_tags_complete() {
        assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
    }

    #[test]
    fn strip_think_tags_incomplete() {
        assert_eq!(strip_think_tags("<think>reasoning without close"), "");
    }

    #[test]
    fn strip_think_tags_multiple() {
        let input = "<think>first</think>middle<think>second</think>end";
        assert_eq!(strip_think_tags(input), "middleend");
    }
}
