use crate::taxonomy::Taxonomy;

const DEFAULT_INSTRUCTIONS: &str = "Analyze this image and answer using exactly the labelled sections below.";

const COMPARE_INSTRUCTIONS: &str = "Compare these images. Describe what they have in common, how they differ, and anything notable about each one. Answer in markdown.";

/// System prompt describing the rich answer format and vocabularies.
pub fn system_prompt(taxonomy: &Taxonomy) -> String {
    let format = [
        "TYPE: one of the allowed types",
        "SUBJECT: a short title, at most 80 characters",
        "CATEGORY: comma-separated allowed categories",
        "STYLE: visual style",
        "MOOD: overall mood",
        "MEDIUM: medium or technique",
        "COMPOSITION: framing and layout",
        "PALETTE: short description of the color palette",
        "COLORS: comma-separated dominant colors",
        "TAGS: comma-separated keywords",
        "DESCRIPTION: a detailed markdown description",
        "EXTRACTED_TEXT: all visible text verbatim, or None",
    ];

    let vocabulary = [
        ("Allowed types", &taxonomy.types),
        ("Allowed categories", &taxonomy.categories),
        ("Suggested styles", &taxonomy.styles),
        ("Suggested moods", &taxonomy.moods),
        ("Suggested mediums", &taxonomy.mediums),
        ("Suggested compositions", &taxonomy.compositions),
    ]
    .iter()
    .map(|(label, terms)| format!("{}: {}", label, terms.join(", ")))
    .collect::<Vec<_>>()
    .join("\n");

    [
        "You convert images into structured markdown notes.".to_string(),
        section("Answer format", &numbered_list(&format)),
        section("Vocabulary", &vocabulary),
        section(
            "Rules",
            "Start every section label at the beginning of a line, in upper case, followed by a colon. \
             Use only allowed types and categories. Suggested terms may be extended when nothing fits. \
             Write None for sections that do not apply.",
        ),
    ]
    .join("\n\n")
}

/// User prompt: the caller's prompt (or the default instructions) plus an
/// optional focus note.
pub fn user_prompt(custom: Option<&str>, note: Option<&str>) -> String {
    let mut prompt = match custom.map(str::trim) {
        Some(custom) if !custom.is_empty() => custom.to_string(),
        _ => DEFAULT_INSTRUCTIONS.to_string(),
    };
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(&section("Focus", note));
    }
    prompt
}

pub fn compare_prompt(filenames: &[String], note: Option<&str>) -> String {
    let listing = section("Images (in order)", &numbered_list(filenames));
    user_prompt(
        Some(&format!("{}\n\n{}", COMPARE_INSTRUCTIONS, listing)),
        note,
    )
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}
