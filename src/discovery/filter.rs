//! Taxonomy and keyword filtering
//!
//! Everything that decides whether a validated candidate is actually the
//! kind of document the crawl asked for: keyword normalization, document
//! type inference from URLs and linking pages, subject and program term
//! matching, and date extraction for source dating.

use crate::config::{CrawlConfig, FilterConfig};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Spelling/phrase aliases mapping to canonical document types
const DOC_TYPE_ALIASES: &[(&str, &str)] = &[
    ("past paper", "past_paper"),
    ("past papers", "past_paper"),
    ("specimen paper", "past_paper"),
    ("specimen papers", "past_paper"),
    ("mark scheme", "mark_scheme"),
    ("mark schemes", "mark_scheme"),
    ("markscheme", "mark_scheme"),
    ("practice test", "practice"),
    ("practice tests", "practice"),
    ("sample paper", "practice"),
    ("sample papers", "practice"),
    ("mock", "practice"),
    ("registration notice", "registration_notice"),
    ("registration", "registration_notice"),
];

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("token regex"))
}

fn full_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(19|20)\d{2}[-_/](0[1-9]|1[0-2])[-_/](0[1-9]|[12]\d|3[01])")
            .expect("date regex")
    })
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19|20)\d{2}").expect("year regex"))
}

/// Lowercases and tokenizes keywords, adding singular forms so plural
/// config keywords still match singular URLs
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    let mut push_unique = |token: String| {
        if !normalized.contains(&token) {
            normalized.push(token);
        }
    };

    for keyword in keywords {
        for token in token_regex().find_iter(&keyword.to_lowercase()) {
            let token = token.as_str().to_string();
            if token.is_empty() {
                continue;
            }
            if token == "syllabi" {
                push_unique(token.clone());
                push_unique("syllabus".to_string());
                continue;
            }
            let singular = (token.ends_with('s') && token.len() > 4)
                .then(|| token[..token.len() - 1].to_string());
            push_unique(token);
            if let Some(singular) = singular {
                push_unique(singular);
            }
        }
    }

    normalized
}

/// Canonicalizes document type names through the alias table
pub fn normalize_doc_types(types: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for value in types {
        let lowered = value.trim().to_lowercase();
        if lowered.is_empty() {
            continue;
        }
        let canonical = DOC_TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or(lowered);
        if !normalized.contains(&canonical) {
            normalized.push(canonical);
        }
    }
    normalized
}

/// The keyword-matchable portion of a URL: its path and query
pub fn keyword_value(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{} {}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// True when the value contains any normalized keyword token (or no
/// keywords were configured)
pub fn matches_keywords(value: &str, keywords: &[String]) -> bool {
    let tokens = normalize_keywords(keywords);
    if tokens.is_empty() {
        return true;
    }
    let lowered = value.to_lowercase();
    tokens.iter().any(|token| lowered.contains(token))
}

/// True when the URL extension or content type matches a requested file type
pub fn matches_file_types(url: &str, content_type: &str, file_types: &[String]) -> bool {
    if file_types.is_empty() {
        return true;
    }
    let lowered_url = url.to_lowercase();
    let lowered_type = content_type.to_lowercase();
    file_types.iter().any(|ext| {
        let ext = ext.to_lowercase();
        let ext = ext.trim_start_matches('.');
        if ext.is_empty() {
            return false;
        }
        lowered_url.contains(&format!(".{}", ext)) || lowered_type.contains(ext)
    })
}

/// Infers a human-readable title from the URL's file name
pub fn title_from_url(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    let stem = path
        .rsplit('/')
        .next()
        .unwrap_or("")
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or("").to_string());

    if stem.is_empty() {
        return "Untitled Document".to_string();
    }

    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pulls a date out of free text: full `YYYY-MM-DD`-style dates first,
/// falling back to a bare year
pub fn extract_date(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if let Some(found) = full_date_regex().find(value) {
        return Some(found.as_str().replace(['_', '/'], "-"));
    }
    year_regex()
        .find(value)
        .map(|found| found.as_str().to_string())
}

/// Infers a document type from URL text
pub fn document_type_from_url(url: &str) -> String {
    let lowered = url.to_lowercase();

    let inferred = if lowered.contains("registration") {
        "registration_notice"
    } else if lowered.contains("notice") {
        "notice"
    } else if lowered.contains("mark") && lowered.contains("scheme") {
        "mark_scheme"
    } else if lowered.contains("syllabus") {
        "syllabus"
    } else if lowered.contains("curriculum") || lowered.contains("scheme-of-work") {
        "curriculum"
    } else if lowered.contains("practice") || lowered.contains("sample") || lowered.contains("mock")
    {
        "practice"
    } else if lowered.contains("specimen") || lowered.contains("paper") {
        "past_paper"
    } else {
        "document"
    };

    inferred.to_string()
}

/// Infers a document type from the URL, falling back to the linking page
pub fn document_type_from_context(url: &str, source_url: Option<&str>) -> String {
    let doc_type = document_type_from_url(url);
    if doc_type != "document" {
        return doc_type;
    }
    if let Some(source) = source_url {
        let context_type = document_type_from_url(source);
        if context_type != "document" {
            return context_type;
        }
    }
    doc_type
}

/// Subject terms from keywords plus the taxonomy subject hint
pub fn subject_terms(filters: &FilterConfig, config: &CrawlConfig) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push_unique = |term: &str| {
        let term = term.to_string();
        if !terms.contains(&term) {
            terms.push(term);
        }
    };

    for token in normalize_keywords(&filters.keywords) {
        match token.as_str() {
            "math" | "maths" | "mathematics" => {
                push_unique("math");
                push_unique("maths");
                push_unique("mathematics");
            }
            "english" => {
                push_unique("english");
                push_unique("language-arts");
            }
            _ => {}
        }
    }

    if let Some(subject) = config.taxonomy.subject() {
        for token in normalize_keywords(&[subject]) {
            push_unique(&token);
        }
    }

    terms
}

/// Program terms from the taxonomy hint plus known program keywords
pub fn program_terms(filters: &FilterConfig, config: &CrawlConfig) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push_unique = |term: String| {
        if !terms.contains(&term) {
            terms.push(term);
        }
    };

    if let Some(program) = config.taxonomy.program() {
        for token in normalize_keywords(&[program]) {
            push_unique(token);
        }
    }

    for token in normalize_keywords(&filters.keywords) {
        if matches!(token.as_str(), "csec" | "cxc" | "ccslc" | "cape" | "sea") {
            push_unique(token);
        }
    }

    terms
}

/// Document type allowlist inferred from keywords (explicit config lists
/// override this)
pub fn doc_type_allowlist_from_keywords(keywords: &[String]) -> Vec<String> {
    let tokens = normalize_keywords(keywords);
    let has = |t: &str| tokens.iter().any(|token| token == t);

    let mut allowlist: Vec<String> = Vec::new();
    let mut push = |t: &str| {
        let t = t.to_string();
        if !allowlist.contains(&t) {
            allowlist.push(t);
        }
    };

    if has("syllabus") || has("syllabi") {
        push("syllabus");
    }
    if has("curriculum") || has("guide") {
        push("curriculum");
    }
    if has("mark") && has("scheme") {
        push("mark_scheme");
    }
    if has("paper") {
        push("past_paper");
    }
    if has("notice") || has("registration") || has("information") {
        push("document");
        push("notice");
        push("registration_notice");
    }

    allowlist
}

/// Subject match over the URL path/query and inferred title
pub fn matches_subject(
    url: &str,
    title: &str,
    subject_terms: &[String],
    program_terms: &[String],
) -> bool {
    if subject_terms.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", keyword_value(url), title).to_lowercase();
    if subject_terms.iter().any(|term| haystack.contains(term)) {
        return true;
    }
    // SEA is a whole-cohort assessment, not a single subject.
    program_terms.iter().any(|p| p == "sea")
        && (haystack.contains("sea") || haystack.contains("secondary entrance assessment"))
}

/// Program match over the URL path/query and inferred title
pub fn matches_program(url: &str, title: &str, program_terms: &[String]) -> bool {
    if program_terms.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", keyword_value(url), title).to_lowercase();
    program_terms.iter().any(|term| haystack.contains(term))
}
