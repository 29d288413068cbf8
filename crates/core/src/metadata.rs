//! Pattern-driven bibliographic extraction from raw thesis text.
//!
//! Each field is resolved by an ordered list of strategies over the
//! document's lines; the first strategy that returns a value wins. Missing
//! fields come back empty rather than as errors.

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::IngestError;
use crate::models::ThesisMetadata;
use regex::Regex;

/// Non-blank lines considered title page / approval sheet material.
pub const FRONT_MATTER_LINES: usize = 60;
/// Lines scanned by the last-resort author pattern.
pub const AUTHOR_SCAN_LINES: usize = 80;
/// Minimum best-keyword similarity for the embedding pass to pick a subject.
pub const SUBJECT_SIMILARITY_THRESHOLD: f32 = 0.5;

pub const CONTROLLED_SUBJECTS: [&str; 36] = [
    "Agricultural Chemistry",
    "Agricultural Economics",
    "Agricultural Engineering",
    "Agronomy",
    "Animal Science",
    "Applied Mathematics",
    "Biochemistry",
    "Biology",
    "Botany",
    "Chemical Engineering",
    "Chemistry",
    "Civil Engineering",
    "Community Development",
    "Computer Science",
    "Development Communication",
    "Economics",
    "Entomology",
    "Environmental Science",
    "Food Science and Technology",
    "Forestry",
    "Genetics",
    "Horticulture",
    "Human Ecology",
    "Mathematics",
    "Microbiology",
    "Molecular Biology and Biotechnology",
    "Nutrition",
    "Physics",
    "Plant Breeding",
    "Plant Pathology",
    "Rural Sociology",
    "Soil Science",
    "Statistics",
    "Veterinary Medicine",
    "Wildlife Studies",
    "Zoology",
];

const LEADING_QUOTES: [char; 6] = ['"', '\'', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

struct Patterns {
    entitled: Regex,
    quoted: Regex,
    degree: Regex,
    capitalized_name: Regex,
    month_year: Regex,
    defended_on: Regex,
    bare_year: Regex,
    university: Regex,
    roman_numeral: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, IngestError> {
        const MONTHS: &str =
            "January|February|March|April|May|June|July|August|September|October|November|December";

        Ok(Self {
            entitled: Regex::new(r"(?i)\bentitled\b")?,
            quoted: Regex::new(
                "[\"\u{201c}\u{201d}]([^\"\u{201c}\u{201d}]+)[\"\u{201c}\u{201d}]|['\u{2018}\u{2019}]([^'\u{2018}\u{2019}]+)['\u{2018}\u{2019}]",
            )?,
            degree: Regex::new(r"\b(?:Master|Bachelor|Doctor) of [A-Za-z][A-Za-z ]*")?,
            capitalized_name: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z]\.)?(?:\s+[A-Z][a-z]+)+\b")?,
            month_year: Regex::new(&format!(r"\b(?:{MONTHS})\s+((?:19|20)\d{{2}})\b"))?,
            defended_on: Regex::new(&format!(
                r"(?i)\bdefended on\s+(?:{MONTHS})\s+\d{{1,2}},\s*((?:19|20)\d{{2}})\b"
            ))?,
            bare_year: Regex::new(r"\b(\d{4})\b")?,
            university: Regex::new(r"University of the \p{Lu}[\p{L} ]*")?,
            roman_numeral: Regex::new(r"(?i)^[ivxlcdm]+$")?,
        })
    }
}

/// Extracts [`ThesisMetadata`] from raw text.
///
/// Owns its compiled patterns and the embeddings of the controlled subject
/// vocabulary; both are computed once in [`MetadataExtractor::new`] and reused
/// for every document.
pub struct MetadataExtractor<E> {
    embedder: E,
    patterns: Patterns,
    subject_vectors: Vec<Vec<f32>>,
}

impl<E: Embedder> MetadataExtractor<E> {
    pub fn new(embedder: E) -> Result<Self, IngestError> {
        let names: Vec<String> = CONTROLLED_SUBJECTS.iter().map(|name| name.to_string()).collect();
        let subject_vectors = embedder.encode(&names);

        Ok(Self {
            embedder,
            patterns: Patterns::compile()?,
            subject_vectors,
        })
    }

    pub fn extract(&self, raw_text: &str) -> ThesisMetadata {
        let lines: Vec<&str> = raw_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let front = &lines[..lines.len().min(FRONT_MATTER_LINES)];
        let keywords = self.keywords(&lines);

        ThesisMetadata {
            title: self.title(front),
            author: self.author(front, &lines),
            degree: self.degree(front),
            university: self.university(front),
            call_no: call_number(&lines),
            abstract_text: abstract_text(&lines),
            publication_year: self.publication_year(front),
            subjects: self.assign_main_subject(keywords),
        }
    }

    fn title(&self, front: &[&str]) -> String {
        let found = self
            .title_after_entitled(front)
            .or_else(|| title_from_long_line(front))
            .or_else(|| front.first().map(|line| line.to_string()))
            .unwrap_or_default();

        found.trim_start_matches(LEADING_QUOTES).trim().to_string()
    }

    fn title_after_entitled(&self, front: &[&str]) -> Option<String> {
        let index = front
            .iter()
            .position(|line| self.patterns.entitled.is_match(line))?;

        let remainder = self
            .patterns
            .entitled
            .splitn(front[index], 2)
            .nth(1)
            .map(str::trim)
            .filter(|rest| self.patterns.quoted.is_match(rest));
        let following = front.iter().skip(index + 1).take(5).copied();
        let candidates: Vec<&str> = remainder.into_iter().chain(following).collect();

        let quoted = candidates.iter().find_map(|line| {
            self.patterns.quoted.captures(line).and_then(|captures| {
                captures
                    .get(1)
                    .or_else(|| captures.get(2))
                    .map(|found| found.as_str().trim().to_string())
            })
        });

        quoted.or_else(|| {
            candidates
                .iter()
                .find(|line| !line.to_lowercase().starts_with("prepared"))
                .map(|line| line.to_string())
        })
    }

    fn degree(&self, front: &[&str]) -> String {
        front
            .iter()
            .find_map(|line| self.patterns.degree.find(line))
            .map(|found| found.as_str().trim().to_string())
            .unwrap_or_default()
    }

    fn author(&self, front: &[&str], lines: &[&str]) -> String {
        author_after_by(front)
            .or_else(|| author_after_student_label(front))
            .or_else(|| {
                lines
                    .iter()
                    .take(AUTHOR_SCAN_LINES)
                    .find_map(|line| self.patterns.capitalized_name.find(line))
                    .map(|found| found.as_str().to_string())
            })
            .unwrap_or_default()
    }

    fn publication_year(&self, front: &[&str]) -> String {
        let dated = front.iter().find_map(|line| {
            self.patterns
                .month_year
                .captures(line)
                .or_else(|| self.patterns.defended_on.captures(line))
                .and_then(|captures| captures.get(1))
                .map(|year| year.as_str().to_string())
        });

        dated
            .or_else(|| {
                front.iter().rev().find_map(|line| {
                    self.patterns
                        .bare_year
                        .captures_iter(line)
                        .last()
                        .and_then(|captures| captures.get(1))
                        .map(|year| year.as_str().to_string())
                })
            })
            .unwrap_or_default()
    }

    fn university(&self, front: &[&str]) -> String {
        front
            .iter()
            .find_map(|line| self.patterns.university.find(line))
            .map(|found| found.as_str().trim().to_string())
            .unwrap_or_default()
    }

    /// Raw keyword list from the first "keywords"/"subject" line onward.
    fn keywords(&self, lines: &[&str]) -> Vec<String> {
        let Some(start) = lines.iter().position(|line| {
            let lowered = line.to_lowercase();
            lowered.starts_with("keywords") || lowered.starts_with("subject")
        }) else {
            return Vec::new();
        };

        let first = lines[start];
        let mut combined = match first.split_once(':') {
            Some((_, rest)) => rest.to_string(),
            None => first.to_string(),
        };
        for line in lines.iter().skip(start + 1) {
            if is_upper_case(line) {
                break;
            }
            combined.push('\n');
            combined.push_str(line);
        }

        combined
            .split([',', '\n'])
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| !self.patterns.roman_numeral.is_match(token))
            .map(str::to_string)
            .collect()
    }

    /// Puts a controlled subject first when one can be matched.
    ///
    /// Pass one matches by case-insensitive containment. Pass two compares
    /// embeddings and, above the similarity threshold, replaces whatever pass
    /// one chose, even a correct containment match.
    fn assign_main_subject(&self, keywords: Vec<String>) -> Vec<String> {
        let by_substring = keywords.iter().find_map(|keyword| {
            let lowered = keyword.to_lowercase();
            CONTROLLED_SUBJECTS.iter().find(|name| {
                let name = name.to_lowercase();
                lowered.contains(&name) || name.contains(&lowered)
            })
        });
        let by_similarity = self.nearest_subject(&keywords);

        match by_similarity.or(by_substring.copied()) {
            Some(main) => with_main_subject(main, &keywords),
            None => keywords,
        }
    }

    fn nearest_subject(&self, keywords: &[String]) -> Option<&'static str> {
        if keywords.is_empty() {
            return None;
        }

        let keyword_vectors = self.embedder.encode(keywords);
        let mut best: Option<(usize, f32)> = None;

        for vector in &keyword_vectors {
            for (index, subject) in self.subject_vectors.iter().enumerate() {
                let similarity = cosine_similarity(vector, subject);
                if best.map_or(true, |(_, score)| similarity > score) {
                    best = Some((index, similarity));
                }
            }
        }

        best.filter(|(_, score)| *score > SUBJECT_SIMILARITY_THRESHOLD)
            .map(|(index, _)| CONTROLLED_SUBJECTS[index])
    }
}

fn with_main_subject(main: &str, keywords: &[String]) -> Vec<String> {
    let main_lowered = main.to_lowercase();
    let mut subjects = vec![main.to_string()];
    subjects.extend(
        keywords
            .iter()
            .filter(|keyword| {
                let lowered = keyword.to_lowercase();
                !lowered.contains(&main_lowered) && !main_lowered.contains(&lowered)
            })
            .cloned(),
    );
    subjects
}

fn title_from_long_line(front: &[&str]) -> Option<String> {
    front
        .iter()
        .find(|line| line.split_whitespace().count() > 5 && !is_upper_case(line))
        .map(|line| line.to_string())
}

fn author_after_by(front: &[&str]) -> Option<String> {
    let index = front.iter().position(|line| {
        let lowered = line.to_lowercase();
        lowered == "by" || lowered.starts_with("by ")
    })?;

    let line = front[index];
    if line.eq_ignore_ascii_case("by") {
        front.get(index + 1..).and_then(|rest| {
            rest.iter()
                .take(5)
                .find(|candidate| !candidate.trim().is_empty())
                .map(|candidate| candidate.trim().to_string())
        })
    } else {
        Some(line[3..].trim().to_string()).filter(|name| !name.is_empty())
    }
}

fn author_after_student_label(front: &[&str]) -> Option<String> {
    let index = front
        .iter()
        .position(|line| line.to_lowercase().contains("name of student"))?;

    front
        .iter()
        .skip(index + 1)
        .find(|line| line.split_whitespace().count() <= 5)
        .map(|line| line.to_string())
}

fn call_number(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|line| line.to_lowercase().starts_with("call no"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn abstract_text(lines: &[&str]) -> String {
    let Some(start) = lines
        .iter()
        .position(|line| line.eq_ignore_ascii_case("abstract"))
    else {
        return String::new();
    };

    let mut body = Vec::new();
    for line in lines.iter().skip(start + 1) {
        if ends_abstract(line) {
            break;
        }
        body.push(*line);
    }

    normalize_abstract_ending(&body.join(" "))
}

fn ends_abstract(line: &str) -> bool {
    let lowered = line.to_lowercase();
    let short_heading = is_upper_case(line)
        && line.split_whitespace().count() < 8
        && !line.starts_with("KEYWORDS");

    short_heading || lowered.starts_with("keywords") || lowered.starts_with("subject")
}

/// A trailing comma becomes a period; otherwise the last comma anywhere in the
/// text does.
fn normalize_abstract_ending(text: &str) -> String {
    let text = text.trim();
    if let Some(stripped) = text.strip_suffix(',') {
        return format!("{stripped}.");
    }

    match text.rfind(',') {
        Some(position) => format!("{}.{}", &text[..position], &text[position + 1..]),
        None => text.to_string(),
    }
}

/// True when the line has letters and none of them is lower-case.
fn is_upper_case(line: &str) -> bool {
    line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase)
}
