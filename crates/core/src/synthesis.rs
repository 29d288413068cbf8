//! Cited narrative answers over retrieved chunks.
//!
//! The model is asked to cite numbered documents at paragraph ends. Whatever
//! it returns is normalised afterwards: citations are renumbered by first
//! appearance, moved in front of each paragraph's closing period, and the
//! closing summary paragraph is made to carry every cited number.

use crate::error::SearchError;
use crate::models::{RetrievedHit, SourceReference, SynthesisOptions};
use crate::traits::{GenerationParams, LanguageModel};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const NO_RESULTS_MESSAGE: &str =
    "No relevant information was found in the thesis collection for this query.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub answer: String,
    pub sources: Vec<SourceReference>,
}

/// Post-processed answer plus the model's number behind each final number:
/// `order[0]` is the model number rendered as `[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitedAnswer {
    pub text: String,
    pub order: Vec<usize>,
}

pub struct CitationFormatter {
    marker: Regex,
    paragraph_break: Regex,
    space_before_punctuation: Regex,
    repeated_spaces: Regex,
}

impl CitationFormatter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            marker: Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]")?,
            paragraph_break: Regex::new(r"\n[ \t]*\n")?,
            space_before_punctuation: Regex::new(r"[ \t]+([.,;:!?])")?,
            repeated_spaces: Regex::new(r"[ \t]{2,}")?,
        })
    }

    fn numbers_in(&self, text: &str) -> Vec<usize> {
        self.marker
            .captures_iter(text)
            .flat_map(|captures| parse_numbers(&captures[1]))
            .collect()
    }

    /// Body paragraphs and, when the last paragraph is only bracketed
    /// numbers, that detached reference block.
    fn split_paragraphs<'t>(&self, raw: &'t str) -> (Vec<&'t str>, Option<&'t str>) {
        let mut paragraphs: Vec<&str> = self
            .paragraph_break
            .split(raw.trim())
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .collect();

        let is_reference_block = paragraphs.len() > 1
            && paragraphs.last().is_some_and(|last| {
                !last.chars().any(char::is_alphabetic) && self.marker.is_match(last)
            });
        let trailing = if is_reference_block {
            paragraphs.pop()
        } else {
            None
        };

        (paragraphs, trailing)
    }

    /// Drops cited numbers outside `1..=source_count`.
    pub fn retain_known(&self, raw: &str, source_count: usize) -> String {
        self.marker
            .replace_all(raw, |captures: &Captures| {
                parse_numbers(&captures[1])
                    .into_iter()
                    .filter(|number| (1..=source_count).contains(number))
                    .map(|number| format!("[{number}]"))
                    .collect::<String>()
            })
            .into_owned()
    }

    /// Numbers in `1..=source_count` never cited in a body paragraph.
    pub fn missing_references(&self, raw: &str, source_count: usize) -> Vec<usize> {
        let (body, _) = self.split_paragraphs(raw);
        let cited: HashSet<usize> = body
            .iter()
            .flat_map(|paragraph| self.numbers_in(paragraph))
            .collect();

        (1..=source_count)
            .filter(|number| !cited.contains(number))
            .collect()
    }

    /// Text without any marker, such as an inline model error, is returned as is.
    pub fn format(&self, raw: &str) -> CitedAnswer {
        if !self.marker.is_match(raw) {
            return CitedAnswer {
                text: raw.to_string(),
                order: Vec::new(),
            };
        }

        let (body, trailing) = self.split_paragraphs(raw);

        let mut renumbered: HashMap<usize, usize> = HashMap::new();
        let mut order = Vec::new();
        for paragraph in body.iter().copied().chain(trailing) {
            for number in self.numbers_in(paragraph) {
                renumbered.entry(number).or_insert_with(|| {
                    order.push(number);
                    order.len()
                });
            }
        }
        let final_number = |number: usize| renumbered.get(&number).copied().unwrap_or(number);

        let mut cited_so_far: Vec<usize> = Vec::new();
        let mut paragraphs: Vec<String> = Vec::with_capacity(body.len());
        for (position, paragraph) in body.iter().enumerate() {
            let mut references =
                unique_in_order(self.numbers_in(paragraph).into_iter().map(final_number));

            if position + 1 == body.len() {
                let trailing_refs = trailing
                    .map(|block| {
                        self.numbers_in(block)
                            .into_iter()
                            .map(final_number)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                for number in cited_so_far.iter().copied().chain(trailing_refs) {
                    if !references.contains(&number) {
                        references.push(number);
                    }
                }
            }

            for number in &references {
                if !cited_so_far.contains(number) {
                    cited_so_far.push(*number);
                }
            }
            paragraphs.push(self.place_markers(paragraph, &references));
        }

        CitedAnswer {
            text: paragraphs.join("\n\n"),
            order,
        }
    }

    fn place_markers(&self, paragraph: &str, references: &[usize]) -> String {
        if references.is_empty() && !self.marker.is_match(paragraph) {
            return paragraph.to_string();
        }

        let stripped = self.marker.replace_all(paragraph, "");
        let stripped = self
            .space_before_punctuation
            .replace_all(&stripped, "$1");
        let stripped = self.repeated_spaces.replace_all(&stripped, " ");
        let stripped = stripped.trim();

        if references.is_empty() {
            return stripped.to_string();
        }

        let markers: String = references
            .iter()
            .map(|number| format!("[{number}]"))
            .collect();

        match stripped.strip_suffix('.') {
            Some(sentence) => format!("{} {markers}.", sentence.trim_end()),
            None => format!("{stripped} {markers}"),
        }
    }
}

fn parse_numbers(list: &str) -> Vec<usize> {
    list.split(',')
        .filter_map(|number| number.trim().parse().ok())
        .collect()
}

fn unique_in_order(numbers: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut unique = Vec::new();
    for number in numbers {
        if !unique.contains(&number) {
            unique.push(number);
        }
    }
    unique
}

/// Up to `max_sources` distinct documents in first-hit order, numbered from 1,
/// with every relevant chunk that belongs to one of them.
struct SourceContext<'a> {
    documents: Vec<&'a RetrievedHit>,
    chunks: Vec<(usize, &'a str)>,
}

impl<'a> SourceContext<'a> {
    fn build(relevant: &[&'a RetrievedHit], max_sources: usize) -> Self {
        let mut numbers: HashMap<&str, usize> = HashMap::new();
        let mut documents = Vec::new();
        let mut chunks = Vec::new();

        for &hit in relevant {
            let file = hit.metadata.source_file.as_str();
            let number = match numbers.get(file).copied() {
                Some(number) => number,
                None if documents.len() < max_sources => {
                    documents.push(hit);
                    numbers.insert(file, documents.len());
                    documents.len()
                }
                None => continue,
            };
            chunks.push((number, hit.chunk_text.as_str()));
        }

        Self { documents, chunks }
    }

    fn summary_block(&self) -> String {
        self.documents
            .iter()
            .enumerate()
            .map(|(index, hit)| {
                let metadata = &hit.metadata;
                format!(
                    "[{}] Title: {}\nAuthor: {}\nYear: {}\nDegree: {}\nSubjects: {}\nAbstract: {}",
                    index + 1,
                    metadata.title,
                    metadata.author,
                    metadata.publication_year,
                    metadata.degree,
                    metadata.subjects,
                    metadata.abstract_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn chunk_block(&self) -> String {
        self.chunks
            .iter()
            .map(|(number, text)| format!("[{number}] {text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn reference(&self, number: usize, model_number: usize) -> Option<SourceReference> {
        let metadata = &self.documents.get(model_number.checked_sub(1)?)?.metadata;
        Some(SourceReference {
            number,
            title: metadata.title.clone(),
            author: metadata.author.clone(),
            publication_year: metadata.publication_year.clone(),
            file: metadata.source_file.clone(),
        })
    }

    /// Cited documents in final citation order, then the uncited ones.
    fn ranked_sources(&self, order: &[usize]) -> Vec<SourceReference> {
        let uncited = (1..=self.documents.len()).filter(|number| !order.contains(number));
        order
            .iter()
            .copied()
            .chain(uncited)
            .enumerate()
            .filter_map(|(index, model_number)| self.reference(index + 1, model_number))
            .collect()
    }
}

fn build_prompt(query: &str, context: &SourceContext<'_>) -> String {
    let count = context.documents.len();
    format!(
        "You are a research librarian answering questions from a collection of theses.\n\
         \n\
         Question: {query}\n\
         \n\
         Documents:\n{summaries}\n\
         \n\
         Relevant passages:\n{chunks}\n\
         \n\
         Write a synthesis of what these documents found, grouped by theme, in plain prose \
         paragraphs separated by blank lines. Do not use markdown, headings or bullet points. \
         Cite documents only with their reference numbers in square brackets, such as [1], placed \
         at the end of each paragraph immediately after its final period. Every document from [1] \
         to [{count}] must be cited at least once. Finish with a summary paragraph that carries all \
         cited reference numbers together at its end.",
        summaries = context.summary_block(),
        chunks = context.chunk_block(),
    )
}

fn coverage_prompt(original: &str, answer: &str, missing: &[usize]) -> String {
    let missing = missing
        .iter()
        .map(|number| format!("[{number}]"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{original}\n\nA previous answer did not cite {missing}. Rewrite it so that every \
         document is cited at least once, keeping the same rules.\n\nPrevious answer:\n{answer}"
    )
}

pub struct AnswerSynthesizer<L> {
    llm: L,
    options: SynthesisOptions,
    citations: CitationFormatter,
}

impl<L> AnswerSynthesizer<L>
where
    L: LanguageModel + Send + Sync,
{
    pub fn new(llm: L, options: SynthesisOptions) -> Result<Self, SearchError> {
        Ok(Self {
            llm,
            options,
            citations: CitationFormatter::new()?,
        })
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Never fails: model errors become an inline `[Gemini error: ...]` answer.
    pub async fn synthesize(&self, hits: &[RetrievedHit], query: &str) -> Synthesis {
        let relevant: Vec<&RetrievedHit> = hits
            .iter()
            .filter(|hit| hit.distance < self.options.relevance_threshold)
            .collect();

        if relevant.is_empty() {
            return Synthesis {
                answer: NO_RESULTS_MESSAGE.to_string(),
                sources: Vec::new(),
            };
        }

        let context = SourceContext::build(&relevant, self.options.max_sources);
        let source_count = context.documents.len();
        let prompt = build_prompt(query, &context);

        let raw = match self.generate(&prompt).await {
            Ok(text) if self.options.reprompt_on_missing => {
                self.ensure_coverage(&prompt, text, source_count).await
            }
            Ok(text) => text,
            Err(message) => message,
        };

        let cited = self
            .citations
            .format(&self.citations.retain_known(&raw, source_count));
        Synthesis {
            answer: cited.text,
            sources: context.ranked_sources(&cited.order),
        }
    }

    /// One follow-up prompt when some selected source went uncited.
    async fn ensure_coverage(&self, prompt: &str, answer: String, source_count: usize) -> String {
        let missing = self
            .citations
            .missing_references(&self.citations.retain_known(&answer, source_count), source_count);
        if missing.is_empty() {
            return answer;
        }

        match self.generate(&coverage_prompt(prompt, &answer, &missing)).await {
            Ok(rewritten) => rewritten,
            Err(message) => {
                warn!(%message, "coverage re-prompt failed, keeping first answer");
                answer
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let params = GenerationParams {
            temperature: self.options.temperature,
            max_output_tokens: self.options.max_output_tokens,
        };

        self.llm.generate(prompt, params).await.map_err(|error| {
            warn!(error = %error, "answer generation failed");
            format!("[Gemini error: {error}]")
        })
    }
}
