//! Turning downloaded file bytes into clean texts ready for splitting.

use std::sync::LazyLock;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Filter, FilterT, Native, RcIter};
use jaq_json::Val;
use regex::Regex;
use serde_json::Value;

use super::IngestError;

/// How the downloaded body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A single JSON document.
    Json,
    /// One JSON document per line.
    JsonLines,
    /// Anything else, decoded as UTF-8 text.
    Text,
}

/// Pick the source kind from the URL path extension, then the content type.
pub fn detect_source_kind(url: &str, content_type: Option<&str>) -> SourceKind {
    let path = reqwest::Url::parse(url)
        .map(|parsed| parsed.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());

    if path.ends_with(".jsonl") || path.ends_with(".ndjson") {
        return SourceKind::JsonLines;
    }
    if path.ends_with(".json") {
        return SourceKind::Json;
    }
    match content_type.map(str::to_ascii_lowercase) {
        Some(value) if value.contains("ndjson") || value.contains("jsonl") => SourceKind::JsonLines,
        Some(value) if value.contains("application/json") => SourceKind::Json,
        _ => SourceKind::Text,
    }
}

/// Extract the texts to split from a decoded body.
///
/// JSON documents run through `jq_schema` when one is given; without it each document is a
/// single text.
pub fn extract_texts(
    kind: SourceKind,
    body: &str,
    jq_schema: Option<&str>,
) -> Result<Vec<String>, IngestError> {
    if kind == SourceKind::Text {
        return Ok(vec![body.to_string()]);
    }

    let program = jq_schema
        .map(str::trim)
        .filter(|schema| !schema.is_empty())
        .map(JqProgram::compile)
        .transpose()?;
    let select = |document: Value| match &program {
        Some(program) => program.run(document),
        None => Ok(render(document).into_iter().collect()),
    };

    match kind {
        SourceKind::JsonLines => {
            let mut texts = Vec::new();
            for line in body.lines().filter(|line| !line.trim().is_empty()) {
                texts.extend(select(serde_json::from_str(line)?)?);
            }
            Ok(texts)
        }
        _ => select(serde_json::from_str(body)?),
    }
}

/// A compiled `jqSchema` program, run once per JSON document.
struct JqProgram {
    code: String,
    filter: Filter<Native<Val>>,
}

impl JqProgram {
    fn compile(code: &str) -> Result<Self, IngestError> {
        let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
        let arena = Arena::default();
        let modules = loader
            .load(&arena, File { code, path: () })
            .map_err(|errors| {
                IngestError::JqSchema(format!("{code}: {} syntax error(s)", errors.len()))
            })?;
        let filter = Compiler::default()
            .with_funs(jaq_std::funs().chain(jaq_json::funs()))
            .compile(modules)
            .map_err(|errors| {
                IngestError::JqSchema(format!("{code}: {} undefined name(s)", errors.len()))
            })?;
        Ok(Self {
            code: code.to_string(),
            filter,
        })
    }

    fn run(&self, document: Value) -> Result<Vec<String>, IngestError> {
        let inputs = RcIter::new(core::iter::empty());
        let mut texts = Vec::new();
        for output in self
            .filter
            .run((Ctx::new([], &inputs), Val::from(document)))
        {
            let value = output.map_err(|_| {
                IngestError::JqSchema(format!("{}: evaluation failed", self.code))
            })?;
            texts.extend(render(Value::from(value)));
        }
        Ok(texts)
    }
}

fn render(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Collapse runs of horizontal whitespace and of three or more newlines.
pub const RULE_REPLACE_WHITESPACE: &str = "replace-consecutive-whitespace";
/// Drop links and e-mail addresses.
pub const RULE_REMOVE_URLS_EMAILS: &str = "remove-urls-emails";

static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r]+").expect("whitespace pattern"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("newline pattern"));
// Brackets, quotes and trailing punctuation stay with the surrounding prose.
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?://|www\.)[^\s<>()\[\]{}"']*[^\s<>()\[\]{}"'.,;:!?]"#)
        .expect("url pattern")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
        .expect("email pattern")
});

/// Apply pre-process rules in the order given. Unknown rule ids are ignored.
pub fn apply_pre_process_rules(text: &str, rules: &[String]) -> String {
    let mut output = text.to_string();
    for rule in rules {
        output = match rule.as_str() {
            RULE_REPLACE_WHITESPACE => {
                let collapsed = HORIZONTAL_WHITESPACE.replace_all(&output, " ");
                EXCESS_NEWLINES.replace_all(&collapsed, "\n\n").into_owned()
            }
            RULE_REMOVE_URLS_EMAILS => {
                let without_urls = URL.replace_all(&output, "");
                EMAIL.replace_all(&without_urls, "").into_owned()
            }
            unknown => {
                tracing::warn!(rule = unknown, "Ignoring unknown pre-process rule");
                output
            }
        };
    }
    output
}
