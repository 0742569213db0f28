//! Internal worker message serde types.
//!
//! Outbound requests are built from a [`Request`]; inbound lines are split
//! into a [`ResponseEnvelope`] and then shaped into a [`WorkerResult`] by a
//! per-kind raw schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sidekick_types::{
    CompletionItem, CompletionItemKind, Definition, HoverItem, Parameter, Position, Request,
    RequestId, RequestKind, Signature, SourceText, Span, Symbol, SymbolKind, Usage, WorkerResult,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireConfig<'a> {
    pub extra_paths: &'a [String],
    pub use_snippets: bool,
    pub case_insensitive_completion: bool,
    pub show_descriptions: bool,
    pub fuzzy_matcher: bool,
}

impl<'a> WireConfig<'a> {
    pub fn new(extra_paths: &'a [String]) -> Self {
        Self {
            extra_paths,
            use_snippets: false,
            case_insensitive_completion: true,
            show_descriptions: true,
            fuzzy_matcher: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    pub id: RequestId,
    pub prefix: &'static str,
    pub lookup: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub config: WireConfig<'a>,
}

impl<'a> WireRequest<'a> {
    pub fn new(id: RequestId, request: &'a Request, extra_paths: &'a [String]) -> Self {
        let source = match request.source() {
            SourceText::Inline(text) => Some(text.as_str()),
            SourceText::OnDisk => None,
        };
        let position = request.position();
        Self {
            id,
            prefix: "",
            lookup: request.kind().lookup(),
            path: request.path().to_string_lossy().into_owned(),
            source,
            line: position.map(Position::line),
            column: position.map(Position::column),
            config: WireConfig::new(extra_paths),
        }
    }
}

/// The routing-relevant parts of one inbound line.
#[derive(Debug)]
pub(crate) struct ResponseEnvelope {
    pub id: Option<RequestId>,
    /// Non-terminal marker: the worker will answer this id again.
    pub has_arguments: bool,
    pub results: Value,
}

impl ResponseEnvelope {
    pub fn from_value(mut value: Value) -> Self {
        let id = value.get("id").and_then(Value::as_u64).map(RequestId::new);
        // Presence alone marks the answer non-terminal, whatever the value.
        let has_arguments = value.get("arguments").is_some();
        let results = value
            .get_mut("results")
            .map(Value::take)
            .filter(|r| !r.is_null())
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Self {
            id,
            has_arguments,
            results,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRange {
    start_line: u32,
    start_column: u32,
    end_line: u32,
    end_column: u32,
}

impl From<RawRange> for Span {
    fn from(raw: RawRange) -> Self {
        Span {
            start_line: raw.start_line,
            start_column: raw.start_column,
            end_line: raw.end_line,
            end_column: raw.end_column,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCompletion {
    text: String,
    #[serde(default, rename = "type")]
    type_tag: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "rightLabel")]
    right_label: String,
    #[serde(default)]
    raw_docstring: String,
}

impl RawCompletion {
    fn shape(self) -> CompletionItem {
        let detail = if self.right_label.is_empty() {
            self.description
        } else {
            self.right_label
        };
        CompletionItem {
            kind: CompletionItemKind::from_type_tag(&self.type_tag),
            label: self.text,
            detail,
            documentation: self.raw_docstring,
        }
    }
}

/// Shared schema for `definitions` and `names` results.
#[derive(Debug, Deserialize)]
struct RawLocated {
    text: String,
    #[serde(default, rename = "type")]
    type_tag: String,
    #[serde(default)]
    kind: String,
    #[serde(default, rename = "fileName")]
    file_name: String,
    #[serde(default)]
    container: String,
    #[serde(default)]
    range: RawRange,
}

impl RawLocated {
    fn symbol_kind(&self) -> SymbolKind {
        // `kind` is the refined tag when the worker knows it.
        let tag = if self.kind.is_empty() {
            &self.type_tag
        } else {
            &self.kind
        };
        SymbolKind::from_type_tag(tag)
    }

    fn into_definition(self) -> Definition {
        Definition {
            kind: self.symbol_kind(),
            name: self.text,
            file: PathBuf::from(self.file_name),
            container: self.container,
            span: self.range.into(),
        }
    }

    fn into_symbol(self) -> Symbol {
        Symbol {
            kind: self.symbol_kind(),
            name: self.text,
            file: PathBuf::from(self.file_name),
            container: self.container,
            span: self.range.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHover {
    text: String,
    #[serde(default, rename = "type")]
    type_tag: String,
    #[serde(default)]
    signature: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    docstring: String,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    name: String,
    #[serde(default, rename = "moduleName")]
    module_name: String,
    #[serde(default, rename = "fileName")]
    file_name: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    column: u32,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(default)]
    docstring: String,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    name: String,
    #[serde(default)]
    docstring: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    paramindex: Option<i64>,
    #[serde(default)]
    params: Vec<RawParameter>,
}

impl RawSignature {
    fn shape(self) -> Signature {
        let label = if self.description.is_empty() {
            self.name
        } else {
            self.description
        };
        Signature {
            label,
            documentation: self.docstring,
            active_parameter: self.paramindex.and_then(|i| u32::try_from(i).ok()),
            parameters: self
                .params
                .into_iter()
                .map(|p| Parameter {
                    name: p.name,
                    documentation: p.docstring,
                })
                .collect(),
        }
    }
}

/// Shape a worker `results` array for the request kind that asked for it.
pub(crate) fn shape(kind: RequestKind, results: Value) -> Result<WorkerResult, serde_json::Error> {
    Ok(match kind {
        RequestKind::Completions => WorkerResult::Completions(
            serde_json::from_value::<Vec<RawCompletion>>(results)?
                .into_iter()
                .map(RawCompletion::shape)
                .collect(),
        ),
        RequestKind::Definitions => WorkerResult::Definitions(
            serde_json::from_value::<Vec<RawLocated>>(results)?
                .into_iter()
                .map(RawLocated::into_definition)
                .collect(),
        ),
        RequestKind::Hover => WorkerResult::Hover(
            serde_json::from_value::<Vec<RawHover>>(results)?
                .into_iter()
                .map(|raw| HoverItem {
                    kind: CompletionItemKind::from_type_tag(&raw.type_tag),
                    name: raw.text,
                    signature: raw.signature,
                    description: raw.description,
                    documentation: raw.docstring,
                })
                .collect(),
        ),
        RequestKind::Usages => WorkerResult::Usages(
            serde_json::from_value::<Vec<RawUsage>>(results)?
                .into_iter()
                .map(|raw| Usage {
                    name: raw.name,
                    module: raw.module_name,
                    file: PathBuf::from(raw.file_name),
                    line: raw.line,
                    column: raw.column,
                })
                .collect(),
        ),
        RequestKind::Symbols => WorkerResult::Symbols(
            serde_json::from_value::<Vec<RawLocated>>(results)?
                .into_iter()
                .map(RawLocated::into_symbol)
                .collect(),
        ),
        RequestKind::Arguments => WorkerResult::Arguments(
            serde_json::from_value::<Vec<RawSignature>>(results)?
                .into_iter()
                .map(RawSignature::shape)
                .collect(),
        ),
    })
}
