//! Shaped worker results, one variant per request kind.
//!
//! The worker reports a free-form `type` tag per item. The lookup tables here
//! normalize those tags into closed enums so callers never inspect raw JSON.

use std::path::PathBuf;

use serde::Serialize;

use crate::request::RequestKind;

/// Normalized completion item classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionItemKind {
    Value,
    Class,
    Function,
    Module,
    File,
    Property,
    Reference,
    Keyword,
    Constant,
    Variable,
}

impl CompletionItemKind {
    /// Map a worker type tag. Unknown tags classify as [`Self::Keyword`].
    #[must_use]
    pub fn from_type_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "none" | "value" => Self::Value,
            "type" | "class" | "tuple" | "dict" | "list" | "object" => Self::Class,
            "function" | "method" | "lambda" => Self::Function,
            "module" => Self::Module,
            "file" => Self::File,
            "property" | "attribute" => Self::Property,
            "import" => Self::Reference,
            "constant" => Self::Constant,
            "variable" | "param" | "instance" => Self::Variable,
            _ => Self::Keyword,
        }
    }
}

/// Normalized document symbol classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Function,
    Method,
    Module,
    Property,
    Constant,
    Variable,
}

impl SymbolKind {
    /// Map a worker type tag. Unknown tags classify as [`Self::Variable`].
    #[must_use]
    pub fn from_type_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "class" | "type" => Self::Class,
            "function" | "lambda" => Self::Function,
            "method" => Self::Method,
            "module" | "import" => Self::Module,
            "property" | "attribute" => Self::Property,
            "constant" => Self::Constant,
            _ => Self::Variable,
        }
    }
}

/// A source span, 0-indexed, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionItemKind,
    pub detail: String,
    pub documentation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Definition {
    pub name: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub container: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoverItem {
    pub name: String,
    pub kind: CompletionItemKind,
    pub signature: String,
    pub description: String,
    pub documentation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub name: String,
    pub module: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub container: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub documentation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub label: String,
    pub documentation: String,
    pub active_parameter: Option<u32>,
    pub parameters: Vec<Parameter>,
}

/// A shaped response. The variant always matches the request kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum WorkerResult {
    Completions(Vec<CompletionItem>),
    Definitions(Vec<Definition>),
    Hover(Vec<HoverItem>),
    Usages(Vec<Usage>),
    Symbols(Vec<Symbol>),
    Arguments(Vec<Signature>),
}

impl WorkerResult {
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Completions(_) => RequestKind::Completions,
            Self::Definitions(_) => RequestKind::Definitions,
            Self::Hover(_) => RequestKind::Hover,
            Self::Usages(_) => RequestKind::Usages,
            Self::Symbols(_) => RequestKind::Symbols,
            Self::Arguments(_) => RequestKind::Arguments,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Completions(items) => items.len(),
            Self::Definitions(items) => items.len(),
            Self::Hover(items) => items.len(),
            Self::Usages(items) => items.len(),
            Self::Symbols(items) => items.len(),
            Self::Arguments(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_kind_known_tags() {
        assert_eq!(
            CompletionItemKind::from_type_tag("function"),
            CompletionItemKind::Function
        );
        assert_eq!(
            CompletionItemKind::from_type_tag("class"),
            CompletionItemKind::Class
        );
        assert_eq!(
            CompletionItemKind::from_type_tag("Module"),
            CompletionItemKind::Module
        );
        assert_eq!(
            CompletionItemKind::from_type_tag("param"),
            CompletionItemKind::Variable
        );
        assert_eq!(
            CompletionItemKind::from_type_tag("statement"),
            CompletionItemKind::Keyword
        );
    }

    #[test]
    fn completion_kind_unknown_tag_defaults_to_keyword() {
        assert_eq!(
            CompletionItemKind::from_type_tag("gizmo"),
            CompletionItemKind::Keyword
        );
        assert_eq!(
            CompletionItemKind::from_type_tag(""),
            CompletionItemKind::Keyword
        );
    }

    #[test]
    fn symbol_kind_unknown_tag_defaults_to_variable() {
        assert_eq!(SymbolKind::from_type_tag("method"), SymbolKind::Method);
        assert_eq!(SymbolKind::from_type_tag("statement"), SymbolKind::Variable);
    }

    #[test]
    fn worker_result_reports_its_kind() {
        let result = WorkerResult::Usages(vec![]);
        assert_eq!(result.kind(), RequestKind::Usages);
        assert!(result.is_empty());
    }

    #[test]
    fn worker_result_serializes_tagged() {
        let result = WorkerResult::Completions(vec![CompletionItem {
            label: "foo".to_string(),
            kind: CompletionItemKind::Function,
            detail: String::new(),
            documentation: String::new(),
        }]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "completions");
        assert_eq!(json["items"][0]["kind"], "function");
    }
}
