use anyhow::{anyhow, Result};
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::types::{CodeSymbol, Position, SymbolKind, SymbolRange};

// ---------------------------------------------------------------------------
// AST symbol extraction.
//
// The chunker consumes this through the `SymbolExtractor` trait and treats
// any error as "no symbols" (plain-text fallback). Tree-sitter parses
// malformed input without failing, so errors here are rare.
// ---------------------------------------------------------------------------

/// Language profiles with grammar support. Unknown extensions resolve to
/// `None` and take the plain-text chunking path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageProfile {
    Rust,
    TypeScript,
    Tsx,
    Python,
}

/// Map a file extension (with or without the leading dot) to its profile.
pub fn language_for_extension(ext: &str) -> Option<LanguageProfile> {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "rs" => Some(LanguageProfile::Rust),
        // The TypeScript grammar is a superset of JavaScript.
        "ts" | "mts" | "cts" | "js" | "mjs" | "cjs" => Some(LanguageProfile::TypeScript),
        "tsx" | "jsx" => Some(LanguageProfile::Tsx),
        "py" => Some(LanguageProfile::Python),
        _ => None,
    }
}

pub trait SymbolExtractor: Send + Sync {
    /// Extract named declarations with their source ranges, ascending by
    /// position. May fail; callers fall back to text chunking.
    fn extract_symbols(&self, source: &str, language: LanguageProfile) -> Result<Vec<CodeSymbol>>;
}

pub struct TreeSitterExtractor;

impl SymbolExtractor for TreeSitterExtractor {
    fn extract_symbols(&self, source: &str, language: LanguageProfile) -> Result<Vec<CodeSymbol>> {
        let ts_language = grammar_for(language);
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| anyhow!("failed to set language: {e}"))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter parse failed"))?;
        let root = tree.root_node();

        let mut symbols = Vec::new();
        for (kind, query_src) in queries_for(language) {
            collect_query_matches(source, root, &ts_language, query_src, *kind, &mut symbols)?;
        }

        symbols.sort_by(|a, b| {
            a.content_range
                .start
                .offset
                .cmp(&b.content_range.start.offset)
                .then(a.content_range.end.offset.cmp(&b.content_range.end.offset))
        });
        Ok(symbols)
    }
}

fn grammar_for(language: LanguageProfile) -> Language {
    match language {
        LanguageProfile::Rust => tree_sitter_rust::language(),
        LanguageProfile::TypeScript => tree_sitter_typescript::language_typescript(),
        LanguageProfile::Tsx => tree_sitter_typescript::language_tsx(),
        LanguageProfile::Python => tree_sitter_python::language(),
    }
}

/// `@name` / `@def` capture pairs per symbol kind.
///
/// Function/variable patterns are anchored to the file root (or an export
/// wrapper) so method bodies are not double-reported; method patterns carry
/// their container in the pattern instead.
fn queries_for(language: LanguageProfile) -> &'static [(SymbolKind, &'static str)] {
    match language {
        LanguageProfile::Rust => &[
            (
                SymbolKind::Function,
                r#"(source_file (function_item name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Method,
                r#"(impl_item body: (declaration_list (function_item name: (identifier) @name) @def))"#,
            ),
            (
                SymbolKind::Class,
                r#"(struct_item name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Enum,
                r#"(enum_item name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Interface,
                r#"(trait_item name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Type,
                r#"(type_item name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Module,
                r#"(mod_item name: (identifier) @name) @def"#,
            ),
            (
                SymbolKind::Variable,
                r#"(source_file (const_item name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Variable,
                r#"(source_file (static_item name: (identifier) @name) @def)"#,
            ),
        ],
        LanguageProfile::TypeScript | LanguageProfile::Tsx => &[
            (
                SymbolKind::Function,
                r#"(program (function_declaration name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Function,
                r#"(export_statement declaration: (function_declaration name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Class,
                r#"(class_declaration name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Method,
                r#"(class_body (method_definition name: (property_identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Interface,
                r#"(interface_declaration name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Type,
                r#"(type_alias_declaration name: (type_identifier) @name) @def"#,
            ),
            (
                SymbolKind::Enum,
                r#"(enum_declaration name: (identifier) @name) @def"#,
            ),
            (
                SymbolKind::Variable,
                r#"(program (lexical_declaration (variable_declarator name: (identifier) @name)) @def)"#,
            ),
            (
                SymbolKind::Variable,
                r#"(export_statement declaration: (lexical_declaration (variable_declarator name: (identifier) @name)) @def)"#,
            ),
        ],
        LanguageProfile::Python => &[
            (
                SymbolKind::Function,
                r#"(module (function_definition name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Function,
                r#"(module (decorated_definition definition: (function_definition name: (identifier) @name)) @def)"#,
            ),
            (
                SymbolKind::Class,
                r#"(module (class_definition name: (identifier) @name) @def)"#,
            ),
            (
                SymbolKind::Class,
                r#"(module (decorated_definition definition: (class_definition name: (identifier) @name)) @def)"#,
            ),
            (
                SymbolKind::Method,
                r#"(class_definition body: (block (function_definition name: (identifier) @name) @def))"#,
            ),
        ],
    }
}

fn collect_query_matches(
    source: &str,
    root: Node,
    language: &Language,
    query_src: &str,
    kind: SymbolKind,
    out: &mut Vec<CodeSymbol>,
) -> Result<()> {
    let query = Query::new(language, query_src)
        .map_err(|e| anyhow!("failed to compile tree-sitter query: {e}"))?;
    let mut cursor = QueryCursor::new();

    let bytes = source.as_bytes();
    let mut matches = cursor.matches(&query, root, bytes);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut def_node: Option<Node> = None;
        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => name_node = Some(cap.node),
                "def" => def_node = Some(cap.node),
                _ => {}
            }
        }
        let (Some(name_node), Some(def_node)) = (name_node, def_node) else {
            continue;
        };
        let name = source
            .get(name_node.start_byte()..name_node.end_byte())
            .unwrap_or("")
            .trim()
            .to_string();
        if name.is_empty() {
            continue;
        }
        out.push(CodeSymbol {
            name,
            kind,
            name_range: node_range(name_node),
            content_range: node_range(def_node),
        });
    }
    Ok(())
}

fn node_range(node: Node) -> SymbolRange {
    SymbolRange {
        start: Position {
            line: node.start_position().row as u32,
            column: node.start_position().column as u32,
            offset: node.start_byte(),
        },
        end: Position {
            line: node.end_position().row as u32,
            column: node.end_position().column as u32,
            offset: node.end_byte(),
        },
    }
}
