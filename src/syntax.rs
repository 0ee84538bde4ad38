// src/syntax.rs

//! Locates functions and their executable statements in Go source files.

use crate::error::{CoverError, Result};
use std::path::Path;
use tree_sitter::{Node, Parser};

/// A source range with byte offsets and 1-based line/column positions.
/// The end position points just past the last byte of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub start_offset: usize,
    pub start_line: usize,
    pub start_col: usize,
    pub end_offset: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Extent {
    fn of(node: Node<'_>) -> Extent {
        Extent::between(node, node)
    }

    /// From the start of `first` to the end of `last`.
    fn between(first: Node<'_>, last: Node<'_>) -> Extent {
        let start = first.start_position();
        let end = last.end_position();
        Extent {
            start_offset: first.start_byte(),
            start_line: start.row + 1,
            start_col: start.column + 1,
            end_offset: last.end_byte(),
            end_line: end.row + 1,
            end_col: end.column + 1,
        }
    }
}

/// A function declaration, method or literal found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncExtent {
    pub name: String,
    pub extent: Extent,
    /// Simple statements of the body in document order.
    pub statements: Vec<Extent>,
    /// Bodies of the control constructs in the function. An `else` branch
    /// starts at its `else` keyword. These carry no coverage of their own;
    /// they let line-level output attribute a branch body to its construct,
    /// and the mapper reports how many it saw per file.
    pub blocks: Vec<Extent>,
}

/// How a statement node is handled while collecting statements.
enum StmtKind<'t> {
    /// Recorded as a statement.
    Simple,
    /// A nested `{ ... }` block.
    Block(Node<'t>),
    If {
        consequence: Option<Node<'t>>,
        alternative: Option<ElseBranch<'t>>,
    },
    Loop {
        body: Option<Node<'t>>,
    },
    /// Expression switches, type switches and selects; bodies live in clauses.
    Switch(Node<'t>),
    Labeled {
        statement: Option<Node<'t>>,
    },
    Ignored,
}

struct ElseBranch<'t> {
    keyword: Option<Node<'t>>,
    branch: Node<'t>,
}

const FUNCTION_KINDS: &[&str] = &["function_declaration", "method_declaration", "func_literal"];

const CLAUSE_KINDS: &[&str] = &["expression_case", "type_case", "communication_case", "default_case"];

fn classify(node: Node<'_>) -> StmtKind<'_> {
    match node.kind() {
        "expression_statement"
        | "send_statement"
        | "inc_statement"
        | "dec_statement"
        | "assignment_statement"
        | "short_var_declaration"
        | "return_statement"
        | "go_statement"
        | "defer_statement"
        | "fallthrough_statement"
        | "break_statement"
        | "continue_statement"
        | "goto_statement"
        | "const_declaration"
        | "var_declaration"
        | "type_declaration" => StmtKind::Simple,
        "block" => StmtKind::Block(node),
        "if_statement" => {
            let alternative = node.child_by_field_name("alternative").map(|branch| {
                let mut cursor = node.walk();
                let keyword = node
                    .children(&mut cursor)
                    .filter(|child| child.kind() == "else" && child.end_byte() <= branch.start_byte())
                    .last();
                ElseBranch { keyword, branch }
            });
            StmtKind::If {
                consequence: node.child_by_field_name("consequence"),
                alternative,
            }
        }
        "for_statement" => StmtKind::Loop {
            body: node.child_by_field_name("body"),
        },
        "expression_switch_statement" | "type_switch_statement" | "select_statement" => StmtKind::Switch(node),
        "labeled_statement" => {
            let mut cursor = node.walk();
            let statement = node
                .named_children(&mut cursor)
                .filter(|child| !matches!(child.kind(), "label_name" | "comment"))
                .last();
            StmtKind::Labeled { statement }
        }
        _ => StmtKind::Ignored,
    }
}

/// Named children that are not attached to a grammar field, with
/// `statement_list` wrappers flattened away.
fn statement_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return out;
    }
    loop {
        let child = cursor.node();
        if child.is_named() && cursor.field_name().is_none() {
            if child.kind() == "statement_list" {
                out.extend(statement_children(child));
            } else {
                out.push(child);
            }
        }
        if !cursor.goto_next_sibling() {
            break;
        }
    }
    out
}

struct StatementCollector<'a> {
    function: &'a mut FuncExtent,
}

impl StatementCollector<'_> {
    fn visit_list(&mut self, statements: &[Node<'_>]) {
        for &statement in statements {
            self.visit(statement);
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        match classify(node) {
            StmtKind::Simple => self.function.statements.push(Extent::of(node)),
            StmtKind::Block(block) => self.visit_list(&statement_children(block)),
            StmtKind::If {
                consequence,
                alternative,
            } => {
                if let Some(body) = consequence {
                    self.visit_body(body, Extent::of(body));
                }
                if let Some(ElseBranch { keyword, branch }) = alternative {
                    // The branch is reported as starting at `else`, whether it
                    // is a plain block or a chained `if`.
                    let span = Extent::between(keyword.unwrap_or(branch), branch);
                    self.function.blocks.push(span);
                    if branch.kind() == "block" {
                        self.visit_list(&statement_children(branch));
                    } else {
                        self.visit(branch);
                    }
                }
            }
            StmtKind::Loop { body } => {
                if let Some(body) = body {
                    self.visit_body(body, Extent::of(body));
                }
            }
            StmtKind::Switch(switch) => {
                let mut cursor = switch.walk();
                let clauses: Vec<Node<'_>> = switch
                    .named_children(&mut cursor)
                    .filter(|child| CLAUSE_KINDS.contains(&child.kind()))
                    .collect();
                for clause in clauses {
                    self.visit_body(clause, Extent::of(clause));
                }
            }
            StmtKind::Labeled { statement } => {
                if let Some(statement) = statement {
                    self.visit(statement);
                }
            }
            StmtKind::Ignored => {}
        }
    }

    fn visit_body(&mut self, body: Node<'_>, span: Extent) {
        self.function.blocks.push(span);
        self.visit_list(&statement_children(body));
    }
}

/// Receiver type name with pointers and parentheses removed, e.g. `T` for
/// `(*T)` and `List[K,V]` for `*List[K, V]`.
fn receiver_type_name(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .trim_start_matches(|c| c == '(' || c == '*')
        .trim_end_matches(')')
        .to_string()
}

fn function_name(node: Node<'_>, source: &[u8], extent: &Extent) -> String {
    let text = |n: Node<'_>| n.utf8_text(source).unwrap_or_default().to_string();
    match node.kind() {
        "function_declaration" => node.child_by_field_name("name").map(text).unwrap_or_default(),
        "method_declaration" => {
            let name = node.child_by_field_name("name").map(text).unwrap_or_default();
            let receiver = node.child_by_field_name("receiver").and_then(|receiver| {
                let mut cursor = receiver.walk();
                let parameter = receiver
                    .named_children(&mut cursor)
                    .find(|child| child.kind() == "parameter_declaration");
                parameter.and_then(|p| p.child_by_field_name("type"))
            });
            match receiver {
                Some(ty) => format!("{}.{}", receiver_type_name(&text(ty)), name),
                None => name,
            }
        }
        _ => format!("@{}:{}", extent.start_line, extent.start_col),
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error() || child.is_missing())
        .find_map(first_error)
}

/// Go parser producing [`FuncExtent`]s.
pub struct SyntaxWalker {
    parser: Parser,
}

impl SyntaxWalker {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| CoverError::Parse {
                path: Default::default(),
                message: format!("failed to load Go grammar: {e}"),
            })?;
        Ok(SyntaxWalker { parser })
    }

    /// Parses `path` and returns its functions in document order.
    pub fn parse_functions(&mut self, path: &Path) -> Result<Vec<FuncExtent>> {
        let source = std::fs::read(path).map_err(|e| CoverError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.parse_source(path, &source)
    }

    /// Parses already loaded source. `path` is only used in errors.
    pub fn parse_source(&mut self, path: &Path, source: &[u8]) -> Result<Vec<FuncExtent>> {
        let parse_error = |message: String| CoverError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| parse_error("parser returned no tree".to_string()))?;
        let root = tree.root_node();
        if root.has_error() {
            let at = first_error(root).unwrap_or(root).start_position();
            return Err(parse_error(format!(
                "syntax error at {}:{}",
                at.row + 1,
                at.column + 1
            )));
        }

        let mut functions = Vec::new();
        // Pre-order walk so nested literals follow their enclosing function.
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if FUNCTION_KINDS.contains(&node.kind()) {
                if let Some(body) = node.child_by_field_name("body") {
                    let extent = Extent::of(node);
                    let mut function = FuncExtent {
                        name: function_name(node, source, &extent),
                        extent,
                        statements: Vec::new(),
                        blocks: Vec::new(),
                    };
                    StatementCollector {
                        function: &mut function,
                    }
                    .visit_list(&statement_children(body));
                    functions.push(function);
                }
            }
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        Ok(functions)
    }
}
