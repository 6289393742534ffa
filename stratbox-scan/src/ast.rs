//! Lightweight syntax tree for Python-style strategy scripts.
//!
//! This is not a full language frontend. It tokenizes the source, groups
//! tokens into logical lines (brackets suppress line breaks), and parses each
//! statement into tagged-variant nodes that are enough for structural threat
//! analysis: imports, dotted call chains, string literals, concatenations.
//! The parser is tolerant; only unterminated strings and unbalanced brackets
//! count as parse failures.

use serde::{Deserialize, Serialize};

/// Parse failure. Malformed input is suspicious but must not crash the scan.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated string literal starting at line {0}")]
    UnterminatedString(u32),

    #[error("unbalanced brackets (depth {0} at end of input)")]
    UnbalancedBrackets(i32),
}

/// Tagged-variant syntax tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// `import x` or `from x import y` (module recorded, names dropped)
    Import { module: String, line: u32, col: u32 },

    /// Call with a dotted callee path, e.g. `os.system(...)` -> ["os","system"]
    Call {
        path: Vec<String>,
        args: Vec<AstNode>,
        line: u32,
        /// Column of the callee start, 1-based
        col: u32,
    },

    /// Dotted attribute access without a call
    Attribute { path: Vec<String>, line: u32 },

    /// Bare name reference
    Name { id: String, line: u32 },

    /// String literal (escape sequences resolved where simple)
    StringLit { value: String, line: u32 },

    /// Numeric literal
    Number { line: u32 },

    /// Binary operation; `+` between strings is what the heuristics count
    BinOp {
        op: char,
        left: Box<AstNode>,
        right: Box<AstNode>,
        line: u32,
    },

    /// Assignment `target = value`
    Assign {
        target: String,
        value: Box<AstNode>,
        line: u32,
    },

    /// Function or class definition header
    FnDef { name: String, line: u32 },

    /// List/tuple/dict display; children are the element expressions
    Collection { items: Vec<AstNode>, line: u32 },

    /// Anything the parser does not model
    Other { line: u32 },
}

impl AstNode {
    /// Depth-first walk over this node and every child.
    pub fn walk(&self, f: &mut impl FnMut(&AstNode)) {
        f(self);
        match self {
            AstNode::Call { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            AstNode::BinOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            AstNode::Assign { value, .. } => value.walk(f),
            AstNode::Collection { items, .. } => {
                for item in items {
                    item.walk(f);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Number,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eq,
    Op(char),
    Newline,
}

struct Token {
    tok: Tok,
    line: u32,
    col: u32,
}

/// Parse a code unit into a flat statement list.
pub fn parse(source: &str) -> Result<Vec<AstNode>, ParseError> {
    let tokens = tokenize(source)?;
    let mut statements = Vec::new();
    let mut cursor = 0;

    while cursor < tokens.len() {
        // Skip blank lines
        if tokens[cursor].tok == Tok::Newline {
            cursor += 1;
            continue;
        }
        let end = line_end(&tokens, cursor);
        parse_statement(&tokens[cursor..end], &mut statements);
        cursor = end + 1;
    }

    Ok(statements)
}

fn line_end(tokens: &[Token], start: usize) -> usize {
    let mut i = start;
    while i < tokens.len() && tokens[i].tok != Tok::Newline {
        i += 1;
    }
    i
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut col: u32 = 1;
    let mut depth: i32 = 0;

    while let Some(c) = chars.next() {
        let tok_line = line;
        let tok_col = col;
        col += 1;
        match c {
            '\n' => {
                line += 1;
                col = 1;
                // Brackets suppress logical line breaks
                if depth == 0 {
                    tokens.push(Token {
                        tok: Tok::Newline,
                        line: tok_line,
                        col: tok_col,
                    });
                }
            }
            ' ' | '\t' | '\r' => {}
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        col = 1;
                        if depth == 0 {
                            tokens.push(Token {
                                tok: Tok::Newline,
                                line: tok_line,
                                col: tok_col,
                            });
                        }
                        break;
                    }
                }
            }
            '\\' => {
                // Line continuation: swallow the following newline
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    line += 1;
                    col = 1;
                }
            }
            '\'' | '"' => {
                let value = read_string(&mut chars, c, &mut line, &mut col)
                    .ok_or(ParseError::UnterminatedString(tok_line))?;
                tokens.push(Token {
                    tok: Tok::Str(value),
                    line: tok_line,
                    col: tok_col,
                });
            }
            '(' => {
                depth += 1;
                tokens.push(Token {
                    tok: Tok::LParen,
                    line: tok_line,
                    col: tok_col,
                });
            }
            ')' => {
                depth -= 1;
                tokens.push(Token {
                    tok: Tok::RParen,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '[' => {
                depth += 1;
                tokens.push(Token {
                    tok: Tok::LBracket,
                    line: tok_line,
                    col: tok_col,
                });
            }
            ']' => {
                depth -= 1;
                tokens.push(Token {
                    tok: Tok::RBracket,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '{' => {
                depth += 1;
                tokens.push(Token {
                    tok: Tok::LBrace,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '}' => {
                depth -= 1;
                tokens.push(Token {
                    tok: Tok::RBrace,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '.' => tokens.push(Token {
                tok: Tok::Dot,
                line: tok_line,
                col: tok_col,
            }),
            ',' => tokens.push(Token {
                tok: Tok::Comma,
                line: tok_line,
                col: tok_col,
            }),
            '=' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    col += 1;
                    tokens.push(Token {
                        tok: Tok::Op('='),
                        line: tok_line,
                        col: tok_col,
                    });
                } else {
                    tokens.push(Token {
                        tok: Tok::Eq,
                        line: tok_line,
                        col: tok_col,
                    });
                }
            }
            c if c.is_ascii_digit() => {
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '.' || next == '_' {
                        chars.next();
                        col += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    tok: Tok::Number,
                    line: tok_line,
                    col: tok_col,
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                ident.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                        col += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    tok: Tok::Ident(ident),
                    line: tok_line,
                    col: tok_col,
                });
            }
            other => tokens.push(Token {
                tok: Tok::Op(other),
                line: tok_line,
                col: tok_col,
            }),
        }
    }

    if depth != 0 {
        return Err(ParseError::UnbalancedBrackets(depth));
    }
    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
    line: &mut u32,
    col: &mut u32,
) -> Option<String> {
    // Detect triple quotes
    let mut triple = false;
    if chars.peek() == Some(&quote) {
        chars.next();
        *col += 1;
        if chars.peek() == Some(&quote) {
            chars.next();
            *col += 1;
            triple = true;
        } else {
            // Empty string
            return Some(String::new());
        }
    }

    let mut value = String::new();
    loop {
        let c = chars.next()?;
        *col += 1;
        if c == '\n' {
            *line += 1;
            *col = 1;
            if !triple {
                return None;
            }
            value.push(c);
            continue;
        }
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                *col += 1;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    _ => value.push(escaped),
                }
            }
            continue;
        }
        if c == quote {
            if !triple {
                return Some(value);
            }
            // Need two more closing quotes
            if chars.peek() == Some(&quote) {
                chars.next();
                *col += 1;
                if chars.peek() == Some(&quote) {
                    chars.next();
                    *col += 1;
                    return Some(value);
                }
                value.push(quote);
            }
            value.push(quote);
            continue;
        }
        value.push(c);
    }
}

const STATEMENT_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "in", "return", "with", "as", "try", "except",
    "finally", "raise", "assert", "print", "pass", "break", "continue", "not", "and", "or",
    "lambda", "yield", "del", "global", "nonlocal", "is", "await", "async",
];

fn parse_statement(tokens: &[Token], out: &mut Vec<AstNode>) {
    if tokens.is_empty() {
        return;
    }
    let line = tokens[0].line;

    if let Tok::Ident(head) = &tokens[0].tok {
        match head.as_str() {
            "import" => {
                parse_import_list(&tokens[1..], line, out);
                return;
            }
            "from" => {
                // `from a.b import x` flags the module itself
                let mut module = String::new();
                let mut i = 1;
                while i < tokens.len() {
                    match &tokens[i].tok {
                        Tok::Ident(part) if part == "import" => break,
                        Tok::Ident(part) => module.push_str(part),
                        Tok::Dot => module.push('.'),
                        _ => break,
                    }
                    i += 1;
                }
                if !module.is_empty() {
                    let col = tokens[0].col;
                    out.push(AstNode::Import { module, line, col });
                }
                return;
            }
            "def" | "class" => {
                if let Some(Tok::Ident(name)) = tokens.get(1).map(|t| &t.tok) {
                    out.push(AstNode::FnDef {
                        name: name.clone(),
                        line,
                    });
                }
                // Default argument expressions on the header line still count
                let mut cursor = 2;
                while cursor < tokens.len() {
                    let (node, next) = parse_expr(tokens, cursor);
                    if let Some(node) = node {
                        out.push(node);
                    }
                    cursor = next.max(cursor + 1);
                }
                return;
            }
            _ => {}
        }
    }

    // Assignment: `name = expr` (single plain target only)
    if tokens.len() >= 3 {
        if let (Tok::Ident(target), Tok::Eq) = (&tokens[0].tok, &tokens[1].tok) {
            if !STATEMENT_KEYWORDS.contains(&target.as_str()) {
                let (value, mut cursor) = parse_expr(tokens, 2);
                let value = value.unwrap_or(AstNode::Other { line });
                out.push(AstNode::Assign {
                    target: target.clone(),
                    value: Box::new(value),
                    line,
                });
                // Trailing expressions (e.g. tuple rhs) are still scanned
                while cursor < tokens.len() {
                    let (node, next) = parse_expr(tokens, cursor);
                    if let Some(node) = node {
                        out.push(node);
                    }
                    cursor = next.max(cursor + 1);
                }
                return;
            }
        }
    }

    // Everything else: scan the line for expressions, skipping keywords and
    // punctuation the expression grammar does not start with.
    let mut cursor = 0;
    while cursor < tokens.len() {
        if let Tok::Ident(word) = &tokens[cursor].tok {
            if STATEMENT_KEYWORDS.contains(&word.as_str()) {
                cursor += 1;
                continue;
            }
        }
        let (node, next) = parse_expr(tokens, cursor);
        if let Some(node) = node {
            out.push(node);
        }
        cursor = next.max(cursor + 1);
    }
}

fn parse_import_list(tokens: &[Token], line: u32, out: &mut Vec<AstNode>) {
    let mut module = String::new();
    let mut col = 1;
    let mut skip_alias = false;
    for token in tokens {
        match &token.tok {
            Tok::Ident(part) if part == "as" => skip_alias = true,
            Tok::Ident(part) if !skip_alias => {
                if module.is_empty() {
                    col = token.col;
                }
                module.push_str(part);
            }
            Tok::Dot if !skip_alias => module.push('.'),
            Tok::Comma => {
                if !module.is_empty() {
                    out.push(AstNode::Import {
                        module: std::mem::take(&mut module),
                        line,
                        col,
                    });
                }
                skip_alias = false;
            }
            _ => {}
        }
    }
    if !module.is_empty() {
        out.push(AstNode::Import { module, line, col });
    }
}

/// Parse one expression starting at `cursor`; returns the node (if the tokens
/// formed one) and the index of the first unconsumed token.
fn parse_expr(tokens: &[Token], cursor: usize) -> (Option<AstNode>, usize) {
    let (left, mut cursor) = parse_postfix(tokens, cursor);
    let Some(mut node) = left else {
        return (None, cursor);
    };

    // Left-associative binary chain; only the operator identity matters
    while cursor < tokens.len() {
        let op = match &tokens[cursor].tok {
            Tok::Op(c @ ('+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '&' | '|')) => *c,
            _ => break,
        };
        let line = tokens[cursor].line;
        let (right, next) = parse_postfix(tokens, cursor + 1);
        let Some(right) = right else {
            cursor += 1;
            break;
        };
        node = AstNode::BinOp {
            op,
            left: Box::new(node),
            right: Box::new(right),
            line,
        };
        cursor = next;
    }

    (Some(node), cursor)
}

fn parse_postfix(tokens: &[Token], cursor: usize) -> (Option<AstNode>, usize) {
    let start_col = tokens.get(cursor).map_or(1, |t| t.col);
    let (primary, mut cursor) = parse_primary(tokens, cursor);
    let Some(mut node) = primary else {
        return (None, cursor);
    };

    loop {
        match tokens.get(cursor).map(|t| &t.tok) {
            Some(Tok::Dot) => {
                if let Some(Tok::Ident(attr)) = tokens.get(cursor + 1).map(|t| &t.tok) {
                    let line = tokens[cursor].line;
                    let path = match node {
                        AstNode::Name { id, .. } => vec![id, attr.clone()],
                        AstNode::Attribute { mut path, .. } => {
                            path.push(attr.clone());
                            path
                        }
                        // Attribute on a call result or literal: restart path
                        _ => vec![attr.clone()],
                    };
                    node = AstNode::Attribute { path, line };
                    cursor += 2;
                } else {
                    cursor += 1;
                    break;
                }
            }
            Some(Tok::LParen) => {
                let line = tokens[cursor].line;
                let (args, next) = parse_elements(tokens, cursor + 1, &Tok::RParen);
                let path = match node {
                    AstNode::Name { id, .. } => vec![id],
                    AstNode::Attribute { path, .. } => path,
                    _ => Vec::new(),
                };
                node = AstNode::Call {
                    path,
                    args,
                    line,
                    col: start_col,
                };
                cursor = next;
            }
            Some(Tok::LBracket) => {
                // Subscript: keep the indexed expressions as children
                let line = tokens[cursor].line;
                let (items, next) = parse_elements(tokens, cursor + 1, &Tok::RBracket);
                node = AstNode::Collection {
                    items: std::iter::once(node).chain(items).collect(),
                    line,
                };
                cursor = next;
            }
            _ => break,
        }
    }

    (Some(node), cursor)
}

fn parse_primary(tokens: &[Token], cursor: usize) -> (Option<AstNode>, usize) {
    let Some(token) = tokens.get(cursor) else {
        return (None, cursor);
    };
    let line = token.line;
    match &token.tok {
        Tok::Str(value) => (
            Some(AstNode::StringLit {
                value: value.clone(),
                line,
            }),
            cursor + 1,
        ),
        Tok::Number => (Some(AstNode::Number { line }), cursor + 1),
        Tok::Ident(id) if !STATEMENT_KEYWORDS.contains(&id.as_str()) => (
            Some(AstNode::Name {
                id: id.clone(),
                line,
            }),
            cursor + 1,
        ),
        Tok::LParen => {
            let (items, next) = parse_elements(tokens, cursor + 1, &Tok::RParen);
            match items.len() {
                0 => (Some(AstNode::Other { line }), next),
                1 => (Some(items.into_iter().next().unwrap()), next),
                _ => (Some(AstNode::Collection { items, line }), next),
            }
        }
        Tok::LBracket => {
            let (items, next) = parse_elements(tokens, cursor + 1, &Tok::RBracket);
            (Some(AstNode::Collection { items, line }), next)
        }
        Tok::LBrace => {
            let (items, next) = parse_elements(tokens, cursor + 1, &Tok::RBrace);
            (Some(AstNode::Collection { items, line }), next)
        }
        _ => (None, cursor + 1),
    }
}

/// Parse comma-separated expressions up to (and consuming) `close`.
fn parse_elements(tokens: &[Token], mut cursor: usize, close: &Tok) -> (Vec<AstNode>, usize) {
    let mut items = Vec::new();
    while cursor < tokens.len() {
        if &tokens[cursor].tok == close {
            return (items, cursor + 1);
        }
        if tokens[cursor].tok == Tok::Comma {
            cursor += 1;
            continue;
        }
        let (node, next) = parse_expr(tokens, cursor);
        if let Some(node) = node {
            items.push(node);
        }
        cursor = next.max(cursor + 1);
    }
    (items, cursor)
}
