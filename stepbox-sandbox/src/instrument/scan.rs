//! Token-level analysis: statement sites, snapshot placement, declared names.
//!
//! This is not a parser. It tracks delimiter nesting and classifies braces
//! well enough to find lines that begin a statement in a block or at top level,
//! which is where a step announcement can be inserted without changing what
//! the surrounding code means. Lines it cannot classify confidently are left
//! alone.

use super::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceKind {
    Block,
    Switch,
    Class,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delim {
    /// `control` is set for `if (...)`, `while (...)` and similar headers
    Paren { control: bool, switch: bool },
    Bracket,
    Brace { kind: BraceKind, after_do: bool },
}

/// Where the snapshot for a statement goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Jump statements: snapshot right after the step announcement
    BeforeStatement,
    /// Byte offset in the source right after which the snapshot is inserted
    After(usize),
    /// No safe place found (class and switch headers)
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSite {
    pub line: u32,
    /// Byte offset of the statement's first token
    pub offset: usize,
    pub placement: Placement,
}

const JUMP_KEYWORDS: &[&str] = &["return", "throw", "break", "continue"];

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "with", "switch", "catch"];

/// Identifiers that continue the previous statement rather than start one
const CONTINUATION_WORDS: &[&str] = &[
    "else", "catch", "finally", "case", "default", "in", "of", "instanceof", "extends",
];

#[derive(Debug, Clone, Copy, Default)]
struct TokenInfo {
    depth: usize,
    brace: Option<BraceKind>,
}

/// Find every statement site in `tokens`, in source order
pub fn statement_sites(tokens: &[Token<'_>]) -> Vec<StatementSite> {
    let (infos, starts) = structure(tokens);
    starts
        .iter()
        .map(|&index| StatementSite {
            line: tokens[index].line,
            offset: tokens[index].start,
            placement: placement(tokens, &infos, &starts, index),
        })
        .collect()
}

/// How the previous token relates to a possible statement start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// The previous statement definitely ended (`;`, `{`, block `}`, case `:`)
    Strong,
    /// Automatic semicolon insertion would end the previous statement here
    /// if the next token is an identifier
    Weak,
    None,
}

fn structure(tokens: &[Token<'_>]) -> (Vec<TokenInfo>, Vec<usize>) {
    let mut infos = Vec::with_capacity(tokens.len());
    let mut starts = Vec::new();
    let mut stack: Vec<Delim> = Vec::new();
    // Unmatched `?` per nesting level; the top-level count sits at index 0
    let mut ternaries: Vec<usize> = vec![0];
    let mut prev: Option<&Token<'_>> = None;
    let mut pending_class = false;
    // What the previous token closed, if it was a closing delimiter
    let mut closed: Option<Delim> = None;
    // Whether the previous token was the `:` of a conditional expression
    let mut ternary_colon = false;

    for (index, token) in tokens.iter().enumerate() {
        let first_on_line = prev.map_or(true, |p| token.line > p.end_line);
        if first_on_line && starts_statement(&stack, prev, closed, ternary_colon, token) {
            starts.push(index);
        }

        let mut info = TokenInfo {
            depth: stack.len(),
            brace: None,
        };
        let mut just_closed = None;
        let mut colon_of_ternary = false;
        if token.kind == TokenKind::Punct {
            match token.text {
                "(" => {
                    let keyword = prev.filter(|p| p.kind == TokenKind::Ident);
                    stack.push(Delim::Paren {
                        control: keyword.is_some_and(|p| CONTROL_KEYWORDS.contains(&p.text)),
                        switch: keyword.is_some_and(|p| p.text == "switch"),
                    });
                    ternaries.push(0);
                }
                "[" => {
                    stack.push(Delim::Bracket);
                    ternaries.push(0);
                }
                "{" => {
                    let kind = classify_brace(&stack, prev, closed, ternary_colon, pending_class);
                    if kind == BraceKind::Class {
                        pending_class = false;
                    }
                    info.brace = Some(kind);
                    stack.push(Delim::Brace {
                        kind,
                        after_do: prev.is_some_and(|p| p.is_ident("do")),
                    });
                    ternaries.push(0);
                }
                ")" | "]" | "}" => {
                    just_closed = stack.pop();
                    if ternaries.len() > 1 {
                        ternaries.pop();
                    }
                    info.depth = stack.len();
                }
                "?" => {
                    if let Some(open) = ternaries.last_mut() {
                        *open += 1;
                    }
                }
                ":" => {
                    if let Some(open) = ternaries.last_mut().filter(|open| **open > 0) {
                        *open -= 1;
                        colon_of_ternary = true;
                    }
                }
                _ => {}
            }
        } else if token.is_ident("class") && declares_class(prev, tokens.get(index + 1)) {
            pending_class = true;
        }

        infos.push(info);
        closed = just_closed;
        ternary_colon = colon_of_ternary;
        prev = Some(token);
    }

    (infos, starts)
}

/// `class` as a keyword, not a property name (`obj.class`, `{ class: 1 }`,
/// `class() {}`)
fn declares_class(prev: Option<&Token<'_>>, next: Option<&Token<'_>>) -> bool {
    let member = prev.is_some_and(|p| p.is_punct(".") || p.is_punct("?."));
    let key = next.is_some_and(|n| n.is_punct(":") || n.is_punct("(") || n.is_punct(","));
    !member && !key
}

fn classify_brace(
    stack: &[Delim],
    prev: Option<&Token<'_>>,
    closed: Option<Delim>,
    ternary_colon: bool,
    pending_class: bool,
) -> BraceKind {
    let Some(prev) = prev else {
        return BraceKind::Block;
    };
    if pending_class
        && (prev.kind == TokenKind::Ident || prev.is_punct(")") || prev.is_punct("]"))
    {
        return BraceKind::Class;
    }
    let top = stack.last().copied();
    match prev.kind {
        TokenKind::Ident if matches!(prev.text, "else" | "try" | "finally" | "do") => {
            BraceKind::Block
        }
        TokenKind::Punct => match prev.text {
            ")" => match closed {
                Some(Delim::Paren { switch: true, .. }) => BraceKind::Switch,
                _ => BraceKind::Block,
            },
            "=>" | ";" | "}" => BraceKind::Block,
            // `case x: {` and `label: {`, but not `cond ? a : {`
            ":" if ternary_colon => BraceKind::Object,
            "{" | ":" if is_block_context(top) => BraceKind::Block,
            _ => BraceKind::Object,
        },
        _ => BraceKind::Object,
    }
}

fn is_block_context(top: Option<Delim>) -> bool {
    matches!(
        top,
        None | Some(Delim::Brace {
            kind: BraceKind::Block | BraceKind::Switch,
            ..
        })
    )
}

fn boundary(
    stack: &[Delim],
    prev: Option<&Token<'_>>,
    closed: Option<Delim>,
    ternary_colon: bool,
) -> Boundary {
    let Some(prev) = prev else {
        return Boundary::Strong;
    };
    if prev.is_punct(";") || prev.is_punct("{") {
        return Boundary::Strong;
    }
    if prev.is_punct(":") {
        if ternary_colon {
            return Boundary::None;
        }
        let in_switch = matches!(
            stack.last(),
            Some(Delim::Brace {
                kind: BraceKind::Switch,
                ..
            })
        );
        return if in_switch {
            Boundary::Strong
        } else {
            Boundary::None
        };
    }
    match closed {
        Some(Delim::Brace {
            kind: BraceKind::Block | BraceKind::Switch,
            ..
        }) => Boundary::Strong,
        Some(Delim::Paren { control: true, .. }) => Boundary::None,
        _ if prev.ends_expression() => Boundary::Weak,
        _ => Boundary::None,
    }
}

fn starts_statement(
    stack: &[Delim],
    prev: Option<&Token<'_>>,
    closed: Option<Delim>,
    ternary_colon: bool,
    token: &Token<'_>,
) -> bool {
    if !is_block_context(stack.last().copied()) {
        return false;
    }
    let boundary = boundary(stack, prev, closed, ternary_colon);
    if boundary == Boundary::None {
        return false;
    }
    match token.kind {
        TokenKind::Ident => {
            if CONTINUATION_WORDS.contains(&token.text) {
                return false;
            }
            // `do { } while (x)` keeps its `while` attached
            let after_do = matches!(closed, Some(Delim::Brace { after_do: true, .. }));
            !(after_do && token.text == "while")
        }
        TokenKind::Number | TokenKind::String | TokenKind::Template | TokenKind::Regex => {
            boundary == Boundary::Strong
        }
        TokenKind::Punct => {
            boundary == Boundary::Strong
                && matches!(token.text, "(" | "[" | "!" | "~" | "++" | "--" | "+" | "-")
        }
    }
}

fn placement(
    tokens: &[Token<'_>],
    infos: &[TokenInfo],
    starts: &[usize],
    start: usize,
) -> Placement {
    if tokens[start].kind == TokenKind::Ident && JUMP_KEYWORDS.contains(&tokens[start].text) {
        return Placement::BeforeStatement;
    }
    let depth = infos[start].depth;
    let is_start = |index: usize| starts.binary_search(&index).is_ok();

    for (index, token) in tokens.iter().enumerate().skip(start) {
        let info = infos[index];
        if index > start && (info.depth < depth || (info.depth == depth && is_start(index))) {
            return after_previous(tokens, index);
        }
        if info.depth != depth {
            continue;
        }
        match info.brace {
            Some(BraceKind::Block) => return Placement::After(token.end),
            Some(BraceKind::Switch | BraceKind::Class) => return Placement::Skip,
            _ => {}
        }
        if token.is_punct(";") {
            // `if (a) x(); else y();` and `do x(); while (c);` are one statement
            let continues = tokens.get(index + 1).is_some_and(|next| {
                !is_start(index + 1)
                    && matches!(next.text, "else" | "catch" | "finally" | "while")
                    && next.kind == TokenKind::Ident
            });
            if !continues {
                return Placement::After(token.end);
            }
        }
    }

    after_previous(tokens, tokens.len())
}

/// Statement ended without a semicolon right before `tokens[end]`
fn after_previous(tokens: &[Token<'_>], end: usize) -> Placement {
    match end.checked_sub(1).map(|i| &tokens[i]) {
        Some(last) if last.ends_expression() => Placement::After(last.end),
        _ => Placement::Skip,
    }
}

/// Every name bound by `var`, `let` or `const`, in order of first appearance
pub fn declared_names(tokens: &[Token<'_>]) -> Vec<String> {
    let mut names = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let declares = match token.text {
            "var" | "const" => token.kind == TokenKind::Ident,
            // `let` is also a valid identifier in sloppy code
            "let" => {
                token.kind == TokenKind::Ident
                    && tokens.get(index + 1).is_some_and(|next| {
                        (next.kind == TokenKind::Ident && !next.is_keyword())
                            || next.is_punct("[")
                            || next.is_punct("{")
                    })
            }
            _ => false,
        };
        if declares {
            let mut bindings = Vec::new();
            declaration_list(tokens, index + 1, &mut bindings);
            push_unique(&mut names, bindings);
        }
    }
    names
}

/// Parameter names of the entry point, if its declaration can be found
pub fn entry_parameters(tokens: &[Token<'_>], entry: &str) -> Vec<String> {
    for (index, token) in tokens.iter().enumerate() {
        if !token.is_ident(entry) {
            continue;
        }
        let Some(prev) = index.checked_sub(1).map(|i| &tokens[i]) else {
            continue;
        };
        let is_function_name =
            prev.is_ident("function") || (prev.is_punct("*") && index >= 2 && tokens[index - 2].is_ident("function"));
        let params_at = if is_function_name {
            tokens.get(index + 1).filter(|t| t.is_punct("(")).map(|_| index + 1)
        } else if tokens.get(index + 1).is_some_and(|t| t.is_punct("=")) {
            assigned_function_params(tokens, index + 2)
        } else {
            None
        };
        if let Some(open) = params_at {
            let mut names = Vec::new();
            parameter_list(tokens, open, &mut names);
            let mut unique = Vec::new();
            push_unique(&mut unique, names);
            return unique;
        }
    }
    Vec::new()
}

/// `entry = [async] function [*] [name] (` or `entry = [async] (` ... `=>`
fn assigned_function_params(tokens: &[Token<'_>], mut index: usize) -> Option<usize> {
    if tokens.get(index)?.is_ident("async") {
        index += 1;
    }
    let token = tokens.get(index)?;
    if token.is_ident("function") {
        index += 1;
        if tokens.get(index)?.is_punct("*") {
            index += 1;
        }
        if tokens.get(index)?.kind == TokenKind::Ident {
            index += 1;
        }
        return tokens.get(index)?.is_punct("(").then_some(index);
    }
    if token.is_punct("(") {
        return Some(index);
    }
    // single bare parameter: `entry = x => ...`
    if token.kind == TokenKind::Ident && tokens.get(index + 1)?.is_punct("=>") {
        return Some(index);
    }
    None
}

fn parameter_list(tokens: &[Token<'_>], open: usize, names: &mut Vec<String>) {
    if !tokens[open].is_punct("(") {
        binding(tokens, open, names);
        return;
    }
    let mut index = open + 1;
    while let Some(token) = tokens.get(index) {
        if token.is_punct(")") {
            return;
        }
        if token.is_punct(",") {
            index += 1;
            continue;
        }
        index = binding(tokens, index, names);
        index = skip_default(tokens, index);
    }
}

fn declaration_list(tokens: &[Token<'_>], mut index: usize, names: &mut Vec<String>) {
    loop {
        let after = binding(tokens, index, names);
        if after == index {
            return;
        }
        index = skip_initializer(tokens, after);
        match tokens.get(index) {
            Some(token) if token.is_punct(",") => index += 1,
            _ => return,
        }
    }
}

/// Parse one binding target, returning the index after it
fn binding(tokens: &[Token<'_>], index: usize, names: &mut Vec<String>) -> usize {
    let Some(token) = tokens.get(index) else {
        return index;
    };
    if token.is_punct("...") {
        return binding(tokens, index + 1, names);
    }
    if token.kind == TokenKind::Ident && !token.is_keyword() {
        names.push(token.text.to_string());
        return index + 1;
    }
    if token.is_punct("[") {
        return array_pattern(tokens, index + 1, names);
    }
    if token.is_punct("{") {
        return object_pattern(tokens, index + 1, names);
    }
    index
}

fn array_pattern(tokens: &[Token<'_>], mut index: usize, names: &mut Vec<String>) -> usize {
    while let Some(token) = tokens.get(index) {
        if token.is_punct("]") {
            return index + 1;
        }
        if token.is_punct(",") {
            index += 1;
            continue;
        }
        let after = binding(tokens, index, names);
        index = skip_default(tokens, after.max(index + 1));
    }
    index
}

fn object_pattern(tokens: &[Token<'_>], mut index: usize, names: &mut Vec<String>) -> usize {
    while let Some(token) = tokens.get(index) {
        if token.is_punct("}") {
            return index + 1;
        }
        if token.is_punct(",") {
            index += 1;
            continue;
        }
        if token.is_punct("...") {
            index = binding(tokens, index + 1, names);
            continue;
        }
        // property key: identifier, literal, or [computed]
        let key_end = if token.is_punct("[") {
            skip_balanced(tokens, index)
        } else {
            index + 1
        };
        if tokens.get(key_end).is_some_and(|t| t.is_punct(":")) {
            let after = binding(tokens, key_end + 1, names);
            index = skip_default(tokens, after.max(key_end + 1));
        } else {
            if token.kind == TokenKind::Ident && !token.is_keyword() {
                names.push(token.text.to_string());
            }
            index = skip_default(tokens, key_end);
        }
    }
    index
}

/// Skip `= expr` inside a pattern or parameter list
fn skip_default(tokens: &[Token<'_>], index: usize) -> usize {
    if !tokens.get(index).is_some_and(|t| t.is_punct("=")) {
        return index;
    }
    skip_expression(tokens, index + 1, false)
}

/// Skip `= expr` after a declarator
fn skip_initializer(tokens: &[Token<'_>], index: usize) -> usize {
    if !tokens.get(index).is_some_and(|t| t.is_punct("=")) {
        return index;
    }
    skip_expression(tokens, index + 1, true)
}

/// Advance to the `,` or closing delimiter that ends an expression at this
/// nesting level. At statement level, a line break before an identifier
/// also ends it.
fn skip_expression(tokens: &[Token<'_>], mut index: usize, statement_level: bool) -> usize {
    let mut depth = 0usize;
    let mut prev: Option<&Token<'_>> = None;
    while let Some(token) = tokens.get(index) {
        if depth == 0 {
            if token.is_punct(",") || token.is_punct(";") {
                return index;
            }
            if token.is_punct(")") || token.is_punct("]") || token.is_punct("}") {
                return index;
            }
            if statement_level
                && token.kind == TokenKind::Ident
                && prev.is_some_and(|p| token.line > p.end_line && p.ends_expression())
            {
                return index;
            }
        }
        match token.text {
            "(" | "[" | "{" if token.kind == TokenKind::Punct => depth += 1,
            ")" | "]" | "}" if token.kind == TokenKind::Punct => depth -= 1,
            _ => {}
        }
        prev = Some(token);
        index += 1;
    }
    index
}

fn skip_balanced(tokens: &[Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return index + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn push_unique(names: &mut Vec<String>, found: Vec<String>) {
    for name in found {
        if !names.contains(&name) {
            names.push(name);
        }
    }
}
