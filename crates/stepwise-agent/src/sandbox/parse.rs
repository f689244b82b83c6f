//! Conservative bash-grammar reader.
//!
//! It does not evaluate anything. It tokenizes the script and walks the token stream far enough to
//! know which words sit in command position, which redirections are present, and what text runs
//! inside command or process substitutions. Substituted scripts are parsed recursively, so
//! `echo $(rm -rf x)` reports both `echo` and `rm`.

use crate::SandboxError;

/// A shell word. `literal` is the value after quote removal, present only when the word contains
/// no expansion at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub raw: String,
    pub literal: Option<String>,
}

impl Word {
    pub fn is_literal(&self, value: &str) -> bool {
        self.literal.as_deref() == Some(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandName {
    Literal(String),
    /// The name depends on an expansion and cannot be known before the shell runs.
    Dynamic(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub name: CommandName,
    pub args: Vec<Word>,
    pub from_substitution: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectKind {
    Input,
    Output,
    Append,
    Clobber,
    ReadWrite,
    OutputAndError,
    AppendOutputAndError,
    DupInput,
    DupOutput,
    HereDoc,
    HereString,
}

impl RedirectKind {
    /// Whether the redirection can create or write the file named by its target.
    pub fn writes_target(self) -> bool {
        matches!(
            self,
            Self::Output
                | Self::Append
                | Self::Clobber
                | Self::ReadWrite
                | Self::OutputAndError
                | Self::AppendOutputAndError
                | Self::DupOutput
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: Word,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedScript {
    pub invocations: Vec<Invocation>,
    pub redirects: Vec<Redirect>,
}

impl ParsedScript {
    /// Every statically known program name, in source order.
    pub fn program_names(&self) -> Vec<String> {
        self.invocations
            .iter()
            .filter_map(|invocation| match &invocation.name {
                CommandName::Literal(name) => Some(name.clone()),
                CommandName::Dynamic(_) => None,
            })
            .collect()
    }

    pub fn has_dynamic_names(&self) -> bool {
        self.invocations
            .iter()
            .any(|invocation| matches!(invocation.name, CommandName::Dynamic(_)))
    }
}

pub fn parse_command(source: &str) -> Result<ParsedScript, SandboxError> {
    let tokens = Lexer::new(source).run()?;
    Parser::new(tokens).run()
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Op {
    Pipe,
    PipeErr,
    And,
    Or,
    Semi,
    Amp,
    CaseBreak,
    LParen,
    RParen,
}

impl Op {
    fn text(&self) -> &'static str {
        match self {
            Op::Pipe => "|",
            Op::PipeErr => "|&",
            Op::And => "&&",
            Op::Or => "||",
            Op::Semi => ";",
            Op::Amp => "&",
            Op::CaseBreak => ";;",
            Op::LParen => "(",
            Op::RParen => ")",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(Word, Vec<String>),
    /// Substitutions found in an unquoted here-document body.
    Detached(Vec<String>),
    Op(Op),
    Redirect(RedirectKind),
    Arith,
    Newline,
}

fn parse_error(message: impl Into<String>) -> SandboxError {
    SandboxError::Parse(message.into())
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '|' | '&' | ';' | '<' | '>' | '(' | ')')
}

struct HereDocPending {
    delimiter: String,
    strip_tabs: bool,
    expands: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
    awaiting_delimiter: Option<bool>,
    heredocs: Vec<HereDocPending>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
            awaiting_delimiter: None,
            heredocs: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(offset, c)| self.peek_at(offset) == Some(c))
    }

    fn run(mut self) -> Result<Vec<Token>, SandboxError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\n' => {
                    self.pos += 1;
                    self.tokens.push(Token::Newline);
                    self.read_heredoc_bodies()?;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => self.pos += 2,
                '|' => self.operator(),
                '&' if self.peek_at(1) == Some('>') => {
                    if self.peek_at(2) == Some('>') {
                        self.pos += 3;
                        self.redirect(RedirectKind::AppendOutputAndError);
                    } else {
                        self.pos += 2;
                        self.redirect(RedirectKind::OutputAndError);
                    }
                }
                '&' | ';' => self.operator(),
                '(' if self.peek_at(1) == Some('(') => {
                    let body = self.arithmetic()?;
                    let substitutions = find_substitutions(&body)?;
                    if !substitutions.is_empty() {
                        self.tokens.push(Token::Detached(substitutions));
                    }
                    self.tokens.push(Token::Arith);
                }
                '(' => {
                    self.pos += 1;
                    self.tokens.push(Token::Op(Op::LParen));
                }
                ')' => {
                    self.pos += 1;
                    self.tokens.push(Token::Op(Op::RParen));
                }
                '<' | '>' if self.peek_at(1) == Some('(') => self.word()?,
                '<' | '>' => self.redirect_operator(),
                c if c.is_ascii_digit() && self.digits_then_redirect() => {
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                    self.redirect_operator();
                }
                _ => self.word()?,
            }
        }
        if let Some(pending) = self.heredocs.first() {
            return Err(parse_error(format!(
                "here-document delimited by '{}' has no body",
                pending.delimiter
            )));
        }
        Ok(self.tokens)
    }

    fn digits_then_redirect(&self) -> bool {
        let mut offset = 0;
        while self.peek_at(offset).is_some_and(|c| c.is_ascii_digit()) {
            offset += 1;
        }
        matches!(self.peek_at(offset), Some('<' | '>')) && self.peek_at(offset + 1) != Some('(')
    }

    fn operator(&mut self) {
        let op = if self.starts_with("||") {
            self.pos += 2;
            Op::Or
        } else if self.starts_with("|&") {
            self.pos += 2;
            Op::PipeErr
        } else if self.starts_with("|") {
            self.pos += 1;
            Op::Pipe
        } else if self.starts_with("&&") {
            self.pos += 2;
            Op::And
        } else if self.starts_with("&") {
            self.pos += 1;
            Op::Amp
        } else if self.starts_with(";;&") {
            self.pos += 3;
            Op::CaseBreak
        } else if self.starts_with(";;") || self.starts_with(";&") {
            self.pos += 2;
            Op::CaseBreak
        } else {
            self.pos += 1;
            Op::Semi
        };
        self.tokens.push(Token::Op(op));
    }

    fn redirect_operator(&mut self) {
        let table: [(&str, RedirectKind); 11] = [
            ("<<<", RedirectKind::HereString),
            ("<<-", RedirectKind::HereDoc),
            ("<<", RedirectKind::HereDoc),
            ("<&", RedirectKind::DupInput),
            ("<>", RedirectKind::ReadWrite),
            ("<", RedirectKind::Input),
            (">>", RedirectKind::Append),
            (">&", RedirectKind::DupOutput),
            (">|", RedirectKind::Clobber),
            (">", RedirectKind::Output),
            ("", RedirectKind::Output),
        ];
        for (text, kind) in table {
            if !text.is_empty() && self.starts_with(text) {
                self.pos += text.chars().count();
                if kind == RedirectKind::HereDoc {
                    self.awaiting_delimiter = Some(text == "<<-");
                }
                self.redirect(kind);
                return;
            }
        }
    }

    fn redirect(&mut self, kind: RedirectKind) {
        self.tokens.push(Token::Redirect(kind));
    }

    /// Consumes a parenthesized arithmetic expression and returns the text between its outer
    /// parentheses. Bash still runs command substitutions found inside it.
    fn arithmetic(&mut self) -> Result<String, SandboxError> {
        let start = self.pos + 1;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(self.chars[start..self.pos - 1].iter().collect());
                    }
                }
                _ => {}
            }
        }
        Err(parse_error("unterminated arithmetic expression"))
    }

    fn word(&mut self) -> Result<(), SandboxError> {
        let mut builder = WordBuilder::default();
        while let Some(c) = self.peek() {
            if (c == '<' || c == '>') && self.peek_at(1) == Some('(') {
                self.pos += 2;
                let inner = self.balanced_paren()?;
                builder.substitution(format!("{c}("), inner, ")");
                continue;
            }
            if c == '(' && builder.raw.ends_with('=') && is_assignment(&builder.raw) {
                self.pos += 1;
                let inner = self.balanced_paren()?;
                builder.raw.push('(');
                builder.raw.push_str(&inner);
                builder.raw.push(')');
                builder.expands = true;
                builder.substitutions.extend(find_substitutions(&inner)?);
                continue;
            }
            if is_meta(c) {
                break;
            }
            match c {
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('\n') => self.pos += 1,
                        Some(escaped) => {
                            self.pos += 1;
                            builder.raw.push('\\');
                            builder.raw.push(escaped);
                            builder.literal.push(escaped);
                        }
                        None => {
                            builder.raw.push('\\');
                            builder.literal.push('\\');
                        }
                    }
                }
                '\'' => {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != '\'') {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(parse_error("unterminated single quote"));
                    }
                    let content: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    builder.raw.push('\'');
                    builder.raw.push_str(&content);
                    builder.raw.push('\'');
                    builder.literal.push_str(&content);
                    builder.quoted = true;
                }
                '"' => {
                    self.pos += 1;
                    builder.raw.push('"');
                    builder.quoted = true;
                    self.double_quoted(&mut builder)?;
                    builder.raw.push('"');
                }
                '$' => self.dollar(&mut builder)?,
                '`' => self.backtick(&mut builder)?,
                '*' | '?' => {
                    self.pos += 1;
                    builder.raw.push(c);
                    builder.literal.push(c);
                    builder.expands = true;
                }
                '~' if builder.raw.is_empty() => {
                    self.pos += 1;
                    builder.raw.push(c);
                    builder.literal.push(c);
                    builder.expands = true;
                }
                _ => {
                    self.pos += 1;
                    builder.raw.push(c);
                    builder.literal.push(c);
                }
            }
        }

        let (word, substitutions) = builder.finish();
        if let Some(strip_tabs) = self.awaiting_delimiter.take() {
            self.heredocs.push(HereDocPending {
                delimiter: word.literal.clone().unwrap_or_else(|| word.raw.clone()),
                strip_tabs,
                expands: !word.raw.contains(['\'', '"', '\\']),
            });
        }
        self.tokens.push(Token::Word(word, substitutions));
        Ok(())
    }

    fn double_quoted(&mut self, builder: &mut WordBuilder) -> Result<(), SandboxError> {
        loop {
            let Some(c) = self.peek() else {
                return Err(parse_error("unterminated double quote"));
            };
            match c {
                '"' => {
                    self.pos += 1;
                    return Ok(());
                }
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped @ ('$' | '`' | '"' | '\\')) => {
                            self.pos += 1;
                            builder.raw.push('\\');
                            builder.raw.push(escaped);
                            builder.literal.push(escaped);
                        }
                        Some('\n') => self.pos += 1,
                        _ => {
                            builder.raw.push('\\');
                            builder.literal.push('\\');
                        }
                    }
                }
                '$' => self.dollar(builder)?,
                '`' => self.backtick(builder)?,
                _ => {
                    self.pos += 1;
                    builder.raw.push(c);
                    builder.literal.push(c);
                }
            }
        }
    }

    fn dollar(&mut self, builder: &mut WordBuilder) -> Result<(), SandboxError> {
        match self.peek_at(1) {
            Some('(') if self.peek_at(2) == Some('(') => {
                let start = self.pos;
                self.pos += 1;
                let body = self.arithmetic()?;
                let raw: String = self.chars[start..self.pos].iter().collect();
                builder.raw.push_str(&raw);
                builder.expands = true;
                builder.substitutions.extend(find_substitutions(&body)?);
            }
            Some('(') => {
                self.pos += 2;
                let inner = self.balanced_paren()?;
                builder.substitution("$(".to_string(), inner, ")");
            }
            Some('{') => {
                self.pos += 2;
                let inner = self.balanced_brace()?;
                builder.raw.push_str("${");
                builder.raw.push_str(&inner);
                builder.raw.push('}');
                builder.expands = true;
                builder.substitutions.extend(find_substitutions(&inner)?);
            }
            Some('\'') => {
                self.pos += 2;
                let start = self.pos;
                loop {
                    match self.peek() {
                        None => return Err(parse_error("unterminated $'...' quote")),
                        Some('\\') => self.pos += 2,
                        Some('\'') => break,
                        Some(_) => self.pos += 1,
                    }
                }
                let content: String = self.chars[start..self.pos.min(self.chars.len())]
                    .iter()
                    .collect();
                self.pos += 1;
                builder.raw.push_str("$'");
                builder.raw.push_str(&content);
                builder.raw.push('\'');
                builder.expands = true;
            }
            Some('"') => {
                self.pos += 2;
                builder.raw.push_str("$\"");
                builder.quoted = true;
                self.double_quoted(builder)?;
                builder.raw.push('"');
            }
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                self.pos += 1;
                builder.raw.push('$');
                if c.is_ascii_digit() {
                    self.pos += 1;
                    builder.raw.push(c);
                } else {
                    while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                    {
                        self.pos += 1;
                        builder.raw.push(c);
                    }
                }
                builder.expands = true;
            }
            Some(c @ ('@' | '*' | '#' | '?' | '$' | '!' | '-')) => {
                self.pos += 2;
                builder.raw.push('$');
                builder.raw.push(c);
                builder.expands = true;
            }
            _ => {
                self.pos += 1;
                builder.raw.push('$');
                builder.literal.push('$');
            }
        }
        Ok(())
    }

    fn backtick(&mut self, builder: &mut WordBuilder) -> Result<(), SandboxError> {
        self.pos += 1;
        let mut inner = String::new();
        loop {
            match self.peek() {
                None => return Err(parse_error("unterminated backquote substitution")),
                Some('`') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped @ ('`' | '\\' | '$')) => {
                            self.pos += 1;
                            inner.push(escaped);
                        }
                        _ => inner.push('\\'),
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    inner.push(c);
                }
            }
        }
        builder.substitution("`".to_string(), inner, "`");
        Ok(())
    }

    /// Consumes up to the `)` closing an already-consumed `(` and returns the text in between.
    fn balanced_paren(&mut self) -> Result<String, SandboxError> {
        let start = self.pos;
        let end = scan_balanced(&self.chars, start, '(', ')')
            .ok_or_else(|| parse_error("unterminated command substitution"))?;
        self.pos = end + 1;
        Ok(self.chars[start..end].iter().collect())
    }

    fn balanced_brace(&mut self) -> Result<String, SandboxError> {
        let start = self.pos;
        let end = scan_balanced(&self.chars, start, '{', '}')
            .ok_or_else(|| parse_error("unterminated parameter expansion"))?;
        self.pos = end + 1;
        Ok(self.chars[start..end].iter().collect())
    }

    fn read_heredoc_bodies(&mut self) -> Result<(), SandboxError> {
        for pending in std::mem::take(&mut self.heredocs) {
            let mut body = String::new();
            loop {
                if self.peek().is_none() {
                    break;
                }
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                let line: String = self.chars[start..self.pos].iter().collect();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                let candidate = if pending.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line.as_str()
                };
                if candidate == pending.delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            if pending.expands {
                let substitutions = find_substitutions(&body)?;
                if !substitutions.is_empty() {
                    self.tokens.push(Token::Detached(substitutions));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct WordBuilder {
    raw: String,
    literal: String,
    expands: bool,
    quoted: bool,
    substitutions: Vec<String>,
}

impl WordBuilder {
    fn substitution(&mut self, open: String, inner: String, close: &str) {
        self.raw.push_str(&open);
        self.raw.push_str(&inner);
        self.raw.push_str(close);
        self.expands = true;
        self.substitutions.push(inner);
    }

    fn finish(self) -> (Word, Vec<String>) {
        let literal = (!self.expands).then_some(self.literal);
        (
            Word {
                raw: self.raw,
                literal,
            },
            self.substitutions,
        )
    }
}

/// Returns the index of the closer matching an opener that sits just before `start`.
fn scan_balanced(chars: &[char], start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 1usize;
    let mut pos = start;
    while pos < chars.len() {
        let c = chars[pos];
        match c {
            '\\' => pos += 1,
            '\'' => {
                pos += 1;
                while pos < chars.len() && chars[pos] != '\'' {
                    pos += 1;
                }
            }
            '"' => {
                pos += 1;
                while pos < chars.len() && chars[pos] != '"' {
                    if chars[pos] == '\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
            }
            '`' => {
                pos += 1;
                while pos < chars.len() && chars[pos] != '`' {
                    if chars[pos] == '\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
            }
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Extracts `$(...)` and backquote bodies from text that is expanded but not word-split, such as
/// a `${...}` operand, an arithmetic expression or an unquoted here-document.
fn find_substitutions(text: &str) -> Result<Vec<String>, SandboxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut found = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => pos += 2,
            '$' if chars.get(pos + 1) == Some(&'(') && chars.get(pos + 2) != Some(&'(') => {
                let start = pos + 2;
                let end = scan_balanced(&chars, start, '(', ')')
                    .ok_or_else(|| parse_error("unterminated command substitution"))?;
                found.push(chars[start..end].iter().collect());
                pos = end + 1;
            }
            '`' => {
                let start = pos + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '`' {
                    if chars[end] == '\\' {
                        end += 1;
                    }
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(parse_error("unterminated backquote substitution"));
                }
                found.push(chars[start..end].iter().collect());
                pos = end + 1;
            }
            _ => pos += 1,
        }
    }
    Ok(found)
}

fn is_assignment(raw: &str) -> bool {
    let Some(eq) = raw.find('=') else {
        return false;
    };
    let mut name = &raw[..eq];
    name = name.strip_suffix('+').unwrap_or(name);
    if let Some(open) = name.find('[') {
        if !name.ends_with(']') {
            return false;
        }
        name = &name[..open];
    }
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Frame {
    If,
    Loop,
    Case,
    Brace,
    Paren,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Normal,
    LoopHeader,
    CaseSubject,
    CaseIn,
    CasePattern,
    TestExpression,
    FunctionName,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    script: ParsedScript,
    stack: Vec<Frame>,
    mode: Mode,
    expect_command: bool,
    started: bool,
    need_command: bool,
    current: Option<usize>,
    pending_redirect: Option<RedirectKind>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            script: ParsedScript::default(),
            stack: Vec::new(),
            mode: Mode::Normal,
            expect_command: true,
            started: false,
            need_command: false,
            current: None,
            pending_redirect: None,
        }
    }

    fn run(mut self) -> Result<ParsedScript, SandboxError> {
        while self.pos < self.tokens.len() {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            if let Token::Word(_, substitutions) | Token::Detached(substitutions) = &token {
                for source in substitutions {
                    self.nested(source)?;
                }
            }
            if matches!(token, Token::Detached(_)) {
                continue;
            }

            if let Some(kind) = self.pending_redirect.take() {
                let Token::Word(target, _) = token else {
                    return Err(parse_error(format!(
                        "missing redirection target before {}",
                        describe(&token)
                    )));
                };
                if self.mode == Mode::Normal {
                    self.script.redirects.push(Redirect { kind, target });
                }
                continue;
            }

            match self.mode {
                Mode::Normal => self.normal(token)?,
                Mode::LoopHeader => {
                    if let Token::Word(word, _) = &token {
                        if word.is_literal("do") {
                            self.mode = Mode::Normal;
                            self.open_block();
                        }
                    }
                }
                Mode::CaseSubject => match token {
                    Token::Word(..) => self.mode = Mode::CaseIn,
                    Token::Newline => {}
                    other => return Err(unexpected(&other)),
                },
                Mode::CaseIn => match token {
                    Token::Word(word, _) if word.is_literal("in") => self.mode = Mode::CasePattern,
                    Token::Newline => {}
                    other => return Err(unexpected(&other)),
                },
                Mode::CasePattern => match token {
                    Token::Word(word, _) if word.is_literal("esac") => {
                        self.pop(Frame::Case, "esac")?;
                        self.mode = Mode::Normal;
                        self.close_compound();
                    }
                    Token::Op(Op::RParen) => {
                        self.mode = Mode::Normal;
                        self.open_block();
                        self.need_command = false;
                    }
                    Token::Word(..) | Token::Newline | Token::Op(Op::LParen | Op::Pipe) => {}
                    other => return Err(unexpected(&other)),
                },
                Mode::TestExpression => {
                    if let Token::Word(word, _) = &token {
                        if word.is_literal("]]") {
                            self.mode = Mode::Normal;
                            self.close_compound();
                        }
                    }
                }
                Mode::FunctionName => match token {
                    Token::Word(..) => {
                        self.mode = Mode::Normal;
                        self.skip_function_parens();
                        self.open_block();
                    }
                    other => return Err(unexpected(&other)),
                },
            }
        }

        if self.pending_redirect.is_some() {
            return Err(parse_error("missing redirection target at end of command"));
        }
        if self.need_command && !self.started {
            return Err(parse_error("command expected at end of input"));
        }
        if self.mode != Mode::Normal {
            return Err(parse_error("unterminated compound command"));
        }
        if let Some(frame) = self.stack.last() {
            return Err(parse_error(format!("unterminated {frame:?} block")));
        }
        Ok(self.script)
    }

    fn nested(&mut self, source: &str) -> Result<(), SandboxError> {
        let inner = parse_command(source)?;
        self.script
            .invocations
            .extend(inner.invocations.into_iter().map(|mut invocation| {
                invocation.from_substitution = true;
                invocation
            }));
        self.script.redirects.extend(inner.redirects);
        Ok(())
    }

    fn normal(&mut self, token: Token) -> Result<(), SandboxError> {
        match token {
            Token::Word(word, _) if self.expect_command => self.command_word(word)?,
            Token::Word(word, _) => {
                if let Some(index) = self.current {
                    self.script.invocations[index].args.push(word);
                }
            }
            Token::Arith => {
                if !self.expect_command {
                    return Err(parse_error("unexpected arithmetic command"));
                }
                self.close_compound();
            }
            Token::Redirect(kind) => {
                self.pending_redirect = Some(kind);
                self.started = true;
            }
            Token::Newline => {
                if self.started {
                    self.end_command();
                }
            }
            Token::Op(op) => self.operator(op)?,
            Token::Detached(_) => {}
        }
        Ok(())
    }

    fn command_word(&mut self, word: Word) -> Result<(), SandboxError> {
        match word.literal.as_deref() {
            Some("if") => {
                self.stack.push(Frame::If);
                self.open_block();
            }
            Some("then" | "else" | "elif") => {
                self.expect_top(Frame::If, word.raw.as_str())?;
                self.open_block();
            }
            Some("fi") => {
                self.pop(Frame::If, "fi")?;
                self.close_compound();
            }
            Some("while" | "until") => {
                self.stack.push(Frame::Loop);
                self.open_block();
            }
            Some("for" | "select") => {
                self.stack.push(Frame::Loop);
                self.mode = Mode::LoopHeader;
            }
            Some("do") => {
                self.expect_top(Frame::Loop, "do")?;
                self.open_block();
            }
            Some("done") => {
                self.pop(Frame::Loop, "done")?;
                self.close_compound();
            }
            Some("case") => {
                self.stack.push(Frame::Case);
                self.mode = Mode::CaseSubject;
            }
            Some("esac") => {
                self.pop(Frame::Case, "esac")?;
                self.close_compound();
            }
            Some("{") => {
                self.stack.push(Frame::Brace);
                self.open_block();
            }
            Some("}") => {
                self.pop(Frame::Brace, "}")?;
                self.close_compound();
            }
            Some("!" | "time") => self.open_block(),
            Some("[[") => self.mode = Mode::TestExpression,
            Some("function") => self.mode = Mode::FunctionName,
            _ if is_assignment(&word.raw) => self.started = true,
            _ => {
                if self.skip_function_parens() {
                    self.open_block();
                    return Ok(());
                }
                let name = match word.literal {
                    Some(name) => CommandName::Literal(name),
                    None => CommandName::Dynamic(word.raw),
                };
                self.script.invocations.push(Invocation {
                    name,
                    args: Vec::new(),
                    from_substitution: false,
                });
                self.current = Some(self.script.invocations.len() - 1);
                self.expect_command = false;
                self.started = true;
                self.need_command = false;
            }
        }
        Ok(())
    }

    fn operator(&mut self, op: Op) -> Result<(), SandboxError> {
        match op {
            Op::Pipe | Op::PipeErr | Op::And | Op::Or => {
                if !self.started {
                    return Err(unexpected(&Token::Op(op)));
                }
                self.end_command();
                self.need_command = true;
            }
            Op::Semi | Op::Amp => {
                if !self.started {
                    return Err(unexpected(&Token::Op(op)));
                }
                self.end_command();
            }
            Op::CaseBreak => {
                self.expect_top(Frame::Case, ";;")?;
                self.end_command();
                self.mode = Mode::CasePattern;
            }
            Op::LParen => {
                if !self.expect_command {
                    return Err(unexpected(&Token::Op(op)));
                }
                self.stack.push(Frame::Paren);
                self.open_block();
            }
            Op::RParen => {
                self.pop(Frame::Paren, ")")?;
                self.close_compound();
            }
        }
        Ok(())
    }

    /// Consumes a `()` pair following a function name, if present.
    fn skip_function_parens(&mut self) -> bool {
        let is_pair = matches!(
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)),
            (Some(Token::Op(Op::LParen)), Some(Token::Op(Op::RParen)))
        );
        if is_pair {
            self.pos += 2;
        }
        is_pair
    }

    fn open_block(&mut self) {
        self.expect_command = true;
        self.started = false;
        self.need_command = true;
        self.current = None;
    }

    fn close_compound(&mut self) {
        self.expect_command = false;
        self.started = true;
        self.need_command = false;
        self.current = None;
    }

    fn end_command(&mut self) {
        self.expect_command = true;
        self.started = false;
        self.need_command = false;
        self.current = None;
    }

    fn expect_top(&self, frame: Frame, keyword: &str) -> Result<(), SandboxError> {
        if self.stack.last() == Some(&frame) {
            Ok(())
        } else {
            Err(parse_error(format!("syntax error near unexpected token '{keyword}'")))
        }
    }

    fn pop(&mut self, frame: Frame, keyword: &str) -> Result<(), SandboxError> {
        self.expect_top(frame, keyword)?;
        self.stack.pop();
        Ok(())
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(word, _) => format!("'{}'", word.raw),
        Token::Op(op) => format!("'{}'", op.text()),
        Token::Redirect(kind) => format!("redirection {kind:?}"),
        Token::Arith => "'(('".to_string(),
        Token::Detached(_) => "here-document".to_string(),
        Token::Newline => "newline".to_string(),
    }
}

fn unexpected(token: &Token) -> SandboxError {
    parse_error(format!("syntax error near unexpected token {}", describe(token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(source: &str) -> Vec<String> {
        parse_command(source)
            .unwrap_or_else(|error| panic!("{source:?} should parse: {error}"))
            .program_names()
    }

    #[test]
    fn pipelines_and_lists_report_every_program() {
        assert_eq!(names("ls -la | grep foo && wc -l; pwd &"), vec!["ls", "grep", "wc", "pwd"]);
        assert_eq!(names("cat a |& tail || head"), vec!["cat", "tail", "head"]);
    }

    #[test]
    fn substitutions_are_parsed_recursively() {
        let script = parse_command("echo \"$(rm -rf build)\" `touch x` <(sort y)").unwrap();
        assert_eq!(script.program_names(), vec!["echo", "rm", "touch", "sort"]);
        assert!(!script.invocations[0].from_substitution);
        assert!(script.invocations[1].from_substitution);
    }

    #[test]
    fn control_structures_expose_their_bodies() {
        assert_eq!(
            names("if test -f a; then cat a; elif true; then :; else rm a; fi"),
            vec!["test", "cat", "true", ":", "rm"]
        );
        assert_eq!(
            names("for f in $(ls); do wc -l \"$f\"; done"),
            vec!["ls", "wc"]
        );
        assert_eq!(names("while read line; do echo $line; done < file"), vec!["read", "echo"]);
        assert_eq!(
            names("case $x in a|b) ls ;; *) rm -f y ;; esac"),
            vec!["ls", "rm"]
        );
        assert_eq!(names("for ((i=0;i<3;i++)); do pwd; done"), vec!["pwd"]);
        assert_eq!(names("(cd src && ls) ; { pwd; }"), vec!["cd", "ls", "pwd"]);
        assert_eq!(names("[[ -n $x && -f y ]] && stat y"), vec!["stat"]);
        assert_eq!(names("f() { mkdir d; }; f"), vec!["mkdir", "f"]);
    }

    #[test]
    fn assignments_and_quotes_are_not_commands() {
        assert_eq!(names("FOO=1 BAR='x y' ls"), vec!["ls"]);
        assert_eq!(names("'l''s' \"-la\""), vec!["ls"]);
        assert!(names("X=$(date)").contains(&"date".to_string()));
    }

    #[test]
    fn expanded_command_names_are_dynamic() {
        let script = parse_command("$EDITOR notes.txt").unwrap();
        assert!(script.has_dynamic_names());
        let script = parse_command("\"$(which ls)\" -la").unwrap();
        assert!(script.has_dynamic_names());
        assert_eq!(script.program_names(), vec!["which"]);
        let script = parse_command("./*.sh").unwrap();
        assert!(script.has_dynamic_names());
    }

    #[test]
    fn redirections_are_collected_with_targets() {
        let script = parse_command("echo hi > newfile.txt 2>&1 < in.txt").unwrap();
        let kinds: Vec<RedirectKind> = script.redirects.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![RedirectKind::Output, RedirectKind::DupOutput, RedirectKind::Input]
        );
        assert!(script.redirects[0].target.is_literal("newfile.txt"));
        assert!(script.redirects[1].target.is_literal("1"));
    }

    #[test]
    fn heredoc_bodies_are_skipped_but_expanded_substitutions_count() {
        let script = parse_command("cat <<EOF\nrm -rf /\n$(touch x)\nEOF\nls").unwrap();
        assert_eq!(script.program_names(), vec!["cat", "touch", "ls"]);
        let script = parse_command("cat <<'EOF'\n$(touch x)\nEOF").unwrap();
        assert_eq!(script.program_names(), vec!["cat"]);
    }

    #[test]
    fn arithmetic_substitutions_are_parsed() {
        assert_eq!(names("ls $(( $(touch pwned) ))"), vec!["ls", "touch"]);
        assert_eq!(names("(( $(touch pwned) ))"), vec!["touch"]);
        assert_eq!(names("(( `rm -f x` + 1 )) && pwd"), vec!["rm", "pwd"]);
        assert_eq!(
            names("for ((i=$(mkdir d); i<3; i++)); do pwd; done"),
            vec!["mkdir", "pwd"]
        );
        assert_eq!(names("echo $(( (1 + 2) * 3 ))"), vec!["echo"]);
        let script = parse_command("(( $(touch pwned) ))").unwrap();
        assert!(script.invocations[0].from_substitution);
    }

    #[test]
    fn comments_and_continuations() {
        assert_eq!(names("ls \\\n  -la # rm everything"), vec!["ls"]);
    }

    #[test]
    fn malformed_scripts_are_rejected() {
        for source in [
            "echo 'unterminated",
            "echo \"unterminated",
            "ls |",
            "&& ls",
            "; ls",
            "if true; then ls",
            "echo $(ls",
            "ls >",
            "fi",
            "(ls",
            "ls )",
            "do ls; done",
        ] {
            assert!(
                matches!(parse_command(source), Err(SandboxError::Parse(_))),
                "{source:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_input_has_no_invocations() {
        assert!(parse_command("").unwrap().invocations.is_empty());
        assert!(parse_command("  # only a comment\n").unwrap().invocations.is_empty());
    }
}
