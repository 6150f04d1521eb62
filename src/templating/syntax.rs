//! Action syntax normalization
//!
//! Project files write template actions in the documented positional form:
//!
//! ```text
//! {{ ref "orders" }}                    {{ ref "metrics_view" "orders" }}
//! {{ dependency "orders" }}             {{ lookup "model" "orders" }}
//! {{ configure "materialize" true }}    {{ configure `output: {connector: ch}` }}
//! {{ .env.limit }}                      {{ .user.domain | upper }}
//! {{ if eq .environment "prod" }} ... {{ else if dev }} ... {{ end }}
//! {{ range $r := .env.regions }}{{ $r }}{{ end }}
//! {{/* comment */}}
//! ```
//!
//! [`normalize`] rewrites every `{{ ... }}` action into the equivalent tera
//! expression or statement so one engine parses both this form and native tera
//! syntax. `{% ... %}` statements, `{# ... #}` comments and tera keyword calls such
//! as `ref(name="orders")` pass through untouched.
//!
//! Newlines inside an action are preserved inside the rewritten tag, so line
//! numbers reported by the engine still point at the original text.

use std::collections::BTreeSet;

use super::TemplateError;

/// Template functions bound in both analysis and resolve mode.
const TEMPLATE_FUNCTIONS: [&str; 6] = ["ref", "dependency", "lookup", "configure", "dev", "prod"];

/// Builtins rewritten into tera operators or filters.
const BUILTINS: [&str; 10] = ["eq", "ne", "lt", "le", "gt", "ge", "and", "or", "not", "default"];

fn is_function(name: &str) -> bool {
    TEMPLATE_FUNCTIONS.contains(&name) || BUILTINS.contains(&name)
}

/// A template rewritten into tera syntax.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Normalized {
    pub text: String,
    /// Every free variable path used by a rewritten action, e.g. `env.limit`
    pub paths: BTreeSet<String>,
    /// Free paths iterated over by `range`
    pub iterated: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// A literal already in tera form
    Literal(String),
    /// `.a.b`; empty for a lone `.`
    Field(Vec<String>),
    /// `$x.a`; the name is empty for `$`
    Var(String, Vec<String>),
    Ident(String, Vec<String>),
    /// A tera keyword call such as `ref(name="x")`, copied verbatim
    Call(String),
    LParen,
    RParen,
    Pipe,
    Comma,
    Declare,
    Assign,
}

enum Operand {
    Func(String),
    Expr(String),
}

enum Tag {
    Expr(String),
    Stmt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    Range,
}

/// Rewrites positional template actions into tera syntax.
pub(crate) fn normalize(text: &str) -> Result<Normalized, TemplateError> {
    let mut normalizer = Normalizer {
        out: String::with_capacity(text.len()),
        blocks: Vec::new(),
        dots: vec![String::new()],
        paths: BTreeSet::new(),
        iterated: BTreeSet::new(),
    };

    let mut rest = 0;
    while let Some(found) = text[rest..].find("{{") {
        let start = rest + found;
        normalizer.out.push_str(&text[rest..start]);
        let line = line_of(text, start);
        let end = find_action_end(text, start + 2).ok_or_else(|| syntax(line, "unclosed action"))?;
        normalizer
            .action(&text[start + 2..end])
            .map_err(|message| syntax(line, message))?;
        rest = end + 2;
    }
    normalizer.out.push_str(&text[rest..]);

    if let Some(block) = normalizer.blocks.last() {
        let opened = if *block == Block::If { "if" } else { "range" };
        return Err(syntax(
            line_of(text, text.len()),
            format!("unexpected EOF: {opened} without a matching end"),
        ));
    }

    Ok(Normalized {
        text: normalizer.out,
        paths: normalizer.paths,
        iterated: normalizer.iterated,
    })
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        message: message.into(),
        line: Some(line),
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Finds the `}}` closing an action body starting at `from`, skipping quoted text
/// and comments.
fn find_action_end(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = text[i + 2..].find("*/")?;
                i += close + 3;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

struct Normalizer {
    out: String,
    blocks: Vec<Block>,
    /// What `.` is bound to at each `range` depth; the root is empty
    dots: Vec<String>,
    paths: BTreeSet<String>,
    iterated: BTreeSet<String>,
}

impl Normalizer {
    fn action(&mut self, raw: &str) -> Result<(), String> {
        let newlines = raw.matches('\n').count();
        let (trim_left, body) = match raw.strip_prefix('-') {
            Some(rest) if rest.starts_with(char::is_whitespace) => (true, rest),
            _ => (false, raw),
        };
        let (trim_right, body) = match body.strip_suffix('-') {
            Some(rest) if rest.ends_with(char::is_whitespace) => (true, rest),
            _ => (false, body),
        };
        let body = body.trim();

        if let Some(comment) = body.strip_prefix("/*") {
            if !comment.ends_with("*/") {
                return Err("comment ends before closing delimiter".to_string());
            }
            self.out.push_str("{# ");
            self.out.push_str(&"\n".repeat(newlines));
            self.out.push_str(" #}");
            return Ok(());
        }

        let tokens = tokenize(body)?;
        let (open, close, inner) = match self.convert(&tokens)? {
            Tag::Expr(expr) => ("{{", "}}", expr),
            Tag::Stmt(stmt) => ("{%", "%}", stmt),
        };
        let padding = newlines.saturating_sub(inner.matches('\n').count());

        self.out.push_str(open);
        if trim_left {
            self.out.push('-');
        }
        self.out.push(' ');
        self.out.push_str(&inner);
        self.out.push_str(&"\n".repeat(padding));
        self.out.push(' ');
        if trim_right {
            self.out.push('-');
        }
        self.out.push_str(close);
        Ok(())
    }

    fn convert(&mut self, tokens: &[Token]) -> Result<Tag, String> {
        let keyword = match tokens.first() {
            None => return Err("missing value for command".to_string()),
            Some(Token::Ident(name, fields)) if fields.is_empty() => name.as_str(),
            Some(_) => "",
        };

        match keyword {
            "if" => {
                let cond = self.pipeline(&tokens[1..])?;
                self.blocks.push(Block::If);
                Ok(Tag::Stmt(format!("if {cond}")))
            }
            "else" => {
                if self.blocks.last() != Some(&Block::If) {
                    return Err("unexpected else outside of if".to_string());
                }
                match &tokens[1..] {
                    [] => Ok(Tag::Stmt("else".to_string())),
                    [Token::Ident(name, fields), rest @ ..] if name == "if" && fields.is_empty() => {
                        Ok(Tag::Stmt(format!("elif {}", self.pipeline(rest)?)))
                    }
                    _ => Err("unexpected tokens after else".to_string()),
                }
            }
            "end" => {
                if tokens.len() > 1 {
                    return Err("unexpected tokens after end".to_string());
                }
                match self.blocks.pop() {
                    Some(Block::If) => Ok(Tag::Stmt("endif".to_string())),
                    Some(Block::Range) => {
                        self.dots.pop();
                        Ok(Tag::Stmt("endfor".to_string()))
                    }
                    None => Err("unexpected end".to_string()),
                }
            }
            "range" => self.range(&tokens[1..]),
            "break" | "continue" => {
                if !self.blocks.contains(&Block::Range) {
                    return Err(format!("{keyword} outside of range"));
                }
                Ok(Tag::Stmt(keyword.to_string()))
            }
            "with" | "define" | "template" | "block" => {
                Err(format!("unsupported action \"{keyword}\""))
            }
            _ => match tokens {
                [Token::Var(name, fields), Token::Declare | Token::Assign, rest @ ..]
                    if !name.is_empty() && fields.is_empty() =>
                {
                    Ok(Tag::Stmt(format!("set {name} = {}", self.pipeline(rest)?)))
                }
                _ => Ok(Tag::Expr(self.pipeline(tokens)?)),
            },
        }
    }

    fn range(&mut self, tokens: &[Token]) -> Result<Tag, String> {
        let (vars, target) = match tokens {
            [Token::Var(v, fv), Token::Declare, rest @ ..] if !v.is_empty() && fv.is_empty() => {
                (vec![v.clone()], rest)
            }
            [
                Token::Var(k, fk),
                Token::Comma,
                Token::Var(v, fv),
                Token::Declare,
                rest @ ..,
            ] if !k.is_empty() && !v.is_empty() && fk.is_empty() && fv.is_empty() => {
                (vec![k.clone(), v.clone()], rest)
            }
            _ => (Vec::new(), tokens),
        };

        let iterable = self.pipeline(target)?;
        if let [single] = target {
            if let Some(path) = self.free_path(single) {
                self.iterated.insert(path);
            }
        }

        let item = match vars.last() {
            Some(v) => v.clone(),
            None => format!("_item{}", self.dots.len()),
        };
        let bindings = if vars.is_empty() {
            item.clone()
        } else {
            vars.join(", ")
        };
        self.dots.push(item);
        self.blocks.push(Block::Range);
        Ok(Tag::Stmt(format!("for {bindings} in {iterable}")))
    }

    fn pipeline(&mut self, tokens: &[Token]) -> Result<String, String> {
        let mut commands: Vec<&[Token]> = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                Token::Pipe if depth == 0 => {
                    commands.push(&tokens[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        commands.push(&tokens[start..]);

        let mut expr: Option<String> = None;
        for command in commands {
            if command.is_empty() {
                return Err("missing command in pipeline".to_string());
            }
            expr = Some(self.command(command, expr)?);
        }
        expr.ok_or_else(|| "missing value for command".to_string())
    }

    fn command(&mut self, tokens: &[Token], piped: Option<String>) -> Result<String, String> {
        // A bare name after `|` is a filter
        if let (Some(input), [Token::Ident(name, fields)]) = (&piped, tokens) {
            if fields.is_empty() && !is_function(name) {
                return Ok(format!("{input} | {name}"));
            }
        }

        let operands = self.operands(tokens)?;
        match operands.split_first() {
            Some((Operand::Func(name), args)) => {
                let mut values = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    values.push(match arg {
                        Operand::Expr(expr) => expr.clone(),
                        Operand::Func(f) => call(f, &[])?,
                    });
                }
                values.extend(piped);
                call(name, &values)
            }
            Some((Operand::Expr(first), rest)) => {
                if !rest.is_empty() {
                    return Err(format!("can't give argument to non-function {first}"));
                }
                match piped {
                    None => Ok(first.clone()),
                    Some(_) => Err(format!("non-function {first} in pipeline stage")),
                }
            }
            None => Err("missing value for command".to_string()),
        }
    }

    fn operands(&mut self, tokens: &[Token]) -> Result<Vec<Operand>, String> {
        let mut operands = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            let operand = match token {
                Token::Ident(name, fields) if fields.is_empty() && is_function(name) => {
                    Operand::Func(name.clone())
                }
                Token::LParen => {
                    let close = matching_paren(tokens, i)?;
                    let inner = self.pipeline(&tokens[i + 1..close])?;
                    i = close;
                    Operand::Expr(format!("({inner})"))
                }
                Token::Literal(lit) | Token::Call(lit) => Operand::Expr(lit.clone()),
                Token::Field(_) | Token::Var(..) | Token::Ident(..) => {
                    if let Some(path) = self.free_path(token) {
                        self.paths.insert(path);
                    }
                    Operand::Expr(self.path(token)?)
                }
                Token::RParen => return Err("unexpected right paren".to_string()),
                Token::Pipe => return Err("unexpected pipe".to_string()),
                Token::Comma => return Err("unexpected comma".to_string()),
                Token::Declare | Token::Assign => {
                    return Err("unexpected assignment".to_string());
                }
            };
            operands.push(operand);
            i += 1;
        }
        Ok(operands)
    }

    /// Renders a field, variable or identifier as a tera path.
    fn path(&self, token: &Token) -> Result<String, String> {
        let dot = self.dots.last().map(String::as_str).unwrap_or_default();
        let (root, fields) = match token {
            Token::Field(fields) => (dot, fields),
            Token::Var(name, fields) => (name.as_str(), fields),
            Token::Ident(name, fields) => (name.as_str(), fields),
            _ => return Err("expected a path".to_string()),
        };
        if root.is_empty() && fields.is_empty() {
            return Err("'.' and '$' on their own are only supported inside range".to_string());
        }
        let mut parts: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        if !root.is_empty() {
            parts.push(root);
        }
        parts.extend(fields.iter().map(String::as_str));
        Ok(parts.join("."))
    }

    /// The path a token reads from the template data, if it is not bound locally.
    fn free_path(&self, token: &Token) -> Option<String> {
        let at_root = self.dots.last().is_none_or(String::is_empty);
        match token {
            Token::Field(fields) if at_root && !fields.is_empty() => Some(fields.join(".")),
            Token::Var(name, fields) if name.is_empty() && !fields.is_empty() => {
                Some(fields.join("."))
            }
            Token::Ident(name, fields) if !is_function(name) => {
                let mut path = name.clone();
                for field in fields {
                    path.push('.');
                    path.push_str(field);
                }
                Some(path)
            }
            _ => None,
        }
    }
}

/// Builds the tera form of a positional function call.
fn call(name: &str, args: &[String]) -> Result<String, String> {
    match (name, args) {
        ("ref" | "dependency" | "lookup", [resource]) => Ok(format!("{name}(name={resource})")),
        ("ref" | "dependency" | "lookup", [kind, resource]) => {
            Ok(format!("{name}(kind={kind}, name={resource})"))
        }
        ("ref" | "dependency" | "lookup", _) => Err(format!(
            "invalid \"{name}\" args: expected a name, optionally preceded by a kind"
        )),
        ("configure", [yaml]) => Ok(format!("configure(yaml={yaml})")),
        ("configure", [key, value]) => Ok(format!("configure(key={key}, value={value})")),
        ("configure", _) => Err("\"configure\" takes one or two arguments".to_string()),
        ("dev" | "prod", []) => Ok(format!("{name}()")),
        ("not", [value]) => Ok(format!("(not {value})")),
        ("and" | "or", [_, _, ..]) => Ok(format!("({})", args.join(&format!(" {name} ")))),
        ("eq", [first, rest @ ..]) if !rest.is_empty() => {
            let alternatives: Vec<String> = rest.iter().map(|v| format!("{first} == {v}")).collect();
            Ok(format!("({})", alternatives.join(" or ")))
        }
        ("ne" | "lt" | "le" | "gt" | "ge", [a, b]) => {
            let op = match name {
                "ne" => "!=",
                "lt" => "<",
                "le" => "<=",
                "gt" => ">",
                _ => ">=",
            };
            Ok(format!("({a} {op} {b})"))
        }
        ("default", [fallback, value]) => Ok(format!("({value} | default(value={fallback}))")),
        _ => Err(format!("wrong number of args for {name}: got {}", args.len())),
    }
}

fn matching_paren(tokens: &[Token], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unclosed left paren".to_string())
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn read_ident(chars: &[char], mut i: usize) -> (String, usize) {
    let start = i;
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

/// Reads `.a.b` segments following a name.
fn read_fields(chars: &[char], mut i: usize) -> (Vec<String>, usize) {
    let mut fields = Vec::new();
    while chars.get(i) == Some(&'.') && chars.get(i + 1).copied().is_some_and(is_ident_start) {
        let (field, next) = read_ident(chars, i + 1);
        fields.push(field);
        i = next;
    }
    (fields, i)
}

/// Renders string content as a tera literal; tera strings have no escapes.
fn tera_string(content: &str) -> Result<String, String> {
    for quote in ['"', '\'', '`'] {
        if !content.contains(quote) {
            return Ok(format!("{quote}{content}{quote}"));
        }
    }
    Err("string literal contains every quote character".to_string())
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' if chars.get(i + 1) != Some(&'=') => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '"' => {
                let mut content = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted string".to_string()),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| "unterminated quoted string".to_string())?;
                            content.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(ch) => {
                            content.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(tera_string(&content)?));
                i += 1;
            }
            '`' => {
                let start = i + 1;
                let len = chars[start..]
                    .iter()
                    .position(|ch| *ch == '`')
                    .ok_or_else(|| "unterminated raw quoted string".to_string())?;
                let content: String = chars[start..start + len].iter().collect();
                tokens.push(Token::Literal(tera_string(&content)?));
                i = start + len + 1;
            }
            '\'' => return Err("character constants are not supported".to_string()),
            '.' => {
                if chars.get(i + 1).copied().is_some_and(is_ident_start) {
                    let (fields, next) = read_fields(&chars, i);
                    tokens.push(Token::Field(fields));
                    i = next;
                } else {
                    tokens.push(Token::Field(Vec::new()));
                    i += 1;
                }
            }
            '$' => {
                let (name, next) = read_ident(&chars, i + 1);
                let (fields, next) = read_fields(&chars, next);
                tokens.push(Token::Var(name, fields));
                i = next;
            }
            c if c.is_ascii_digit()
                || (matches!(c, '-' | '+') && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
            }
            c if is_ident_start(c) => {
                let start = i;
                let (name, next) = read_ident(&chars, i);
                if chars.get(next) == Some(&'(') {
                    let close = verbatim_call_end(&chars, next)?;
                    tokens.push(Token::Call(chars[start..=close].iter().collect()));
                    i = close + 1;
                    continue;
                }
                let (fields, next) = read_fields(&chars, next);
                i = next;
                match name.as_str() {
                    "true" | "false" if fields.is_empty() => tokens.push(Token::Literal(name)),
                    "nil" => return Err("nil is not a command".to_string()),
                    _ => tokens.push(Token::Ident(name, fields)),
                }
            }
            other => return Err(format!("unexpected {other:?} in action")),
        }
    }
    Ok(tokens)
}

/// Finds the paren closing a tera call opened at `open`, skipping quoted text.
fn verbatim_call_end(chars: &[char], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in chars.iter().enumerate().skip(open) {
        match (quote, *ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'' | '`') => quote = Some(*ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unclosed left paren".to_string())
}
