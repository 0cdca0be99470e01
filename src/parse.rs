use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a file declares and which packages its simple annotation names can
/// resolve into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub package: Option<String>,
    pub wildcards: Vec<String>,
    pub types: Vec<String>,
}

impl Header {
    /// The file's own package (`""` for the default package) followed by its
    /// on-demand imports.
    pub fn scope_packages(&self) -> Vec<String> {
        let mut packages = vec![self.package.clone().unwrap_or_default()];
        for pkg in &self.wildcards {
            if !packages.contains(pkg) {
                packages.push(pkg.clone());
            }
        }
        packages
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Type(String),
    Block,
}

/// Reads the package, on-demand imports and declared type names of a Java
/// source file without building a syntax tree.
///
/// Comments and literals are skipped and braces are matched. Member types
/// are reported as `Outer.Inner`; local and anonymous classes, `.class`
/// literals and keywords inside strings are not reported.
pub fn scan_header(content: &str) -> Header {
    let tokens = tokenize(content);

    let mut header = Header::default();
    let mut names = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut pending: Option<String> = None;
    let mut parens = 0usize;
    let mut idx = 0usize;

    while idx < tokens.len() {
        match tokens[idx] {
            Token::LParen => parens += 1,
            Token::RParen => parens = parens.saturating_sub(1),
            Token::Open => match pending.take() {
                Some(name) if parens == 0 => stack.push(Frame::Type(name)),
                other => {
                    pending = other;
                    stack.push(Frame::Block);
                }
            },
            Token::Close => {
                stack.pop();
            }
            Token::Word(word) if parens == 0 && at_type_level(&stack) => {
                if stack.is_empty() && names.is_empty() {
                    if word == "package" && header.package.is_none() {
                        let (pkg, next) = read_qualified_name(&tokens, idx + 1);
                        if !pkg.is_empty() {
                            header.package = Some(pkg);
                        }
                        idx = next;
                        continue;
                    }
                    if word == "import" {
                        idx = read_import(&tokens, idx + 1, &mut header.wildcards);
                        continue;
                    }
                }

                if is_type_keyword(word)
                    && !follows_dot(&tokens, idx)
                    && let Some(Token::Word(name)) = tokens.get(idx + 1)
                    && is_identifier(name)
                {
                    let nested = match stack.last() {
                        Some(Frame::Type(outer)) => format!("{outer}.{name}"),
                        _ => name.to_string(),
                    };
                    names.push(nested.clone());
                    pending = Some(nested);
                    idx += 2;
                    continue;
                }
            }
            _ => {}
        }
        idx += 1;
    }

    header.types = names
        .into_iter()
        .map(|name| match header.package.as_deref() {
            Some(pkg) => format!("{pkg}.{name}"),
            None => name,
        })
        .collect();
    header
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Dot,
    At,
    Star,
    Open,
    Close,
    LParen,
    RParen,
    Other,
}

fn tokenize(content: &str) -> Vec<Token<'_>> {
    let bytes = content.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'"' if bytes[i..].starts_with(b"\"\"\"") => {
                i += 3;
                while i < bytes.len() && !bytes[i..].starts_with(b"\"\"\"") {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 3;
            }
            b'"' | b'\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Other);
            }
            b'{' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b'}' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'@' => {
                tokens.push(Token::At);
                i += 1;
            }
            _ if is_identifier_start(b) => {
                let start = i;
                while i < bytes.len() && is_identifier_part(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(&content[start..i]));
            }
            _ if b.is_ascii_whitespace() => i += 1,
            _ => {
                i += 1;
                tokens.push(Token::Other);
            }
        }
    }

    tokens
}

fn read_qualified_name(tokens: &[Token<'_>], mut idx: usize) -> (String, usize) {
    let mut name = String::new();
    while let Some(token) = tokens.get(idx) {
        match token {
            Token::Word(w) => name.push_str(w),
            Token::Dot => name.push('.'),
            _ => break,
        }
        idx += 1;
    }
    (name, idx)
}

/// Reads one import declaration, recording it when it is an on-demand import
/// of a package or type. Returns the index after the terminating `;`.
fn read_import(tokens: &[Token<'_>], idx: usize, wildcards: &mut Vec<String>) -> usize {
    let is_static = tokens.get(idx) == Some(&Token::Word("static"));
    let start = if is_static { idx + 1 } else { idx };
    let (path, next) = read_qualified_name(tokens, start);

    if !is_static
        && tokens.get(next) == Some(&Token::Star)
        && let Some(pkg) = path.strip_suffix('.')
        && !pkg.is_empty()
    {
        wildcards.push(pkg.to_string());
    }

    let mut idx = next;
    while let Some(token) = tokens.get(idx) {
        idx += 1;
        if *token == Token::Other {
            break;
        }
    }
    idx
}

fn at_type_level(stack: &[Frame]) -> bool {
    matches!(stack.last(), None | Some(Frame::Type(_)))
}

fn is_type_keyword(word: &str) -> bool {
    matches!(word, "class" | "interface" | "enum" | "record")
}

fn follows_dot(tokens: &[Token<'_>], idx: usize) -> bool {
    idx > 0 && tokens[idx - 1] == Token::Dot
}

fn is_identifier(word: &str) -> bool {
    !matches!(
        word,
        "class" | "interface" | "enum" | "record" | "extends" | "implements" | "permits"
    )
}

// Non-ASCII bytes count as identifier characters, which keeps every slice
// on a char boundary.
fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_identifier_part(b: u8) -> bool {
    is_identifier_start(b) || b.is_ascii_digit()
}
