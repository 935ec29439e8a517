// SPDX-License-Identifier: AGPL-3.0-only

//! Tokenizer and tree builder for the scenario file format.
//!
//! The format is a nested block grammar:
//!
//! ```text
//! Heading: arg, arg, arg { ...body nodes... } ;
//! ```
//!
//! Every part after the heading is optional. A heading may be empty (the
//! node starts with `:`), which list-like blocks such as `Bounds` and
//! `Force-grid` use for their per-entry rows. `#` starts a comment running
//! to the end of the line; `;` separates nodes and is otherwise ignored.

use crate::error::GranError;

/// One node of the parsed scenario tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Heading before the `:` (may be empty).
    pub heading: String,
    /// Comma-separated arguments after the `:`.
    pub args: Vec<String>,
    /// Nodes of the attached `{ ... }` block, if any.
    pub body: Vec<Node>,
    /// 1-based source line of the heading, for error reporting.
    pub line: usize,
}

impl Node {
    /// First body node with the given heading.
    #[must_use]
    pub fn find(&self, heading: &str) -> Option<&Node> {
        self.body.iter().find(|n| n.heading == heading)
    }

    /// All body nodes with the given heading.
    pub fn find_all<'a>(&'a self, heading: &'a str) -> impl Iterator<Item = &'a Node> {
        self.body.iter().filter(move |n| n.heading == heading)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Atom(String),
    Colon,
    Semi,
    Comma,
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, GranError> {
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut atom = String::new();
    let mut atom_line = 1usize;
    let mut chars = text.chars().peekable();

    let flush = |atom: &mut String, atom_line: usize, tokens: &mut Vec<(Token, usize)>| {
        if !atom.is_empty() {
            tokens.push((Token::Atom(std::mem::take(atom)), atom_line));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                flush(&mut atom, atom_line, &mut tokens);
                line += 1;
            }
            '#' => {
                flush(&mut atom, atom_line, &mut tokens);
                for c2 in chars.by_ref() {
                    if c2 == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            c if c.is_whitespace() => flush(&mut atom, atom_line, &mut tokens),
            ':' => {
                flush(&mut atom, atom_line, &mut tokens);
                tokens.push((Token::Colon, line));
            }
            ';' => {
                flush(&mut atom, atom_line, &mut tokens);
                tokens.push((Token::Semi, line));
            }
            ',' => {
                flush(&mut atom, atom_line, &mut tokens);
                tokens.push((Token::Comma, line));
            }
            '{' => {
                flush(&mut atom, atom_line, &mut tokens);
                tokens.push((Token::Open, line));
            }
            '}' => {
                flush(&mut atom, atom_line, &mut tokens);
                tokens.push((Token::Close, line));
            }
            c => {
                if atom.is_empty() {
                    atom_line = line;
                }
                atom.push(c);
            }
        }
    }
    flush(&mut atom, atom_line, &mut tokens);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(_, l)| *l)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        t
    }

    fn parse_block(&mut self, top_level: bool) -> Result<Vec<Node>, GranError> {
        let mut nodes = Vec::new();
        loop {
            while self.peek() == Some(&Token::Semi) {
                self.pos += 1;
            }
            match self.peek() {
                None => {
                    if top_level {
                        return Ok(nodes);
                    }
                    return Err(GranError::BadStructure {
                        line: self.line(),
                        msg: "unclosed block".into(),
                    });
                }
                Some(Token::Close) => {
                    if top_level {
                        return Err(GranError::BadStructure {
                            line: self.line(),
                            msg: "unmatched '}'".into(),
                        });
                    }
                    return Ok(nodes);
                }
                _ => nodes.push(self.parse_node()?),
            }
        }
    }

    fn parse_node(&mut self) -> Result<Node, GranError> {
        let line = self.line();
        let heading = match self.peek() {
            Some(Token::Atom(_)) => {
                let Some(Token::Atom(s)) = self.bump() else {
                    unreachable!("peeked an atom")
                };
                s
            }
            Some(Token::Colon) => String::new(),
            _ => {
                return Err(GranError::BadStructure {
                    line,
                    msg: "expected a heading".into(),
                })
            }
        };
        if self.peek() != Some(&Token::Colon) {
            return Err(GranError::BadStructure {
                line: self.line(),
                msg: format!("expected ':' after heading '{heading}'"),
            });
        }
        self.pos += 1;

        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Atom(_)) => {
                    let Some(Token::Atom(s)) = self.bump() else {
                        unreachable!("peeked an atom")
                    };
                    args.push(s);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
                Some(Token::Comma) => {
                    return Err(GranError::BadStructure {
                        line: self.line(),
                        msg: "dangling ','".into(),
                    })
                }
                _ => break,
            }
        }

        let mut body = Vec::new();
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            body = self.parse_block(false)?;
            if self.peek() != Some(&Token::Close) {
                return Err(GranError::BadStructure {
                    line: self.line(),
                    msg: "expected '}'".into(),
                });
            }
            self.pos += 1;
        }

        Ok(Node {
            heading,
            args,
            body,
            line,
        })
    }
}

/// Parse scenario text into its node tree.
///
/// # Errors
///
/// Returns [`GranError::BadStructure`] with the offending line on
/// malformed input.
pub fn parse_nodes(text: &str) -> Result<Vec<Node>, GranError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_block(true)
}

/// Parse an atom as `f64`, with line context on failure.
///
/// # Errors
///
/// Returns [`GranError::BadArgument`] when the atom is not a number.
pub fn parse_f64(atom: &str, line: usize) -> Result<f64, GranError> {
    atom.parse::<f64>().map_err(|_| {
        GranError::BadArgument(format!("'{atom}' is not a number (line {line})"))
    })
}

/// Parse an atom as `usize`, with line context on failure.
///
/// # Errors
///
/// Returns [`GranError::BadArgument`] when the atom is not a count.
pub fn parse_usize(atom: &str, line: usize) -> Result<usize, GranError> {
    atom.parse::<usize>().map_err(|_| {
        GranError::BadArgument(format!("'{atom}' is not a count (line {line})"))
    })
}
