//! Parser and matcher for structural addresses.
//!
//! Supports the subset the locator emits plus plain descendant paths:
//! `tag`, `*`, `#id`, `.class`, `:nth-of-type(n)`, the child combinator `>`
//! and the descendant combinator (whitespace). Identifiers may carry CSS
//! escapes (`\:` or hex escapes such as `\31 `).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError(pub String);

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid selector: {}", self.0)
    }
}

impl std::error::Error for SelectorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub nth_of_type: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Left to right; the combinator links a compound to the one before it
    parts: Vec<(Combinator, Compound)>,
}

/// Read access to an element tree, enough to evaluate a [`Selector`].
pub trait ElementTree {
    type Id: Copy;

    fn parent_element(&self, id: Self::Id) -> Option<Self::Id>;
    fn tag_name(&self, id: Self::Id) -> &str;
    fn element_id(&self, id: Self::Id) -> Option<&str>;
    fn has_class(&self, id: Self::Id, class: &str) -> bool;
    /// 1-based index among same-tag siblings
    fn nth_of_type(&self, id: Self::Id) -> usize;
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    pub fn matches<T: ElementTree>(&self, tree: &T, node: T::Id) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        self.matches_from(tree, self.parts.len() - 1, node)
    }

    fn matches_from<T: ElementTree>(&self, tree: &T, index: usize, node: T::Id) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound_matches(compound, tree, node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => tree
                .parent_element(node)
                .is_some_and(|parent| self.matches_from(tree, index - 1, parent)),
            Combinator::Descendant => {
                let mut current = tree.parent_element(node);
                while let Some(ancestor) = current {
                    if self.matches_from(tree, index - 1, ancestor) {
                        return true;
                    }
                    current = tree.parent_element(ancestor);
                }
                false
            }
        }
    }
}

fn compound_matches<T: ElementTree>(compound: &Compound, tree: &T, node: T::Id) -> bool {
    if let Some(tag) = &compound.tag {
        if !tree.tag_name(node).eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if tree.element_id(node) != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| tree.has_class(node, c)) {
        return false;
    }
    if let Some(n) = compound.nth_of_type {
        if tree.nth_of_type(node) != n {
            return false;
        }
    }
    true
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            input,
        }
    }

    fn error(&self, message: &str) -> SelectorError {
        SelectorError(format!("{} in {:?}", message, self.input))
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut parts = Vec::new();
        let mut pending = Combinator::Descendant;

        loop {
            let saw_space = self.skip_whitespace();
            match self.chars.peek() {
                None => break,
                Some('>') => {
                    if parts.is_empty() {
                        return Err(self.error("leading combinator"));
                    }
                    self.chars.next();
                    self.skip_whitespace();
                    pending = Combinator::Child;
                    if self.chars.peek().is_none() {
                        return Err(self.error("trailing combinator"));
                    }
                    continue;
                }
                Some(_) => {
                    if !parts.is_empty() && !saw_space && pending != Combinator::Child {
                        return Err(self.error("unexpected character"));
                    }
                    let compound = self.parse_compound()?;
                    parts.push((pending, compound));
                    pending = Combinator::Descendant;
                }
            }
        }

        if parts.is_empty() {
            return Err(self.error("empty selector"));
        }
        Ok(Selector { parts })
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
            skipped = true;
        }
        skipped
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut empty = true;

        match self.chars.peek() {
            Some('*') => {
                self.chars.next();
                empty = false;
            }
            Some(&c) if is_ident_start(c) => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
                empty = false;
            }
            _ => {}
        }

        loop {
            match self.chars.peek() {
                Some('#') => {
                    self.chars.next();
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.chars.next();
                    compound.classes.push(self.parse_ident()?);
                }
                Some(':') => {
                    self.chars.next();
                    compound.nth_of_type = Some(self.parse_nth_of_type()?);
                }
                _ => break,
            }
            empty = false;
        }

        if empty {
            return Err(self.error("expected a tag, id, class or pseudo-class"));
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '\\' {
                self.chars.next();
                ident.push(self.parse_escape()?);
            } else if is_ident_char(c) {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if ident.is_empty() {
            return Err(self.error("expected identifier"));
        }
        Ok(ident)
    }

    fn parse_escape(&mut self) -> Result<char, SelectorError> {
        let mut hex = String::new();
        while hex.len() < 6 && self.chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            hex.push(self.chars.next().unwrap_or('0'));
        }
        if hex.is_empty() {
            return self
                .chars
                .next()
                .ok_or_else(|| self.error("dangling escape"));
        }
        if self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid hex escape"))
    }

    fn parse_nth_of_type(&mut self) -> Result<usize, SelectorError> {
        let name: String = std::iter::from_fn(|| {
            self.chars
                .next_if(|c| c.is_ascii_alphanumeric() || *c == '-')
        })
        .collect();
        if name != "nth-of-type" {
            return Err(self.error(&format!("unsupported pseudo-class :{}", name)));
        }
        if self.chars.next() != Some('(') {
            return Err(self.error("expected '('"));
        }
        self.skip_whitespace();
        let digits: String =
            std::iter::from_fn(|| self.chars.next_if(|c| c.is_ascii_digit())).collect();
        self.skip_whitespace();
        if self.chars.next() != Some(')') {
            return Err(self.error("expected ')'"));
        }
        match digits.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(self.error("nth-of-type needs a positive integer")),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Escape an identifier for embedding after `#` or `.`.
pub fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, c) in ident.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if is_ident_char(c) {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
