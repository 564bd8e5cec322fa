//! Render context: per-instance substitution values and keyed data.
//!
//! Templates reference substitution values with `{key}` tokens. The context
//! owns those values plus a free-form JSON data map used by state-reactive
//! animations and interaction handlers.

use serde_json::Value;
use std::collections::HashMap;

/// Mutable runtime context attached to a panel instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    /// Substitution values, referenced by `{key}` tokens in templates.
    values: HashMap<String, String>,
    /// Free-form keyed data (watched by state-reactive animations).
    data: HashMap<String, Value>,
}

impl RenderContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a substitution value.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a substitution value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a keyed data entry.
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Look up a keyed data entry.
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Iterate over substitution keys in no particular order.
    pub fn value_keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Replace every `{key}` token in `text` with its substitution value.
    ///
    /// Unknown tokens are left verbatim so the optional external
    /// substitution service gets a chance at them.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for piece in TokenIter::new(text) {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Token(key) => match self.values.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

/// Collect the substitution keys referenced by `text`, in order of first
/// appearance, without duplicates.
pub fn referenced_keys<'a>(text: &'a str, out: &mut Vec<&'a str>) {
    for piece in TokenIter::new(text) {
        if let Piece::Token(key) = piece {
            if !out.contains(&key) {
                out.push(key);
            }
        }
    }
}

/// Whether `text` contains at least one complete `{key}` token. An
/// unterminated `{` is literal text, not a token.
pub fn contains_token(text: &str) -> bool {
    TokenIter::new(text).any(|piece| matches!(piece, Piece::Token(_)))
}

enum Piece<'a> {
    Literal(&'a str),
    Token(&'a str),
}

/// Splits text into literal runs and `{key}` tokens. An unterminated `{`
/// is treated as literal text.
struct TokenIter<'a> {
    rest: &'a str,
}

impl<'a> TokenIter<'a> {
    const fn new(text: &'a str) -> Self {
        Self { rest: text }
    }
}

impl<'a> Iterator for TokenIter<'a> {
    type Item = Piece<'a>;

    fn next(&mut self) -> Option<Piece<'a>> {
        if self.rest.is_empty() {
            return None;
        }
        if let Some(stripped) = self.rest.strip_prefix('{') {
            if let Some(end) = stripped.find('}') {
                let key = &stripped[..end];
                self.rest = &stripped[end + 1..];
                return Some(Piece::Token(key));
            }
            // No closing brace: emit the remainder as a literal.
            let literal = self.rest;
            self.rest = "";
            return Some(Piece::Literal(literal));
        }
        let end = self.rest.find('{').unwrap_or(self.rest.len());
        let (literal, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(Piece::Literal(literal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known_token() {
        let mut ctx = RenderContext::new();
        ctx.set_value("name", "Aria");
        assert_eq!(ctx.substitute("Hello {name}!"), "Hello Aria!");
    }

    #[test]
    fn test_substitute_unknown_token_left_verbatim() {
        let ctx = RenderContext::new();
        assert_eq!(ctx.substitute("Hi {missing}"), "Hi {missing}");
    }

    #[test]
    fn test_substitute_unterminated_brace() {
        let mut ctx = RenderContext::new();
        ctx.set_value("a", "1");
        assert_eq!(ctx.substitute("{a} and {rest"), "1 and {rest");
    }

    #[test]
    fn test_referenced_keys_deduplicated_in_order() {
        let mut keys = Vec::new();
        referenced_keys("{b} {a} {b}", &mut keys);
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_contains_token_ignores_unterminated_brace() {
        assert!(contains_token("{a} left"));
        assert!(!contains_token("no tokens here"));
        assert!(!contains_token("50% { off"));
    }

    #[test]
    fn test_data_roundtrip() {
        let mut ctx = RenderContext::new();
        ctx.set_data("count", serde_json::json!(3));
        assert_eq!(ctx.data("count"), Some(&serde_json::json!(3)));
    }
}
