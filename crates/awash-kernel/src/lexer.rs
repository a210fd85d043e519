//! Lexer for awash source code.
//!
//! Converts source text into a stream of tokens using the logos lexer
//! generator. The grammar is word-oriented: whitespace is a real token
//! because adjacency decides whether two pieces belong to the same
//! compound (`a$x` is one word, `a $x` is two).
//!
//! # Token Categories
//!
//! - **Punctuation**: `;`, `|`, `&`, `=`, `(`, `)`, `[`, `]`, `{`, `}`
//! - **Literals**: barewords, `'single-quoted'`, `"double-quoted"`
//! - **Variable references**: `$name`, `$@name`, `$ns:name`
//! - **Layout**: spaces, newlines, `#` comments

use std::fmt;
use std::ops::Range;

use logos::Logos;

use crate::eval::{CompileError, CompileErrorList};

/// A lexical token. Every token carries its byte span in the source.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
pub enum Token {
    #[regex(r"[ \t]+")]
    Space,

    #[regex(r"(\r?\n)+")]
    Newline,

    #[regex(r"#[^\n]*")]
    Comment,

    #[token(";")]
    Semi,

    #[token("|")]
    Pipe,

    #[token("&")]
    Amp,

    #[token("=")]
    Eq,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    /// `$name`, `$@name` (exploded), `$ns:name`, `$f~`.
    #[regex(r"\$@?[A-Za-z0-9_:~./-]*")]
    Variable,

    /// `'text'`; a doubled quote escapes a literal quote.
    #[regex(r"'([^']|'')*'")]
    SingleQuoted,

    /// `"text"` with backslash escapes.
    #[regex(r#""([^"\\]|\\.)*""#)]
    DoubleQuoted,

    /// Any run of characters that is not whitespace or punctuation.
    #[regex(r#"[^ \t\r\n;|&$()\[\]{}'"=#]+"#)]
    Bareword,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Space => "whitespace",
            Token::Newline => "newline",
            Token::Comment => "comment",
            Token::Semi => "';'",
            Token::Pipe => "'|'",
            Token::Amp => "'&'",
            Token::Eq => "'='",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::Variable => "variable",
            Token::SingleQuoted => "single-quoted string",
            Token::DoubleQuoted => "double-quoted string",
            Token::Bareword => "bareword",
        };
        f.write_str(s)
    }
}

/// A token plus its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Range<usize>,
}

impl Lexeme {
    /// The raw source text of this lexeme.
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.span.clone()]
    }
}

/// Tokenize a whole source string.
///
/// Returns every token, including whitespace and comments; the parser
/// decides which ones are significant where. Unlexable input produces a
/// positioned error.
pub fn tokenize(name: &str, src: &str) -> Result<Vec<Lexeme>, CompileErrorList> {
    let mut out = Vec::new();
    let mut lexer = Token::lexer(src);
    while let Some(item) = lexer.next() {
        let span = lexer.span();
        match item {
            Ok(token) => out.push(Lexeme { token, span }),
            Err(()) => {
                return Err(CompileErrorList::single(
                    name,
                    src,
                    CompileError::new(
                        format!("unexpected character {:?}", &src[span.clone()]),
                        span.start,
                        span.end,
                    ),
                ));
            }
        }
    }
    Ok(out)
}

/// Unquote a single-quoted literal: strip the outer quotes, collapse `''`.
pub fn unquote_single(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    inner.replace("''", "'")
}

/// Unquote a double-quoted literal, processing backslash escapes.
///
/// Recognized escapes: `\n`, `\t`, `\r`, `\0`, `\\`, `\"`, `\$`. An
/// unrecognized escape keeps the escaped character as-is.
pub fn unquote_double(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize("test", src)
            .expect("tokenize failed")
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    #[test]
    fn barewords_and_spaces() {
        assert_eq!(
            kinds("put hello"),
            vec![Token::Bareword, Token::Space, Token::Bareword]
        );
    }

    #[test]
    fn variables() {
        assert_eq!(kinds("$x"), vec![Token::Variable]);
        assert_eq!(kinds("$@rest"), vec![Token::Variable]);
        assert_eq!(kinds("$E:HOME"), vec![Token::Variable]);
        assert_eq!(kinds("$f~"), vec![Token::Variable]);
    }

    #[test]
    fn adjacency_is_visible_in_spans() {
        let toks = tokenize("test", "a$x b").unwrap();
        // "a" and "$x" touch; "$x" and "b" do not.
        assert_eq!(toks[0].span.end, toks[1].span.start);
        assert_ne!(toks[1].span.end, toks[2].span.start);
    }

    #[test]
    fn quoted_strings() {
        assert_eq!(kinds("'a b' \"c\\nd\""), vec![
            Token::SingleQuoted,
            Token::Space,
            Token::DoubleQuoted,
        ]);
        assert_eq!(unquote_single("'it''s'"), "it's");
        assert_eq!(unquote_double("\"a\\nb\""), "a\nb");
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            kinds("a | b; (c) [d] {e} &k=v"),
            vec![
                Token::Bareword,
                Token::Space,
                Token::Pipe,
                Token::Space,
                Token::Bareword,
                Token::Semi,
                Token::Space,
                Token::LParen,
                Token::Bareword,
                Token::RParen,
                Token::Space,
                Token::LBracket,
                Token::Bareword,
                Token::RBracket,
                Token::Space,
                Token::LBrace,
                Token::Bareword,
                Token::RBrace,
                Token::Space,
                Token::Amp,
                Token::Bareword,
                Token::Eq,
                Token::Bareword,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("put a # trailing\nput b"),
            vec![
                Token::Bareword,
                Token::Space,
                Token::Bareword,
                Token::Space,
                Token::Comment,
                Token::Newline,
                Token::Bareword,
                Token::Space,
                Token::Bareword,
            ]
        );
    }

    #[test]
    fn unterminated_quote_errors() {
        let err = tokenize("test", "put 'abc").unwrap_err();
        assert!(err.to_string().contains("unexpected character"));
    }
}
