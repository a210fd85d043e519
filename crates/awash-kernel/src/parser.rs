//! Parser for awash source code.
//!
//! A recursive-descent parser over the token stream. The grammar is
//! word-oriented: a form is a sequence of space-separated words, and a
//! word (compound) is a maximal run of *adjacent* tokens. Adjacency is
//! decided from byte spans, which is why the lexer emits whitespace as a
//! real token.
//!
//! Parse errors are collected and reported together; every error carries
//! a byte range into the source.

use crate::ast::{
    Chunk, Compound, Form, FormBody, Indexing, OptPair, Pipeline, Primary, PrimaryKind,
};
use crate::eval::{CompileError, CompileErrorList};
use crate::lexer::{self, Lexeme, Token};

/// Parse a chunk of awash source.
pub fn parse(name: &str, src: &str) -> Result<Chunk, CompileErrorList> {
    let toks = lexer::tokenize(name, src)?;
    let mut p = Parser {
        src,
        toks,
        pos: 0,
        errors: Vec::new(),
    };
    let chunk = p.chunk(None);
    p.skip_blank();
    if let Some(lx) = p.peek().cloned() {
        p.error_at(
            lx.span.start,
            lx.span.end,
            format!("unexpected {}", lx.token),
        );
    }
    if p.errors.is_empty() {
        Ok(chunk)
    } else {
        Err(CompileErrorList::new(name, src, p.errors))
    }
}

struct Parser<'src> {
    src: &'src str,
    toks: Vec<Lexeme>,
    pos: usize,
    errors: Vec<CompileError>,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Lexeme> {
        self.toks.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|l| &l.token)
    }

    fn at(&self, t: Token) -> bool {
        self.peek_token() == Some(&t)
    }

    fn bump(&mut self) -> Option<Lexeme> {
        let lx = self.toks.get(self.pos).cloned();
        if lx.is_some() {
            self.pos += 1;
        }
        lx
    }

    /// Byte offset of the next token, or end of source.
    fn offset(&self) -> usize {
        self.peek().map(|l| l.span.start).unwrap_or(self.src.len())
    }

    /// End of the most recently consumed token.
    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.toks[self.pos - 1].span.end
        }
    }

    /// True if the next token starts exactly where the previous ended.
    fn adjacent(&self) -> bool {
        match self.peek() {
            Some(lx) => self.pos > 0 && lx.span.start == self.prev_end(),
            None => false,
        }
    }

    fn skip_space(&mut self) {
        while matches!(self.peek_token(), Some(Token::Space) | Some(Token::Comment)) {
            self.bump();
        }
    }

    fn skip_blank(&mut self) {
        while matches!(
            self.peek_token(),
            Some(Token::Space) | Some(Token::Comment) | Some(Token::Newline) | Some(Token::Semi)
        ) {
            self.bump();
        }
    }

    fn error_at(&mut self, begin: usize, end: usize, msg: impl Into<String>) {
        self.errors.push(CompileError::new(msg, begin, end));
    }

    fn error_here(&mut self, msg: impl Into<String>) {
        let begin = self.offset();
        let end = self.peek().map(|l| l.span.end).unwrap_or(begin);
        self.error_at(begin, end.max(begin), msg);
    }

    fn expect(&mut self, t: Token, msg: &str) {
        if self.at(t) {
            self.bump();
        } else {
            self.error_here(msg.to_string());
        }
    }

    /// chunk := { pipeline (';' | newline)* }
    ///
    /// `term` is the closing token of the surrounding construct (for
    /// lambda bodies), or None at top level.
    fn chunk(&mut self, term: Option<Token>) -> Chunk {
        let begin = self.offset();
        let mut pipelines = Vec::new();
        loop {
            self.skip_blank();
            match self.peek_token() {
                None => break,
                Some(t) if Some(t) == term.as_ref() => break,
                _ => {}
            }
            if let Some(p) = self.pipeline() {
                pipelines.push(p);
            }
            self.skip_space();
            match self.peek_token() {
                None | Some(Token::Newline) | Some(Token::Semi) => continue,
                Some(t) if Some(t) == term.as_ref() => break,
                Some(_) => {
                    let lx = self.peek().cloned().unwrap();
                    self.error_at(
                        lx.span.start,
                        lx.span.end,
                        format!("unexpected {}", lx.token),
                    );
                    self.bump();
                }
            }
        }
        Chunk {
            begin,
            end: self.prev_end().max(begin),
            pipelines,
        }
    }

    /// pipeline := form { '|' form }
    fn pipeline(&mut self) -> Option<Pipeline> {
        let begin = self.offset();
        let mut forms = Vec::new();
        if let Some(f) = self.form() {
            forms.push(f);
        }
        loop {
            self.skip_space();
            if !self.at(Token::Pipe) {
                break;
            }
            self.bump();
            self.skip_space();
            if let Some(f) = self.form() {
                forms.push(f);
            }
        }
        if forms.is_empty() {
            return None;
        }
        Some(Pipeline {
            begin,
            end: self.prev_end().max(begin),
            forms,
        })
    }

    /// form := word { word }, where a word is a compound, a standalone
    /// `=` (assignment marker) or an `&name=value` option.
    fn form(&mut self) -> Option<Form> {
        self.skip_space();
        let begin = self.offset();
        let mut compounds: Vec<Compound> = Vec::new();
        let mut opts: Vec<OptPair> = Vec::new();
        let mut eq_at: Option<usize> = None;
        loop {
            self.skip_space();
            match self.peek_token() {
                None
                | Some(Token::Newline)
                | Some(Token::Semi)
                | Some(Token::Pipe)
                | Some(Token::RParen)
                | Some(Token::RBrace) => break,
                Some(Token::RBracket) => {
                    self.error_here("unexpected ']'");
                    self.bump();
                }
                Some(Token::Amp) => {
                    if let Some(opt) = self.option() {
                        opts.push(opt);
                    }
                }
                Some(Token::Eq) => {
                    let lx = self.bump().unwrap();
                    if eq_at.is_some() {
                        self.error_at(lx.span.start, lx.span.end, "duplicate '=' in form");
                    } else {
                        eq_at = Some(compounds.len());
                    }
                }
                Some(_) => compounds.push(self.compound()),
            }
        }
        if compounds.is_empty() && opts.is_empty() && eq_at.is_none() {
            self.error_here("expected a command form");
            // Make sure the caller's loop advances past whatever stopped us.
            if !matches!(
                self.peek_token(),
                None | Some(Token::Newline) | Some(Token::Semi) | Some(Token::RParen)
                    | Some(Token::RBrace)
            ) {
                self.bump();
            }
            return None;
        }
        let end = self.prev_end().max(begin);
        let body = match eq_at {
            Some(split) => {
                if !opts.is_empty() {
                    self.error_at(begin, end, "options are not allowed in assignment");
                }
                let rhs = compounds.split_off(split);
                if compounds.is_empty() {
                    self.error_at(begin, end, "assignment needs at least one lvalue");
                }
                FormBody::Assignment {
                    lvalues: compounds,
                    rhs,
                }
            }
            None => {
                if compounds.is_empty() {
                    self.error_at(begin, end, "form needs a head");
                    return None;
                }
                let head = compounds.remove(0);
                FormBody::Plain {
                    head,
                    args: compounds,
                    opts,
                }
            }
        };
        Some(Form { begin, end, body })
    }

    /// option := '&' bareword '=' compound
    fn option(&mut self) -> Option<OptPair> {
        let amp = self.bump().unwrap(); // the '&'
        let begin = amp.span.start;
        let name = match self.peek() {
            Some(lx) if lx.token == Token::Bareword && self.adjacent() => {
                let text = lx.text(self.src).to_string();
                self.bump();
                text
            }
            _ => {
                self.error_here("expected option name after '&'");
                return None;
            }
        };
        if !(self.at(Token::Eq) && self.adjacent()) {
            self.error_here("expected '=' after option name");
            return None;
        }
        self.bump();
        let value = self.compound();
        Some(OptPair {
            begin,
            end: value.end,
            name,
            value,
        })
    }

    /// compound := indexing { adjacent-indexing }
    fn compound(&mut self) -> Compound {
        let begin = self.offset();
        let mut indexings = vec![self.indexing()];
        loop {
            if !self.adjacent() {
                break;
            }
            match self.peek_token() {
                Some(Token::Bareword)
                | Some(Token::SingleQuoted)
                | Some(Token::DoubleQuoted)
                | Some(Token::Variable)
                | Some(Token::LParen)
                | Some(Token::LBracket) => indexings.push(self.indexing()),
                // A glued '=' is part of the word: `--color=auto`.
                Some(Token::Eq) => {
                    let lx = self.bump().unwrap();
                    indexings.push(Indexing {
                        begin: lx.span.start,
                        end: lx.span.end,
                        head: Primary {
                            begin: lx.span.start,
                            end: lx.span.end,
                            kind: PrimaryKind::Bareword("=".to_string()),
                        },
                        indices: Vec::new(),
                    });
                }
                _ => break,
            }
        }
        Compound {
            begin,
            end: self.prev_end().max(begin),
            indexings,
        }
    }

    /// indexing := primary { '[' compound ']' }
    fn indexing(&mut self) -> Indexing {
        let begin = self.offset();
        let head = self.primary();
        let mut indices = Vec::new();
        while self.adjacent() && self.at(Token::LBracket) {
            self.bump();
            self.skip_space();
            let idx = self.compound();
            self.skip_space();
            self.expect(Token::RBracket, "expected ']' after index");
            indices.push(idx);
        }
        Indexing {
            begin,
            end: self.prev_end().max(begin),
            head,
            indices,
        }
    }

    fn primary(&mut self) -> Primary {
        let begin = self.offset();
        let Some(lx) = self.peek().cloned() else {
            self.error_here("expected an expression");
            return self.placeholder(begin);
        };
        match lx.token {
            Token::Bareword => {
                self.bump();
                Primary {
                    begin,
                    end: lx.span.end,
                    kind: PrimaryKind::Bareword(lx.text(self.src).to_string()),
                }
            }
            Token::SingleQuoted => {
                self.bump();
                Primary {
                    begin,
                    end: lx.span.end,
                    kind: PrimaryKind::SingleQuoted(lexer::unquote_single(lx.text(self.src))),
                }
            }
            Token::DoubleQuoted => {
                self.bump();
                Primary {
                    begin,
                    end: lx.span.end,
                    kind: PrimaryKind::DoubleQuoted(lexer::unquote_double(lx.text(self.src))),
                }
            }
            Token::Variable => {
                self.bump();
                let name = lx.text(self.src)[1..].to_string();
                if name.is_empty() {
                    self.error_at(lx.span.start, lx.span.end, "empty variable name");
                }
                Primary {
                    begin,
                    end: lx.span.end,
                    kind: PrimaryKind::Variable(name),
                }
            }
            Token::LParen => {
                self.bump();
                self.skip_space();
                let pipeline = self.pipeline();
                self.skip_space();
                self.expect(Token::RParen, "expected ')' to close capture");
                match pipeline {
                    Some(p) => Primary {
                        begin,
                        end: self.prev_end(),
                        kind: PrimaryKind::Capture(Box::new(p)),
                    },
                    None => {
                        self.error_at(begin, self.prev_end(), "empty capture");
                        self.placeholder(begin)
                    }
                }
            }
            Token::LBrace => {
                self.bump();
                let body = self.chunk(Some(Token::RBrace));
                self.expect(Token::RBrace, "expected '}' to close lambda");
                Primary {
                    begin,
                    end: self.prev_end(),
                    kind: PrimaryKind::Lambda {
                        has_params: false,
                        params: Vec::new(),
                        body: Box::new(body),
                    },
                }
            }
            Token::LBracket => self.bracketed(begin),
            other => {
                self.error_at(lx.span.start, lx.span.end, format!("unexpected {}", other));
                self.bump();
                self.placeholder(begin)
            }
        }
    }

    /// `[...]` — list, map, or the parameter list of a lambda.
    fn bracketed(&mut self, begin: usize) -> Primary {
        self.bump(); // '['
        self.skip_blank();
        let mut elems: Vec<Compound> = Vec::new();
        let mut pairs: Vec<(Compound, Compound)> = Vec::new();
        let is_map = self.at(Token::Amp);
        if is_map {
            loop {
                self.skip_blank();
                if self.at(Token::RBracket) || self.peek().is_none() {
                    break;
                }
                if !self.at(Token::Amp) {
                    self.error_here("expected '&key=value' in map");
                    self.bump();
                    continue;
                }
                self.bump(); // '&'
                if self.at(Token::RBracket) {
                    break; // `[&]` — the empty map
                }
                let key_indexing = self.indexing();
                let key = Compound {
                    begin: key_indexing.begin,
                    end: key_indexing.end,
                    indexings: vec![key_indexing],
                };
                if !(self.at(Token::Eq) && self.adjacent()) {
                    self.error_here("expected '=' after map key");
                    continue;
                }
                self.bump();
                let value = self.compound();
                pairs.push((key, value));
            }
        } else {
            loop {
                self.skip_blank();
                if self.at(Token::RBracket) || self.peek().is_none() {
                    break;
                }
                elems.push(self.compound());
            }
        }
        self.expect(Token::RBracket, "expected ']'");
        // `[params]{ body }` is a lambda when the brace is glued on.
        if self.adjacent() && self.at(Token::LBrace) {
            if is_map {
                self.error_here("a map cannot take a lambda body");
            }
            self.bump();
            let body = self.chunk(Some(Token::RBrace));
            self.expect(Token::RBrace, "expected '}' to close lambda");
            return Primary {
                begin,
                end: self.prev_end(),
                kind: PrimaryKind::Lambda {
                    has_params: true,
                    params: elems,
                    body: Box::new(body),
                },
            };
        }
        Primary {
            begin,
            end: self.prev_end(),
            kind: if is_map {
                PrimaryKind::Map(pairs)
            } else {
                PrimaryKind::List(elems)
            },
        }
    }

    fn placeholder(&self, begin: usize) -> Primary {
        Primary {
            begin,
            end: begin,
            kind: PrimaryKind::Bareword(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Chunk {
        parse("test", src).expect("parse failed")
    }

    fn only_form(chunk: &Chunk) -> &Form {
        assert_eq!(chunk.pipelines.len(), 1);
        assert_eq!(chunk.pipelines[0].forms.len(), 1);
        &chunk.pipelines[0].forms[0]
    }

    #[test]
    fn simple_form() {
        let chunk = parse_ok("put hello world");
        let form = only_form(&chunk);
        let FormBody::Plain { head, args, opts } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(head.as_bareword(), Some("put"));
        assert_eq!(args.len(), 2);
        assert!(opts.is_empty());
    }

    #[test]
    fn pipeline_splits_on_pipe() {
        let chunk = parse_ok("a | b | c");
        assert_eq!(chunk.pipelines[0].forms.len(), 3);
    }

    #[test]
    fn chunk_splits_on_semicolon_and_newline() {
        let chunk = parse_ok("a; b\nc");
        assert_eq!(chunk.pipelines.len(), 3);
    }

    #[test]
    fn assignment_form() {
        let chunk = parse_ok("x = 1");
        let form = only_form(&chunk);
        let FormBody::Assignment { lvalues, rhs } = &form.body else {
            panic!("expected assignment");
        };
        assert_eq!(lvalues.len(), 1);
        assert_eq!(rhs.len(), 1);
    }

    #[test]
    fn glued_eq_stays_in_the_word() {
        let chunk = parse_ok("cmd --color=auto");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].indexings.len(), 3);
    }

    #[test]
    fn options() {
        let chunk = parse_ok("cmd a &sep=, b");
        let form = only_form(&chunk);
        let FormBody::Plain { args, opts, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].name, "sep");
    }

    #[test]
    fn compound_adjacency() {
        let chunk = parse_ok("put a$x 'b c'$y");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(args[0].indexings.len(), 2);
        assert_eq!(args[1].indexings.len(), 2);
    }

    #[test]
    fn capture_primary() {
        let chunk = parse_ok("put (+ 1 2)");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        let PrimaryKind::Capture(p) = &args[0].indexings[0].head.kind else {
            panic!("expected capture");
        };
        assert_eq!(p.forms.len(), 1);
    }

    #[test]
    fn list_map_and_lambda() {
        let chunk = parse_ok("put [a b] [&k=v] [x]{ put $x } { put done }");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert!(matches!(
            args[0].indexings[0].head.kind,
            PrimaryKind::List(ref v) if v.len() == 2
        ));
        assert!(matches!(
            args[1].indexings[0].head.kind,
            PrimaryKind::Map(ref v) if v.len() == 1
        ));
        assert!(matches!(
            args[2].indexings[0].head.kind,
            PrimaryKind::Lambda { has_params: true, ref params, .. } if params.len() == 1
        ));
        assert!(matches!(
            args[3].indexings[0].head.kind,
            PrimaryKind::Lambda { has_params: false, .. }
        ));
    }

    #[test]
    fn empty_map_literal() {
        let chunk = parse_ok("put [&]");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert!(matches!(
            args[0].indexings[0].head.kind,
            PrimaryKind::Map(ref v) if v.is_empty()
        ));
    }

    #[test]
    fn index_chain() {
        let chunk = parse_ok("put $m[a][0]");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(args[0].indexings[0].indices.len(), 2);
    }

    #[test]
    fn lambda_body_spans_newlines() {
        let chunk = parse_ok("fn f {\n  put a\n  put b\n}");
        let form = only_form(&chunk);
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        let PrimaryKind::Lambda { body, .. } = &args[1].indexings[0].head.kind else {
            panic!("expected lambda");
        };
        assert_eq!(body.pipelines.len(), 2);
    }

    #[test]
    fn unclosed_brace_is_an_error() {
        assert!(parse("test", "fn f { put a").is_err());
    }

    #[test]
    fn spans_cover_nodes() {
        let src = "put hello";
        let chunk = parse_ok(src);
        let form = only_form(&chunk);
        assert_eq!(&src[form.begin..form.end], "put hello");
        let FormBody::Plain { args, .. } = &form.body else {
            panic!("expected plain form");
        };
        assert_eq!(&src[args[0].begin..args[0].end], "hello");
    }
}
