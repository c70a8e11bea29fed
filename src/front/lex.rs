//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// The source line this token starts on, 1-indexed.
    pub line: usize,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("int")]
    Int,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display(":=")]
    Assign,
    #[display(";")]
    Semi,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("!")]
    Bang,
}

#[derive(Clone, Copy, Display)]
#[display("Unknown lexeme: {ch}")]
pub struct LexError {
    pub ch: char,
    pub pos: usize,
    pub line: usize,
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Order matters: keywords and multi-character operators must be
        // tried before the generic identifier/single-character patterns
        // they would otherwise be shadowed by.
        let matchers = vec![
            (Regex::new(r"\Aint\b").unwrap(), Int),
            (Regex::new(r"\Aif\b").unwrap(), If),
            (Regex::new(r"\Aelse\b").unwrap(), Else),
            (Regex::new(r"\Awhile\b").unwrap(), While),
            (Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(), Id),
            (Regex::new(r"\A[0-9]+").unwrap(), Num),
            (Regex::new(r"\A:=").unwrap(), Assign),
            (Regex::new(r"\A<=").unwrap(), Le),
            (Regex::new(r"\A>=").unwrap(), Ge),
            (Regex::new(r"\A==").unwrap(), EqEq),
            (Regex::new(r"\A!=").unwrap(), Ne),
            (Regex::new(r"\A&&").unwrap(), AndAnd),
            (Regex::new(r"\A\|\|").unwrap(), OrOr),
            (Regex::new(r"\A<").unwrap(), Lt),
            (Regex::new(r"\A>").unwrap(), Gt),
            (Regex::new(r"\A!").unwrap(), Bang),
            (Regex::new(r"\A\+").unwrap(), Plus),
            (Regex::new(r"\A-").unwrap(), Minus),
            (Regex::new(r"\A\*").unwrap(), Star),
            (Regex::new(r"\A/").unwrap(), Slash),
            (Regex::new(r"\A%").unwrap(), Percent),
            (Regex::new(r"\A;").unwrap(), Semi),
            (Regex::new(r"\A\{").unwrap(), LBrace),
            (Regex::new(r"\A\}").unwrap(), RBrace),
            (Regex::new(r"\A\(").unwrap(), LParen),
            (Regex::new(r"\A\)").unwrap(), RParen),
        ];

        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace, tracking line numbers as we go.
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.line += m.as_str().matches('\n').count();
            self.pos += m.end();
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        for (pattern, kind) in &self.matchers {
            if let Some(m) = pattern.find(rest) {
                let text = m.as_str();
                let token = Token {
                    kind: *kind,
                    text,
                    line: self.line,
                };
                self.pos += text.len();
                return Ok(Some(token));
            }
        }

        let ch = rest.chars().next().unwrap();
        Err(LexError {
            ch,
            pos: self.pos,
            line: self.line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(tok) = lexer.next().unwrap() {
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn lexes_definition_and_assignment() {
        use TokenKind::*;
        assert_eq!(kinds("int i; i := 0;"), vec![Int, Id, Semi, Id, Assign, Num, Semi]);
    }

    #[test]
    fn keywords_are_not_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("while interest"), vec![While, Id]);
    }

    #[test]
    fn multi_char_operators_win_over_prefixes() {
        use TokenKind::*;
        assert_eq!(kinds("<= < >= > == != && ||"), vec![Le, Lt, Ge, Gt, EqEq, Ne, AndAnd, OrOr]);
    }

    #[test]
    fn skips_comments_and_tracks_lines() {
        let mut lexer = Lexer::new("i // comment\n:= 1");
        let first = lexer.next().unwrap().unwrap();
        assert_eq!(first.line, 1);
        let assign = lexer.next().unwrap().unwrap();
        assert_eq!(assign.line, 2);
    }

    #[test]
    fn unknown_character_is_an_error() {
        let mut lexer = Lexer::new("i @ j");
        lexer.next().unwrap();
        let err = lexer.next().unwrap_err();
        assert_eq!(err.ch, '@');
        assert_eq!(format!("{err}"), "Unknown lexeme: @");
    }

    #[test]
    fn end_of_input_returns_none() {
        let mut lexer = Lexer::new("  ");
        assert!(lexer.next().unwrap().is_none());
    }
}
