use crate::{Error, Result};

use logos::Logos;
use std::ops::Range;

/// Tokens of the query language.
///
/// Keywords are not tokens of their own: every word lexes as an
/// [`Token::Ident`] and the parser matches keywords case-insensitively where
/// the grammar expects them, so `depth` or `set` still work as attribute
/// names.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub(crate) enum Token<'a> {
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice())]
    Ident(&'a str),

    #[regex(r"[0-9]+[lL]?", |lex| lex.slice().trim_end_matches(['l', 'L']).parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?[dDfF]?", |lex| {
        lex.slice().trim_end_matches(['d', 'D', 'f', 'F']).parse::<f64>().ok()
    })]
    Decimal(f64),

    /// Single-quoted; `''` escapes a quote
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    String(String),

    #[regex(r":[A-Za-z_][A-Za-z0-9_]*", |lex| &lex.slice()[1..])]
    NamedParam(&'a str),

    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<usize>().ok())]
    PositionalParam(usize),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("||")]
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned<'a> {
    pub token: Token<'a>,
    pub span: Range<usize>,
}

/// Splits `src` into tokens, failing on the first unrecognized character.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned<'_>>> {
    let mut lexer = Token::lexer(src);
    let mut tokens = vec![];

    while let Some(token) = lexer.next() {
        let span = lexer.span();
        match token {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                return Err(Error::query_syntax(
                    format!("unexpected character `{}`", &src[span.clone()]),
                    span.start,
                ))
            }
        }
    }

    Ok(tokens)
}

impl Token<'_> {
    /// True if the token is the keyword `kw`, compared case-insensitively.
    pub(crate) fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(ident) if ident.eq_ignore_ascii_case(kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token<'_>> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn keywords_lex_as_identifiers() {
        assert_eq!(
            tokens("SELECT p.depth FROM Person p"),
            [
                Token::Ident("SELECT"),
                Token::Ident("p"),
                Token::Dot,
                Token::Ident("depth"),
                Token::Ident("FROM"),
                Token::Ident("Person"),
                Token::Ident("p"),
            ]
        );
    }

    #[test]
    fn literals_and_parameters() {
        assert_eq!(
            tokens("'it''s' 42L 1.5 :name ?2 <> <="),
            [
                Token::String("it's".into()),
                Token::Integer(42),
                Token::Decimal(1.5),
                Token::NamedParam("name"),
                Token::PositionalParam(2),
                Token::Ne,
                Token::Le,
            ]
        );
    }

    #[test]
    fn unknown_character_reports_offset() {
        let err = tokenize("select p from Person p where p.x = #").unwrap_err();
        assert!(err.is_query_syntax());
        assert_eq!(
            err.to_string(),
            "query syntax error at offset 35: unexpected character `#`"
        );
    }
}
