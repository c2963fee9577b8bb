//! # DKIM key record
//!
//! Parser for the zone-file TXT record `opendkim-genkey` writes next to the
//! private key:
//!
//! ```text
//! mail._domainkey IN TXT ( "v=DKIM1; h=sha256; k=rsa; "
//!     "p=MIIBIjANBgkq...IDAQAB" )  ; ----- DKIM key mail for example.com
//! ```
//!
//! Supported: owner, optional TTL and class in any order, parentheses spanning
//! lines, `;` comments, quoted strings with `\X` and `\DDD` escapes.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

const CLASSES: [&str; 4] = ["IN", "CH", "HS", "CS"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DkimParseError {
    #[error("record is empty")]
    Empty,
    #[error("record does not start with an owner name")]
    MissingOwner,
    #[error("record has no type")]
    MissingType,
    #[error("expected a TXT record, found {0}")]
    NotTxt(String),
    #[error("TXT record has no strings")]
    NoStrings,
    #[error("unterminated quoted string")]
    UnterminatedQuote,
    #[error("unbalanced parentheses")]
    UnbalancedParens,
}

/// A parsed TXT resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtResource {
    pub owner: String,
    pub ttl: Option<u32>,
    pub class: Option<String>,
    /// Character strings in record order, unescaped
    pub strings: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Bare(String),
    Quoted(String),
}

fn unescape(chars: &mut Peekable<Chars<'_>>) -> Result<char, DkimParseError> {
    let first = chars.next().ok_or(DkimParseError::UnterminatedQuote)?;
    if !first.is_ascii_digit() {
        return Ok(first);
    }
    let mut digits = String::from(first);
    while digits.len() < 3 {
        match chars.peek() {
            Some(c) if c.is_ascii_digit() => {
                digits.push(*c);
                chars.next();
            }
            _ => break,
        }
    }
    Ok(digits.parse::<u8>().map_or(first, char::from))
}

fn quoted(chars: &mut Peekable<Chars<'_>>) -> Result<String, DkimParseError> {
    let mut s = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(s),
            '\\' => s.push(unescape(chars)?),
            _ => s.push(c),
        }
    }
    Err(DkimParseError::UnterminatedQuote)
}

fn tokenize(input: &str) -> Result<Vec<Token>, DkimParseError> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(DkimParseError::UnbalancedParens)?;
            }
            '"' => tokens.push(Token::Quoted(quoted(&mut chars)?)),
            c if c.is_whitespace() => {}
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '"' | '(' | ')' | ';') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Bare(word));
            }
        }
    }
    if depth != 0 {
        return Err(DkimParseError::UnbalancedParens);
    }
    Ok(tokens)
}

/// Parse one TXT resource record in zone-file syntax
pub fn parse_txt(input: &str) -> Result<TxtResource, DkimParseError> {
    let mut tokens = tokenize(input)?.into_iter();
    let owner = match tokens.next() {
        Some(Token::Bare(owner)) => owner,
        Some(Token::Quoted(_)) => return Err(DkimParseError::MissingOwner),
        None => return Err(DkimParseError::Empty),
    };

    let mut ttl = None;
    let mut class = None;
    let rtype = loop {
        let Some(Token::Bare(word)) = tokens.next() else {
            return Err(DkimParseError::MissingType);
        };
        if ttl.is_none() {
            if let Ok(value) = word.parse::<u32>() {
                ttl = Some(value);
                continue;
            }
        }
        if class.is_none() && CLASSES.iter().any(|c| c.eq_ignore_ascii_case(&word)) {
            class = Some(word.to_ascii_uppercase());
            continue;
        }
        break word;
    };
    if !rtype.eq_ignore_ascii_case("TXT") {
        return Err(DkimParseError::NotTxt(rtype));
    }

    let strings: Vec<String> = tokens
        .map(|t| match t {
            Token::Bare(s) | Token::Quoted(s) => s,
        })
        .collect();
    if strings.is_empty() {
        return Err(DkimParseError::NoStrings);
    }
    Ok(TxtResource {
        owner,
        ttl,
        class,
        strings,
    })
}
