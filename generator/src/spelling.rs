// spelling.rs - Target type spellings and the pointer grammar
//
// Splits a C/C++ type spelling into its base type and its pointer markers:
//
//   spelling := "const"? word+ "const"? ("*" "const"?)*
//
// `const` may appear on either side of the base, and every `*` may carry its
// own trailing `const`. Uses the `logos` crate for tokenizing.
//
// Failure modes: anything outside the grammar produces
//                `MalformedPointerSpelling`.
// Side effects: none.

use std::fmt;

use logos::Logos;

use crate::error::{Error, Result};

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("const")]
    Const,
    #[token("*")]
    Star,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*")]
    Word,
}

/// A parsed target type spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spelling {
    /// Base type words joined by single spaces, e.g. `unsigned char`.
    pub base: String,
    pub is_const: bool,
    /// One entry per `*`, `true` when that marker is followed by `const`.
    pub pointers: Vec<bool>,
}

impl Spelling {
    pub fn parse(text: &str) -> Result<Spelling> {
        let malformed = |message: &str| Error::MalformedPointerSpelling {
            spelling: text.to_string(),
            message: message.to_string(),
        };

        let mut tokens = Vec::new();
        for (token, range) in Token::lexer(text).spanned() {
            match token {
                Ok(token) => tokens.push((token, &text[range])),
                Err(()) => {
                    return Err(malformed(&format!("unexpected '{}'", &text[range])));
                }
            }
        }

        let mut pos = 0;
        let mut is_const = false;
        if let Some((Token::Const, _)) = tokens.first() {
            is_const = true;
            pos += 1;
        }

        let mut words = Vec::new();
        while let Some((Token::Word, word)) = tokens.get(pos) {
            words.push(*word);
            pos += 1;
        }
        if words.is_empty() {
            return Err(malformed("missing base type"));
        }

        if let Some((Token::Const, _)) = tokens.get(pos) {
            if is_const {
                return Err(malformed("duplicate 'const' on base type"));
            }
            is_const = true;
            pos += 1;
        }

        let mut pointers = Vec::new();
        while pos < tokens.len() {
            match tokens[pos] {
                (Token::Star, _) => {
                    let marker_const = matches!(tokens.get(pos + 1), Some((Token::Const, _)));
                    pointers.push(marker_const);
                    pos += if marker_const { 2 } else { 1 };
                }
                (_, other) => {
                    return Err(malformed(&format!("unexpected '{other}' after base type")));
                }
            }
        }

        Ok(Spelling {
            base: words.join(" "),
            is_const,
            pointers,
        })
    }

    pub fn is_pointer(&self) -> bool {
        !self.pointers.is_empty()
    }

    /// The spelling with its outermost pointer marker removed.
    pub fn pointee(&self) -> Option<Spelling> {
        let mut pointers = self.pointers.clone();
        pointers.pop()?;
        Some(Spelling {
            base: self.base.clone(),
            is_const: self.is_const,
            pointers,
        })
    }
}

impl fmt::Display for Spelling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        write!(f, "{}", self.base)?;
        for &marker_const in &self.pointers {
            write!(f, " *")?;
            if marker_const {
                write!(f, " const")?;
            }
        }
        Ok(())
    }
}
