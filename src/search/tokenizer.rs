//! Tokenizer shared by indexing and query parsing.
//!
//! Latin-script text is split on Unicode word boundaries and lowercased. A contiguous run of
//! CJK characters yields every overlapping bigram plus the whole run, so both partial and
//! whole-term queries hit. A lone CJK character is a single token.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A case-folded Unicode word.
    Word,
    /// Two adjacent characters of a CJK run.
    Bigram,
    /// A whole CJK run of two or more characters.
    Run,
    /// A CJK run of exactly one character.
    Char,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    fn new(text: impl Into<String>, kind: TokenKind) -> Self {
        Self { text: text.into(), kind }
    }
}

/// Han, kana and hangul.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}'
        | '\u{f900}'..='\u{faff}'
        | '\u{20000}'..='\u{2a6df}')
}

/// Tokens in text order, duplicates included.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut latin_start = 0;
    let mut cjk_run: Vec<char> = Vec::new();

    for (offset, c) in text.char_indices() {
        if is_cjk(c) {
            if cjk_run.is_empty() {
                push_words(&text[latin_start..offset], &mut tokens);
            }
            cjk_run.push(c);
        } else if !cjk_run.is_empty() {
            push_run(&cjk_run, &mut tokens);
            cjk_run.clear();
            latin_start = offset;
        }
    }
    if cjk_run.is_empty() {
        push_words(&text[latin_start..], &mut tokens);
    } else {
        push_run(&cjk_run, &mut tokens);
    }
    tokens
}

fn push_words(segment: &str, tokens: &mut Vec<Token>) {
    tokens.extend(segment.unicode_words().map(|w| Token::new(w.to_lowercase(), TokenKind::Word)));
}

fn push_run(run: &[char], tokens: &mut Vec<Token>) {
    if let [single] = run {
        tokens.push(Token::new(single.to_string(), TokenKind::Char));
        return;
    }
    tokens.extend(run.windows(2).map(|pair| Token::new(pair.iter().collect::<String>(), TokenKind::Bigram)));
    tokens.push(Token::new(run.iter().collect::<String>(), TokenKind::Run));
}
