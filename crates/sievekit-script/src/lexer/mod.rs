//! Lexer for the Sieve filtering language.
//!
//! Produces a lazy token stream over UTF-8 source text, following the
//! lexical rules of RFC 5228 section 2. Every token carries the line it
//! starts on so later stages can point diagnostics at the source.

mod token;

pub use token::{Token, TokenKind};

use crate::{Error, Result};

/// Sieve lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source text.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// Returns the current 1-based line number.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
        }
        Some(byte)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Reads the next token, or `None` at end of input.
    ///
    /// Comments are returned as tokens; callers that do not care about them
    /// filter on [`Token::is_comment`].
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace();

        let start_line = self.line;
        let Some(byte) = self.peek() else {
            return Ok(None);
        };

        let kind = match byte {
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'{' => self.single(TokenKind::LBrace),
            b'}' => self.single(TokenKind::RBrace),
            b'[' => self.single(TokenKind::LBracket),
            b']' => self.single(TokenKind::RBracket),
            b',' => self.single(TokenKind::Comma),
            b';' => self.single(TokenKind::Semicolon),
            b'#' => self.read_hash_comment(),
            b'/' if self.peek_at(1) == Some(b'*') => self.read_bracket_comment(start_line)?,
            b'"' => self.read_quoted_string(start_line)?,
            b':' => self.read_tag(start_line)?,
            b'0'..=b'9' => self.read_number(start_line)?,
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.read_identifier_or_multiline(start_line)?,
            other => {
                return Err(Error::lex(
                    start_line,
                    format!("unexpected character '{}'", other as char),
                ));
            }
        };

        Ok(Some(Token::new(kind, start_line)))
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn read_hash_comment(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.advance();
        }
        TokenKind::HashComment(self.text_from(start))
    }

    fn read_bracket_comment(&mut self, start_line: usize) -> Result<TokenKind> {
        let start = self.pos;
        self.advance(); // '/'
        self.advance(); // '*'
        loop {
            match self.peek() {
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    self.advance();
                    self.advance();
                    return Ok(TokenKind::BracketComment(self.text_from(start)));
                }
                Some(_) => {
                    self.advance();
                }
                None => return Err(Error::lex(start_line, "unterminated bracket comment")),
            }
        }
    }

    fn read_quoted_string(&mut self, start_line: usize) -> Result<TokenKind> {
        self.advance(); // opening quote
        let mut result = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => result.push(b'"'),
                    Some(b'\\') => result.push(b'\\'),
                    // RFC 5228 only names " and \; anything else stays as
                    // written so scripts using e.g. "\d" survive round-trips.
                    Some(c) => {
                        result.push(b'\\');
                        result.push(c);
                    }
                    None => return Err(Error::lex(start_line, "unterminated string")),
                },
                Some(c) => result.push(c),
                None => return Err(Error::lex(start_line, "unterminated string")),
            }
        }
        let text = String::from_utf8(result)
            .map_err(|_| Error::lex(start_line, "invalid UTF-8 in string"))?;
        Ok(TokenKind::String(text))
    }

    fn read_tag(&mut self, start_line: usize) -> Result<TokenKind> {
        let start = self.pos;
        self.advance(); // ':'
        if !matches!(self.peek(), Some(b'A'..=b'Z' | b'a'..=b'z' | b'_')) {
            return Err(Error::lex(start_line, "expected identifier after ':'"));
        }
        while matches!(self.peek(), Some(b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_')) {
            self.advance();
        }
        Ok(TokenKind::Tag(self.text_from(start)))
    }

    fn read_number(&mut self, start_line: usize) -> Result<TokenKind> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let digits_end = self.pos;

        let multiplier: u64 = match self.peek() {
            Some(b'K' | b'k') => 1 << 10,
            Some(b'M' | b'm') => 1 << 20,
            Some(b'G' | b'g') => 1 << 30,
            Some(b @ (b'A'..=b'Z' | b'a'..=b'z' | b'_')) => {
                return Err(Error::lex(
                    start_line,
                    format!("invalid number quantifier '{}'", b as char),
                ));
            }
            _ => 1,
        };
        if multiplier != 1 {
            self.advance();
            // a quantifier is a single trailing letter
            if let Some(b @ (b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_')) = self.peek() {
                return Err(Error::lex(
                    start_line,
                    format!("invalid number quantifier '{}'", b as char),
                ));
            }
        }

        let digits = std::str::from_utf8(&self.input[start..digits_end])
            .map_err(|_| Error::lex(start_line, "invalid number"))?;
        let value = digits
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(multiplier))
            .ok_or_else(|| Error::lex(start_line, "number too large"))?;

        Ok(TokenKind::Number {
            value,
            text: self.text_from(start),
        })
    }

    fn read_identifier_or_multiline(&mut self, start_line: usize) -> Result<TokenKind> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_')) {
            self.advance();
        }
        let ident = self.text_from(start);

        // `text:` introduces a multiline string rather than identifier + tag.
        if ident.eq_ignore_ascii_case("text") && self.peek() == Some(b':') {
            self.advance();
            return self.read_multiline_body(start_line);
        }

        Ok(TokenKind::Identifier(ident))
    }

    fn read_multiline_body(&mut self, start_line: usize) -> Result<TokenKind> {
        // Anything left on the `text:` line (whitespace, a trailing hash
        // comment) is discarded up to and including the newline.
        loop {
            match self.advance() {
                Some(b'\n') => break,
                Some(_) => {}
                None => return Err(Error::lex(start_line, "unterminated multiline string")),
            }
        }

        let mut lines: Vec<String> = Vec::new();
        loop {
            let mut raw = Vec::new();
            let mut saw_newline = false;
            while let Some(b) = self.advance() {
                if b == b'\n' {
                    saw_newline = true;
                    break;
                }
                raw.push(b);
            }
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if raw == b"." {
                let mut body = lines.join("\n");
                if !body.is_empty() {
                    body.push('\n');
                }
                return Ok(TokenKind::Multiline(body));
            }
            if !saw_newline {
                return Err(Error::lex(start_line, "unterminated multiline string"));
            }
            // dot-stuffing: a leading '.' protects a line starting with one
            let unstuffed = if raw.first() == Some(&b'.') {
                raw[1..].to_vec()
            } else {
                raw
            };
            let text = String::from_utf8(unstuffed)
                .map_err(|_| Error::lex(start_line, "invalid UTF-8 in multiline string"))?;
            lines.push(text);
        }
    }

    fn text_from(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .map(|t| t.map(|t| t.kind))
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("keep;"),
            vec![
                TokenKind::Identifier("keep".into()),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_tags_and_strings() {
        assert_eq!(
            kinds(r#"header :is "Sender" "a@b""#),
            vec![
                TokenKind::Identifier("header".into()),
                TokenKind::Tag(":is".into()),
                TokenKind::String("Sender".into()),
                TokenKind::String("a@b".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a \"quoted\" \\ word""#),
            vec![TokenKind::String(r#"a "quoted" \ word"#.into())]
        );
    }

    #[test]
    fn test_string_with_newline() {
        // RFC 5228 quoted-safe allows line breaks inside quoted strings.
        let toks = kinds("\"two\nlines\" keep");
        assert_eq!(toks[0], TokenKind::String("two\nlines".into()));
        assert_eq!(toks[1], TokenKind::Identifier("keep".into()));
    }

    #[test]
    fn test_numbers_with_quantifiers() {
        assert_eq!(
            kinds("10 100k 2M 1G"),
            vec![
                TokenKind::Number {
                    value: 10,
                    text: "10".into()
                },
                TokenKind::Number {
                    value: 100 * 1024,
                    text: "100k".into()
                },
                TokenKind::Number {
                    value: 2 * 1024 * 1024,
                    text: "2M".into()
                },
                TokenKind::Number {
                    value: 1024 * 1024 * 1024,
                    text: "1G".into()
                },
            ]
        );
    }

    #[test]
    fn test_invalid_quantifier() {
        let err = Lexer::new("10Q").next_token().unwrap_err();
        assert!(matches!(err, Error::Lex { line: 1, .. }));

        let err = Lexer::new("10Kb").next_token().unwrap_err();
        assert!(err.to_string().contains("quantifier"));
    }

    #[test]
    fn test_comments() {
        let toks = kinds("# a comment\nkeep /* inner\ncomment */ ;");
        assert_eq!(toks[0], TokenKind::HashComment("# a comment".into()));
        assert_eq!(toks[1], TokenKind::Identifier("keep".into()));
        assert!(matches!(toks[2], TokenKind::BracketComment(_)));
        assert_eq!(toks[3], TokenKind::Semicolon);
    }

    #[test]
    fn test_unterminated_bracket_comment() {
        let mut lexer = Lexer::new("/* never closed");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_line_numbers() {
        let mut lexer = Lexer::new("keep;\n# c\n\ndiscard;");
        assert_eq!(lexer.next_token().unwrap().unwrap().line, 1);
        assert_eq!(lexer.next_token().unwrap().unwrap().line, 1);
        assert_eq!(lexer.next_token().unwrap().unwrap().line, 2);
        assert_eq!(lexer.next_token().unwrap().unwrap().line, 4);
    }

    #[test]
    fn test_multiline_string() {
        let src = "text:\nline one\nline two\n.\n;";
        let toks = kinds(src);
        assert_eq!(
            toks[0],
            TokenKind::Multiline("line one\nline two\n".into())
        );
        assert_eq!(toks[1], TokenKind::Semicolon);
    }

    #[test]
    fn test_multiline_dot_stuffing() {
        let src = "text:\n..leading dot\nplain\n.\n";
        assert_eq!(
            kinds(src)[0],
            TokenKind::Multiline(".leading dot\nplain\n".into())
        );
    }

    #[test]
    fn test_multiline_keeps_comment_markers() {
        // `/*` inside a multiline body is literal text, not a comment
        let src = "text:\n/* not a comment */\n.\n";
        assert_eq!(
            kinds(src)[0],
            TokenKind::Multiline("/* not a comment */\n".into())
        );
    }

    #[test]
    fn test_multiline_line_counting() {
        let mut lexer = Lexer::new("text:\na\nb\n.\nkeep");
        lexer.next_token().unwrap();
        let keep = lexer.next_token().unwrap().unwrap();
        assert_eq!(keep.line, 5);
    }

    #[test]
    fn test_unterminated_multiline() {
        let mut lexer = Lexer::new("text:\nno terminator");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("\"open");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("&").next_token().unwrap_err();
        assert!(err.to_string().contains("unexpected character"));
    }

    #[test]
    fn test_empty_input() {
        assert!(Lexer::new("   \n\t ").next_token().unwrap().is_none());
    }
}
