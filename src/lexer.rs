//! Token stream producer.
//!
//! One pass over the source cursor. Malformed input never aborts the
//! scan: unterminated strings end at the newline and push an error
//! diagnostic, unknown characters become `Unknown` tokens, and malformed
//! numeric literals downgrade to WORDs. The driver inspects the returned
//! `Messages` buffer to decide whether the token stream is usable.

use crate::source::{Messages, SourceCursor};
use crate::token::{Position, Token, TokenKind};

pub struct Lexer {
    cursor: SourceCursor,
    tokens: Vec<Token>,
    messages: Messages,
}

/// Scans the whole source, always ending the stream with an EOS token.
pub fn tokenize(source: &str) -> (Vec<Token>, Messages) {
    Lexer::new(source).scan()
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            cursor: SourceCursor::new(source),
            tokens: Vec::new(),
            messages: Messages::new(),
        }
    }

    pub fn scan(mut self) -> (Vec<Token>, Messages) {
        loop {
            let pos = self.cursor.position();
            let Some(c) = self.cursor.peek() else {
                self.push(TokenKind::Eos, pos);
                break;
            };

            match c {
                ' ' | '\t' => {
                    self.cursor.advance();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    self.cursor.advance();
                    self.push(TokenKind::Newline, pos);
                }
                '"' => self.scan_string(pos),
                '<' => {
                    // < <= << <<=
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::LessEq
                    } else if self.eat('<') {
                        if self.eat('=') {
                            TokenKind::AssignShl
                        } else {
                            TokenKind::Shl
                        }
                    } else {
                        TokenKind::Less
                    };
                    self.push(kind, pos);
                }
                '>' => {
                    // > >= >> >>=
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::GreaterEq
                    } else if self.eat('>') {
                        if self.eat('=') {
                            TokenKind::AssignShr
                        } else {
                            TokenKind::Shr
                        }
                    } else {
                        TokenKind::Greater
                    };
                    self.push(kind, pos);
                }
                '=' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::Equal
                    } else {
                        TokenKind::Assign
                    };
                    self.push(kind, pos);
                }
                '!' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::NotEqual
                    } else {
                        TokenKind::Not
                    };
                    self.push(kind, pos);
                }
                '+' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignAdd
                    } else {
                        TokenKind::Add
                    };
                    self.push(kind, pos);
                }
                '-' => {
                    // - -=  (no arrow token; `- >` stays two tokens)
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignSub
                    } else {
                        TokenKind::Sub
                    };
                    self.push(kind, pos);
                }
                '*' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignMul
                    } else {
                        TokenKind::Mul
                    };
                    self.push(kind, pos);
                }
                '/' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignDiv
                    } else {
                        TokenKind::Div
                    };
                    self.push(kind, pos);
                }
                '%' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignMod
                    } else {
                        TokenKind::Mod
                    };
                    self.push(kind, pos);
                }
                '&' => {
                    // & &= &&
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignAnd
                    } else if self.eat('&') {
                        TokenKind::AndAnd
                    } else {
                        TokenKind::BitAnd
                    };
                    self.push(kind, pos);
                }
                '|' => {
                    // | |= ||
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignOr
                    } else if self.eat('|') {
                        TokenKind::OrOr
                    } else {
                        TokenKind::BitOr
                    };
                    self.push(kind, pos);
                }
                '^' => {
                    self.cursor.advance();
                    let kind = if self.eat('=') {
                        TokenKind::AssignXor
                    } else {
                        TokenKind::BitXor
                    };
                    self.push(kind, pos);
                }
                '~' => {
                    self.cursor.advance();
                    self.push(TokenKind::BitNot, pos);
                }
                ';' => {
                    self.cursor.advance();
                    self.push(TokenKind::Semicolon, pos);
                }
                ':' => {
                    self.cursor.advance();
                    self.push(TokenKind::Colon, pos);
                }
                ',' => {
                    self.cursor.advance();
                    self.push(TokenKind::Comma, pos);
                }
                '$' => {
                    // $ $( ${
                    self.cursor.advance();
                    let kind = if self.eat('(') {
                        TokenKind::DollarLParen
                    } else if self.eat('{') {
                        TokenKind::DollarLBrace
                    } else {
                        TokenKind::Dollar
                    };
                    self.push(kind, pos);
                }
                '(' => {
                    self.cursor.advance();
                    self.push(TokenKind::LParen, pos);
                }
                ')' => {
                    self.cursor.advance();
                    self.push(TokenKind::RParen, pos);
                }
                '{' => {
                    self.cursor.advance();
                    self.push(TokenKind::LBrace, pos);
                }
                '}' => {
                    self.cursor.advance();
                    self.push(TokenKind::RBrace, pos);
                }
                '[' => {
                    self.cursor.advance();
                    self.push(TokenKind::LBracket, pos);
                }
                ']' => {
                    self.cursor.advance();
                    self.push(TokenKind::RBracket, pos);
                }
                '@' => {
                    self.cursor.advance();
                    self.push(TokenKind::AtSign, pos);
                }
                '.' => self.scan_dot(pos),
                '\\' => {
                    let c = self.scan_word_escape();
                    let word = self.scan_word(c.into_iter().collect());
                    self.push(TokenKind::Word(word), pos);
                }
                c if is_identifier_start(c) => self.scan_identifier(pos),
                c if c.is_ascii_digit() => self.scan_number(pos),
                other => {
                    self.cursor.advance();
                    self.push(TokenKind::Unknown(other), pos);
                }
            }
        }

        (self.tokens, self.messages)
    }

    fn push(&mut self, kind: TokenKind, pos: Position) {
        self.tokens.push(Token::new(kind, pos));
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.cursor.peek() == Some(expected) {
            self.cursor.advance();
            true
        } else {
            false
        }
    }

    fn skip_comment(&mut self) {
        // Comment runs to the newline; the newline itself still terminates
        // the statement, so it is left for the main loop.
        while let Some(c) = self.cursor.peek() {
            if c == '\n' {
                break;
            }
            self.cursor.advance();
        }
    }

    fn scan_string(&mut self, start: Position) {
        self.cursor.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.cursor.peek() {
                None | Some('\n') => {
                    self.messages.push_error("string literal not terminated", start);
                    break;
                }
                Some('"') => {
                    self.cursor.advance();
                    break;
                }
                Some('\\') => {
                    if let Some(c) = self.scan_string_escape() {
                        value.push(c);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.cursor.advance();
                }
            }
        }
        self.push(TokenKind::Str(value), start);
    }

    fn scan_string_escape(&mut self) -> Option<char> {
        self.cursor.advance(); // backslash
        let c = self.cursor.advance()?;
        let c = match c {
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            other => other,
        };
        Some(c)
    }

    fn scan_word_escape(&mut self) -> Option<char> {
        self.cursor.advance(); // backslash
        let c = self.cursor.advance()?;
        let c = match c {
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            other => other,
        };
        Some(c)
    }

    /// Consumes a shell-style bareword until whitespace, newline or EOF.
    fn scan_word(&mut self, prefix: String) -> String {
        let mut word = prefix;
        loop {
            match self.cursor.peek() {
                None | Some(' ') | Some('\t') | Some('\n') => break,
                Some('\\') => {
                    if let Some(c) = self.scan_word_escape() {
                        word.push(c);
                    }
                }
                Some(c) => {
                    word.push(c);
                    self.cursor.advance();
                }
            }
        }
        word
    }

    fn scan_identifier(&mut self, pos: Position) {
        let mut ident = String::new();
        while let Some(c) = self.cursor.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.cursor.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&ident).unwrap_or(TokenKind::Ident(ident));
        self.push(kind, pos);
    }

    /// Decimal integer; one '.' shifts to a real literal; a second '.'
    /// downgrades the whole in-progress lexeme to a WORD.
    fn scan_number(&mut self, pos: Position) {
        let mut text = String::new();
        let mut points = 0usize;
        while let Some(c) = self.cursor.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.cursor.advance();
            } else if c == '.' {
                points += 1;
                if points > 1 {
                    let word = self.scan_word(text);
                    self.push(TokenKind::Word(word), pos);
                    return;
                }
                text.push(c);
                self.cursor.advance();
            } else {
                break;
            }
        }

        if points == 0 {
            match text.parse::<i64>() {
                Ok(value) => self.push(TokenKind::Int(value), pos),
                Err(_) => {
                    self.messages
                        .push_error(format!("invalid integer literal '{text}'"), pos);
                    let word = self.scan_word(text);
                    self.push(TokenKind::Word(word), pos);
                }
            }
        } else {
            match text.parse::<f64>() {
                Ok(value) => self.push(TokenKind::Real(value), pos),
                Err(_) => {
                    let word = self.scan_word(text);
                    self.push(TokenKind::Word(word), pos);
                }
            }
        }
    }

    /// `...` is ELLIPSIS; `..`-led lexemes are WORDs; a lone `.` is the
    /// attribute-access DOT when a name, whitespace or EOF follows, and a
    /// WORD prefix otherwise (covers `./x` and `.5`).
    fn scan_dot(&mut self, pos: Position) {
        self.cursor.advance();
        if self.cursor.peek() == Some('.') {
            self.cursor.advance();
            if self.eat('.') {
                self.push(TokenKind::Ellipsis, pos);
            } else {
                let word = self.scan_word("..".to_string());
                self.push(TokenKind::Word(word), pos);
            }
            return;
        }

        match self.cursor.peek() {
            None | Some(' ') | Some('\t') | Some('\n') => self.push(TokenKind::Dot, pos),
            Some(c) if is_identifier_start(c) => self.push(TokenKind::Dot, pos),
            Some(_) => {
                let word = self.scan_word(".".to_string());
                self.push(TokenKind::Word(word), pos);
            }
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, messages) = tokenize(source);
        assert_eq!(messages.error_count(), 0, "unexpected diagnostics");
        tokens.into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn scans_simple_statement() {
        assert_eq!(
            kinds("let x = 1 + 2.5\n"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Add,
                TokenKind::Real(2.5),
                TokenKind::Newline,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn scans_compound_operators() {
        assert_eq!(
            kinds("a <<= b >>= c && d || e"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::AssignShl,
                TokenKind::Ident("b".to_string()),
                TokenKind::AssignShr,
                TokenKind::Ident("c".to_string()),
                TokenKind::AndAnd,
                TokenKind::Ident("d".to_string()),
                TokenKind::OrOr,
                TokenKind::Ident("e".to_string()),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn minus_followed_by_greater_is_two_tokens() {
        assert_eq!(
            kinds("a -> b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Sub,
                TokenKind::Greater,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn keywords_rewrite_identifier_kind() {
        assert_eq!(
            kinds("if x and y { return }"),
            vec![
                TokenKind::If,
                TokenKind::Ident("x".to_string()),
                TokenKind::AndAnd,
                TokenKind::Ident("y".to_string()),
                TokenKind::LBrace,
                TokenKind::Return,
                TokenKind::RBrace,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn string_escapes_are_substituted() {
        assert_eq!(
            kinds(r#""a\tb\\c\"d\qe""#),
            vec![TokenKind::Str("a\tb\\c\"dqe".to_string()), TokenKind::Eos]
        );
    }

    #[test]
    fn unterminated_string_reports_position_of_quote() {
        let (tokens, messages) = tokenize("let s = \"he");
        assert_eq!(messages.error_count(), 1);
        let message = messages.iter().next().expect("diagnostic");
        assert_eq!(message.to_string(), "1: 9: string literal not terminated");
        assert_eq!(
            tokens.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
            vec![
                TokenKind::Let,
                TokenKind::Ident("s".to_string()),
                TokenKind::Assign,
                TokenKind::Str("he".to_string()),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn second_point_downgrades_number_to_word() {
        assert_eq!(
            kinds("1.2.3"),
            vec![TokenKind::Word("1.2.3".to_string()), TokenKind::Eos]
        );
    }

    #[test]
    fn dot_disambiguation() {
        assert_eq!(
            kinds("a.b ... .. ./x"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Dot,
                TokenKind::Ident("b".to_string()),
                TokenKind::Ellipsis,
                TokenKind::Word("..".to_string()),
                TokenKind::Word("./x".to_string()),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn dollar_prefixes_are_single_tokens() {
        assert_eq!(
            kinds("$ $( ${ $x"),
            vec![
                TokenKind::Dollar,
                TokenKind::DollarLParen,
                TokenKind::DollarLBrace,
                TokenKind::Dollar,
                TokenKind::Ident("x".to_string()),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn comment_runs_to_newline_but_keeps_it() {
        assert_eq!(
            kinds(indoc! {"
                x = 1 # trailing note
                y = 2
            "}),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Ident("y".to_string()),
                TokenKind::Assign,
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn unknown_character_becomes_unknown_token() {
        let (tokens, messages) = tokenize("x ? y");
        assert_eq!(messages.error_count(), 0);
        assert_eq!(tokens[1].kind, TokenKind::Unknown('?'));
    }

    #[test]
    fn backslash_starts_a_word() {
        assert_eq!(
            kinds(r"\tabbed"),
            vec![TokenKind::Word("\tabbed".to_string()), TokenKind::Eos]
        );
    }

    #[test]
    fn positions_are_nondecreasing() {
        let (tokens, _) = tokenize("a = 1\nb = a + 2\n");
        let positions: Vec<_> = tokens.iter().map(|t| (t.pos.line, t.pos.col)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }
}
