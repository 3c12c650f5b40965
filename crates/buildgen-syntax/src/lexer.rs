//! Hand-written tokenizer for the configuration language.
//!
//! Newlines and comments are real tokens: the parser needs newlines to find
//! statement boundaries at bracket depth zero, and comments to attach
//! `# keep` and directive markers to the right syntax node.

use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Ident(String),
    Str(String),
    Int(i64),
    /// Full comment text including the leading `#`.
    Comment(String),
    Punct(char),
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Tok {
    pub kind: TokKind,
    pub line: usize,
    /// Byte range in the source, for opaque statement pass-through.
    pub start: usize,
    pub end: usize,
}

pub fn lex(path: &str, text: &str) -> Result<Vec<Tok>, ParseError> {
    let bytes = text.as_bytes();
    let mut toks = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\\' if bytes.get(i + 1) == Some(&b'\n') => {
                // Line continuation.
                line += 1;
                i += 2;
            }
            '\n' => {
                toks.push(Tok {
                    kind: TokKind::Newline,
                    line,
                    start: i,
                    end: i + 1,
                });
                line += 1;
                i += 1;
            }
            '#' => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                let comment = text[start..i].trim_end().to_string();
                toks.push(Tok {
                    kind: TokKind::Comment(comment),
                    line,
                    start,
                    end: i,
                });
            }
            '"' | '\'' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut value = String::new();
                let mut closed = false;
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b == '\\' && i + 1 < bytes.len() {
                        value.push(unescape(bytes[i + 1] as char));
                        i += 2;
                    } else if b == quote {
                        i += 1;
                        closed = true;
                        break;
                    } else if b == '\n' {
                        break;
                    } else {
                        // Multi-byte characters are copied verbatim.
                        let ch_len = utf8_len(bytes[i]);
                        value.push_str(&text[i..i + ch_len]);
                        i += ch_len;
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedString {
                        path: path.to_string(),
                        line,
                    });
                }
                toks.push(Tok {
                    kind: TokKind::Str(value),
                    line,
                    start,
                    end: i,
                });
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                toks.push(Tok {
                    kind: TokKind::Ident(text[start..i].to_string()),
                    line,
                    start,
                    end: i,
                });
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let n = text[start..i].parse::<i64>().map_err(|_| ParseError::Unexpected {
                    path: path.to_string(),
                    line,
                    found: text[start..i].to_string(),
                })?;
                toks.push(Tok {
                    kind: TokKind::Int(n),
                    line,
                    start,
                    end: i,
                });
            }
            _ => {
                let ch_len = utf8_len(bytes[i]);
                if ch_len != 1 {
                    return Err(ParseError::Unexpected {
                        path: path.to_string(),
                        line,
                        found: text[i..i + ch_len].to_string(),
                    });
                }
                toks.push(Tok {
                    kind: TokKind::Punct(c),
                    line,
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
        }
    }

    toks.push(Tok {
        kind: TokKind::Eof,
        line,
        start: text.len(),
        end: text.len(),
    });
    Ok(toks)
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        lex("test", src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_rule_line() {
        let toks = kinds("lib(name = \"x\")");
        assert_eq!(
            toks,
            vec![
                TokKind::Ident("lib".into()),
                TokKind::Punct('('),
                TokKind::Ident("name".into()),
                TokKind::Punct('='),
                TokKind::Str("x".into()),
                TokKind::Punct(')'),
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_comment_and_newline() {
        let toks = kinds("\"a\",  # keep\n");
        assert_eq!(
            toks,
            vec![
                TokKind::Str("a".into()),
                TokKind::Punct(','),
                TokKind::Comment("# keep".into()),
                TokKind::Newline,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_string_escapes() {
        let toks = kinds(r#""a\"b\\c""#);
        assert_eq!(toks[0], TokKind::Str("a\"b\\c".into()));
    }

    #[test]
    fn test_lex_unterminated_string() {
        assert!(lex("test", "\"abc").is_err());
    }

    #[test]
    fn test_lex_line_numbers() {
        let toks = lex("test", "a\nb\nc").unwrap();
        let lines: Vec<usize> = toks
            .iter()
            .filter(|t| matches!(t.kind, TokKind::Ident(_)))
            .map(|t| t.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }
}
