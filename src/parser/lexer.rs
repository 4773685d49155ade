use crate::error::{EngineError, Result};

/// Source position of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
  pub line: usize,
  pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  /// Bare word, including dotted command names (`user.new`) and grammar
  /// keywords (`select`, `in`, `where`, `print`, `true`, ...).
  Ident(String),
  Str(String),
  Int(i64),
  Float(f64),
  /// Absolute path literal (`/`, `/var/www`).
  Path(String),
  /// `@db.verb` database-scoped command head.
  AtCommand { db: String, verb: String },
  LBrace,
  RBrace,
  LBracket,
  RBracket,
  LParen,
  RParen,
  Colon,
  Comma,
  Semicolon,
  Pipe,
  Assign,
  EqEq,
  NotEq,
  Lt,
  Lte,
  Gt,
  Gte,
  AndAnd,
  OrOr,
  Eof,
}

impl TokenKind {
  /// Short description used in error messages.
  pub fn describe(&self) -> String {
    match self {
      Self::Ident(s) => format!("'{s}'"),
      Self::Str(_) => "string".into(),
      Self::Int(n) => format!("'{n}'"),
      Self::Float(n) => format!("'{n}'"),
      Self::Path(p) => format!("path '{p}'"),
      Self::AtCommand { db, verb } => format!("'@{db}.{verb}'"),
      Self::LBrace => "'{'".into(),
      Self::RBrace => "'}'".into(),
      Self::LBracket => "'['".into(),
      Self::RBracket => "']'".into(),
      Self::LParen => "'('".into(),
      Self::RParen => "')'".into(),
      Self::Colon => "':'".into(),
      Self::Comma => "','".into(),
      Self::Semicolon => "';'".into(),
      Self::Pipe => "'|'".into(),
      Self::Assign => "'='".into(),
      Self::EqEq => "'=='".into(),
      Self::NotEq => "'!='".into(),
      Self::Lt => "'<'".into(),
      Self::Lte => "'<='".into(),
      Self::Gt => "'>'".into(),
      Self::Gte => "'>='".into(),
      Self::AndAnd => "'&&'".into(),
      Self::OrOr => "'||'".into(),
      Self::Eof => "end of script".into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub pos: Pos,
}

struct Scanner<'a> {
  src: &'a [u8],
  idx: usize,
  line: usize,
  column: usize,
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_part(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

fn is_path_part(c: u8) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'-' | b'/')
}

impl<'a> Scanner<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src: src.as_bytes(),
      idx: 0,
      line: 1,
      column: 1,
    }
  }

  fn pos(&self) -> Pos {
    Pos {
      line: self.line,
      column: self.column,
    }
  }

  fn error(&self, pos: Pos, message: impl Into<String>) -> EngineError {
    EngineError::Parse {
      line: pos.line,
      column: pos.column,
      message: message.into(),
    }
  }

  fn peek(&self) -> Option<u8> {
    self.src.get(self.idx).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<u8> {
    self.src.get(self.idx + offset).copied()
  }

  fn bump(&mut self) -> Option<u8> {
    let c = self.peek()?;
    self.idx += 1;
    if c == b'\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  fn skip_trivia(&mut self) {
    while let Some(c) = self.peek() {
      match c {
        b' ' | b'\t' | b'\r' | b'\n' => {
          self.bump();
        }
        b'#' => {
          while let Some(c) = self.peek() {
            if c == b'\n' {
              break;
            }
            self.bump();
          }
        }
        _ => break,
      }
    }
  }

  fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
    let start = self.idx;
    while let Some(c) = self.peek() {
      if !pred(c) {
        break;
      }
      self.bump();
    }
    String::from_utf8_lossy(&self.src[start..self.idx]).into_owned()
  }

  fn scan_string(&mut self, quote: u8, pos: Pos) -> Result<TokenKind> {
    self.bump(); // opening quote
    let mut out: Vec<u8> = Vec::new();
    loop {
      let Some(c) = self.bump() else {
        return Err(self.error(pos, "unterminated string"));
      };
      match c {
        c if c == quote => {
          let s = String::from_utf8(out)
            .map_err(|_| self.error(pos, "string is not valid UTF-8"))?;
          return Ok(TokenKind::Str(s));
        }
        b'\n' => return Err(self.error(pos, "unterminated string")),
        b'\\' => {
          let Some(esc) = self.bump() else {
            return Err(self.error(pos, "unterminated string"));
          };
          match esc {
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'/' => out.push(b'/'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            other => {
              return Err(self.error(
                self.pos(),
                format!("unknown escape '\\{}'", other as char),
              ))
            }
          }
        }
        other => out.push(other),
      }
    }
  }

  fn scan_number(&mut self, pos: Pos) -> Result<TokenKind> {
    let mut text = String::new();
    if self.peek() == Some(b'-') {
      text.push('-');
      self.bump();
    }
    text.push_str(&self.take_while(|c| c.is_ascii_digit()));
    let mut is_float = false;
    if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
      is_float = true;
      text.push('.');
      self.bump();
      text.push_str(&self.take_while(|c| c.is_ascii_digit()));
    }
    if matches!(self.peek(), Some(b'e') | Some(b'E')) {
      is_float = true;
      text.push('e');
      self.bump();
      if matches!(self.peek(), Some(b'+') | Some(b'-')) {
        text.push(self.bump().unwrap() as char);
      }
      let exp = self.take_while(|c| c.is_ascii_digit());
      if exp.is_empty() {
        return Err(self.error(pos, "malformed number exponent"));
      }
      text.push_str(&exp);
    }
    if is_float {
      text
        .parse::<f64>()
        .map(TokenKind::Float)
        .map_err(|_| self.error(pos, format!("malformed number '{text}'")))
    } else {
      text
        .parse::<i64>()
        .map(TokenKind::Int)
        .map_err(|_| self.error(pos, format!("malformed number '{text}'")))
    }
  }

  fn scan_at_command(&mut self, pos: Pos) -> Result<TokenKind> {
    self.bump(); // '@'
    let db = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-');
    if db.is_empty() {
      return Err(self.error(pos, "expected database name after '@'"));
    }
    if self.peek() != Some(b'.') {
      return Err(self.error(pos, "expected '.' after database name"));
    }
    self.bump();
    let verb = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_');
    if verb.is_empty() {
      return Err(self.error(pos, "expected command after database prefix"));
    }
    Ok(TokenKind::AtCommand { db, verb })
  }

  fn next_token(&mut self) -> Result<Token> {
    self.skip_trivia();
    let pos = self.pos();
    let Some(c) = self.peek() else {
      return Ok(Token {
        kind: TokenKind::Eof,
        pos,
      });
    };

    let kind = match c {
      b'"' | b'\'' => self.scan_string(c, pos)?,
      b'0'..=b'9' => self.scan_number(pos)?,
      b'-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.scan_number(pos)?,
      b'@' => self.scan_at_command(pos)?,
      b'/' => {
        let path = self.take_while(is_path_part);
        TokenKind::Path(path)
      }
      c if is_ident_start(c) => {
        let word = self.take_while(is_ident_part);
        TokenKind::Ident(word)
      }
      b'{' => {
        self.bump();
        TokenKind::LBrace
      }
      b'}' => {
        self.bump();
        TokenKind::RBrace
      }
      b'[' => {
        self.bump();
        TokenKind::LBracket
      }
      b']' => {
        self.bump();
        TokenKind::RBracket
      }
      b'(' => {
        self.bump();
        TokenKind::LParen
      }
      b')' => {
        self.bump();
        TokenKind::RParen
      }
      b':' => {
        self.bump();
        TokenKind::Colon
      }
      b',' => {
        self.bump();
        TokenKind::Comma
      }
      b';' => {
        self.bump();
        TokenKind::Semicolon
      }
      b'|' => {
        self.bump();
        if self.peek() == Some(b'|') {
          self.bump();
          TokenKind::OrOr
        } else {
          TokenKind::Pipe
        }
      }
      b'&' => {
        self.bump();
        if self.peek() == Some(b'&') {
          self.bump();
          TokenKind::AndAnd
        } else {
          return Err(self.error(pos, "unexpected '&'"));
        }
      }
      b'=' => {
        self.bump();
        if self.peek() == Some(b'=') {
          self.bump();
          TokenKind::EqEq
        } else {
          TokenKind::Assign
        }
      }
      b'!' => {
        self.bump();
        if self.peek() == Some(b'=') {
          self.bump();
          TokenKind::NotEq
        } else {
          return Err(self.error(pos, "unexpected '!'"));
        }
      }
      b'<' => {
        self.bump();
        if self.peek() == Some(b'=') {
          self.bump();
          TokenKind::Lte
        } else {
          TokenKind::Lt
        }
      }
      b'>' => {
        self.bump();
        if self.peek() == Some(b'=') {
          self.bump();
          TokenKind::Gte
        } else {
          TokenKind::Gt
        }
      }
      other => {
        return Err(self.error(pos, format!("unexpected character '{}'", other as char)))
      }
    };
    Ok(Token { kind, pos })
  }
}

/// Tokenize a whole script. Newlines are insignificant; commands are
/// recognized by their head token and optionally separated by `;`.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
  let mut scanner = Scanner::new(src);
  let mut tokens = Vec::new();
  loop {
    let token = scanner.next_token()?;
    let done = token.kind == TokenKind::Eof;
    tokens.push(token);
    if done {
      return Ok(tokens);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(src: &str) -> Vec<TokenKind> {
    tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
  }

  #[test]
  fn lexes_command_heads() {
    assert_eq!(
      kinds("user.new @db1.newdir"),
      vec![
        TokenKind::Ident("user.new".into()),
        TokenKind::AtCommand {
          db: "db1".into(),
          verb: "newdir".into()
        },
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn lexes_paths_and_strings() {
    assert_eq!(
      kinds(r#"/var/www "hello" 'world'"#),
      vec![
        TokenKind::Path("/var/www".into()),
        TokenKind::Str("hello".into()),
        TokenKind::Str("world".into()),
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn string_escapes() {
    assert_eq!(
      kinds(r#""^j\\w*n$""#),
      vec![TokenKind::Str("^j\\w*n$".into()), TokenKind::Eof]
    );
  }

  #[test]
  fn unterminated_string_reports_position() {
    let err = tokenize("\n  \"oops").unwrap_err();
    match err {
      EngineError::Parse { line, column, .. } => {
        assert_eq!(line, 2);
        assert_eq!(column, 3);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn numbers_and_operators() {
    assert_eq!(
      kinds("42 -7 3.5 == != <= >= && ||"),
      vec![
        TokenKind::Int(42),
        TokenKind::Int(-7),
        TokenKind::Float(3.5),
        TokenKind::EqEq,
        TokenKind::NotEq,
        TokenKind::Lte,
        TokenKind::Gte,
        TokenKind::AndAnd,
        TokenKind::OrOr,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn comments_are_skipped() {
    assert_eq!(
      kinds("# a comment\nuser.whoami"),
      vec![TokenKind::Ident("user.whoami".into()), TokenKind::Eof]
    );
  }
}
