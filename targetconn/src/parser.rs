/// GDB/MI output parser
///
/// Turns one line of debugger output into an [`OutputLine`]. The grammar is
/// GDB's MI3 output syntax:
///
/// ```text
/// line    = [token] ("^" | "*" | "+" | "=") class ("," result)* | ("~" | "@" | "&") c-string | "(gdb)"
/// result  = name "=" value
/// value   = c-string | "{" [result ("," result)*] "}" | "[" [(value | result) ("," ...)*] "]"
/// ```

use thiserror::Error;

use crate::types::*;

/// The prompt GDB prints once it is ready for the next command
pub const PROMPT: &str = "(gdb)";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("not a GDB/MI record")]
    NotMi,
    #[error("unknown result class '{0}'")]
    UnknownResultClass(String),
    #[error("missing record class")]
    MissingClass,
    #[error("expected '{expected}' at column {column}")]
    Expected { expected: char, column: usize },
    #[error("unexpected end of line")]
    UnexpectedEnd,
    #[error("empty field name at column {0}")]
    EmptyName(usize),
}

/// Classify one line of debugger output: either the prompt or a GDB/MI record
pub fn parse_output_line(line: &str) -> Result<OutputLine, ParseError> {
    if line.trim() == PROMPT {
        return Ok(OutputLine::Prompt);
    }
    parse_gdb_output(line).map(OutputLine::Record)
}

/// Parse one GDB/MI record. The prompt is not a record.
pub fn parse_gdb_output(line: &str) -> Result<GdbOutput, ParseError> {
    let line = line.trim();
    let mut prefix = line.chars();

    if let Some(stream_type) = prefix.next().and_then(StreamType::from_prefix) {
        let text = &line[1..];
        let content = unquote(text).unwrap_or_else(|| text.to_string());
        return Ok(GdbOutput::Stream(StreamRecord { stream_type, content }));
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let token = line[..digits].parse().ok();
    let rest = &line[digits..];
    let mut chars = rest.chars();
    let marker = chars.next().ok_or(ParseError::NotMi)?;
    if marker != '^' && AsyncKind::from_prefix(marker).is_none() {
        return Err(ParseError::NotMi);
    }
    let body = chars.as_str();

    let (class, fields) = match body.split_once(',') {
        Some((class, fields)) => (class, fields),
        None => (body, ""),
    };
    if class.is_empty() {
        return Err(ParseError::MissingClass);
    }
    let offset = digits + marker.len_utf8() + class.len() + 1;

    if marker == '^' {
        let class = ResultClass::from_keyword(class)
            .ok_or_else(|| ParseError::UnknownResultClass(class.to_string()))?;
        let results = Cursor::new(fields, offset).fields()?;
        return Ok(GdbOutput::Result(GdbResult { token, class, results }));
    }

    let kind = AsyncKind::from_prefix(marker).ok_or(ParseError::NotMi)?;
    let results = Cursor::new(fields, offset).fields()?;
    Ok(GdbOutput::Async(AsyncRecord {
        token,
        kind,
        class: class.to_string(),
        results,
    }))
}

/// Reads the `key=value,...` part of a record
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    /// Column of `input` within the whole line, for error reports
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str, offset: usize) -> Self {
        Self { input, pos: 0, offset }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(_) => Err(ParseError::Expected {
                expected,
                column: self.offset + self.pos - 1,
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    /// Consume a separating comma, if any
    fn comma(&mut self) {
        if self.peek() == Some(',') {
            self.pos += 1;
        }
    }

    fn fields(mut self) -> Result<Fields, ParseError> {
        let mut fields = Fields::new();
        while self.peek().is_some() {
            let (name, value) = self.result()?;
            fields.insert(name, value);
            self.comma();
        }
        Ok(fields)
    }

    fn result(&mut self) -> Result<(String, Value), ParseError> {
        let name = self.name()?;
        self.expect('=')?;
        Ok((name, self.value()?))
    }

    fn name(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '-') {
            self.bump();
        }
        if start == self.pos {
            return Err(ParseError::EmptyName(self.offset + start));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some('"') => self.c_string().map(Value::Const),
            Some('{') => {
                self.pos += 1;
                let mut fields = Fields::new();
                while !matches!(self.peek(), Some('}') | None) {
                    let (name, value) = self.result()?;
                    fields.insert(name, value);
                    self.comma();
                }
                self.expect('}')?;
                Ok(Value::Tuple(fields))
            }
            Some('[') => {
                self.pos += 1;
                let mut items = Vec::new();
                while !matches!(self.peek(), Some(']') | None) {
                    // Lists hold either bare values or name=value results
                    let item = match self.peek() {
                        Some('"' | '{' | '[') => self.value()?,
                        _ => {
                            let (name, value) = self.result()?;
                            Value::Tuple(Fields::from([(name, value)]))
                        }
                    };
                    items.push(item);
                    self.comma();
                }
                self.expect(']')?;
                Ok(Value::List(items))
            }
            Some(_) => {
                // Some GDB builds print bare words, take them up to the next separator
                let start = self.pos;
                while matches!(self.peek(), Some(c) if !matches!(c, ',' | ']' | '}')) {
                    self.bump();
                }
                Ok(Value::Const(self.input[start..self.pos].trim().to_string()))
            }
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    /// A quoted C string. Escapes may spell out raw bytes (`\303\251`), so
    /// the content is assembled as bytes and decoded once complete.
    fn c_string(&mut self) -> Result<String, ParseError> {
        self.expect('"')?;
        let mut out = Vec::new();
        loop {
            match self.bump().ok_or(ParseError::UnexpectedEnd)? {
                '"' => return Ok(String::from_utf8_lossy(&out).into_owned()),
                '\\' => self.unescape(&mut out)?,
                c => {
                    let mut utf8 = [0; 4];
                    out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                }
            }
        }
    }

    fn unescape(&mut self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let escaped = self.bump().ok_or(ParseError::UnexpectedEnd)?;
        let byte = match escaped {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            'a' => 0x07,
            'b' => 0x08,
            'f' => 0x0c,
            'v' => 0x0b,
            'e' => 0x1b,
            '\\' | '"' | '\'' => escaped as u8,
            '0'..='7' => {
                let mut value = escaped as u32 - '0' as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(digit @ '0'..='7') => {
                            value = value * 8 + (digit as u32 - '0' as u32);
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                // \777 does not fit a byte, keep the low eight bits like C does
                (value & 0xff) as u8
            }
            other => {
                out.push(b'\\');
                let mut utf8 = [0; 4];
                out.extend_from_slice(other.encode_utf8(&mut utf8).as_bytes());
                return Ok(());
            }
        };
        out.push(byte);
        Ok(())
    }
}

/// Contents of a stream record's C string, `None` if it is not one
fn unquote(text: &str) -> Option<String> {
    let mut cursor = Cursor::new(text, 1);
    let content = cursor.c_string().ok()?;
    cursor.peek().is_none().then_some(content)
}
