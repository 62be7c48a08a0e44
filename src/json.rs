//! A tolerant JSON reader for `EXPLAIN (FORMAT JSON)` output.
//!
//! `serde_json`'s `Map` silently keeps only the last occurrence of a
//! duplicate object key. PostgreSQL's JSON explain format never does this on
//! its own, but plans assembled or re-emitted by intermediate tooling
//! sometimes do (the same `"Worker"` key written twice at one object level
//! instead of collected into a `"Workers"` array). §4.C of the design doc
//! calls for merging rather than dropping, so this module hand-rolls a
//! recursive-descent parser instead of going through `serde_json`.

use std::collections::BTreeMap;

use crate::error::{PgPlanError, PgPlanResult};

/// A parsed JSON value. Distinct from `crate::model::Value`: this type can
/// represent `Null` and is the raw shape of the wire format, before any of
/// it is interpreted as plan fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|f| f as i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }
}

/// Deep-merges `incoming` into `existing` in place, per §4.C:
/// objects merge key-wise (recursing on shared keys), arrays merge
/// element-wise by index, and anything else is an overwrite (the later
/// occurrence wins, matching last-value-wins for the non-mergeable case).
fn merge_values(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                match a.get_mut(&k) {
                    Some(slot) => merge_values(slot, v),
                    None => {
                        a.insert(k, v);
                    }
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (i, v) in b.into_iter().enumerate() {
                if let Some(slot) = a.get_mut(i) {
                    merge_values(slot, v);
                } else {
                    a.push(v);
                }
            }
        }
        (slot, incoming) => {
            *slot = incoming;
        }
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Parser<'a> {
    fn new(s: &'a str) -> Self {
        Parser {
            bytes: s.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn err(&self, message: impl Into<String>) -> PgPlanError {
        PgPlanError::JsonSyntax {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.advance();
        }
    }

    fn expect(&mut self, b: u8) -> PgPlanResult<()> {
        match self.advance() {
            Some(c) if c == b => Ok(()),
            Some(c) => Err(self.err(format!("expected '{}', found '{}'", b as char, c as char))),
            None => Err(self.err(format!("expected '{}', found end of input", b as char))),
        }
    }

    fn parse_value(&mut self) -> PgPlanResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => self.parse_string().map(Value::String),
            Some(b't') | Some(b'f') => self.parse_bool(),
            Some(b'n') => self.parse_null(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) => Err(self.err(format!("unexpected character '{}'", c as char))),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn parse_object(&mut self) -> PgPlanResult<Value> {
        self.expect(b'{')?;
        let mut map = BTreeMap::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.advance();
            return Ok(Value::Object(map));
        }
        loop {
            self.skip_ws();
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?;
            match map.get_mut(&key) {
                Some(existing) => merge_values(existing, value),
                None => {
                    map.insert(key, value);
                }
            }
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.advance();
                }
                Some(b'}') => {
                    self.advance();
                    break;
                }
                _ => return Err(self.err("expected ',' or '}' in object")),
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_array(&mut self) -> PgPlanResult<Value> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.advance();
            return Ok(Value::Array(items));
        }
        loop {
            let value = self.parse_value()?;
            items.push(value);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.advance();
                }
                Some(b']') => {
                    self.advance();
                    break;
                }
                _ => return Err(self.err("expected ',' or ']' in array")),
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_string(&mut self) -> PgPlanResult<String> {
        self.skip_ws();
        self.expect(b'"')?;
        let mut raw = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => raw.push(b'"'),
                    Some(b'\\') => raw.push(b'\\'),
                    Some(b'/') => raw.push(b'/'),
                    Some(b'n') => raw.push(b'\n'),
                    Some(b't') => raw.push(b'\t'),
                    Some(b'r') => raw.push(b'\r'),
                    Some(b'b') => raw.push(0x08),
                    Some(b'f') => raw.push(0x0c),
                    Some(b'u') => {
                        let cp = self.parse_hex4()?;
                        let mut buf = [0u8; 4];
                        let ch = char::from_u32(cp).unwrap_or('\u{FFFD}');
                        raw.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    Some(c) => return Err(self.err(format!("invalid escape '\\{}'", c as char))),
                    None => return Err(self.err("unterminated escape sequence")),
                },
                Some(b) => raw.push(b),
                None => return Err(self.err("unterminated string")),
            }
        }
        String::from_utf8(raw).map_err(|e| self.err(format!("invalid UTF-8 in string: {e}")))
    }

    fn parse_hex4(&mut self) -> PgPlanResult<u32> {
        let mut cp = 0u32;
        for _ in 0..4 {
            let c = self.advance().ok_or_else(|| self.err("unterminated \\u escape"))?;
            let digit = (c as char)
                .to_digit(16)
                .ok_or_else(|| self.err("invalid hex digit in \\u escape"))?;
            cp = cp * 16 + digit;
        }
        Ok(cp)
    }

    fn parse_bool(&mut self) -> PgPlanResult<Value> {
        if self.bytes[self.pos..].starts_with(b"true") {
            for _ in 0..4 {
                self.advance();
            }
            Ok(Value::Bool(true))
        } else if self.bytes[self.pos..].starts_with(b"false") {
            for _ in 0..5 {
                self.advance();
            }
            Ok(Value::Bool(false))
        } else {
            Err(self.err("invalid literal"))
        }
    }

    fn parse_null(&mut self) -> PgPlanResult<Value> {
        if self.bytes[self.pos..].starts_with(b"null") {
            for _ in 0..4 {
                self.advance();
            }
            Ok(Value::Null)
        } else {
            Err(self.err("invalid literal"))
        }
    }

    fn parse_number(&mut self) -> PgPlanResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.advance();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");
        text.parse::<f64>()
            .map(Value::Number)
            .map_err(|e| self.err(format!("invalid number: {e}")))
    }
}

/// Parses `source` as a single JSON value, tolerating duplicate object keys
/// by merging them (§4.C). If the top-level value is a non-empty array, it
/// is unwrapped to its first element, matching `EXPLAIN (FORMAT JSON)`'s
/// single-statement wrapper array.
pub fn parse(source: &str) -> PgPlanResult<Value> {
    let mut parser = Parser::new(source);
    let value = parser.parse_value()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.err("trailing data after JSON value"));
    }
    Ok(match value {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    })
}

/// Checks whether `source` parses as a JSON value at all, without unwrapping
/// the top-level array — used by the format detector (§4.B) to decide
/// whether to route into the JSON path.
pub fn looks_like_json(source: &str) -> bool {
    let trimmed = source.trim_start();
    matches!(trimmed.as_bytes().first(), Some(b'{') | Some(b'['))
        && Parser::new(source).parse_value().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_object_and_array() {
        let v = parse(r#"[{"Plan":{"Node Type":"Seq Scan","Plans":[{"Node Type":"Hash"}]}}]"#)
            .unwrap();
        assert_eq!(
            v.get("Plan")
                .and_then(|p| p.get("Node Type"))
                .and_then(Value::as_str),
            Some("Seq Scan")
        );
        assert_eq!(
            v.get("Plan")
                .and_then(|p| p.get("Plans"))
                .and_then(Value::as_array)
                .map(|a| a.len()),
            Some(1)
        );
    }

    #[test]
    fn duplicate_scalar_keys_last_write_wins() {
        let v = parse(r#"{"a": 1, "a": 2}"#).unwrap();
        assert_eq!(v.get("a").and_then(Value::as_f64), Some(2.0));
    }

    #[test]
    fn duplicate_object_keys_merge_distinct_properties() {
        let v = parse(
            r#"{"Plan":{"Node Type":"X","Worker":{"Worker Number":0,"Actual Rows":10},"Worker":{"Worker Number":0,"Actual Startup Time":1.0}}}"#,
        )
        .unwrap();
        let worker = v.get("Plan").and_then(|p| p.get("Worker")).unwrap();
        assert_eq!(worker.get("Actual Rows").and_then(Value::as_i64), Some(10));
        assert_eq!(
            worker.get("Actual Startup Time").and_then(Value::as_f64),
            Some(1.0)
        );
        assert_eq!(worker.get("Worker Number").and_then(Value::as_i64), Some(0));
    }

    #[test]
    fn duplicate_array_keys_merge_element_wise() {
        let v = parse(r#"{"a": [{"x": 1}], "a": [{"y": 2}, {"z": 3}]}"#).unwrap();
        let arr = v.get("a").and_then(Value::as_array).unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0].get("x").and_then(Value::as_i64), Some(1));
        assert_eq!(arr[0].get("y").and_then(Value::as_i64), Some(2));
        assert_eq!(arr[1].get("z").and_then(Value::as_i64), Some(3));
    }

    #[test]
    fn top_level_array_is_unwrapped_to_first_element() {
        let v = parse(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(v.get("a").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn malformed_json_reports_position() {
        let err = parse(r#"{"a": }"#).unwrap_err();
        match err {
            PgPlanError::JsonSyntax { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 0);
            }
            other => panic!("expected JsonSyntax, got {other:?}"),
        }
    }

    #[test]
    fn looks_like_json_rejects_plain_text() {
        assert!(!looks_like_json("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)"));
        assert!(looks_like_json(r#"{"Plan": {}}"#));
    }
}
