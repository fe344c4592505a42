//! Line-oriented configuration format (spec §6).
//!
//! Each line is `"name""value"`; a name may repeat to build a list. Lines
//! starting with `//`, `#`, or `;` (after trimming) are comments; blank
//! lines are skipped. A leading UTF-8 BOM is tolerated on the first line.
//!
//! Ported from the `CProConfigStream` line grammar — `parse`/`to_string`
//! round-trip for any well-formed list (spec §8: `BufToConfigs(ConfigsToString(xs)) == xs`).

use crate::error::{ConfigParseErrorKind, NetError, Result};
use std::collections::HashMap;

/// A single `name`/`value` pair as it appears on one config line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    pub name: String,
    pub value: String,
}

/// Parse a config buffer into an ordered list of items.
///
/// Preserves source order, including repeated names (each occurrence is a
/// separate list entry). An empty buffer parses to an empty list.
pub fn buf_to_configs(buf: &[u8]) -> Result<Vec<ConfigItem>> {
    let mut items = Vec::new();
    if buf.is_empty() {
        return Ok(items);
    }

    let mut text = buf;
    if text.starts_with(&[0xEF, 0xBB, 0xBF]) {
        text = &text[3..];
    }

    for raw_line in text.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(raw_line);
        let line = line.trim_matches(|c: char| c == '\r');
        let line = line.trim();

        if line.is_empty() || line.starts_with("//") || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        items.push(parse_line(line)?);
    }

    Ok(items)
}

/// Parse a single `"name""value"` line (already trimmed of whitespace and
/// known not to be blank or a comment).
fn parse_line(line: &str) -> Result<ConfigItem> {
    let mut chars = line.char_indices();

    let (_, open) = chars.next().ok_or(NetError::ConfigParse {
        kind: ConfigParseErrorKind::InvalidLine,
    })?;
    if open != '"' {
        return Err(NetError::ConfigParse {
            kind: ConfigParseErrorKind::InvalidLine,
        });
    }

    let name_start = 1;
    let name_end = line[name_start..]
        .find('"')
        .map(|p| name_start + p)
        .ok_or(NetError::ConfigParse {
            kind: ConfigParseErrorKind::UnterminatedQuote,
        })?;
    let name = line[name_start..name_end].to_string();

    let rest = line[name_end + 1..].trim_start_matches([' ', '\t']);
    if !rest.starts_with('"') {
        return Err(NetError::ConfigParse {
            kind: ConfigParseErrorKind::InvalidLine,
        });
    }
    let value_start = 1;
    let value_end = rest[value_start..]
        .find('"')
        .map(|p| value_start + p)
        .ok_or(NetError::ConfigParse {
            kind: ConfigParseErrorKind::UnterminatedQuote,
        })?;
    let value = rest[value_start..value_end].to_string();

    Ok(ConfigItem { name, value })
}

/// Serialize a list of items back to the `"name""value"\n` line format.
pub fn configs_to_string(items: &[ConfigItem]) -> String {
    let mut out = String::new();
    for item in items {
        out.push('"');
        out.push_str(&item.name);
        out.push_str("\"\"");
        out.push_str(&item.value);
        out.push_str("\"\n");
    }
    out
}

/// In-memory config, preserving first-seen insertion order of names and
/// all values per name (a name may be repeated to build a list).
#[derive(Debug, Default, Clone)]
pub struct ConfigStream {
    order: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl ConfigStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut stream = Self::new();
        for item in buf_to_configs(buf)? {
            stream.add(&item.name, &item.value);
        }
        Ok(stream)
    }

    pub fn add(&mut self, name: &str, value: &str) {
        if !self.values.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.values
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
        self.order.retain(|n| n != name);
    }

    /// First value for `name`, or `""` if unset (matches the original's
    /// `Get` semantics of always yielding a usable default).
    pub fn get(&self, name: &str) -> &str {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_int(&self, name: &str) -> i64 {
        self.get(name).parse().unwrap_or(0)
    }

    /// All items in the order names were first added, each name's values
    /// in the order they were added.
    pub fn to_items(&self) -> Vec<ConfigItem> {
        let mut out = Vec::new();
        for name in &self.order {
            for value in self.get_all(name) {
                out.push(ConfigItem {
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }
        out
    }

    pub fn to_string_form(&self) -> String {
        configs_to_string(&self.to_items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let buf = b"\"name\"\"value\"\n";
        let items = buf_to_configs(buf).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "name");
        assert_eq!(items[0].value, "value");
    }

    #[test]
    fn parse_comments_and_blanks() {
        let buf = b"// comment\n\n# also comment\n; also also\n\"a\"\"1\"\n";
        let items = buf_to_configs(buf).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "a");
    }

    #[test]
    fn parse_bom_tolerated() {
        let mut buf = vec![0xEF, 0xBB, 0xBF];
        buf.extend_from_slice(b"\"a\"\"1\"\n");
        let items = buf_to_configs(&buf).unwrap();
        assert_eq!(items[0].value, "1");
    }

    #[test]
    fn repeated_name_builds_list() {
        let buf = b"\"tag\"\"x\"\n\"tag\"\"y\"\n";
        let items = buf_to_configs(buf).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].value, "y");
    }

    #[test]
    fn invalid_line_errors() {
        assert!(buf_to_configs(b"not a config line\n").is_err());
    }

    #[test]
    fn round_trip() {
        let items = vec![
            ConfigItem {
                name: "a".into(),
                value: "1".into(),
            },
            ConfigItem {
                name: "a".into(),
                value: "2".into(),
            },
            ConfigItem {
                name: "b".into(),
                value: "x y z".into(),
            },
        ];
        let s = configs_to_string(&items);
        let parsed = buf_to_configs(s.as_bytes()).unwrap();
        assert_eq!(parsed, items);
    }

    #[test]
    fn stream_get_and_get_all() {
        let mut s = ConfigStream::new();
        s.add("redline_bytes", "8192");
        s.add("mount", "/a");
        s.add("mount", "/b");

        assert_eq!(s.get_int("redline_bytes"), 8192);
        assert_eq!(s.get_all("mount"), &["/a".to_string(), "/b".to_string()]);
        assert_eq!(s.get("missing"), "");
    }
}
