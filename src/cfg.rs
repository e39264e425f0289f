//! Codec for DragonEx `image.cfg` configuration trees.
//!
//! The format is line oriented: `[GROUP]` headers, `key = value` pairs, and
//! anonymous `{ k = v, ... },` list items (used for FILELIST entries). Values
//! are numbers (base auto-detected), quoted strings, or bare identifiers;
//! identifiers are substituted from previously parsed variables and the
//! accumulated result is reclassified as a group reference when it names a
//! known group. `..` concatenates value pieces.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(u32),
    Str(String),
    /// The unquoted name of another group or value, resolved by the consumer.
    Reference(String),
    /// An anonymous brace-delimited record nested inside a group.
    ListItem(Vec<Variable>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: Value,
}

impl Variable {
    pub fn number(name: impl Into<String>, value: u32) -> Self {
        Variable {
            name: name.into(),
            value: Value::Number(value),
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            value: Value::Str(value.into()),
        }
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            value: Value::Reference(target.into()),
        }
    }

    pub fn list(items: Vec<Variable>) -> Self {
        Variable {
            name: String::new(),
            value: Value::ListItem(items),
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self.value {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match &self.value {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Variable]> {
        match &self.value {
            Value::ListItem(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub variables: Vec<Variable>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Group {
            name: name.into(),
            variables: Vec::new(),
        }
    }

    pub fn push(&mut self, var: Variable) {
        self.variables.push(var);
    }
}

/// An ordered sequence of groups with by-name lookup side tables.
#[derive(Debug, Default)]
pub struct Cfg {
    groups: Vec<Group>,
    group_index: HashMap<String, usize>,
    // Flat index of top-level variables across all groups, first writer wins.
    variable_index: HashMap<String, (usize, usize)>,
}

impl Cfg {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Cfg> {
        let text = fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Cfg> {
        let mut cfg = Cfg::default();

        for raw in text.lines() {
            let mut line = raw;
            skip_whitespace(&mut line);
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let first = line.chars().next().unwrap();
            if first == '[' {
                let name = parse_group_header(line)
                    .ok_or_else(|| Error::Parse(format!("bad group header: {}", raw.trim())))?;
                cfg.add_group(Group::new(name));
            } else if first == '{' {
                if cfg.groups.is_empty() {
                    eprintln!("[!] list item before any group, skipping: {}", raw.trim());
                    continue;
                }
                let item = cfg.parse_list_item(&mut line);
                let last = cfg.groups.len() - 1;
                cfg.groups[last].variables.push(item);
            } else if first.is_ascii_alphabetic() || first == '_' || first == '.' {
                if cfg.groups.is_empty() {
                    eprintln!("[!] variable before any group, skipping: {}", raw.trim());
                    continue;
                }
                let var = cfg
                    .parse_key_value(&mut line)
                    .ok_or_else(|| Error::Parse(format!("bad key/value line: {}", raw.trim())))?;
                cfg.push_variable(var);
            } else {
                return Err(Error::Parse(format!("unknown line format: {}", raw.trim())));
            }
        }

        if cfg.groups.is_empty() {
            return Err(Error::Parse("no groups found".into()));
        }
        Ok(cfg)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn add_group(&mut self, group: Group) {
        let index = self.groups.len();
        self.group_index.entry(group.name.clone()).or_insert(index);
        for (vi, var) in group.variables.iter().enumerate() {
            if !var.name.is_empty() {
                self.variable_index
                    .entry(var.name.clone())
                    .or_insert((index, vi));
            }
        }
        self.groups.push(group);
    }

    fn push_variable(&mut self, var: Variable) {
        let gi = self.groups.len() - 1;
        let vi = self.groups[gi].variables.len();
        if !var.name.is_empty() {
            self.variable_index
                .entry(var.name.clone())
                .or_insert((gi, vi));
        }
        self.groups[gi].variables.push(var);
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.group_index.get(name).map(|&i| &self.groups[i])
    }

    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.variable_index
            .get(name)
            .map(|&(gi, vi)| &self.groups[gi].variables[vi])
    }

    pub fn find_variable_in(&self, name: &str, group: &str) -> Option<&Variable> {
        self.find_group(group)?
            .variables
            .iter()
            .find(|v| v.name == name)
    }

    pub fn get_number(&self, name: &str) -> Option<u32> {
        self.find_variable(name)?.as_number()
    }

    pub fn get_number_in(&self, name: &str, group: &str) -> Option<u32> {
        self.find_variable_in(name, group)?.as_number()
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.find_variable(name)?.as_str()
    }

    pub fn get_string_in(&self, name: &str, group: &str) -> Option<&str> {
        self.find_variable_in(name, group)?.as_str()
    }

    pub fn count_variables(&self, group: &str) -> usize {
        self.find_group(group).map_or(0, |g| g.variables.len())
    }

    /// Serialize in insertion order. Numbers print decimal except inside
    /// `[IMAGE_CFG]`, where the convention is hex.
    pub fn dump_to_string(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            let hex = group.name == "IMAGE_CFG";
            let _ = writeln!(out, "[{}]", group.name);
            for var in &group.variables {
                match &var.value {
                    Value::Number(n) => {
                        if hex {
                            let _ = writeln!(out, "{} = 0x{:x}", var.name, n);
                        } else {
                            let _ = writeln!(out, "{} = {}", var.name, n);
                        }
                    }
                    Value::Str(s) => {
                        let _ = writeln!(out, "{} = \"{}\"", var.name, s);
                    }
                    Value::Reference(r) => {
                        let _ = writeln!(out, "{} = {}", var.name, r);
                    }
                    Value::ListItem(items) => {
                        if var.name.is_empty() {
                            out.push_str("{ ");
                        } else {
                            let _ = write!(out, "{}={{ ", var.name);
                        }
                        for item in items {
                            match &item.value {
                                Value::Str(s) => {
                                    let _ = write!(out, "{} = \"{}\", ", item.name, s);
                                }
                                Value::Reference(r) => {
                                    let _ = write!(out, "{} = {}, ", item.name, r);
                                }
                                Value::Number(n) => {
                                    if hex {
                                        let _ = write!(out, "{} = 0x{:x}, ", item.name, n);
                                    } else {
                                        let _ = write!(out, "{} = {}, ", item.name, n);
                                    }
                                }
                                // Nested list items do not occur in the format.
                                Value::ListItem(_) => {}
                            }
                        }
                        out.push_str("},\n");
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    fn parse_key_value(&self, line: &mut &str) -> Option<Variable> {
        skip_whitespace(line);
        let name = parse_identifier(line);
        if name.is_empty() {
            return None;
        }
        skip_whitespace(line);
        if !line.starts_with('=') {
            return None;
        }
        *line = &line[1..];
        let value = self.parse_expression(line);
        Some(Variable { name, value })
    }

    fn parse_list_item(&self, line: &mut &str) -> Variable {
        *line = &line[1..]; // consume '{'
        let mut items = Vec::new();

        loop {
            skip_whitespace(line);
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix('}') {
                *line = rest;
                break;
            }

            match self.parse_key_value(line) {
                Some(var) => items.push(var),
                // A sub-item we cannot tokenize; drop the rest of the item.
                None => break,
            }

            skip_whitespace(line);
            let mut found_comma = false;
            if let Some(rest) = line.strip_prefix(',') {
                *line = rest;
                found_comma = true;
            }
            if let Some(rest) = line.strip_prefix('}') {
                *line = rest;
                break;
            }
            if !found_comma {
                break;
            }
        }

        Variable::list(items)
    }

    /// Expressions are two-phase: known variables are substituted inline while
    /// scanning (numbers as `0x%x`), then the accumulated result turns into a
    /// Reference when it matches a known group name.
    fn parse_expression(&self, line: &mut &str) -> Value {
        skip_whitespace(line);
        if line.is_empty() {
            return Value::Str(String::new());
        }

        let first = line.chars().next().unwrap();
        if first.is_ascii_digit() || first == '-' {
            if let Some(n) = take_number(line) {
                return Value::Number(n);
            }
        }

        let mut result = String::new();
        let mut is_string = false;
        loop {
            skip_whitespace(line);
            if line.is_empty() {
                break;
            }
            let c = line.chars().next().unwrap();
            if c == '"' || c == '\'' {
                result.push_str(&parse_quoted(line));
                is_string = true;
            } else if c.is_ascii_alphabetic() || c == '_' || c == '.' {
                let ident = parse_identifier(line);
                match self.find_variable(&ident).map(|v| &v.value) {
                    Some(Value::Str(s)) => result.push_str(s),
                    Some(Value::Number(n)) => {
                        let _ = write!(result, "0x{:x}", n);
                    }
                    _ => result.push_str(&ident),
                }
                is_string = true;
            } else {
                break;
            }

            skip_whitespace(line);
            match line.strip_prefix("..") {
                Some(rest) => *line = rest,
                None => break,
            }
        }

        if is_string && !result.is_empty() && !result.contains('"') && self.find_group(&result).is_some() {
            return Value::Reference(result);
        }
        if is_string {
            Value::Str(result)
        } else {
            Value::Number(0)
        }
    }
}

/// Skip spaces, tabs and CR; a `;` after the whitespace comments out the rest
/// of the line.
fn skip_whitespace(line: &mut &str) {
    *line = line.trim_start_matches([' ', '\t', '\r']);
    if line.starts_with(';') {
        *line = "";
    }
}

fn parse_identifier(line: &mut &str) -> String {
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let ident = line[..end].to_string();
    *line = &line[end..];
    ident
}

fn parse_quoted(line: &mut &str) -> String {
    let mut chars = line.char_indices();
    let (_, delim) = chars.next().unwrap();

    let mut result = String::new();
    let mut consumed = line.len();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                result.push(escaped);
            }
            continue;
        }
        if c == delim {
            consumed = i + c.len_utf8();
            break;
        }
        result.push(c);
    }

    *line = &line[consumed..];
    result
}

/// `strtol`-style number scan with base auto-detection: `0x` hex, leading `0`
/// octal, otherwise decimal. The value is truncated to u32.
fn take_number(line: &mut &str) -> Option<u32> {
    let b = line.as_bytes();
    let mut pos = 0;
    let negative = b.first() == Some(&b'-');
    if negative {
        pos += 1;
    }

    let (radix, digits_start) = if b[pos..].starts_with(b"0x") || b[pos..].starts_with(b"0X") {
        (16, pos + 2)
    } else if b.get(pos) == Some(&b'0') && b.get(pos + 1).is_some_and(|d| d.is_ascii_digit()) {
        (8, pos + 1)
    } else {
        (10, pos)
    };

    let mut value: i64 = 0;
    let mut end = digits_start;
    while end < b.len() {
        match (b[end] as char).to_digit(radix) {
            Some(d) => {
                value = value.wrapping_mul(radix as i64).wrapping_add(d as i64);
                end += 1;
            }
            None => break,
        }
    }
    if end == digits_start {
        return None;
    }
    if negative {
        value = -value;
    }

    *line = &line[end..];
    Some(value as u32)
}

fn parse_group_header(line: &str) -> Option<String> {
    let open = line.find('[')?;
    let close = line[open + 1..].find(']')? + open + 1;
    let name = line[open + 1..close].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
