//! `.reg` text format: parsing into [`EditOp`]s and emitting a subtree back
//! to text.
//!
//! This is a hand-rolled line-oriented parser rather than a grammar
//! library: the format is line-structured (one declaration per logical
//! line, with `\`-continuation), and a handful of value syntaxes
//! (`dword:`, `hex:`, `hex(T):`, quoted strings) cover the entire value
//! grammar. Parsing does not touch a [`crate::hive::Hive`] at all; the
//! caller applies the returned ops through a [`crate::editor::Tx`].

use crate::cancel::CancelToken;
use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::reader::strip_hive_root_alias;
use crate::utils::{normalize_separators, upper_case};
use encoding_rs::UTF_16LE;
use std::fs;
use std::path::Path;

/// One parsed `.reg` directive. The parser only produces these; it never
/// applies them.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// `[path]` — create the key and all missing ancestors.
    CreateKey { path: String },
    /// `"name"=value` (or `@=value` for the unnamed value).
    SetValue {
        path: String,
        name: String,
        value_type: ValueType,
        data: Vec<u8>,
    },
    /// `[-path]` — delete the key and (per the format) its subtree.
    DeleteKey { path: String, recursive: bool },
    /// `"name"=-` — delete a single value.
    DeleteValue { path: String, name: String },
}

/// Controls how key paths in the text are mapped onto the paths `EditOp`s
/// carry.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// If non-empty, only paths under this prefix are kept (with the
    /// prefix stripped); everything else is silently dropped.
    pub prefix: String,
    /// If set (and `prefix` is empty), strip a recognized hive-root alias
    /// (`HKLM`, `HKEY_LOCAL_MACHINE`, ...) from the front of every path.
    pub auto_prefix: bool,
}

/// Text encoding used by [`export_reg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegEncoding {
    Utf8,
    Utf16Le,
}

/// Controls how [`export_reg`] renders a subtree.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Hive-root label prepended to every emitted path, e.g.
    /// `HKEY_LOCAL_MACHINE`. Empty means paths are rooted at `node` itself.
    pub prefix: String,
    /// Output text encoding.
    pub encoding: RegEncoding,
    /// Whether to emit a BOM (meaningful only for `Utf16Le`; UTF-8 output
    /// never gets one, matching `regedit`'s own behavior).
    pub bom: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            prefix: String::new(),
            encoding: RegEncoding::Utf16Le,
            bom: true,
        }
    }
}

const VERSION_HEADER_V5: &str = "Windows Registry Editor Version 5.00";
const VERSION_HEADER_LEGACY: &str = "REGEDIT4";

/// Parses a `.reg` file from disk.
pub fn parse_reg_file<P: AsRef<Path>>(path: P, opts: &ParseOptions) -> Result<Vec<EditOp>> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    parse_reg_bytes(&bytes, &path.display().to_string(), opts)
}

/// Parses `.reg` text already read into memory, auto-detecting its
/// encoding from a BOM (UTF-8, UTF-16LE, or bare UTF-8 if neither is
/// present).
pub fn parse_reg_bytes(bytes: &[u8], source: &str, opts: &ParseOptions) -> Result<Vec<EditOp>> {
    let text = decode_bytes(bytes, source)?;
    parse_reg_str(&text, source, opts)
}

/// Parses `.reg` text that is already a Rust `String`.
pub fn parse_reg_str(text: &str, source: &str, opts: &ParseOptions) -> Result<Vec<EditOp>> {
    let lines = join_continuations(text);
    let mut iter = lines.iter();

    let header = loop {
        match iter.next() {
            Some((line_no, line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || is_comment(trimmed) {
                    continue;
                }
                break (*line_no, trimmed.to_string());
            }
            None => {
                return Err(parse_err(source, 1, "empty .reg input: missing version header"));
            }
        }
    };

    if header.1 != VERSION_HEADER_V5 && header.1 != VERSION_HEADER_LEGACY {
        return Err(parse_err(
            source,
            header.0,
            &format!("expected a version header, found {:?}", header.1),
        ));
    }

    let mut ops = Vec::new();
    let mut current_path: Option<String> = None;

    for (line_no, line) in iter {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment(trimmed) {
            continue;
        }

        if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let (raw_path, recursive_delete) = match inner.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (inner, false),
            };
            let Some(path) = apply_prefix(raw_path, opts) else {
                current_path = None;
                continue;
            };
            if recursive_delete {
                ops.push(EditOp::DeleteKey { path, recursive: true });
            } else {
                ops.push(EditOp::CreateKey { path: path.clone() });
                current_path = Some(path);
            }
            continue;
        }

        let Some(path) = current_path.clone() else {
            return Err(parse_err(source, *line_no, "value line outside of any [key] section"));
        };

        let (name, rest) = parse_value_name(trimmed, source, *line_no)?;
        let rest = rest.trim_start();
        let Some(value_text) = rest.strip_prefix('=') else {
            return Err(parse_err(source, *line_no, "expected '=' after value name"));
        };
        let value_text = value_text.trim_start();

        if value_text == "-" {
            ops.push(EditOp::DeleteValue { path, name });
            continue;
        }

        let (value_type, data) = parse_value_data(value_text, source, *line_no)?;
        ops.push(EditOp::SetValue {
            path,
            name,
            value_type,
            data,
        });
    }

    Ok(ops)
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with('#')
}

/// Joins `\`-continued physical lines into logical ones, each tagged with
/// the 1-based physical line number it started on (used for error
/// messages).
fn join_continuations(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        let (start, mut buf) = pending.take().unwrap_or((line_no, String::new()));
        buf.push_str(line.trim_end());

        if let Some(stripped) = buf.strip_suffix('\\') {
            pending = Some((start, format!("{}\n", stripped)));
        } else {
            out.push((start, buf));
        }
    }
    if let Some((start, buf)) = pending {
        out.push((start, buf));
    }
    out
}

fn decode_bytes(bytes: &[u8], source: &str) -> Result<String> {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        let (decoded, _, had_errors) = UTF_16LE.decode(&bytes[2..]);
        if had_errors {
            return Err(parse_err(source, 0, "invalid UTF-16LE sequence"));
        }
        Ok(decoded.into_owned())
    } else if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8(rest.to_vec()).map_err(|_| parse_err(source, 0, "invalid UTF-8 sequence"))
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|_| parse_err(source, 0, "invalid UTF-8 sequence"))
    }
}

fn parse_err(source: &str, line: usize, message: &str) -> RegistryError {
    RegistryError::RegParse {
        path: source.to_string(),
        line,
        message: message.to_string(),
    }
}

/// Parses the name portion of a value line (`"name"` or `@`), returning it
/// alongside the remainder of the line starting right after the name.
fn parse_value_name<'a>(line: &'a str, source: &str, line_no: usize) -> Result<(String, &'a str)> {
    if let Some(rest) = line.strip_prefix('@') {
        return Ok(("(default)".to_string(), rest));
    }
    if !line.starts_with('"') {
        return Err(parse_err(source, line_no, "expected '\"name\"' or '@' at start of value line"));
    }
    let (name, rest) = take_quoted(&line[1..], source, line_no)?;
    Ok((unescape_reg_string(&name), rest))
}

/// Reads characters up to the next unescaped `"`, returning the raw
/// (still-escaped) contents and the text following the closing quote.
fn take_quoted<'a>(text: &'a str, source: &str, line_no: usize) -> Result<(String, &'a str)> {
    let mut raw = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some(&(_, next)) = chars.peek() {
                raw.push(c);
                raw.push(next);
                chars.next();
            }
            continue;
        }
        if c == '"' {
            return Ok((raw, &text[i + 1..]));
        }
        raw.push(c);
    }
    Err(parse_err(source, line_no, "unterminated quoted string"))
}

/// Decodes `\\`, `\"`, and permissively, `\NNN` octal byte escapes.
fn unescape_reg_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            Some('"') => {
                out.push('"');
                chars.next();
            }
            Some(d) if d.is_digit(8) => {
                let mut digits = String::new();
                for _ in 0..3 {
                    match chars.peek() {
                        Some(&d) if d.is_digit(8) => {
                            digits.push(d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                if let Ok(byte) = u8::from_str_radix(&digits, 8) {
                    out.push(byte as char);
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Escapes `\` and `"` for re-emission inside a quoted `.reg` literal.
fn escape_reg_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

fn parse_value_data(text: &str, source: &str, line_no: usize) -> Result<(ValueType, Vec<u8>)> {
    if let Some(rest) = text.strip_prefix('"') {
        let (raw, trailer) = take_quoted(rest, source, line_no)?;
        if !trailer.trim().is_empty() {
            return Err(parse_err(source, line_no, "unexpected trailing text after quoted value"));
        }
        let decoded = unescape_reg_string(&raw);
        let mut data: Vec<u8> = decoded.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        data.extend_from_slice(&[0, 0]);
        return Ok((ValueType::String, data));
    }

    if let Some(hex) = text.strip_prefix("dword:") {
        let hex = hex.trim();
        let value = u32::from_str_radix(hex, 16)
            .map_err(|_| parse_err(source, line_no, &format!("invalid dword literal {:?}", hex)))?;
        return Ok((ValueType::Dword, value.to_le_bytes().to_vec()));
    }

    if let Some(rest) = text.strip_prefix("hex(") {
        let Some(close) = rest.find(')') else {
            return Err(parse_err(source, line_no, "unterminated hex(T) type tag"));
        };
        let type_code = u32::from_str_radix(&rest[..close], 16)
            .map_err(|_| parse_err(source, line_no, &format!("invalid hex(T) type tag {:?}", &rest[..close])))?;
        let after = rest[close + 1..]
            .strip_prefix(':')
            .ok_or_else(|| parse_err(source, line_no, "expected ':' after hex(T)"))?;
        let value_type = ValueType::from_u32(type_code)?;
        let data = parse_hex_bytes(after, source, line_no)?;
        return Ok((value_type, data));
    }

    if let Some(rest) = text.strip_prefix("hex:") {
        let data = parse_hex_bytes(rest, source, line_no)?;
        return Ok((ValueType::Binary, data));
    }

    Err(parse_err(source, line_no, &format!("unrecognized value syntax: {:?}", text)))
}

fn parse_hex_bytes(text: &str, source: &str, line_no: usize) -> Result<Vec<u8>> {
    let text = text.trim().trim_end_matches(',');
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|tok| {
            let tok = tok.trim();
            u8::from_str_radix(tok, 16).map_err(|_| parse_err(source, line_no, &format!("invalid hex byte {:?}", tok)))
        })
        .collect()
}

/// Strips `prefix` from `path` (case-insensitively), or returns `None` if
/// `opts.prefix` is set and `path` is not under it.
fn apply_prefix(raw_path: &str, opts: &ParseOptions) -> Option<String> {
    let path = normalize_separators(raw_path);
    if !opts.prefix.is_empty() {
        let prefix = normalize_separators(opts.prefix.trim_end_matches(['\\', '/']));
        if upper_case(&path) == upper_case(&prefix) {
            return Some(String::new());
        }
        let with_sep = format!("{}\\", prefix);
        if upper_case(&path).starts_with(&upper_case(&with_sep)) {
            return Some(path[with_sep.len()..].to_string());
        }
        return None;
    }
    if opts.auto_prefix {
        return Some(strip_hive_root_alias(&path).to_string());
    }
    Some(path)
}

/// Walks the subtree at `root` and renders it as `.reg` text.
pub fn export_reg(reader: &crate::reader::Reader, root: crate::reader::NodeId, opts: &ExportOptions) -> Result<Vec<u8>> {
    export_reg_impl(reader, root, opts, None)
}

/// Like [`export_reg`], but checked against a [`CancelToken`] at every
/// key visited. Fails with [`RegistryError::Cancelled`] as soon as the
/// token is observed cancelled.
pub fn export_reg_cancelable(
    reader: &crate::reader::Reader,
    root: crate::reader::NodeId,
    opts: &ExportOptions,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    export_reg_impl(reader, root, opts, Some(cancel))
}

fn export_reg_impl(
    reader: &crate::reader::Reader,
    root: crate::reader::NodeId,
    opts: &ExportOptions,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>> {
    let mut text = String::new();
    text.push_str(VERSION_HEADER_V5);
    text.push_str("\r\n\r\n");

    let base_path = normalize_separators(opts.prefix.trim_end_matches(['\\', '/']));
    write_subtree(reader, root, &base_path, &mut text, cancel)?;

    Ok(encode_output(&text, opts))
}

fn write_subtree(
    reader: &crate::reader::Reader,
    id: crate::reader::NodeId,
    path: &str,
    text: &mut String,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    if let Some(token) = cancel {
        token.check()?;
    }

    text.push('[');
    text.push_str(path);
    text.push_str("]\r\n");

    for value_id in reader.values(id)? {
        let vk = reader.value_key(value_id)?;
        let data = reader.value_raw_data(value_id)?;
        write_value_line(&vk.name, vk.data_type, &data, text);
    }
    text.push_str("\r\n");

    for child_id in reader.subkeys(id)? {
        let name = reader.name(child_id)?;
        let child_path = if path.is_empty() {
            name
        } else {
            format!("{}\\{}", path, name)
        };
        write_subtree(reader, child_id, &child_path, text, cancel)?;
    }
    Ok(())
}

fn write_value_line(name: &str, value_type: ValueType, data: &[u8], text: &mut String) {
    if name == "(default)" {
        text.push('@');
    } else {
        text.push('"');
        text.push_str(&escape_reg_string(name));
        text.push('"');
    }
    text.push('=');
    text.push_str(&format_value(value_type, data));
    text.push_str("\r\n");
}

fn format_value(value_type: ValueType, data: &[u8]) -> String {
    match value_type {
        ValueType::String => {
            let s = crate::utils::read_utf16_string(data, 0).unwrap_or_default();
            format!("\"{}\"", escape_reg_string(&s))
        }
        ValueType::Dword if data.len() >= 4 => {
            let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            format!("dword:{:08x}", value)
        }
        ValueType::Binary => format!("hex:{}", wrap_hex_line(data, 6)),
        other => format!("hex({:x}):{}", other.to_u32(), wrap_hex_line(data, 9)),
    }
}

/// Renders `data` as comma-separated hex pairs, wrapping at 80 columns the
/// way `regedit`'s own exporter does: a trailing `\` plus newline, then the
/// continuation indented by one space. `lead_len` is the width already
/// consumed on the first line (`"hex:"` or `"hex(T):"`).
fn wrap_hex_line(data: &[u8], lead_len: usize) -> String {
    const WIDTH: usize = 80;
    let mut out = String::new();
    let mut col = lead_len;
    for (i, byte) in data.iter().enumerate() {
        let mut token = format!("{:02x}", byte);
        if i + 1 < data.len() {
            token.push(',');
        }
        if col + token.len() > WIDTH && i > 0 {
            out.push_str("\\\r\n  ");
            col = 2;
        }
        col += token.len();
        out.push_str(&token);
    }
    out
}

fn encode_output(text: &str, opts: &ExportOptions) -> Vec<u8> {
    match opts.encoding {
        RegEncoding::Utf8 => text.as_bytes().to_vec(),
        RegEncoding::Utf16Le => {
            let mut out = Vec::with_capacity(text.len() * 2 + 2);
            if opts.bom {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
    }
}
