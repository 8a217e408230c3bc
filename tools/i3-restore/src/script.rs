//! Rendering and parsing of per-workspace restore scripts.

use crate::config::COMMAND_PLACEHOLDER;
use crate::errors::RestoreError;
use std::path::{Path, PathBuf};

pub const SCRIPT_SHEBANG: &str = "#!/usr/bin/env bash";
pub const SUBPROCESS_SCRIPT_ENV: &str = "I3_RESTORE_SUBPROCESS_SCRIPT";

const SLASH_TOKEN: &str = "{slash}";
const SPACE_TOKEN: &str = "{space}";

/// One container line as it is written to a workspace script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub working_directory: PathBuf,
    pub subprocess_file: Option<PathBuf>,
    pub command: String,
}

/// A container line read back from a workspace script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContainer {
    pub index: usize,
    pub working_directory: PathBuf,
    pub subprocess_file: Option<PathBuf>,
    pub command: String,
}

pub fn escape_arg(arg: &str) -> String {
    arg.replace(' ', "\\ ")
}

/// `program` plus its escaped arguments substituted into `template`.
pub fn build_subprocess_command(template: &str, program: &str, args: &[String]) -> String {
    let mut command = program.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(&escape_arg(arg));
    }
    template.replace(COMMAND_PLACEHOLDER, &command)
}

pub fn sanitize_workspace_name(name: &str) -> String {
    name.replace('/', SLASH_TOKEN).replace(' ', SPACE_TOKEN)
}

pub fn desanitize_workspace_name(sanitized: &str) -> String {
    sanitized.replace(SLASH_TOKEN, "/").replace(SPACE_TOKEN, " ")
}

fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn render_workspace_script(entries: &[ScriptEntry]) -> String {
    let mut out = format!("{SCRIPT_SHEBANG}\n");
    for (index, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "[[ $1 == {index} ]] && cd \"{}\" && ",
            escape_double_quoted(&entry.working_directory.to_string_lossy())
        ));
        if let Some(file) = &entry.subprocess_file {
            out.push_str(&format!(
                "{SUBPROCESS_SCRIPT_ENV}=\"{}\" ",
                escape_double_quoted(&file.to_string_lossy())
            ));
        }
        out.push_str(&entry.command);
        out.push('\n');
    }
    out
}

/// Reads back the container lines of a script written by
/// [`render_workspace_script`]. Blank lines and comments are skipped.
pub fn parse_workspace_script(path: &Path, text: &str) -> Result<Vec<SavedContainer>, RestoreError> {
    let mut saved = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed = parse_line(trimmed).ok_or_else(|| {
            RestoreError::Session(format!(
                "{}:{}: unrecognised script line",
                path.display(),
                line_no + 1
            ))
        })?;
        saved.push(parsed);
    }
    Ok(saved)
}

fn parse_line(line: &str) -> Option<SavedContainer> {
    let rest = line.strip_prefix("[[ $1 == ")?;
    let (index, rest) = rest.split_once(" ]] && cd \"")?;
    let index = index.parse().ok()?;

    let (dir, rest) = split_closing_quote(rest)?;
    let rest = rest.strip_prefix(" && ")?;

    let prefix = format!("{SUBPROCESS_SCRIPT_ENV}=\"");
    let (subprocess_file, command) = match rest.strip_prefix(&prefix) {
        Some(assignment) => {
            let (file, command) = split_closing_quote(assignment)?;
            let command = command.strip_prefix(' ')?;
            (Some(PathBuf::from(unescape_double_quoted(file))), command)
        }
        None => (None, rest),
    };

    Some(SavedContainer {
        index,
        working_directory: PathBuf::from(unescape_double_quoted(dir)),
        subprocess_file,
        command: command.to_string(),
    })
}

/// Splits at the first unescaped `"`.
fn split_closing_quote(text: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (offset, ch) in text.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some((&text[..offset], &text[offset + 1..])),
            _ => escaped = false,
        }
    }
    None
}
