// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::error::OpError;

/// A configured command: the authoritative argv list plus a flattened form.
///
/// The flattened string exists for logs and status snapshots only and is
/// never re-parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub display: String,
}

impl CommandSpec {
    /// Tokenise a command line into a spec.
    pub fn parse(input: &str) -> Result<Self, OpError> {
        let argv = tokenize(input)?;
        if argv.is_empty() {
            return Err(OpError::EmptyCommand);
        }
        let display = flatten(&argv);
        Ok(Self { argv, display })
    }

    /// Build a spec directly from an argv list.
    pub fn from_argv(argv: Vec<String>) -> Result<Self, OpError> {
        if argv.is_empty() {
            return Err(OpError::EmptyCommand);
        }
        let display = flatten(&argv);
        Ok(Self { argv, display })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// Split a command line into argv honoring single quotes, double quotes,
/// and backslash escapes outside single quotes.
pub fn tokenize(input: &str) -> Result<Vec<String>, OpError> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut chars = input.chars();

    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }
    let mut mode = Mode::Plain;

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                '\'' => {
                    mode = Mode::Single;
                    has_token = true;
                }
                '"' => {
                    mode = Mode::Double;
                    has_token = true;
                }
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        has_token = true;
                    }
                    None => {
                        return Err(OpError::InvalidCommand("trailing backslash".to_owned()));
                    }
                },
                c if c.is_whitespace() => {
                    if has_token {
                        argv.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.next() {
                    // Inside double quotes only \" and \\ are escapes.
                    Some(escaped @ ('"' | '\\')) => current.push(escaped),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => {
                        return Err(OpError::InvalidCommand("trailing backslash".to_owned()));
                    }
                },
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(OpError::InvalidCommand("unterminated quote".to_owned()));
    }
    if has_token {
        argv.push(current);
    }
    Ok(argv)
}

/// Render argv back into a single display string, quoting arguments that
/// contain whitespace or quotes.
pub fn flatten(argv: &[String]) -> String {
    let mut parts = Vec::with_capacity(argv.len());
    for arg in argv {
        if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
            let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
            parts.push(format!("\"{escaped}\""));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
