//! Register-write scripts: one command per line, `#` starts a comment.
//!
//! ```text
//! # OPM channel 0, A4
//! 20 C7
//! 28 4A
//! 08 78
//! wait 44100
//! end
//! ```

use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Write { address: u16, data: u8 },
    Wait(u32),
    End,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: invalid register address '{token}'")]
    InvalidAddress { line: usize, token: String },
    #[error("line {line}: invalid data byte '{token}'")]
    InvalidData { line: usize, token: String },
    #[error("line {line}: invalid sample count '{token}'")]
    InvalidWait { line: usize, token: String },
    #[error("line {line}: unrecognized command '{text}'")]
    Unrecognized { line: usize, text: String },
}

fn parse_hex<T>(
    token: &str,
    from_str_radix: fn(&str, u32) -> Result<T, ParseIntError>,
) -> Option<T> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .or_else(|| token.strip_prefix('$'))
        .unwrap_or(token);
    from_str_radix(digits, 16).ok()
}

/// Parse a whole script. Line numbers in errors start at 1.
///
/// # Errors
///
/// Returns the first line that does not parse.
pub fn parse(source: &str) -> Result<Vec<Command>, ScriptError> {
    let mut commands = Vec::new();

    for (i, raw_line) in source.lines().enumerate() {
        let line = i + 1;
        let text = raw_line.split('#').next().unwrap_or("").trim();
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let command = match tokens.as_slice() {
            [] => continue,
            ["end"] => Command::End,
            ["wait", count] => {
                let samples = count.parse::<u32>().map_err(|_| ScriptError::InvalidWait {
                    line,
                    token: (*count).into(),
                })?;
                Command::Wait(samples)
            }
            [address, data] => {
                let address = parse_hex(address, u16::from_str_radix).ok_or_else(|| {
                    ScriptError::InvalidAddress { line, token: (*address).into() }
                })?;
                let data = parse_hex(data, u8::from_str_radix)
                    .ok_or_else(|| ScriptError::InvalidData { line, token: (*data).into() })?;
                Command::Write { address, data }
            }
            _ => return Err(ScriptError::Unrecognized { line, text: text.into() }),
        };

        commands.push(command);
    }

    Ok(commands)
}
