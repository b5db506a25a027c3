// crates/udo-rs-linux/src/config.rs
//! The udoserver configuration file.
//!
//! Line-oriented UTF-8 text: `IDENTIFIER = VALUE ;` with the semicolon
//! optional at end-of-line, `#` comments running to end-of-line, and
//! string values as double-quoted constants joined with `+`. A leading
//! UTF-8 byte order mark is tolerated.

use std::fmt;
use std::fs;
use std::path::Path;

/// Settings of the udoserver slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Serial device the UDO-SL master side connects to.
    pub udosl_devaddr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udosl_devaddr: String::from("/dev/ttyACM0"),
        }
    }
}

/// A configuration diagnostic: what went wrong and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "config line {}: {}", self.line, self.message)
        } else {
            write!(f, "config: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("file \"{}\" can not be read: {}", path.display(), e),
            line: 0,
        })?;
        Self::parse(&text)
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut sp = Scanner::new(text.strip_prefix('\u{feff}').unwrap_or(text));

        sp.skip_white();
        while !sp.at_end() {
            let ident = sp.read_alphanum().ok_or_else(|| sp.error(format!(
                "identifier missing, current char: {:?}",
                sp.peek().unwrap_or(' ')
            )))?;
            let ident = ident.to_ascii_uppercase();

            sp.skip_white();
            match ident.as_str() {
                "UDOSL_DEVADDR" => config.udosl_devaddr = sp.parse_string_assignment()?,
                _ => {
                    return Err(sp.error(format!("unknown identifier: {}", ident)));
                }
            }
            sp.skip_white();
        }

        Ok(config)
    }
}

/// Minimal cursor over the config text.
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0, line: 1 }
    }

    fn error(&self, message: String) -> ConfigError {
        ConfigError {
            message,
            line: self.line,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        if c == '\n' {
            self.line += 1;
        }
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Skips whitespace and `#` comments.
    fn skip_white(&mut self) {
        while let Some(c) = self.peek() {
            if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Skips spaces and tabs, stopping at line ends.
    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    /// Consumes `symbol` if it is next.
    fn check_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(symbol) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Reads an `[A-Za-z0-9_]+` token.
    fn read_alphanum(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        if self.pos > start {
            Some(self.text[start..self.pos].to_string())
        } else {
            None
        }
    }

    /// Parses `= "value" [+ "value"...] [;]`.
    fn parse_string_assignment(&mut self) -> Result<String, ConfigError> {
        self.skip_white();
        if !self.check_symbol('=') {
            return Err(self.error("= is missing".to_string()));
        }
        let value = self.parse_string_value()?;
        self.skip_white();
        self.check_symbol(';');
        Ok(value)
    }

    fn parse_string_value(&mut self) -> Result<String, ConfigError> {
        let mut result = String::new();
        loop {
            self.skip_white();
            if !self.check_symbol('"') {
                return Err(self.error("string constant expected".to_string()));
            }
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == '"' {
                    break;
                }
                self.bump();
            }
            if self.at_end() {
                return Err(self.error("end of string not found".to_string()));
            }
            result.push_str(&self.text[start..self.pos]);
            self.bump(); // closing quote

            self.skip_spaces();
            if !self.check_symbol('+') {
                break;
            }
        }
        Ok(result)
    }
}
