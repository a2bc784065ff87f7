//! Reader for shell-style variable files
//!
//! `make.defaults` is a restricted bash file made of `KEY=value`
//! assignments. Only what profiles use in practice is understood: an
//! optional `export`, single and double quoting, backslash escapes and
//! line continuations, and `$VAR` / `${VAR}` expansion.

use crate::{ConfigError, Result};
use indexmap::IndexMap;

/// Parse the assignments in `text`.
///
/// References expand against assignments made earlier in the same text,
/// falling back to `seed`; unknown variables expand to nothing. Only the
/// variables assigned in `text` are returned, in assignment order.
pub fn parse_bash_assignments(
    text: &str,
    seed: &IndexMap<String, String>,
) -> Result<IndexMap<String, String>> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        lineno: 1,
        seed,
        vars: IndexMap::new(),
    };
    parser.run()?;
    Ok(parser.vars)
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    lineno: usize,
    seed: &'a IndexMap<String, String>,
    vars: IndexMap<String, String>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.lineno += 1;
        }
        Some(c)
    }

    fn error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::ShellSyntax {
            lineno: self.lineno,
            reason: reason.into(),
        }
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.skip_blank();
            match self.peek() {
                None => return Ok(()),
                Some('#') => self.skip_comment(),
                Some(';') => {
                    self.bump();
                }
                Some(_) => self.assignment()?,
            }
        }
    }

    fn skip_blank(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '\\' && self.chars.get(self.pos + 1) == Some(&'\n') {
                self.bump();
                self.bump();
            } else {
                break;
            }
        }
    }

    fn skip_inline_blank(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_name_char(c) {
                break;
            }
            name.push(c);
            self.bump();
        }
        name
    }

    fn assignment(&mut self) -> Result<()> {
        let mut name = self.name();
        if name == "export" && matches!(self.peek(), Some(' ') | Some('\t')) {
            self.skip_inline_blank();
            name = self.name();
        }

        if name.is_empty() {
            let found = self.peek().unwrap_or(' ');
            return Err(self.error(format!("unexpected character {:?}", found)));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(self.error(format!("invalid variable name {:?}", name)));
        }
        if self.peek() != Some('=') {
            return Err(self.error(format!("expected '=' after {}", name)));
        }
        self.bump();

        let value = self.value()?;
        self.vars.insert(name, value);
        Ok(())
    }

    fn value(&mut self) -> Result<String> {
        let mut value = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\'' => {
                    self.bump();
                    self.single_quoted(&mut value)?;
                }
                '"' => {
                    self.bump();
                    self.double_quoted(&mut value)?;
                }
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('\n') | None => {}
                        Some(escaped) => value.push(escaped),
                    }
                }
                '$' => {
                    self.bump();
                    self.expand(&mut value)?;
                }
                c if c.is_whitespace() || c == ';' => break,
                c => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        Ok(value)
    }

    fn single_quoted(&mut self, out: &mut String) -> Result<()> {
        let start = self.lineno;
        loop {
            match self.bump() {
                Some('\'') => return Ok(()),
                Some(c) => out.push(c),
                None => {
                    return Err(ConfigError::ShellSyntax {
                        lineno: start,
                        reason: "unterminated single quote".to_string(),
                    })
                }
            }
        }
    }

    fn double_quoted(&mut self, out: &mut String) -> Result<()> {
        let start = self.lineno;
        loop {
            match self.bump() {
                Some('"') => return Ok(()),
                Some('\\') => match self.bump() {
                    Some('\n') => {}
                    Some(c @ ('"' | '\\' | '$' | '`')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => break,
                },
                Some('$') => self.expand(out)?,
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(ConfigError::ShellSyntax {
            lineno: start,
            reason: "unterminated double quote".to_string(),
        })
    }

    /// Expand a reference whose `$` was already consumed
    fn expand(&mut self, out: &mut String) -> Result<()> {
        let name = match self.peek() {
            Some('{') => {
                self.bump();
                let name = self.name();
                if self.bump() != Some('}') || name.is_empty() {
                    return Err(self.error("unsupported parameter expansion"));
                }
                name
            }
            Some(c) if is_name_char(c) && !c.is_ascii_digit() => self.name(),
            _ => {
                out.push('$');
                return Ok(());
            }
        };

        if let Some(v) = self.vars.get(&name).or_else(|| self.seed.get(&name)) {
            out.push_str(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> IndexMap<String, String> {
        parse_bash_assignments(text, &IndexMap::new()).unwrap()
    }

    #[test]
    fn test_simple_assignments() {
        let vars = parse("ARCH=amd64\n# comment\nexport CHOST=\"x86_64-pc-linux-gnu\"\n");
        assert_eq!(vars.get("ARCH").map(String::as_str), Some("amd64"));
        assert_eq!(
            vars.get("CHOST").map(String::as_str),
            Some("x86_64-pc-linux-gnu")
        );
        assert_eq!(vars.keys().collect::<Vec<_>>(), vec!["ARCH", "CHOST"]);
    }

    #[test]
    fn test_expansion() {
        let mut seed = IndexMap::new();
        seed.insert("USE".to_string(), "base".to_string());
        let vars = parse_bash_assignments(
            "CFLAGS=\"-O2 -pipe\"\nCXXFLAGS=\"${CFLAGS}\"\nUSE=\"$USE extra\"\nLIT='$CFLAGS'\n",
            &seed,
        )
        .unwrap();
        assert_eq!(vars["CXXFLAGS"], "-O2 -pipe");
        assert_eq!(vars["USE"], "base extra");
        assert_eq!(vars["LIT"], "$CFLAGS");
    }

    #[test]
    fn test_multiline_values() {
        let vars = parse("USE_EXPAND=\"ABI_X86\n\tALSA_CARDS\"\nFEATURES=a\\\nb\n");
        assert_eq!(vars["USE_EXPAND"], "ABI_X86\n\tALSA_CARDS");
        assert_eq!(vars["FEATURES"], "ab");
    }

    #[test]
    fn test_unknown_variable_expands_empty() {
        let vars = parse("A=\"x${MISSING}y\"");
        assert_eq!(vars["A"], "xy");
    }

    #[test]
    fn test_syntax_errors() {
        assert_matches!(
            parse_bash_assignments("A=\"open\nB=1\n", &IndexMap::new()),
            Err(ConfigError::ShellSyntax { lineno: 1, .. })
        );
        assert_matches!(
            parse_bash_assignments("\n\nnot an assignment\n", &IndexMap::new()),
            Err(ConfigError::ShellSyntax { lineno: 3, .. })
        );
        assert_matches!(
            parse_bash_assignments("A=${B:-c}", &IndexMap::new()),
            Err(ConfigError::ShellSyntax { .. })
        );
    }
}
