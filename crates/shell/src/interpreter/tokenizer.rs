//! Command line tokenizer
//!
//! Splits on spaces outside double quotes. Quotes group words and are
//! stripped, tabs count as spaces, and a newline or carriage return ends the
//! line.

use thiserror::Error;

/// Default cap on tokens per line; lines must stay strictly below it
pub const DEFAULT_MAX_ARGS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error(
        "Command exceeds argument limit of {}.\n\
         If you need to pass in a long sequence of bytes,\n \
         try placing quotes around the sequence, eg. \"81 00 51 01\"",
        .max_args - 1
    )]
    TooManyArgs { max_args: usize },
}

/// Split `line` into tokens
///
/// A line producing `max_args` tokens or more is rejected as a whole.
pub fn tokenize(line: &str, max_args: usize) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    // set once a quote opens, so `""` still yields an (empty) token
    let mut pending = false;

    for c in line.chars() {
        match c {
            '\n' | '\r' => break,
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            ' ' | '\t' if !quoted => {
                if pending || !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            '\t' => current.push(' '),
            c => current.push(c),
        }
    }
    if pending || !current.is_empty() {
        tokens.push(current);
    }

    if tokens.len() >= max_args {
        return Err(TokenizeError::TooManyArgs { max_args });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<String> {
        tokenize(line, DEFAULT_MAX_ARGS).unwrap()
    }

    #[test]
    fn test_splits_on_whitespace() {
        assert_eq!(toks("bulk 81 64"), vec!["bulk", "81", "64"]);
        assert_eq!(toks("  bulk\t81   64  "), vec!["bulk", "81", "64"]);
        assert!(toks("").is_empty());
        assert!(toks("   \t").is_empty());
    }

    #[test]
    fn test_quotes_group_and_are_stripped() {
        assert_eq!(
            toks("ctrl 40 1 0 0 \"81 00 51 01\""),
            vec!["ctrl", "40", "1", "0", "0", "81 00 51 01"]
        );
        assert_eq!(toks("list \"id >= 7 <= 10\""), vec!["list", "id >= 7 <= 10"]);
        assert_eq!(toks("a\"b c\"d"), vec!["ab cd"]);
        assert_eq!(toks("save \"\""), vec!["save", ""]);
    }

    #[test]
    fn test_tab_inside_quotes_becomes_space() {
        assert_eq!(toks("list \"id\t=\t1\""), vec!["list", "id = 1"]);
    }

    #[test]
    fn test_end_of_line_stops() {
        assert_eq!(toks("list id=1\nexit"), vec!["list", "id=1"]);
        assert_eq!(toks("help\r\n"), vec!["help"]);
    }

    #[test]
    fn test_argument_limit() {
        let ok = vec!["x"; DEFAULT_MAX_ARGS - 1].join(" ");
        assert_eq!(toks(&ok).len(), DEFAULT_MAX_ARGS - 1);

        let too_many = vec!["x"; DEFAULT_MAX_ARGS].join(" ");
        let err = tokenize(&too_many, DEFAULT_MAX_ARGS).unwrap_err();
        assert_eq!(err, TokenizeError::TooManyArgs { max_args: DEFAULT_MAX_ARGS });
        assert!(err.to_string().starts_with("Command exceeds argument limit of 31."));
    }
}
