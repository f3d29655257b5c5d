//! Argument parsing utilities for built-in commands
//!
//! Built-ins receive their arguments without the command name, so every
//! helper here looks at the whole slice.

/// Result of parsing one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue<'a> {
    /// A short flag (e.g., -n)
    Flag(char),
    /// A long flag (e.g., --lines)
    LongFlag(&'a str),
    /// A positional argument
    Positional(&'a str),
    /// End of flags marker (--)
    EndOfFlags,
}

/// Sequential argument parser.
pub struct ArgParser<'a> {
    args: &'a [String],
    index: usize,
    flags_ended: bool,
}

impl<'a> ArgParser<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self {
            args,
            index: 0,
            flags_ended: false,
        }
    }

    /// Parse the next argument.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<ArgValue<'a>> {
        let arg = self.args.get(self.index)?.as_str();
        self.index += 1;

        if arg == "--" && !self.flags_ended {
            self.flags_ended = true;
            return Some(ArgValue::EndOfFlags);
        }

        // A lone "-" and negative numbers are positional.
        if !self.flags_ended && is_flag(arg) {
            if let Some(long_flag) = arg.strip_prefix("--") {
                return Some(ArgValue::LongFlag(long_flag));
            }
            if let Some(c) = arg[1..].chars().next() {
                return Some(ArgValue::Flag(c));
            }
        }

        Some(ArgValue::Positional(arg))
    }

    /// Remaining arguments, unparsed.
    pub fn remaining(&mut self) -> &'a [String] {
        let remaining = &self.args[self.index.min(self.args.len())..];
        self.index = self.args.len();
        remaining
    }

    /// Check if a flag is present, alone or combined (`-la`).
    pub fn has_flag(args: &[String], short: char, long: &str) -> bool {
        args.iter()
            .take_while(|arg| arg.as_str() != "--")
            .filter(|arg| is_flag(arg))
            .any(|arg| match arg.strip_prefix("--") {
                Some(name) => name == long,
                None => arg[1..].contains(short),
            })
    }

    /// Arguments that are not flags.
    pub fn positional_args(args: &[String]) -> Vec<&str> {
        let mut parser = ArgParser::new(args);
        let mut positional = Vec::new();
        while let Some(value) = parser.next() {
            if let ArgValue::Positional(arg) = value {
                positional.push(arg);
            }
        }
        positional
    }
}

fn is_flag(arg: &str) -> bool {
    arg.len() > 1
        && arg.starts_with('-')
        && !arg[1..].starts_with(|c: char| c.is_ascii_digit())
}

/// Whether `name` is a valid variable or alias name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `NAME=value` at the first `=`.
pub fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    arg.split_once('=')
}

/// Quote a value for display when it would not survive re-parsing.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() || s.contains(|c: char| c.is_whitespace() || "'\"$|&<>\\".contains(c)) {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_arg_parser() {
        let args = make_args(&["-n", "--verbose", "file.txt", "--", "-x"]);
        let mut parser = ArgParser::new(&args);

        assert_eq!(parser.next(), Some(ArgValue::Flag('n')));
        assert_eq!(parser.next(), Some(ArgValue::LongFlag("verbose")));
        assert_eq!(parser.next(), Some(ArgValue::Positional("file.txt")));
        assert_eq!(parser.next(), Some(ArgValue::EndOfFlags));
        assert_eq!(parser.next(), Some(ArgValue::Positional("-x")));
        assert_eq!(parser.next(), None);
    }

    #[test]
    fn test_has_flag() {
        let args = make_args(&["-rf", "dir", "--", "-v"]);

        assert!(ArgParser::has_flag(&args, 'r', "recursive"));
        assert!(ArgParser::has_flag(&args, 'f', "force"));
        assert!(!ArgParser::has_flag(&args, 'v', "verbose"));
    }

    #[test]
    fn test_negative_numbers_are_positional() {
        let args = make_args(&["-5", "-"]);
        assert_eq!(ArgParser::positional_args(&args), vec!["-5", "-"]);
    }

    #[test]
    fn test_names_and_escape() {
        assert!(is_valid_name("PATH"));
        assert!(is_valid_name("_x1"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));

        assert_eq!(shell_escape("plain"), "plain");
        assert_eq!(shell_escape("two words"), "'two words'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(split_assignment("A=b=c"), Some(("A", "b=c")));
    }
}
