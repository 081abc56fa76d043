//! Parsing of a project's step configuration text.

/// Starts a comment, either on its own line or trailing a command.
pub const COMMENT_MARKER: char = '#';

/// Split step text into the commands that will actually run.
///
/// Blank lines and lines whose first non-whitespace character is the comment
/// marker are dropped. On the remaining lines everything from the first
/// comment marker onwards is cut off.
pub fn parse_steps(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_start)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .map(|line| match line.find(COMMENT_MARKER) {
            Some(idx) => line[..idx].trim_end(),
            None => line.trim_end(),
        })
        .filter(|command| !command.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_comments_and_blank_lines() {
        let commands = parse_steps("command1\ncommand2 #not3\n#not4\n     #not5\n");
        assert_eq!(commands, vec!["command1", "command2"]);
    }

    #[test]
    fn test_keeps_order() {
        let commands = parse_steps("git diff file\necho 'lol'");
        assert_eq!(commands, vec!["git diff file", "echo 'lol'"]);
    }

    #[test]
    fn test_crlf_and_whitespace() {
        let commands = parse_steps("  make build  \r\n\r\n\tmake test\r\n");
        assert_eq!(commands, vec!["make build", "make test"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(parse_steps("").is_empty());
        assert!(parse_steps("\n   \n# only comments\n").is_empty());
    }
}
