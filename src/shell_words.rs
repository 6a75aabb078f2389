use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellWordsError {
    #[error("unterminated quote in command")]
    UnterminatedQuote,
    #[error("dangling escape at end of command")]
    DanglingEscape,
}

// Commands a shell runs in-process, there is no binary to spawn
const SHELL_BUILTINS: &[&str] = &[
    "cd", "export", "unset", "source", ".", "alias", "unalias", "set", "shopt", "umask", "ulimit",
    "exec", "eval", "exit", "read", "type", "hash", "history", "builtin", "let", "declare",
    "local", "readonly", "pushd", "popd", "dirs", "wait", "jobs", "fg", "bg", "disown", "trap",
];

// Characters whose meaning requires a real shell when found outside quotes
const SHELL_METACHARACTERS: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '*', '?', '[', ']', '{', '}', '~', '#', '\n',
];

/// Splits a command line into words using POSIX shell quoting rules.
///
/// Single quotes are literal, double quotes honour `\"`, `\\`, `\$` and
/// `` \` `` escapes, a bare backslash escapes the next character.
pub fn split(input: &str) -> Result<Vec<String>, ShellWordsError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ShellWordsError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some('\n') => {}
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(ShellWordsError::UnterminatedQuote),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ShellWordsError::UnterminatedQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(ch) => {
                    in_word = true;
                    current.push(ch);
                }
                None => return Err(ShellWordsError::DanglingEscape),
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// True when the command uses pipes, redirections, substitutions, globs or
/// command lists, which only a shell can evaluate.
pub fn needs_shell(input: &str) -> bool {
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                for ch in chars.by_ref() {
                    if ch == '\'' {
                        break;
                    }
                }
            }
            '"' => {
                while let Some(ch) = chars.next() {
                    match ch {
                        '"' => break,
                        // Substitutions still expand inside double quotes
                        '$' | '`' => return true,
                        '\\' => {
                            chars.next();
                        }
                        _ => {}
                    }
                }
            }
            '\\' => {
                chars.next();
            }
            c if SHELL_METACHARACTERS.contains(&c) => return true,
            _ => {}
        }
    }
    false
}

/// True for a `NAME=value` word, which a shell reads as an assignment.
pub fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            let mut chars = name.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
                && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

pub fn is_builtin(word: &str) -> bool {
    SHELL_BUILTINS.contains(&word)
}

/// Argument vector for a command that can run without a shell, `None` when
/// the command needs one or is malformed. Builtins and leading variable
/// assignments need a shell too.
pub fn to_argv(input: &str) -> Option<Vec<String>> {
    if needs_shell(input) {
        return None;
    }
    match split(input) {
        Ok(words) if !words.is_empty() => {
            if is_assignment(&words[0]) || is_builtin(&words[0]) {
                return None;
            }
            Some(words)
        }
        _ => None,
    }
}

/// Quotes a word so that a POSIX shell reads it back verbatim.
pub fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_quotes() {
        assert_eq!(
            split(r#"apt install -y "vlc player" 'a b' c\ d"#).unwrap(),
            vec!["apt", "install", "-y", "vlc player", "a b", "c d"]
        );
        assert_eq!(split(r#"echo "say \"hi\"""#).unwrap(), vec!["echo", r#"say "hi""#]);
        assert_eq!(split("echo ''").unwrap(), vec!["echo", ""]);
        assert!(split("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_errors() {
        assert_eq!(split("echo 'open"), Err(ShellWordsError::UnterminatedQuote));
        assert_eq!(split("echo \"open"), Err(ShellWordsError::UnterminatedQuote));
        assert_eq!(split("echo \\"), Err(ShellWordsError::DanglingEscape));
    }

    #[test]
    fn test_needs_shell() {
        assert!(!needs_shell("apt install -y vlc"));
        assert!(!needs_shell("echo 'a | b; c'"));
        assert!(needs_shell("apt update && apt upgrade -y"));
        assert!(needs_shell("ls | grep x"));
        assert!(needs_shell("echo $(whoami)"));
        assert!(needs_shell("echo \"$HOME\""));
        assert!(needs_shell("rm -rf /tmp/*"));
        assert!(!needs_shell(r"echo a\;b"));
    }

    #[test]
    fn test_to_argv() {
        assert_eq!(
            to_argv("systemctl restart nginx"),
            Some(vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "nginx".to_string()
            ])
        );
        assert_eq!(to_argv("a && b"), None);
        assert_eq!(to_argv(""), None);
        assert_eq!(to_argv("echo 'open"), None);
    }

    #[test]
    fn test_builtins_and_assignments_need_a_shell() {
        assert_eq!(to_argv("cd /var/log"), None);
        assert_eq!(to_argv("export X=1"), None);
        assert_eq!(to_argv("LANG=C apt list --upgradable"), None);
        assert_eq!(to_argv("_X1=a env"), None);
        assert!(to_argv("grep -r key=value /etc").is_some());
        assert!(to_argv("dd if=/dev/zero of=out count=1").is_some());

        assert!(is_assignment("LANG=C"));
        assert!(!is_assignment("1X=a"));
        assert!(!is_assignment("=a"));
        assert!(!is_assignment("a-b=c"));
        assert!(is_builtin("cd"));
        assert!(!is_builtin("ls"));
    }

    #[test]
    fn test_quote_round_trips() {
        for word in ["plain", "with space", "it's", "", "$HOME", "a\"b"] {
            let quoted = quote(word);
            assert_eq!(split(&quoted).unwrap(), vec![word.to_string()], "{}", quoted);
        }
        assert_eq!(quote("tuxpilot_abc-1"), "tuxpilot_abc-1");
    }
}
