//! POSIX shell quoting for remote snippets

/// Quote a string for safe interpolation into a remote shell command.
///
/// Wraps the value in single quotes and escapes embedded single quotes with
/// the `'\''` idiom.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
