/// `$`-expansion of descriptor words
use crate::config::types::{LaunchError, Result};

/// Name prefixes that select host properties rather than descriptor variables
pub const HOST_PREFIXES: [&str; 6] = ["os.", "user.", "java.", "file.", "path.", "line."];

pub fn is_host_property(name: &str) -> bool {
    HOST_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Expand `$$` and `${name}` in `word`.
///
/// `lookup` resolves a name to its value; unresolved names expand to the
/// empty string. Any other use of `$` is a syntax error.
pub fn expand<F>(word: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut ret = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(p) = rest.find('$') {
        ret.push_str(&rest[..p]);
        let after = &rest[p + 1..];
        match after.chars().next() {
            Some('$') => {
                ret.push('$');
                rest = &after[1..];
            }
            Some('{') => {
                let end = after.find('}').ok_or_else(|| {
                    LaunchError::Syntax(format!("unterminated ${{ in {}", word))
                })?;
                let name = &after[1..end];
                if let Some(value) = lookup(name) {
                    ret.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            Some(c) => {
                return Err(LaunchError::Syntax(format!(
                    "unexpected `{}' after $ in {}",
                    c, word
                )))
            }
            None => return Err(LaunchError::Syntax(format!("trailing $ in {}", word))),
        }
    }
    ret.push_str(rest);
    Ok(ret)
}
