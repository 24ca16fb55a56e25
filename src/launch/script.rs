/// Re-run scripts recording the final launch command
use crate::config::types::{LaunchError, Result};
use std::fs;
use std::path::{Path, PathBuf};

fn sh_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn bat_quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '&', '|', '<', '>', '^']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\"\""))
}

/// Script body for `argv`; extra arguments given to the script are appended.
pub fn render(argv: &[String], windows: bool) -> String {
    if windows {
        let line: Vec<String> = argv.iter().map(|a| bat_quote(a)).collect();
        format!("@echo off\r\n{} %*\r\n", line.join(" "))
    } else {
        let line: Vec<String> = argv.iter().map(|a| sh_quote(a)).collect();
        format!("#!/bin/sh\nexec {} \"$@\"\n", line.join(" "))
    }
}

/// Write `<dir>/<name>` (`.bat` appended on Windows).
pub fn write_command_file(dir: &Path, name: &str, argv: &[String]) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(LaunchError::Usage(format!(
            "command-file name must be a plain file name: {}",
            name
        )));
    }
    let windows = cfg!(windows);
    let path = if windows {
        dir.join(format!("{}.bat", name))
    } else {
        dir.join(name)
    };
    fs::write(&path, render(argv, windows))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}
