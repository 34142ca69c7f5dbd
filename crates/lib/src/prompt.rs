//! System prompt for the local model.
//!
//! The prompt tells the model which actuator actions exist and how to wrap a command.
//! It is separate from config so users can edit it as plain text (SYSTEM.md).

use std::fs;
use std::path::Path;

/// Bundled default, also written to SYSTEM.md by `courier init`.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../config/SYSTEM.md");

/// File name of the user-editable prompt in the config directory.
pub const SYSTEM_PROMPT_FILE: &str = "SYSTEM.md";

/// Load SYSTEM.md from the config directory.
///
/// Returns the file contents when it exists and is non-empty; otherwise None.
pub fn load_system_prompt(config_dir: &Path) -> Option<String> {
    let path = config_dir.join(SYSTEM_PROMPT_FILE);
    match fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_teaches_the_command_tag() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains(crate::command::COMMAND_OPEN));
        assert!(DEFAULT_SYSTEM_PROMPT.contains(crate::command::COMMAND_CLOSE));
    }

    #[test]
    fn bundled_examples_parse_as_commands() {
        let first = DEFAULT_SYSTEM_PROMPT
            .lines()
            .find(|l| l.starts_with(crate::command::COMMAND_OPEN))
            .unwrap();
        let cmd = crate::command::extract(first).unwrap().unwrap();
        assert_eq!(cmd.name, "set_alarm");
    }

    #[test]
    fn missing_or_blank_file_is_none() {
        let dir = std::env::temp_dir().join(format!("courier-prompt-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(load_system_prompt(&dir), None);
        fs::write(dir.join(SYSTEM_PROMPT_FILE), "  \n").unwrap();
        assert_eq!(load_system_prompt(&dir), None);
        fs::write(dir.join(SYSTEM_PROMPT_FILE), "custom").unwrap();
        assert_eq!(load_system_prompt(&dir).as_deref(), Some("custom"));
        let _ = fs::remove_dir_all(&dir);
    }
}
