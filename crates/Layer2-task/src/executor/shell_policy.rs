//! Shell Command Policy - allow-list validation for shell tasks
//!
//! A raw command line goes through three steps before it may run:
//!
//! 1. Reject if it contains any shell metacharacter (nothing is stripped)
//! 2. Tokenize with POSIX quoting rules into `{ program, args }`
//! 3. Match the program (and any required leading args) against the allow-list
//!
//! The resulting [`ParsedCommand`] is executed directly, never through a shell.
//!
//! ```rust,ignore
//! let policy = CommandPolicy::new(["ls", "git status"])?;
//!
//! let cmd = policy.parse("git status --short")?;
//! assert_eq!(cmd.program, "git");
//!
//! assert!(policy.parse("git push").is_err());
//! assert!(policy.parse("ls; rm -rf /").is_err());
//! ```

use serde::{Deserialize, Serialize};
use taskgate_foundation::{Error, GatewayConfig, Result};
use tracing::warn;

/// Characters that make a command line something other than a single program call
pub const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '\n', '\r', '\0'];

/// A validated program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Tokenize a command line without consulting any allow-list
    pub fn tokenize(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::invalid_command("command is empty"));
        }

        if let Some(ch) = raw.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
            return Err(Error::invalid_command(format!(
                "command contains forbidden character {:?}",
                ch
            )));
        }

        let mut tokens = shlex::split(raw)
            .ok_or_else(|| Error::invalid_command("command has unbalanced quotes"))?
            .into_iter();

        let program = tokens
            .next()
            .ok_or_else(|| Error::invalid_command("command is empty"))?;

        Ok(Self {
            program,
            args: tokens.collect(),
        })
    }

    /// Render back to a display string (quoted where needed)
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|token| {
                shlex::try_quote(token)
                    .map(|quoted| quoted.into_owned())
                    .unwrap_or_else(|_| token.clone())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One allow-list entry: a program plus optional required leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowRule {
    program: String,
    leading_args: Vec<String>,
}

impl AllowRule {
    fn matches(&self, command: &ParsedCommand) -> bool {
        command.program == self.program
            && command.args.len() >= self.leading_args.len()
            && command
                .args
                .iter()
                .zip(&self.leading_args)
                .all(|(arg, required)| arg == required)
    }
}

/// Allow-list policy for shell tasks
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Vec<AllowRule>,
}

impl CommandPolicy {
    /// Build a policy from allow-list entries such as `"ls"` or `"git log"`
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = entries
            .into_iter()
            .map(|entry| {
                let entry = entry.as_ref();
                ParsedCommand::tokenize(entry)
                    .map(|parsed| AllowRule {
                        program: parsed.program,
                        leading_args: parsed.args,
                    })
                    .map_err(|e| {
                        Error::Config(format!("invalid allow-list entry '{}': {}", entry, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Self::new(&config.allowed_commands)
    }

    /// Validate a raw command line and return what will actually run
    pub fn parse(&self, raw: &str) -> Result<ParsedCommand> {
        let command = ParsedCommand::tokenize(raw).map_err(|e| {
            warn!("Rejected command {:?}: {}", raw, e);
            e
        })?;

        if self.rules.iter().any(|rule| rule.matches(&command)) {
            return Ok(command);
        }

        warn!("Rejected command {:?}: not on the allow-list", raw);
        Err(Error::invalid_command(format!(
            "'{}' is not an allowed command",
            command.program
        )))
    }

    pub fn is_allowed(&self, raw: &str) -> bool {
        self.parse(raw).is_ok()
    }

    /// Allow-list entries, normalized
    pub fn allowed_commands(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|rule| {
                std::iter::once(rule.program.as_str())
                    .chain(rule.leading_args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CommandPolicy {
        CommandPolicy::new(["ls", "pwd", "echo", "git status", "git log"]).unwrap()
    }

    #[test]
    fn test_allowed_commands_parse() {
        let policy = policy();

        let cmd = policy.parse("ls -la src").unwrap();
        assert_eq!(cmd.program, "ls");
        assert_eq!(cmd.args, vec!["-la", "src"]);

        let cmd = policy.parse("echo 'hello world'").unwrap();
        assert_eq!(cmd.args, vec!["hello world"]);

        assert!(policy.parse("git status --short").is_ok());
        assert!(policy.parse("  pwd  ").is_ok());
    }

    #[test]
    fn test_metacharacters_rejected_not_stripped() {
        let policy = policy();

        // Stripping ';' here would turn the input into an accepted "ls rm -rf /"
        for raw in [
            "ls; rm -rf /",
            "ls && whoami",
            "ls | sh",
            "echo `id`",
            "echo $(id)",
            "echo $HOME",
            "ls > out.txt",
            "ls < in.txt",
            "ls &",
            "ls\nrm -rf /",
        ] {
            let err = policy.parse(raw).unwrap_err();
            assert!(matches!(err, Error::InvalidCommand(_)), "{:?}", raw);
        }
    }

    #[test]
    fn test_metacharacters_rejected_inside_quotes() {
        assert!(policy().parse("echo 'a;b'").is_err());
    }

    #[test]
    fn test_program_identity_not_prefix() {
        let policy = policy();

        // The old prefix check would have let these through
        assert!(policy.parse("lsblk").is_err());
        assert!(policy.parse("echoo hi").is_err());
        assert!(policy.parse("/bin/ls").is_err());
        assert!(policy.parse("rm -rf /").is_err());
    }

    #[test]
    fn test_required_leading_args() {
        let policy = policy();

        assert!(policy.parse("git status").is_ok());
        assert!(policy.parse("git log --oneline").is_ok());
        assert!(policy.parse("git push").is_err());
        assert!(policy.parse("git").is_err());
    }

    #[test]
    fn test_default_policy_cannot_write_files() {
        let policy = CommandPolicy::from_config(&GatewayConfig::default()).unwrap();

        assert!(policy.parse("git status").is_ok());
        for raw in [
            "git log --output=/tmp/taskgate-written",
            "git log -p --ext-diff",
            "git diff --output=/tmp/taskgate-written",
            "tee /tmp/taskgate-written",
        ] {
            assert!(
                matches!(policy.parse(raw), Err(Error::InvalidCommand(_))),
                "default policy accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_empty_and_malformed() {
        let policy = policy();

        assert!(policy.parse("").is_err());
        assert!(policy.parse("   ").is_err());
        assert!(policy.parse("echo 'unterminated").is_err());
    }

    #[test]
    fn test_invalid_allow_list_entry() {
        let err = CommandPolicy::new(["ls", "ls; rm"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_allowed_commands_listing() {
        assert_eq!(
            policy().allowed_commands(),
            vec!["ls", "pwd", "echo", "git status", "git log"]
        );
    }

    #[test]
    fn test_display_requotes() {
        let cmd = ParsedCommand::tokenize("echo 'hello world' plain").unwrap();
        let reparsed = ParsedCommand::tokenize(&cmd.display()).unwrap();
        assert_eq!(reparsed, cmd);
        assert!(cmd.display().starts_with("echo "));
    }
}
