//! taskgate CLI - Main entry point

mod api;
mod commands;
mod init;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskgate_foundation::{ServerConfig, TaskgateConfig};
use taskgate_task::TaskGateway;

/// taskgate - run allow-listed commands and browser tasks under supervision
#[derive(Parser, Debug)]
#[command(name = "taskgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Read configuration from this file instead of the global/project stores
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeArgs),
    /// Run a single command through the gateway and print its output
    Run {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Check whether a command would be accepted
    Check {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Write the default configuration to ./.taskgate/config.json
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Server settings that override the config file (flag, then environment)
#[derive(clap::Args, Debug, Clone, Default)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "TASKGATE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Allowed CORS origin
    #[arg(long, env = "CORS_ORIGIN")]
    cors_origin: Option<String>,

    /// Request body limit: bytes, or a size such as 512kb or 10mb
    #[arg(long, env = "MAX_REQUEST_SIZE", value_parser = parse_byte_size)]
    max_request_size: Option<usize>,

    /// Directory for rolling log files
    #[arg(long, env = "TASKGATE_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, server: &mut ServerConfig) {
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(origin) = &self.cors_origin {
            server.cors_origin = Some(origin.clone());
        }
        if let Some(limit) = self.max_request_size {
            server.max_request_bytes = limit;
        }
        if let Some(dir) = &self.log_dir {
            server.log_dir = Some(dir.clone());
        }
    }
}

/// Parse `1048576`, `512kb`, `10mb` or `1gb` (binary multiples)
fn parse_byte_size(raw: &str) -> Result<usize, String> {
    let lower = raw.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", raw))?;
    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        other => return Err(format!("unknown size unit '{}'", other)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut config = match &args.command {
        Command::Init { .. } => TaskgateConfig::default(),
        _ => load_config(args.config.as_deref())?,
    };

    let log_dir = match &args.command {
        Command::Serve(overrides) => {
            overrides.apply(&mut config.server);
            config.validate()?;
            config.server.log_dir.clone()
        }
        _ => None,
    };

    // Guards flush the file logs on exit
    let _guards = logging::init(args.debug, log_dir.as_deref())?;

    match args.command {
        Command::Serve(_) => {
            let gateway = TaskGateway::new(config.gateway)?;
            api::serve(gateway, &config.server).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { command } => {
            let command = commands::join_words(&command)?;
            let gateway = TaskGateway::new(config.gateway)?;
            let code = commands::run(&gateway, command).await?;
            Ok(ExitCode::from(code))
        }
        Command::Check { command } => {
            let command = commands::join_words(&command)?;
            let gateway = TaskGateway::new(config.gateway)?;
            if commands::check(gateway.policy(), &command) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Init { force } => {
            init::init_project(Path::new("."), force)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TaskgateConfig> {
    let config = match path {
        Some(path) => TaskgateConfig::load_from(path)?,
        None => TaskgateConfig::load()?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let mut full = vec!["taskgate", "serve"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Command::Serve(serve) => serve,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1048576"), Ok(1_048_576));
        assert_eq!(parse_byte_size("512kb"), Ok(512 * 1024));
        assert_eq!(parse_byte_size("10MB"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_byte_size(" 2 gb "), Ok(2 << 30));
        assert!(parse_byte_size("mb").is_err());
        assert!(parse_byte_size("10tb").is_err());
        assert!(parse_byte_size("-1").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = serve_args(&[
            "--port",
            "9100",
            "--cors-origin",
            "https://app.example.com",
            "--max-request-size",
            "64kb",
            "--log-dir",
            "/tmp/taskgate-logs",
        ]);

        let mut server = ServerConfig::default();
        args.apply(&mut server);

        assert_eq!(server.port, 9100);
        assert_eq!(server.cors_origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(server.max_request_bytes, 64 * 1024);
        assert_eq!(server.log_dir, Some(PathBuf::from("/tmp/taskgate-logs")));
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_config() {
        // Only this test touches these variables
        std::env::set_var("PORT", "9200");
        std::env::set_var("CORS_ORIGIN", "https://env.example.com");
        std::env::set_var("MAX_REQUEST_SIZE", "2mb");

        let from_env = serve_args(&[]);
        let flag_wins = serve_args(&["--port", "9300"]);

        std::env::remove_var("PORT");
        std::env::remove_var("CORS_ORIGIN");
        std::env::remove_var("MAX_REQUEST_SIZE");

        let mut server = ServerConfig::default();
        from_env.apply(&mut server);
        assert_eq!(server.port, 9200);
        assert_eq!(server.cors_origin.as_deref(), Some("https://env.example.com"));
        assert_eq!(server.max_request_bytes, 2 * 1024 * 1024);

        assert_eq!(flag_wins.port, Some(9300));
    }

    #[test]
    fn test_unset_overrides_keep_config() {
        let mut server = ServerConfig {
            port: 9400,
            ..ServerConfig::default()
        };
        ServeArgs::default().apply(&mut server);
        assert_eq!(server.port, 9400);
    }
}
