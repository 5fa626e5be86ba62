use std::path::PathBuf;

use bg_core::models::TrafficMode;
use bg_core::services::config_loader::DEFAULT_CONFIG_FILENAME;

pub const USAGE: &str = "\
usage: bg-daemon [--config <path>] [--debug] [--log-file <path>] <command>

commands:
  serve                               read push events from stdin, one JSON object per line
  deploy <repository-url> <ref> <sha> run a single deployment
  status                              show the live slot of every service
  help                                print this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Deploy {
        repository_url: String,
        git_ref: String,
        commit_sha: String,
    },
    Status,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: PathBuf,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    pub command: Command,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("no command given")]
    MissingCommand,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown flag '{0}'")]
    UnknownFlag(String),

    #[error("flag '{0}' needs a value")]
    MissingValue(&'static str),

    #[error("'{command}' expects {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("'deploy' cannot keep the forwarder listening after it exits; use 'serve' or traffic: iptables")]
    ForwarderNeedsServe,
}

/// One-shot deploys exit right after the cutover, which would close an
/// in-process forwarder with them.
pub fn ensure_one_shot_supported(effective_mode: TrafficMode) -> Result<(), UsageError> {
    match effective_mode {
        TrafficMode::Forwarder => Err(UsageError::ForwarderNeedsServe),
        _ => Ok(()),
    }
}

/// Parse arguments, excluding the program name.
pub fn parse<I>(args: I) -> Result<Cli, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from(DEFAULT_CONFIG_FILENAME);
    let mut debug = false;
    let mut log_file = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = args
                    .next()
                    .map(PathBuf::from)
                    .ok_or(UsageError::MissingValue("--config"))?;
            }
            "--log-file" => {
                log_file = Some(
                    args.next()
                        .map(PathBuf::from)
                        .ok_or(UsageError::MissingValue("--log-file"))?,
                );
            }
            "--debug" => debug = true,
            "--help" | "-h" => positional.insert(0, "help".to_string()),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(UsageError::UnknownFlag(arg));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional.next().ok_or(UsageError::MissingCommand)?;
    let rest: Vec<String> = positional.collect();

    let command = match name.as_str() {
        "serve" => {
            expect_arity("serve", &rest, 0)?;
            Command::Serve
        }
        "status" => {
            expect_arity("status", &rest, 0)?;
            Command::Status
        }
        "help" => Command::Help,
        "deploy" => {
            expect_arity("deploy", &rest, 3)?;
            let mut rest = rest.into_iter();
            Command::Deploy {
                repository_url: rest.next().unwrap_or_default(),
                git_ref: rest.next().unwrap_or_default(),
                commit_sha: rest.next().unwrap_or_default(),
            }
        }
        _ => return Err(UsageError::UnknownCommand(name)),
    };

    Ok(Cli {
        config,
        debug,
        log_file,
        command,
    })
}

fn expect_arity(command: &'static str, rest: &[String], expected: usize) -> Result<(), UsageError> {
    if rest.len() == expected {
        Ok(())
    } else {
        Err(UsageError::WrongArity {
            command,
            expected,
            got: rest.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn serve_with_defaults() {
        let cli = parse(args("serve")).unwrap();
        assert_eq!(cli.command, Command::Serve);
        assert_eq!(cli.config, PathBuf::from("bluegreen.yaml"));
        assert!(!cli.debug);
        assert_eq!(cli.log_file, None);
    }

    #[test]
    fn flags_anywhere() {
        let cli = parse(args("status --debug --config /etc/bg.yaml --log-file /tmp/bg.log")).unwrap();
        assert_eq!(cli.command, Command::Status);
        assert!(cli.debug);
        assert_eq!(cli.config, PathBuf::from("/etc/bg.yaml"));
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/bg.log")));
    }

    #[test]
    fn deploy_takes_three_arguments() {
        let cli = parse(args("deploy https://example.com/api.git refs/heads/main abc123")).unwrap();
        assert_eq!(
            cli.command,
            Command::Deploy {
                repository_url: "https://example.com/api.git".into(),
                git_ref: "refs/heads/main".into(),
                commit_sha: "abc123".into(),
            }
        );

        assert_eq!(
            parse(args("deploy https://example.com/api.git")),
            Err(UsageError::WrongArity {
                command: "deploy",
                expected: 3,
                got: 1
            })
        );
    }

    #[test]
    fn usage_errors() {
        assert_eq!(parse(Vec::new()), Err(UsageError::MissingCommand));
        assert_eq!(
            parse(args("rollback")),
            Err(UsageError::UnknownCommand("rollback".into()))
        );
        assert_eq!(
            parse(args("serve --verbose")),
            Err(UsageError::UnknownFlag("--verbose".into()))
        );
        assert_eq!(
            parse(args("serve --config")),
            Err(UsageError::MissingValue("--config"))
        );
    }

    #[test]
    fn one_shot_deploy_needs_kernel_rules() {
        assert_eq!(
            ensure_one_shot_supported(TrafficMode::Forwarder),
            Err(UsageError::ForwarderNeedsServe)
        );
        assert_eq!(ensure_one_shot_supported(TrafficMode::Iptables), Ok(()));
    }

    #[test]
    fn help_flag_wins() {
        assert_eq!(parse(args("serve --help")).unwrap().command, Command::Help);
        assert_eq!(parse(args("-h")).unwrap().command, Command::Help);
    }
}
