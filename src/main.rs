// tutor-ai diagnostic binary.
// Classifies failures, runs hint requests, and reports cache stats from the shell.

use std::process::ExitCode;

use serde::Serialize;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

use tutor_ai::backend::HintRequest;
use tutor_ai::classify::{RawError, parse_error};
use tutor_ai::{AiService, Config, Result};

const USAGE: &str = "usage:
  tutor-ai classify <status> [retry-after]
  tutor-ai hint <course> <question...>
  tutor-ai cache-stats";

enum Command {
    Classify { status: u16, retry_after: Option<String> },
    Hint { course: String, question: String },
    CacheStats,
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args.first()?.as_str() {
        "classify" => Some(Command::Classify {
            status: args.get(1)?.parse().ok()?,
            retry_after: args.get(2).cloned(),
        }),
        "hint" => {
            let course = args.get(1)?.clone();
            let question = args.get(2..)?.join(" ");
            if question.trim().is_empty() {
                return None;
            }
            Some(Command::Hint { course, question })
        }
        "cache-stats" => Some(Command::CacheStats),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("TUTOR_AI_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Classify {
            status,
            retry_after,
        } => {
            let raw = RawError::Http {
                status,
                retry_after,
                body: None,
                message: format!("HTTP {}", status),
            };
            print_json(&parse_error(&raw))
        }
        Command::Hint { course, question } => {
            let service = AiService::from_config(&Config::load()?)?;
            let state = service
                .hint(HintRequest {
                    course_id: course,
                    question_id: "cli".to_string(),
                    question,
                    attempt: None,
                    level: 1,
                })
                .await;
            print_json(&state)
        }
        Command::CacheStats => {
            let service = AiService::from_config(&Config::load()?)?;
            print_json(&service.cache().summary())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
