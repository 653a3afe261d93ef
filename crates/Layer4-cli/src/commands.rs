//! One-shot commands: `run` and `check`

use taskgate_task::{CommandPolicy, TaskGateway, TaskRequest, TaskResult, TaskStatus};
use tracing::info;

/// Join CLI words back into a single command line, quoting where needed
pub fn join_words(words: &[String]) -> anyhow::Result<String> {
    shlex::try_join(words.iter().map(String::as_str))
        .map_err(|e| anyhow::anyhow!("cannot quote command: {}", e))
}

/// Submit a command, wait for it and mirror its output; returns the exit status
///
/// Ctrl-C cancels the task.
pub async fn run(gateway: &TaskGateway, command: String) -> anyhow::Result<u8> {
    let task_id = gateway.submit(TaskRequest::Command(command))?;

    let task = tokio::select! {
        task = gateway.wait(task_id, None) => task?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling task {}", task_id);
            gateway.cancel(task_id).await?
        }
    };

    match &task.result {
        Some(TaskResult::Shell { stdout, stderr, .. }) => {
            print!("{}", stdout);
            eprint!("{}", stderr);
        }
        Some(TaskResult::Browser { data }) => println!("{}", serde_json::to_string_pretty(data)?),
        None => {}
    }

    if let Some(failure) = &task.failure {
        eprintln!("✗ {:?}: {}", failure.reason, failure.message);
    }

    let code = match (task.status, &task.result) {
        (TaskStatus::Completed, _) => 0,
        (
            TaskStatus::Failed,
            Some(TaskResult::Shell {
                exit_code: Some(code),
                ..
            }),
        ) => u8::try_from(*code).unwrap_or(1),
        (TaskStatus::Cancelled, _) => 130,
        _ => 1,
    };
    Ok(code)
}

/// Report whether the policy accepts a command and how it is parsed
pub fn check(policy: &CommandPolicy, command: &str) -> bool {
    match policy.parse(command) {
        Ok(parsed) => {
            println!("✓ allowed");
            println!("  program: {}", parsed.program);
            for (i, arg) in parsed.args.iter().enumerate() {
                println!("  arg[{}]: {}", i, arg);
            }
            true
        }
        Err(e) => {
            println!("✗ rejected: {}", e);
            false
        }
    }
}
