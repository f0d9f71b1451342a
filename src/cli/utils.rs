use serde_json::{json, Value};
use std::io::{BufRead, Write};

use crate::cli::OutputFormat;
use crate::database::models::Task;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });
            if let Some(data_value) = data {
                response["data"] = data_value;
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(output_format: &OutputFormat, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "success": false,
                    "message": message
                }))?
            );
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Output a task listing, newest first as given
pub fn output_tasks(output_format: &OutputFormat, tasks: &[Task]) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "tasks": tasks }))?);
        }
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in tasks {
                println!("{}", task_line(task));
            }
        }
    }
    Ok(())
}

pub fn task_line(task: &Task) -> String {
    let mut line = format!(
        "#{} [{}] {}: {} ({})",
        task.id,
        task.created_at.format("%Y-%m-%d %H:%M:%S"),
        task.title,
        task.description,
        task.email
    );
    if let Some(url) = &task.image_url {
        line.push_str(&format!(" <{}>", url));
    }
    line
}

/// Password from `CRUDCTL_PASSWORD` when set, else one line from `input`
/// after a prompt on stderr. Never taken from the command line.
pub fn read_password(from_env: Option<String>, input: &mut impl BufRead) -> anyhow::Result<String> {
    if let Some(password) = from_env.filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("No password given (set CRUDCTL_PASSWORD or type it at the prompt)");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn task_line_includes_image() {
        let task = Task {
            id: 3,
            title: "Feed owl".to_string(),
            description: "Hedwig".to_string(),
            email: "harry@hogwarts".to_string(),
            image_url: Some("http://x/owl.png-1".to_string()),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        };
        assert_eq!(
            task_line(&task),
            "#3 [1970-01-01 00:00:00] Feed owl: Hedwig (harry@hogwarts) <http://x/owl.png-1>"
        );
    }

    #[test]
    fn password_prefers_environment() {
        let mut input = std::io::Cursor::new("typed\n");
        assert_eq!(read_password(Some("from-env".to_string()), &mut input).unwrap(), "from-env");
    }

    #[test]
    fn password_falls_back_to_prompt() {
        let mut input = std::io::Cursor::new("s3cret pass\r\n");
        assert_eq!(read_password(None, &mut input).unwrap(), "s3cret pass");

        let mut empty = std::io::Cursor::new("");
        assert!(read_password(Some(String::new()), &mut empty).is_err());
    }
}
