use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld HTTP API
    #[arg(long, default_value = "http://127.0.0.1:5000", env = "ROLLCALL_SERVER")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status and enrolled face count
    Status,
    /// Add or update an employee roster entry
    Add {
        /// Employee code
        code: String,
        /// Full name
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        department: Option<String>,
        #[arg(short, long)]
        position: Option<String>,
    },
    /// Enroll a reference photo for an employee
    Enroll {
        /// Employee code
        code: String,
        /// Path to the photo file
        photo: PathBuf,
    },
    /// Submit an attendance photo
    Check {
        /// Path to the photo file
        photo: PathBuf,
        /// Optional identity hint; a different recognition is refused
        #[arg(short, long)]
        employee: Option<String>,
    },
    /// Screen a photo without recording anything
    Verify {
        /// Path to the photo file
        photo: PathBuf,
    },
    /// Identify the face in a photo without recording attendance
    Recognize {
        /// Path to the photo file
        photo: PathBuf,
    },
    /// Monthly attendance statistics for an employee
    Stats {
        /// Employee code
        code: String,
        #[arg(short, long)]
        month: Option<u32>,
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// List enrolled employees
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Status => {
            let body = get_json(&client, &format!("{server}/api/health")).await?;
            println!(
                "rollcalld: {} ({} enrolled)",
                body["status"].as_str().unwrap_or("unknown"),
                body["enrolled_count"]
            );
        }
        Commands::Add {
            code,
            name,
            department,
            position,
        } => {
            let body = post_json(
                &client,
                &format!("{server}/api/employees"),
                &json!({
                    "code": code,
                    "full_name": name,
                    "department": department,
                    "position": position,
                }),
            )
            .await?;
            println!("added {} ({})", body["code"], body["full_name"]);
        }
        Commands::Enroll { code, photo } => {
            let body = post_json(
                &client,
                &format!("{server}/api/enroll"),
                &json!({ "employee_code": code, "photo": read_photo(&photo)? }),
            )
            .await?;
            println!(
                "enrolled {} -> {}",
                code,
                body["face_photo"].as_str().unwrap_or("?")
            );
        }
        Commands::Check { photo, employee } => {
            let body = post_json(
                &client,
                &format!("{server}/api/attendance/check"),
                &json!({ "photo": read_photo(&photo)?, "employee_code": employee }),
            )
            .await?;
            print_outcome(&body);
        }
        Commands::Verify { photo } => {
            let body = post_json(
                &client,
                &format!("{server}/api/verify-photo"),
                &json!({ "photo": read_photo(&photo)? }),
            )
            .await?;
            if body["valid"].as_bool() == Some(true) {
                println!(
                    "ok: 1 face, confidence {:.2}",
                    body["confidence"].as_f64().unwrap_or(0.0)
                );
            } else {
                println!("rejected: {}", body["reason"].as_str().unwrap_or("?"));
            }
        }
        Commands::Recognize { photo } => {
            let body = post_json(
                &client,
                &format!("{server}/api/recognize"),
                &json!({ "photo": read_photo(&photo)? }),
            )
            .await?;
            if body["recognized"].as_bool() == Some(true) {
                println!(
                    "{} ({}) confidence {:.2}",
                    body["employee_code"].as_str().unwrap_or("?"),
                    body["full_name"].as_str().unwrap_or("?"),
                    body["confidence"].as_f64().unwrap_or(0.0),
                );
            } else if let Some(reason) = body["reason"].as_str() {
                println!("not recognized: {reason}");
            } else {
                println!("not recognized");
            }
        }
        Commands::Stats { code, month, year } => {
            let mut url = format!("{server}/api/attendance/stats/{code}?");
            if let Some(m) = month {
                url.push_str(&format!("month={m}&"));
            }
            if let Some(y) = year {
                url.push_str(&format!("year={y}"));
            }
            let body = get_json(&client, &url).await?;
            let stats = &body["stats"];
            println!("{} {}-{:02}", code, body["year"], body["month"]);
            println!("  present:  {}", stats["present_days"]);
            println!("  late:     {}", stats["late_days"]);
            println!("  absent:   {}", stats["absent_days"]);
            println!("  hours:    {:.1}", stats["total_hours"].as_f64().unwrap_or(0.0));
            println!(
                "  overtime: {:.1}",
                stats["total_overtime"].as_f64().unwrap_or(0.0)
            );
        }
        Commands::List => {
            let body = get_json(&client, &format!("{server}/api/employees")).await?;
            let Some(employees) = body.as_array() else {
                bail!("unexpected response: {body}");
            };
            if employees.is_empty() {
                println!("no enrolled employees");
            }
            for e in employees {
                println!(
                    "{}  {}  {}",
                    e["code"].as_str().unwrap_or("?"),
                    e["full_name"].as_str().unwrap_or("?"),
                    e["department"].as_str().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

fn read_photo(path: &PathBuf) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading photo {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let response = client.get(url).send().await.context("request failed")?;
    into_json(response).await
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<Value> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .context("request failed")?;
    into_json(response).await
}

async fn into_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("invalid response body")?;
    if !status.is_success() {
        bail!(
            "server returned {status}: {}",
            body["error"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(body)
}

fn print_outcome(body: &Value) {
    match body["outcome"].as_str().unwrap_or("?") {
        "checked_in" => {
            let record = &body["record"];
            println!(
                "checked in {} at {} ({}, {} min late)",
                record["employee_code"].as_str().unwrap_or("?"),
                record["check_in"].as_str().unwrap_or("?"),
                record["status"].as_str().unwrap_or("?"),
                record["late_minutes"],
            );
        }
        "checked_out" => {
            let record = &body["record"];
            println!(
                "checked out {} at {} ({:.1}h worked, {:.1}h overtime)",
                record["employee_code"].as_str().unwrap_or("?"),
                record["check_out"].as_str().unwrap_or("?"),
                record["worked_hours"].as_f64().unwrap_or(0.0),
                record["overtime_hours"].as_f64().unwrap_or(0.0),
            );
        }
        "no_face_detected" => println!("rejected: {}", body["reason"].as_str().unwrap_or("?")),
        "gallery_empty" => println!("rejected: no reference faces enrolled"),
        "no_match" => println!("rejected: face not recognized"),
        "identity_mismatch" => println!(
            "rejected: recognized {} but expected {}",
            body["recognized"].as_str().unwrap_or("?"),
            body["expected"].as_str().unwrap_or("?"),
        ),
        "cooldown_blocked" => println!(
            "rejected: cooling down, retry in {}s",
            body["remaining_secs"]
        ),
        "already_complete" => println!("already checked in and out today"),
        other => println!("unexpected outcome: {other}"),
    }
}
