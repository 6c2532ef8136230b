use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{CanvasClient, Points, describe, new_stroke, parse_points, stroke_table, without_last};
use serde_json::{Value, json};
use spinners::{Spinner, Spinners};

mod client;

// The default base URL for the canvas server.
const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

/// A CLI for drawing on and following shared canvas rooms.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the canvas server.
    #[arg(long, global = true, default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the strokes currently on a room's canvas.
    Show { room: String },
    /// Add a finished stroke to a room.
    /// Example: canvas draw lobby --id s1 --points 50,60,70,80 --color red
    Draw {
        room: String,
        /// Stroke identifier; must be unique within the room.
        #[arg(long)]
        id: String,
        /// Flat list of coordinates: x1,y1,x2,y2,...
        #[arg(long, value_parser = parse_points)]
        points: Points,
        #[arg(long, default_value = "black")]
        color: String,
        #[arg(long, default_value_t = 5.0)]
        width: f64,
    },
    /// Undo the latest stroke in a room.
    Undo { room: String },
    /// Redo the latest undone stroke in a room.
    Redo { room: String },
    /// Print every update pushed to a room until interrupted.
    Watch { room: String },
}

fn client_id() -> String {
    format!("cli-{}", std::process::id())
}

fn timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = CanvasClient::new(&cli.server)?;

    match cli.command {
        Commands::Show { room } => {
            let lines = client.fetch(&room).await?;
            if lines.is_empty() {
                println!("Room '{}' is empty.", room);
            } else {
                println!("{}", stroke_table(&lines));
            }
        }
        Commands::Draw {
            room,
            id,
            points,
            color,
            width,
        } => {
            let mut sp = Spinner::new(Spinners::Dots9, "Drawing stroke...".into());

            // Always build on the server's latest lines, never on a stale copy.
            let line = new_stroke(&id, points, &color, width);
            let result: Result<Vec<Value>> = async {
                let mut lines = client.fetch(&room).await?;
                lines.push(line.clone());
                let command = json!({
                    "type": "draw",
                    "status": "complete",
                    "line": line,
                    "lines": lines,
                    "timestamp": timestamp(),
                    "clientId": client_id(),
                });
                client.submit(&room, &command).await
            }
            .await;

            match result {
                Ok(lines) => sp.stop_with_message(format!(
                    "✓ Stroke added. Room '{}' now has {} stroke(s).",
                    room,
                    lines.len()
                )),
                Err(e) => {
                    sp.stop_with_message(format!("✗ Error: {}", e));
                    return Err(e);
                }
            }
        }
        Commands::Undo { room } => {
            let lines = client.fetch(&room).await?;
            if lines.is_empty() {
                println!("Nothing to undo in room '{}'.", room);
                return Ok(());
            }
            let command = json!({
                "type": "undo",
                "lines": without_last(&lines),
                "timestamp": timestamp(),
                "clientId": client_id(),
            });
            let lines = client.submit(&room, &command).await?;
            println!("✓ Undone. Room '{}' now has {} stroke(s).", room, lines.len());
        }
        Commands::Redo { room } => {
            let command = json!({
                "type": "redo",
                "timestamp": timestamp(),
                "clientId": client_id(),
            });
            let lines = client.submit(&room, &command).await?;
            println!("✓ Room '{}' now has {} stroke(s).", room, lines.len());
        }
        Commands::Watch { room } => {
            println!("--- Watching room '{}' (Ctrl+C to stop) ---", room);
            tokio::select! {
                result = client.watch(&room, |event| println!("{}", describe(&event))) => {
                    result?;
                    println!("Server closed the stream.");
                }
                _ = tokio::signal::ctrl_c() => println!(),
            }
        }
    }

    Ok(())
}
