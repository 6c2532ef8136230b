use anyhow::{Context, Result, anyhow, bail};
use bytes::BytesMut;
use chrono::{DateTime, Local, Utc};
use comfy_table::Table;
use futures_util::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};

// Body of every successful command/fetch reply.
#[derive(Deserialize, Debug)]
struct RoomView {
    lines: Vec<Value>,
}

// Body the server sends back when it rejects a request.
#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Thin HTTP client for one canvas server.
pub struct CanvasClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CanvasClient {
    pub fn new(server: &str) -> Result<Self> {
        let base_url = Url::parse(server).with_context(|| format!("invalid server URL: {server}"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn room_url(&self, room: &str, tail: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("server URL cannot carry a path: {}", self.base_url))?;
            segments.pop_if_empty().extend(["api", "rooms", room]);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }

    /// Fetch the current lines of a room.
    pub async fn fetch(&self, room: &str) -> Result<Vec<Value>> {
        let res = self
            .http
            .get(self.room_url(room, None)?)
            .send()
            .await
            .context("could not connect to the server")?;
        read_view(res).await
    }

    /// Submit a command and return the room's lines after it was applied.
    pub async fn submit(&self, room: &str, command: &Value) -> Result<Vec<Value>> {
        let res = self
            .http
            .post(self.room_url(room, Some("commands"))?)
            .json(command)
            .send()
            .await
            .context("could not connect to the server")?;
        read_view(res).await
    }

    /// Follow a room's event stream, calling `on_event` for every notification.
    /// Returns when the server closes the stream.
    pub async fn watch(&self, room: &str, mut on_event: impl FnMut(Value)) -> Result<()> {
        let res = self
            .http
            .get(self.room_url(room, Some("events"))?)
            .send()
            .await
            .context("could not connect to the server")?;
        if !res.status().is_success() {
            bail!("failed to subscribe (Status: {})", res.status());
        }

        let mut parser = EventParser::default();
        let mut body = res.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("event stream interrupted")?;
            for payload in parser.push(&chunk) {
                match serde_json::from_str(&payload) {
                    Ok(event) => on_event(event),
                    Err(e) => eprintln!("Skipping unreadable event: {e}"),
                }
            }
        }
        Ok(())
    }
}

async fn read_view(res: reqwest::Response) -> Result<Vec<Value>> {
    let status = res.status();
    if status.is_success() {
        let view: RoomView = res.json().await.context("unexpected reply from server")?;
        return Ok(view.lines);
    }
    match res.json::<ErrorBody>().await {
        Ok(body) => bail!("{} ({}, Status: {})", body.error, body.code, status),
        Err(_) => bail!("request failed (Status: {})", status),
    }
}

/// Splits a server-sent event stream into `data` payloads.
///
/// Raw bytes are buffered and only complete events are decoded, so a
/// character split across two network chunks survives intact.
#[derive(Default, Debug)]
pub struct EventParser {
    buffer: BytesMut,
}

impl EventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // CR never occurs inside a UTF-8 sequence or a JSON payload.
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event = self.buffer.split_to(end + 2);
            let Ok(event) = std::str::from_utf8(&event) else {
                eprintln!("Skipping event that is not valid UTF-8");
                continue;
            };
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();
            // Keep-alive comments carry no data.
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

/// Flat list of stroke coordinates: x1, y1, x2, y2, ...
#[derive(Debug, Clone, PartialEq)]
pub struct Points(pub Vec<f64>);

/// Parse `x1,y1,x2,y2,...` into a list of coordinates.
pub fn parse_points(raw: &str) -> Result<Points, String> {
    let points = raw
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| format!("not a number: {:?}", p.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if points.len() < 2 || points.len() % 2 != 0 {
        return Err("points must be x,y pairs".to_string());
    }
    Ok(Points(points))
}

pub fn new_stroke(id: &str, points: Points, color: &str, width: f64) -> Value {
    json!({
        "id": id,
        "config": {
            "points": points.0,
            "stroke": color,
            "strokeWidth": width,
        }
    })
}

/// The snapshot an undo asks for: everything but the latest stroke.
pub fn without_last(lines: &[Value]) -> Vec<Value> {
    lines[..lines.len().saturating_sub(1)].to_vec()
}

pub fn stroke_table(lines: &[Value]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["#", "ID", "Points", "Color", "Width"]);
    for (index, line) in lines.iter().enumerate() {
        let config = line.get("config").unwrap_or(line);
        let points = config
            .get("points")
            .and_then(Value::as_array)
            .map_or(0, |p| p.len() / 2);
        table.add_row(vec![
            (index + 1).to_string(),
            line.get("id").map_or("-".to_string(), plain),
            points.to_string(),
            config.get("stroke").map_or("-".to_string(), plain),
            config.get("strokeWidth").map_or("-".to_string(), plain),
        ]);
    }
    table
}

/// One-line summary of a pushed notification.
pub fn describe(event: &Value) -> String {
    let time = event
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or("--:--:--".to_string(), |t| {
            t.with_timezone(&Local).format("%H:%M:%S").to_string()
        });
    let kind = event.get("type").map_or("?".to_string(), plain);
    let who = event
        .get("clientId")
        .map(|c| format!(" from {}", plain(c)))
        .unwrap_or_default();

    let detail = match event.get("status") {
        Some(status) => format!(
            "/{} line={}",
            plain(status),
            event
                .get("line")
                .and_then(|l| l.get("id"))
                .map_or("-".to_string(), plain)
        ),
        None => String::new(),
    };
    let lines = event
        .get("lines")
        .and_then(Value::as_array)
        .map(|l| format!(" ({} lines)", l.len()))
        .unwrap_or_default();

    format!("[{time}] {kind}{detail}{lines}{who}")
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
