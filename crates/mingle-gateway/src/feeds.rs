//! Spreadsheet-backed event feeds.
//!
//! The event team maintains attendees, world chat, and the MC's
//! knowledge base as spreadsheet rows exposed through a JSON API. Rows
//! are loosely typed; every field may be absent, so mapping falls back
//! to placeholder values and a fetch failure yields an empty list
//! rather than an error.

use mingle_core::ChatMessage;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How many attendees the floating field displays at most.
pub const ATTENDEE_DISPLAY_CAP: usize = 20;

/// World chat refresh interval.
pub const WORLD_CHAT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// One event attendee as shown in the floating field.
#[derive(Debug, Clone)]
pub struct Attendee {
    pub id: String,
    pub name: String,
    pub role: String,
    pub avatar_url: String,
}

/// Client for the spreadsheet feed API.
#[derive(Clone)]
pub struct FeedsClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeedsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch one sheet; the API nests rows under a key matching the
    /// sheet name. Any failure yields an empty list.
    async fn fetch_sheet(&self, sheet: &str) -> Vec<Value> {
        let cache_buster = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let url = format!("{}/{sheet}?_={cache_buster}", self.base_url);

        let rows = async {
            let resp = self.http.get(&url).send().await?;
            let body: Value = resp.error_for_status()?.json().await?;
            Ok::<_, reqwest::Error>(body.get(sheet).and_then(Value::as_array).cloned())
        }
        .await;

        match rows {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                tracing::warn!(sheet, "feed response missing sheet key");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(sheet, error = %err, "feed fetch failed");
                Vec::new()
            }
        }
    }

    /// Registered attendees, capped for display.
    pub async fn attendees(&self) -> Vec<Attendee> {
        map_attendees(self.fetch_sheet("stayin").await)
    }

    /// The shared read-only world chat.
    pub async fn world_chat(&self) -> Vec<ChatMessage> {
        map_world_chat(self.fetch_sheet("chat").await)
    }

    /// Opaque reference rows for the MC's prompts.
    pub async fn knowledge_base(&self) -> Vec<Value> {
        self.fetch_sheet("traning").await
    }
}

fn row_str(row: &Value, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn row_id(row: &Value, index: usize) -> u64 {
    row.get("id").and_then(Value::as_u64).unwrap_or(index as u64)
}

fn map_attendees(rows: Vec<Value>) -> Vec<Attendee> {
    rows.iter()
        .take(ATTENDEE_DISPLAY_CAP)
        .enumerate()
        .map(|(index, row)| {
            let name = row_str(row, "name").unwrap_or_else(|| "Guest".to_string());
            let avatar_url = row_str(row, "profile").unwrap_or_else(|| {
                format!(
                    "https://ui-avatars.com/api/?name={}&background=random",
                    urlencode(&name)
                )
            });
            Attendee {
                id: format!("attendee-{}", row_id(row, index)),
                name,
                role: row_str(row, "role").unwrap_or_else(|| "Participant".to_string()),
                avatar_url,
            }
        })
        .collect()
}

fn map_world_chat(rows: Vec<Value>) -> Vec<ChatMessage> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let id = row_id(row, index);
            ChatMessage::new(
                format!("user-{id}"),
                row_str(row, "name").unwrap_or_else(|| "Anonymous".to_string()),
                format!("https://picsum.photos/id/{}/100/100", id % 1000),
                row_str(row, "message").unwrap_or_else(|| "...".to_string()),
            )
        })
        .collect()
}

/// Minimal percent-encoding for the avatar-generator query value.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Periodic world-chat refresher bound to a cancellation token.
///
/// The latest snapshot is published through a watch channel; consumers
/// render whatever is current. Cancelling the token stops the task, so
/// no fetch outlives the overlay that wanted it.
pub struct WorldChatPoller {
    handle: JoinHandle<()>,
    latest: watch::Receiver<Vec<ChatMessage>>,
}

impl WorldChatPoller {
    pub fn spawn(client: FeedsClient, interval: Duration, cancel: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("world chat poller stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let messages = client.world_chat().await;
                        if tx.send(messages).is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Self { handle, latest: rx }
    }

    /// Receiver for the most recent world-chat snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.latest.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attendee_mapping_fills_fallbacks() {
        let rows = vec![
            json!({"id": 7, "name": "Nok", "role": "Developer", "profile": "http://a/nok.png"}),
            json!({"id": 8}),
        ];
        let mapped = map_attendees(rows);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].name, "Nok");
        assert_eq!(mapped[0].avatar_url, "http://a/nok.png");
        assert_eq!(mapped[1].name, "Guest");
        assert_eq!(mapped[1].role, "Participant");
        assert!(mapped[1].avatar_url.contains("ui-avatars.com"));
    }

    #[test]
    fn test_attendee_display_cap() {
        let rows: Vec<Value> = (0..50).map(|i| json!({"id": i, "name": "A"})).collect();
        assert_eq!(map_attendees(rows).len(), ATTENDEE_DISPLAY_CAP);
    }

    #[test]
    fn test_world_chat_mapping_fills_fallbacks() {
        let rows = vec![json!({"id": 1500, "name": "Wila", "message": "hello"}), json!({})];
        let mapped = map_world_chat(rows);
        assert_eq!(mapped[0].user_name, "Wila");
        assert_eq!(mapped[0].text, "hello");
        // Avatar id wraps into the generator's range.
        assert!(mapped[0].user_avatar.contains("/id/500/"));
        assert_eq!(mapped[1].user_name, "Anonymous");
        assert_eq!(mapped[1].text, "...");
        assert_eq!(mapped[1].user_id, "user-1");
    }

    #[test]
    fn test_urlencode_spaces_and_unicode() {
        assert_eq!(urlencode("Nok Dee"), "Nok%20Dee");
        assert_eq!(urlencode("a_b-c.d~e"), "a_b-c.d~e");
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let poller = WorldChatPoller::spawn(
            FeedsClient::new("http://127.0.0.1:9"),
            Duration::from_secs(3),
            cancel.clone(),
        );
        cancel.cancel();
        for _ in 0..250 {
            if poller.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("poller kept running after cancellation");
    }
}
