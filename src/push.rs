//! Push notification dispatch.
//!
//! Delivers notifications through an Expo-style push gateway and reports the
//! outcome per device token. One bad token or one failed network chunk never
//! prevents delivery to the rest of a batch: invalid tokens are recorded as
//! failures up front, a failed chunk marks only its own tokens failed, and
//! every other chunk still runs. Callers get a [`DispatchOutcome`] with the
//! full success and failure sets rather than a boolean or an error.

use serde::{Deserialize, Serialize};

/// Maximum messages per gateway submission, imposed by the gateway.
pub const PUSH_CHUNK_SIZE: usize = 100;

/// Syntactic token check, matching the gateway's own validity rule.
pub fn is_valid_push_token(token: &str) -> bool {
    for prefix in ["ExponentPushToken[", "ExpoPushToken["] {
        if let Some(rest) = token.strip_prefix(prefix) {
            return rest.len() > 1 && rest.ends_with(']');
        }
    }
    false
}

/// Notification content, independent of the tokens it will be sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub sound: Option<String>,
    pub badge: Option<i64>,
    pub channel_id: Option<String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
            sound: Some("default".to_string()),
            badge: None,
            channel_id: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn to_gateway(&self, token: &str) -> GatewayMessage {
        GatewayMessage {
            to: token.to_string(),
            title: self.title.clone(),
            body: self.body.clone(),
            data: self.data.clone(),
            sound: self.sound.clone(),
            badge: self.badge,
            channel_id: self.channel_id.clone(),
        }
    }
}

/// One wire-format message in a gateway batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// Per-message delivery receipt returned by the gateway, in batch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicket {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<TicketDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushTicket {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            id: Some(id.into()),
            message: None,
            details: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            id: None,
            message: Some(reason.into()),
            details: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Best available failure reason: the structured error code when the
    /// gateway supplied one, otherwise the free-form message.
    pub fn error_reason(&self) -> String {
        if let Some(details) = &self.details {
            if let Some(error) = &details.error {
                return error.clone();
            }
        }
        self.message
            .clone()
            .unwrap_or_else(|| format!("ticket status {}", self.status))
    }
}

/// Gateway seam. Submits one chunk of at most [`PUSH_CHUNK_SIZE`] messages
/// and returns one ticket per message, in order.
pub trait PushGateway: Send + Sync {
    fn submit(&self, messages: &[GatewayMessage]) -> Result<Vec<PushTicket>, String>;
}

/// HTTP gateway posting Expo-format batches.
pub struct HttpPushGateway {
    url: String,
}

impl HttpPushGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Deserialize)]
struct GatewayResponse {
    data: Vec<PushTicket>,
}

impl PushGateway for HttpPushGateway {
    fn submit(&self, messages: &[GatewayMessage]) -> Result<Vec<PushTicket>, String> {
        let body = serde_json::to_value(messages)
            .map_err(|e| format!("failed to serialize push batch: {e}"))?;
        let response = ureq::post(&self.url)
            .send_json(body)
            .map_err(|e| format!("push gateway POST failed: {e}"))?;
        let parsed: GatewayResponse = response
            .into_json()
            .map_err(|e| format!("deserialize push tickets: {e}"))?;
        Ok(parsed.data)
    }
}

/// One failed delivery with the reason the token did not get the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub token: String,
    pub reason: String,
}

/// Structured per-token result of a dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<FailedDelivery>,
}

impl DispatchOutcome {
    pub fn all_sent(&self) -> bool {
        self.failed.is_empty() && !self.sent.is_empty()
    }

    fn fail(token: &str, reason: impl Into<String>) -> Self {
        Self {
            sent: Vec::new(),
            failed: vec![FailedDelivery {
                token: token.to_string(),
                reason: reason.into(),
            }],
        }
    }
}

/// Dispatches notifications over an injected gateway.
pub struct PushDispatcher {
    gateway: Box<dyn PushGateway>,
}

impl PushDispatcher {
    pub fn new(gateway: Box<dyn PushGateway>) -> Self {
        Self { gateway }
    }

    /// Send to a single token. An invalid token is a failure outcome, not an
    /// error; any error ticket makes the whole send a failure.
    pub fn send_to_token(&self, token: &str, message: &PushMessage) -> DispatchOutcome {
        if !is_valid_push_token(token) {
            return DispatchOutcome::fail(token, "invalid push token");
        }
        self.send_valid(std::slice::from_ref(&token.to_string()), message)
    }

    /// Send to many tokens, partitioning invalid ones into the failure set
    /// before any network call and degrading chunk errors to per-token
    /// failures without aborting the remaining chunks.
    pub fn send_bulk(&self, tokens: &[String], message: &PushMessage) -> DispatchOutcome {
        let mut valid = Vec::new();
        let mut outcome = DispatchOutcome::default();
        for token in tokens {
            if is_valid_push_token(token) {
                valid.push(token.clone());
            } else {
                outcome.failed.push(FailedDelivery {
                    token: token.clone(),
                    reason: "invalid push token".to_string(),
                });
            }
        }

        let delivered = self.send_valid(&valid, message);
        outcome.sent.extend(delivered.sent);
        outcome.failed.extend(delivered.failed);
        outcome
    }

    /// Submit pre-validated tokens chunk by chunk, mapping tickets back to
    /// tokens one-to-one.
    fn send_valid(&self, tokens: &[String], message: &PushMessage) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for chunk in tokens.chunks(PUSH_CHUNK_SIZE) {
            let batch: Vec<GatewayMessage> =
                chunk.iter().map(|t| message.to_gateway(t)).collect();
            match self.gateway.submit(&batch) {
                Ok(tickets) => {
                    for (i, token) in chunk.iter().enumerate() {
                        match tickets.get(i) {
                            Some(ticket) if ticket.is_ok() => outcome.sent.push(token.clone()),
                            Some(ticket) => outcome.failed.push(FailedDelivery {
                                token: token.clone(),
                                reason: ticket.error_reason(),
                            }),
                            None => outcome.failed.push(FailedDelivery {
                                token: token.clone(),
                                reason: "no ticket returned".to_string(),
                            }),
                        }
                    }
                }
                Err(e) => {
                    crate::olog!("push: chunk of {} failed: {}", chunk.len(), e);
                    for token in chunk {
                        outcome.failed.push(FailedDelivery {
                            token: token.clone(),
                            reason: e.clone(),
                        });
                    }
                }
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Fixed notification templates
// ---------------------------------------------------------------------------

pub fn task_reminder(task_title: &str) -> PushMessage {
    PushMessage::new("Task reminder", format!("Don't forget: {task_title}"))
        .with_data(serde_json::json!({ "type": "task_reminder" }))
}

pub fn streak_milestone(addiction_type: &str, days: i64) -> PushMessage {
    PushMessage::new(
        "Milestone reached!",
        format!("{days} days free of {addiction_type}. Keep going!"),
    )
    .with_data(serde_json::json!({ "type": "milestone", "days": days }))
}

pub fn checkin_reminder() -> PushMessage {
    PushMessage::new("Daily check-in", "How are you feeling today?")
        .with_data(serde_json::json!({ "type": "checkin_reminder" }))
}

pub fn motivation() -> PushMessage {
    PushMessage::new("A moment for you", "One day at a time. You've got this.")
        .with_data(serde_json::json!({ "type": "motivation" }))
}

pub fn community_interaction(username: &str) -> PushMessage {
    PushMessage::new(
        "Community",
        format!("{username} responded to your post"),
    )
    .with_data(serde_json::json!({ "type": "community" }))
}

pub fn achievement_unlocked(title: &str) -> PushMessage {
    PushMessage::new("Achievement unlocked", format!("You earned \"{title}\""))
        .with_data(serde_json::json!({ "type": "achievement" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted gateway: pops one prepared result per submission and records
    /// every batch it was given.
    struct ScriptedGateway {
        results: Mutex<Vec<Result<Vec<PushTicket>, String>>>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedGateway {
        fn new(results: Vec<Result<Vec<PushTicket>, String>>) -> Self {
            Self {
                results: Mutex::new(results),
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl PushGateway for ScriptedGateway {
        fn submit(&self, messages: &[GatewayMessage]) -> Result<Vec<PushTicket>, String> {
            self.batches
                .lock()
                .unwrap()
                .push(messages.iter().map(|m| m.to.clone()).collect());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Err("unscripted submission".to_string());
            }
            results.remove(0)
        }
    }

    fn token(n: usize) -> String {
        format!("ExponentPushToken[device-{n}]")
    }

    #[test]
    fn token_syntax_check() {
        assert!(is_valid_push_token("ExponentPushToken[abc]"));
        assert!(is_valid_push_token("ExpoPushToken[xyz-123]"));
        assert!(!is_valid_push_token("ExponentPushToken[]"));
        assert!(!is_valid_push_token("ExponentPushToken[abc"));
        assert!(!is_valid_push_token("FCMToken[abc]"));
        assert!(!is_valid_push_token(""));
    }

    #[test]
    fn invalid_tokens_fail_before_any_network_call() {
        let gateway = ScriptedGateway::new(vec![]);
        let dispatcher = PushDispatcher::new(Box::new(gateway));

        let tokens = vec!["bogus".to_string(), "also-bogus".to_string()];
        let outcome = dispatcher.send_bulk(&tokens, &motivation());

        assert!(outcome.sent.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome
            .failed
            .iter()
            .all(|f| f.reason == "invalid push token"));
    }

    #[test]
    fn bulk_send_partitions_and_reports_per_token() {
        // 2 valid + 2 invalid; the scripted chunk returns ok then error.
        let gateway = ScriptedGateway::new(vec![Ok(vec![
            PushTicket::ok("t1"),
            PushTicket::error("DeviceNotRegistered"),
        ])]);
        let dispatcher = PushDispatcher::new(Box::new(gateway));

        let tokens = vec![token(1), "nope".to_string(), token(2), "".to_string()];
        let outcome = dispatcher.send_bulk(&tokens, &checkin_reminder());

        assert_eq!(outcome.sent, vec![token(1)]);
        assert_eq!(outcome.failed.len(), 3);
        let reasons: Vec<&str> = outcome.failed.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(
            reasons,
            vec!["invalid push token", "invalid push token", "DeviceNotRegistered"]
        );
        // Success + failure counts cover every input token exactly once
        assert_eq!(outcome.sent.len() + outcome.failed.len(), tokens.len());
    }

    #[test]
    fn failed_chunk_does_not_abort_remaining_chunks() {
        // 150 valid tokens -> two chunks; first submission fails, second is ok.
        let second_chunk_tickets: Vec<PushTicket> =
            (0..50).map(|i| PushTicket::ok(format!("t{i}"))).collect();
        let gateway = ScriptedGateway::new(vec![
            Err("connection reset".to_string()),
            Ok(second_chunk_tickets),
        ]);
        let dispatcher = PushDispatcher::new(Box::new(gateway));

        let tokens: Vec<String> = (0..150).map(token).collect();
        let outcome = dispatcher.send_bulk(&tokens, &motivation());

        assert_eq!(outcome.failed.len(), 100);
        assert!(outcome
            .failed
            .iter()
            .all(|f| f.reason == "connection reset"));
        assert_eq!(outcome.sent.len(), 50);
        assert_eq!(outcome.sent, tokens[100..].to_vec());
    }

    #[test]
    fn chunking_respects_the_gateway_cap() {
        let tickets: Vec<PushTicket> = (0..100).map(|i| PushTicket::ok(format!("t{i}"))).collect();
        let rest: Vec<PushTicket> = (0..1).map(|i| PushTicket::ok(format!("r{i}"))).collect();
        let gateway = ScriptedGateway::new(vec![Ok(tickets), Ok(rest)]);
        let tokens: Vec<String> = (0..101).map(token).collect();

        let dispatcher = PushDispatcher::new(Box::new(gateway));
        let outcome = dispatcher.send_bulk(&tokens, &motivation());
        assert_eq!(outcome.sent.len(), 101);
    }

    #[test]
    fn single_send_rejects_invalid_token_without_error() {
        let gateway = ScriptedGateway::new(vec![]);
        let dispatcher = PushDispatcher::new(Box::new(gateway));

        let outcome = dispatcher.send_to_token("not-a-token", &motivation());
        assert!(!outcome.all_sent());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].token, "not-a-token");
    }

    #[test]
    fn single_send_error_ticket_is_overall_failure() {
        let gateway =
            ScriptedGateway::new(vec![Ok(vec![PushTicket::error("MessageTooBig")])]);
        let dispatcher = PushDispatcher::new(Box::new(gateway));

        let outcome = dispatcher.send_to_token(&token(1), &motivation());
        assert!(!outcome.all_sent());
        assert_eq!(outcome.failed[0].reason, "MessageTooBig");
    }

    #[test]
    fn structured_ticket_error_code_wins_over_message() {
        let ticket = PushTicket {
            status: "error".to_string(),
            id: None,
            message: Some("long prose about the device".to_string()),
            details: Some(TicketDetails {
                error: Some("DeviceNotRegistered".to_string()),
            }),
        };
        assert_eq!(ticket.error_reason(), "DeviceNotRegistered");
    }
}
