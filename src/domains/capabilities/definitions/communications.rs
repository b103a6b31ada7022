//! Outbound communication capabilities.
//!
//! Sending goes through the `mail-relay` downstream and is the group most
//! likely to exercise the resilience pipeline in anger: SEND is not
//! idempotent, so the pipeline only retries it when the caller supplies
//! an idempotency key.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::{Value, json};

use super::teams::require_str;
use crate::domains::capabilities::{
    Capability, CapabilityDescriptor, CapabilityError, CallContext, FieldKind, FieldSpec, ParamSpec,
};

const SERVICE: &str = "mail-relay";

#[derive(Debug, Clone)]
struct SentMessage {
    id: u64,
    channel: String,
    to: String,
    subject: Option<String>,
    tenant: Option<String>,
}

/// In-memory record of sent messages.
pub struct Outbox {
    messages: RwLock<Vec<SentMessage>>,
    next_id: AtomicU64,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of messages sent so far.
    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

/// The group's capabilities over a shared outbox.
pub fn capabilities(outbox: Arc<Outbox>) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(SendMessage::new(outbox.clone())),
        Arc::new(MessageHistory::new(outbox)),
    ]
}

// ============================================================================
// communications.message.SEND
// ============================================================================

struct SendMessage {
    descriptor: CapabilityDescriptor,
    outbox: Arc<Outbox>,
}

impl SendMessage {
    fn new(outbox: Arc<Outbox>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "communications.message.SEND",
                "Send a message through the relay",
            )
            .with_params(
                ParamSpec::empty()
                    .field(
                        FieldSpec::required(
                            "channel",
                            "Delivery channel",
                            FieldKind::string_enum(&["email", "sms"]),
                        )
                        .with_default(json!("email")),
                    )
                    .field(FieldSpec::required(
                        "to",
                        "Recipient address or number",
                        FieldKind::string_bounded(3, 120),
                    ))
                    .field(FieldSpec::optional(
                        "subject",
                        "Subject line (email only)",
                        FieldKind::string_bounded(1, 120),
                    ))
                    .field(FieldSpec::required(
                        "body",
                        "Message body",
                        FieldKind::string_bounded(1, 2000),
                    )),
            )
            .with_scope("communications.send")
            .with_service(SERVICE),
            outbox,
        }
    }
}

#[async_trait]
impl Capability for SendMessage {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let channel = require_str(args, "channel")?;
        let to = require_str(args, "to")?;
        let subject = args
            .get("subject")
            .and_then(Value::as_str)
            .map(str::to_string);

        if channel == "sms" && subject.is_some() {
            return Err(CapabilityError::permanent(
                "sms messages cannot carry a subject line",
            ));
        }

        let message = SentMessage {
            id: self.outbox.next_id.fetch_add(1, Ordering::SeqCst),
            channel: channel.to_string(),
            to: to.to_string(),
            subject,
            tenant: ctx.scope.clone(),
        };
        let id = message.id;

        self.outbox
            .messages
            .write()
            .map_err(|_| CapabilityError::internal("outbox lock poisoned"))?
            .push(message);

        Ok(json!({
            "message_id": format!("msg-{}", id),
            "channel": channel,
            "to": to,
        }))
    }
}

// ============================================================================
// communications.message.HISTORY
// ============================================================================

struct MessageHistory {
    descriptor: CapabilityDescriptor,
    outbox: Arc<Outbox>,
}

impl MessageHistory {
    fn new(outbox: Arc<Outbox>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "communications.message.HISTORY",
                "List recently sent messages, newest first",
            )
            .with_params(ParamSpec::empty().field(
                FieldSpec::required(
                    "limit",
                    "Maximum messages to return",
                    FieldKind::integer_range(1, 100),
                )
                .with_default(json!(20)),
            ))
            .with_scope("communications.send")
            .with_service(SERVICE)
            .idempotent(),
            outbox,
        }
    }
}

#[async_trait]
impl Capability for MessageHistory {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;

        let messages = self
            .outbox
            .messages
            .read()
            .map_err(|_| CapabilityError::internal("outbox lock poisoned"))?;

        let listed: Vec<Value> = messages
            .iter()
            .rev()
            .filter(|message| ctx.scope.is_none() || message.tenant == ctx.scope)
            .take(limit)
            .map(|message| {
                json!({
                    "message_id": format!("msg-{}", message.id),
                    "channel": message.channel,
                    "to": message.to,
                    "subject": message.subject,
                })
            })
            .collect();

        Ok(json!({ "messages": listed }))
    }
}
