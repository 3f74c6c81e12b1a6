use log::info;

/// One fan-out unit handed to the push transport. Tokens are opaque
/// device identifiers; `data` is an opaque payload for the client app.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// One-way, best-effort delivery. There is deliberately no result type:
/// ledger mutations commit before dispatch and never depend on it.
pub trait PushGateway {
    fn deliver(&self, message: &PushMessage);
}

/// Production gateway: records the dispatch in the log. The actual
/// transport lives outside this process and tails the log/outbox.
pub struct LogGateway;

impl PushGateway for LogGateway {
    fn deliver(&self, message: &PushMessage) {
        info!(
            "event=push_dispatch tokens={} title={:?} body={:?} data={}",
            message.tokens.len(),
            message.title,
            message.body,
            message.data
        );
    }
}

/// Drops blank tokens and skips delivery entirely when nothing remains.
pub fn dispatch(
    gateway: &dyn PushGateway,
    tokens: Vec<Option<String>>,
    title: &str,
    body: String,
    data: serde_json::Value,
) {
    let tokens: Vec<String> = tokens
        .into_iter()
        .flatten()
        .filter(|t| !t.trim().is_empty())
        .collect();
    if tokens.is_empty() {
        return;
    }
    gateway.deliver(&PushMessage {
        tokens,
        title: title.to_string(),
        body,
        data,
    });
}
