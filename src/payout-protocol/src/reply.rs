// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Builders for response messages.
//!
//! Successful replies carry `msgId` (fresh id) and `correlId` (the
//! request's `msgId`); error replies carry `correlId` and `error` only.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::request::RequestError;

/// Id pair attached to every reply for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    msg_id: String,
    correl_id: String,
}

impl Correlation {
    /// Pair a request id with a freshly generated response id.
    pub fn new(correl_id: &str) -> Self {
        Self::with_ids(Uuid::new_v4().to_string(), correl_id.to_string())
    }

    pub fn with_ids(msg_id: String, correl_id: String) -> Self {
        Self { msg_id, correl_id }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn correl_id(&self) -> &str {
        &self.correl_id
    }

    pub fn ok(&self) -> Value {
        self.reply([("result", json!("ok"))])
    }

    pub fn failed(&self) -> Value {
        self.reply([("result", json!("failed"))])
    }

    pub fn accepted(&self) -> Value {
        self.reply([("accepted", json!("true"))])
    }

    /// Success reply with extra fields.
    pub fn reply<I>(&self, fields: I) -> Value
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut map = Map::new();
        map.insert("msgId".to_string(), json!(self.msg_id));
        map.insert("correlId".to_string(), json!(self.correl_id));
        extend(&mut map, fields);
        Value::Object(map)
    }

    pub fn error(&self, error: &str) -> Value {
        self.error_with(error, std::iter::empty())
    }

    /// Error reply with extra typed fields.
    pub fn error_with<I>(&self, error: &str, fields: I) -> Value
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut map = Map::new();
        map.insert("correlId".to_string(), json!(self.correl_id));
        map.insert("error".to_string(), json!(error));
        extend(&mut map, fields);
        Value::Object(map)
    }

    /// Reply without `msgId` carrying other fields than `error`.
    pub fn bare<I>(&self, fields: I) -> Value
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut map = Map::new();
        map.insert("correlId".to_string(), json!(self.correl_id));
        extend(&mut map, fields);
        Value::Object(map)
    }
}

fn extend<I>(map: &mut Map<String, Value>, fields: I)
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
}

/// Reply for a request that never got far enough to run a command.
pub fn rejection(err: &RequestError) -> Value {
    match err {
        RequestError::Parse { reason, line } => json!({
            "error": err.to_string(),
            "reason": reason,
            "line": line,
        }),
        RequestError::MissingMsgId => json!({ "error": err.to_string() }),
        RequestError::MissingCmd { correl_id } => json!({
            "correlId": correl_id,
            "error": err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Correlation {
        Correlation::with_ids("r1".to_string(), "a1".to_string())
    }

    #[test]
    fn test_success_replies() {
        assert_eq!(
            ids().ok(),
            json!({"msgId": "r1", "correlId": "a1", "result": "ok"})
        );
        assert_eq!(ids().failed()["result"], "failed");
        assert_eq!(ids().accepted()["accepted"], "true");
        assert_eq!(
            ids().reply([("version", json!("NV0200414149800X"))]),
            json!({"msgId": "r1", "correlId": "a1", "version": "NV0200414149800X"})
        );
    }

    #[test]
    fn test_error_reply_has_no_msg_id() {
        assert_eq!(
            ids().error("can't pay exact amount"),
            json!({"correlId": "a1", "error": "can't pay exact amount"})
        );
        let unknown = ids().error_with("unknown command", [("cmd", json!("fly"))]);
        assert_eq!(unknown["cmd"], "fly");
        assert!(unknown.get("msgId").is_none());
    }

    #[test]
    fn test_fresh_ids_differ_from_request() {
        let first = Correlation::new("a1");
        let second = Correlation::new("a1");
        assert_ne!(first.msg_id(), "a1");
        assert_ne!(first.msg_id(), second.msg_id());
        assert_eq!(first.msg_id().len(), 36);
        assert_eq!(first.correl_id(), "a1");
    }

    #[test]
    fn test_rejections() {
        let parse = rejection(&RequestError::Parse {
            reason: "expected value".to_string(),
            line: 2,
        });
        assert_eq!(
            parse,
            json!({"error": "could not parse json", "reason": "expected value", "line": 2})
        );
        assert!(parse.get("correlId").is_none());
        assert_eq!(
            rejection(&RequestError::MissingMsgId),
            json!({"error": "property 'msgId' missing or not a string"})
        );
        assert_eq!(
            rejection(&RequestError::MissingCmd {
                correl_id: "x".to_string()
            }),
            json!({"correlId": "x", "error": "property 'cmd' missing or not a string"})
        );
    }
}
