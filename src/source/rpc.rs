//! Blocking client for the TracRPC plugin's JSON-RPC endpoint.

use std::cell::Cell;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::model::{ChangeKind, ChangeLogEntry, SourceMilestone, Ticket, TicketFields, WikiPageInfo};
use crate::source::Source;

pub struct TracRpc {
    agent: ureq::Agent,
    url: String,
    authorization: Option<String>,
    next_id: Cell<u64>,
}

impl TracRpc {
    /// `url` is the JSON-RPC endpoint, usually `<trac>/login/jsonrpc`.
    pub fn new(url: impl Into<String>, username: Option<&str>, password: Option<&str>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .build();
        let authorization = username.map(|user| {
            let credentials = format!("{user}:{}", password.unwrap_or(""));
            format!("Basic {}", STANDARD.encode(credentials))
        });
        Self {
            agent,
            url: url.into(),
            authorization,
            next_id: Cell::new(1),
        }
    }

    fn request_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "method": method, "params": params, "id": self.request_id() });
        debug!(method, "trac rpc call");
        let mut request = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if let Some(auth) = &self.authorization {
            request = request.set("Authorization", auth);
        }
        let response = match request.send_json(body) {
            Ok(response) => response,
            // TracRPC reports faults with an error status and a JSON envelope.
            Err(ureq::Error::Status(code, response)) => {
                let envelope: Value = response.into_json().map_err(|_| {
                    MigrateError::UnexpectedResponse(method.to_string(), format!("http status {code}"))
                })?;
                return unwrap_response(method, envelope);
            }
            Err(err) => return Err(err.into()),
        };
        let envelope: Value = response.into_json()?;
        unwrap_response(method, envelope)
    }

    /// Batch several calls into one `system.multicall` round trip.
    pub fn multicall(&self, calls: Vec<(&str, Value)>) -> Result<Vec<Value>> {
        let methods: Vec<String> = calls.iter().map(|(m, _)| m.to_string()).collect();
        let signatures: Vec<Value> = calls
            .into_iter()
            .map(|(method, params)| json!({ "method": method, "params": params }))
            .collect();
        let results = self.call("system.multicall", Value::Array(signatures))?;
        let Value::Array(results) = results else {
            return Err(MigrateError::UnexpectedResponse(
                "system.multicall".into(),
                "result is not an array".into(),
            ));
        };
        results
            .into_iter()
            .zip(methods)
            .map(|(result, method)| {
                if result.get("result").is_some() || result.get("error").is_some() {
                    unwrap_response(&method, result)
                } else {
                    Ok(result)
                }
            })
            .collect()
    }
}

impl Source for TracRpc {
    fn milestone_names(&self) -> Result<Vec<String>> {
        string_list("ticket.milestone.getAll", self.call("ticket.milestone.getAll", json!([]))?)
    }

    fn milestone(&self, name: &str) -> Result<SourceMilestone> {
        parse_milestone(&self.call("ticket.milestone.get", json!([name]))?)
    }

    fn ticket_ids(&self) -> Result<Vec<u64>> {
        let ids = self.call("ticket.query", json!(["max=0&order=id"]))?;
        let Value::Array(ids) = ids else {
            return Err(unexpected("ticket.query", "result is not an array"));
        };
        ids.iter()
            .map(|id| id.as_u64().ok_or_else(|| unexpected("ticket.query", "non-numeric id")))
            .collect()
    }

    fn tickets(&self, ids: &[u64]) -> Result<Vec<Ticket>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let calls = ids.iter().map(|id| ("ticket.get", json!([id]))).collect();
        self.multicall(calls)?.iter().map(parse_ticket).collect()
    }

    fn change_log(&self, ticket: u64) -> Result<Vec<ChangeLogEntry>> {
        parse_change_log(&self.call("ticket.changeLog", json!([ticket]))?)
    }

    fn ticket_attachment(&self, ticket: u64, filename: &str) -> Result<Vec<u8>> {
        let payload = self.call("ticket.getAttachment", json!([ticket, filename]))?;
        decode_binary(&payload).ok_or_else(|| unexpected("ticket.getAttachment", "payload is not binary"))
    }

    fn wiki_page_names(&self) -> Result<Vec<String>> {
        string_list("wiki.getAllPages", self.call("wiki.getAllPages", json!([]))?)
    }

    fn wiki_page_info(&self, name: &str, version: Option<u32>) -> Result<WikiPageInfo> {
        let params = match version {
            Some(version) => json!([name, version]),
            None => json!([name]),
        };
        parse_page_info(&self.call("wiki.getPageInfo", params)?)
    }

    fn wiki_page(&self, name: &str) -> Result<String> {
        match self.call("wiki.getPage", json!([name]))? {
            Value::String(text) => Ok(text),
            _ => Err(unexpected("wiki.getPage", "page body is not a string")),
        }
    }

    fn wiki_attachment_names(&self, page: &str) -> Result<Vec<String>> {
        string_list("wiki.listAttachments", self.call("wiki.listAttachments", json!([page]))?)
    }

    fn wiki_attachment(&self, path: &str) -> Result<Vec<u8>> {
        let payload = self.call("wiki.getAttachment", json!([path]))?;
        decode_binary(&payload).ok_or_else(|| unexpected("wiki.getAttachment", "payload is not binary"))
    }
}

fn unexpected(method: &str, detail: &str) -> MigrateError {
    MigrateError::UnexpectedResponse(method.to_string(), detail.to_string())
}

/// Split a JSON-RPC envelope into its result or a fault.
pub fn unwrap_response(method: &str, mut envelope: Value) -> Result<Value> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(MigrateError::Rpc {
            method: method.to_string(),
            message,
        });
    }
    match envelope.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(unexpected(method, "envelope has neither result nor error")),
    }
}

fn jsonclass<'a>(value: &'a Value, class: &str) -> Option<&'a Value> {
    let parts = value.get("__jsonclass__")?.as_array()?;
    match parts.as_slice() {
        [name, payload, ..] if name.as_str() == Some(class) => Some(payload),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y%m%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Decode a TracRPC datetime. Trac uses `0` for "unset".
pub fn decode_datetime(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(payload) = jsonclass(value, "datetime") {
        return payload.as_str().and_then(parse_timestamp);
    }
    match value {
        Value::String(raw) => parse_timestamp(raw),
        _ => None,
    }
}

pub fn decode_binary(value: &Value) -> Option<Vec<u8>> {
    let encoded = jsonclass(value, "binary")?.as_str()?;
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).ok()
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_list(method: &str, value: Value) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(unexpected(method, "result is not an array"));
    };
    Ok(items.iter().map(value_string).collect())
}

fn required_datetime(method: &str, value: &Value) -> Result<DateTime<Utc>> {
    decode_datetime(value).ok_or_else(|| unexpected(method, "missing or malformed datetime"))
}

/// `ticket.get` returns `[id, time_created, time_changed, attributes]`.
pub fn parse_ticket(value: &Value) -> Result<Ticket> {
    let Some([id, created, changed, attributes, ..]) = value.as_array().map(Vec::as_slice) else {
        return Err(unexpected("ticket.get", "ticket is not a 4-tuple"));
    };
    let id = id
        .as_u64()
        .ok_or_else(|| unexpected("ticket.get", "non-numeric ticket id"))?;
    let fields: TicketFields = serde_json::from_value(string_fields(attributes))?;
    Ok(Ticket {
        id,
        created_at: required_datetime("ticket.get", created)?,
        updated_at: required_datetime("ticket.get", changed)?,
        fields,
    })
}

/// Keep only string-valued attributes; Trac mixes in datetimes and numbers.
fn string_fields(attributes: &Value) -> Value {
    match attributes {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| v.is_string())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Object(Default::default()),
    }
}

/// `ticket.changeLog` rows are `[time, author, field, oldvalue, newvalue, permanent]`.
pub fn parse_change_log(value: &Value) -> Result<Vec<ChangeLogEntry>> {
    let Value::Array(rows) = value else {
        return Err(unexpected("ticket.changeLog", "result is not an array"));
    };
    rows.iter()
        .map(|row| {
            let Some([at, author, field, old, new, ..]) = row.as_array().map(Vec::as_slice) else {
                return Err(unexpected("ticket.changeLog", "row has fewer than 5 columns"));
            };
            let field = value_string(field);
            Ok(ChangeLogEntry {
                at: required_datetime("ticket.changeLog", at)?,
                author: value_string(author),
                kind: ChangeKind::from_field(&field),
                field,
                old_value: value_string(old),
                new_value: value_string(new),
            })
        })
        .collect()
}

pub fn parse_milestone(value: &Value) -> Result<SourceMilestone> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected("ticket.milestone.get", "milestone has no name"))?;
    let completed = value.get("completed").is_some_and(|completed| match completed {
        Value::Number(n) => n.as_i64() != Some(0),
        Value::Bool(b) => *b,
        Value::Null => false,
        other => decode_datetime(other).is_some(),
    });
    Ok(SourceMilestone {
        name: name.to_string(),
        description: value.get("description").map(value_string).unwrap_or_default(),
        completed,
        due: value.get("due").and_then(decode_datetime),
    })
}

pub fn parse_page_info(value: &Value) -> Result<WikiPageInfo> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected("wiki.getPageInfo", "page info has no name"))?;
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1);
    let last_modified = value
        .get("lastModified")
        .map(|v| required_datetime("wiki.getPageInfo", v))
        .transpose()?
        .ok_or_else(|| unexpected("wiki.getPageInfo", "page info has no lastModified"))?;
    Ok(WikiPageInfo {
        name: name.to_string(),
        author: value.get("author").map(value_string).unwrap_or_default(),
        version,
        last_modified,
    })
}
