use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Column type used for the foreign key from a job to its payload document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadRefType {
    #[default]
    Uuid,
    BigInt,
    Text,
}

impl PayloadRefType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "uuid" => Some(Self::Uuid),
            "bigint" | "int8" | "i64" => Some(Self::BigInt),
            "text" | "string" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::BigInt => "bigint",
            Self::Text => "text",
        }
    }

    /// SQL type of the `payload` column.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::BigInt => "bigint",
            Self::Text => "text",
        }
    }

    /// Interpret a JSON identifier as a reference of this type.
    ///
    /// Numbers are accepted for `Text` refs and numeric strings for `BigInt`
    /// refs, since documents round-tripped through JSON often lose that
    /// distinction.
    pub fn ref_from_json(&self, id: &Value) -> Option<PayloadRef> {
        match (self, id) {
            (Self::Uuid, Value::String(s)) => Uuid::parse_str(s).ok().map(PayloadRef::Uuid),
            (Self::BigInt, Value::Number(n)) => n.as_i64().map(PayloadRef::BigInt),
            (Self::BigInt, Value::String(s)) => s.trim().parse().ok().map(PayloadRef::BigInt),
            (Self::Text, Value::String(s)) if !s.is_empty() => Some(PayloadRef::Text(s.clone())),
            (Self::Text, Value::Number(n)) => Some(PayloadRef::Text(n.to_string())),
            _ => None,
        }
    }

    /// Pull the `id` attribute out of a persisted payload document.
    pub fn ref_from_document(&self, document: &Value) -> Option<PayloadRef> {
        document.get("id").and_then(|id| self.ref_from_json(id))
    }
}

impl fmt::Display for PayloadRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an externally owned payload document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadRef {
    Uuid(Uuid),
    BigInt(i64),
    Text(String),
}

impl PayloadRef {
    pub fn ref_type(&self) -> PayloadRefType {
        match self {
            Self::Uuid(_) => PayloadRefType::Uuid,
            Self::BigInt(_) => PayloadRefType::BigInt,
            Self::Text(_) => PayloadRefType::Text,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Uuid(id) => Value::String(id.to_string()),
            Self::BigInt(id) => Value::from(*id),
            Self::Text(id) => Value::String(id.clone()),
        }
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => write!(f, "{id}"),
            Self::BigInt(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// A queue entry as persisted in the job table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub payload: PayloadRef,
    pub blocked_until: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub worker_hostname: Option<String>,
    pub retries: i32,
    pub done: bool,
    pub error: Option<String>,
}

impl Job {
    /// Claimable at `now` under a ceiling of `max_retries`.
    pub fn is_claimable(&self, now: DateTime<Utc>, max_retries: i32) -> bool {
        !self.done && !self.is_exhausted(max_retries) && self.blocked_until < now
    }

    /// Past the retry ceiling: never claimed again, removed by `clean`.
    pub fn is_exhausted(&self, max_retries: i32) -> bool {
        self.retries > max_retries
    }
}

/// Caller-facing view of a job with its payload document resolved.
///
/// `payload` is `Value::Null` when the referenced document no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub payload: Value,
    pub blocked_until: DateTime<Utc>,
    pub done: bool,
    pub retries: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobView {
    pub fn from_job(job: &Job, payload: Value) -> Self {
        Self {
            id: job.id,
            payload,
            blocked_until: job.blocked_until,
            done: job.done,
            retries: job.retries,
            error: job.error.clone(),
        }
    }

    /// The `id` attribute of the resolved payload document, if any.
    pub fn payload_id(&self) -> Option<&Value> {
        self.payload.get("id")
    }
}

/// Everything a store needs to lease the next job in one atomic step.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub worker_hostname: String,
    pub block_for: chrono::Duration,
    pub max_retries: i32,
}

/// Point-in-time breakdown of a queue table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: i64,
    pub claimable: i64,
    pub leased: i64,
    pub done: i64,
    pub failed: i64,
    pub exhausted: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn job(retries: i32, done: bool, blocked_until: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            payload: PayloadRef::BigInt(1),
            blocked_until,
            worker_id: None,
            worker_hostname: None,
            retries,
            done,
            error: None,
        }
    }

    #[test]
    fn ref_type_parses_aliases() {
        assert_eq!(PayloadRefType::parse("UUID"), Some(PayloadRefType::Uuid));
        assert_eq!(PayloadRefType::parse("int8"), Some(PayloadRefType::BigInt));
        assert_eq!(PayloadRefType::parse(" string "), Some(PayloadRefType::Text));
        assert_eq!(PayloadRefType::parse("objectid"), None);
    }

    #[test]
    fn document_id_must_match_ref_type() {
        let id = Uuid::new_v4();
        let doc = json!({ "id": id.to_string(), "kind": "email" });

        assert_eq!(
            PayloadRefType::Uuid.ref_from_document(&doc),
            Some(PayloadRef::Uuid(id))
        );
        assert_eq!(PayloadRefType::BigInt.ref_from_document(&doc), None);
        assert_eq!(
            PayloadRefType::BigInt.ref_from_document(&json!({ "id": 42 })),
            Some(PayloadRef::BigInt(42))
        );
        assert_eq!(
            PayloadRefType::Text.ref_from_document(&json!({ "id": "" })),
            None
        );
        assert_eq!(PayloadRefType::Uuid.ref_from_document(&json!({ "name": "x" })), None);
        assert_eq!(PayloadRefType::Uuid.ref_from_document(&json!({ "id": null })), None);
    }

    #[test]
    fn claimability_follows_lease_done_and_ceiling() {
        let now = Utc::now();
        let past = now - Duration::seconds(1);

        assert!(job(0, false, past).is_claimable(now, 5));
        assert!(job(5, false, past).is_claimable(now, 5));
        assert!(!job(6, false, past).is_claimable(now, 5));
        assert!(!job(0, true, past).is_claimable(now, 5));
        assert!(!job(0, false, now).is_claimable(now, 5));
        assert!(!job(0, false, now + Duration::seconds(30)).is_claimable(now, 5));
    }

    #[test]
    fn view_omits_absent_error() {
        let j = job(1, true, Utc::now());
        let view = JobView::from_job(&j, json!({ "id": 1 }));
        let encoded = serde_json::to_value(&view).unwrap();

        assert!(encoded.get("error").is_none());
        assert_eq!(view.payload_id(), Some(&json!(1)));
    }
}
