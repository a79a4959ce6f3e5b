//! Payload size limits for backends with a small row-size ceiling.

use serde_json::Value;

/// Payload size ceiling enforced before a job is written.
///
/// When the serialized payload reaches `max_payload_bytes`, every string
/// longer than `max_string_bytes` is replaced by a marker naming its
/// original size. Losing part of the payload beats losing the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadLimits {
    pub max_payload_bytes: Option<usize>,
    pub max_string_bytes: usize,
}

impl PayloadLimits {
    /// No limit.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// MySQL/MariaDB store job data in a 64 KiB `text` column.
    pub fn mysql() -> Self {
        Self {
            max_payload_bytes: Some(64 * 1024),
            max_string_bytes: 2048,
        }
    }

    /// Return a truncated copy of `data` if it exceeds the limit, or `None`
    /// if it can be stored as is.
    pub fn constrain(&self, queue_name: &str, data: &Value) -> Option<Value> {
        let max_payload = self.max_payload_bytes?;
        let size = serde_json::to_vec(data).map(|v| v.len()).unwrap_or(0);
        if size < max_payload {
            return None;
        }

        let mut reduced = data.clone();
        let mut truncated = Vec::new();
        truncate_strings(&mut reduced, None, self.max_string_bytes, &mut truncated);

        let keys = truncated
            .iter()
            .map(|(key, len)| format!("{} ({} bytes)", key, len))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::warn!(
            queue = %queue_name,
            payload_kb = size.div_ceil(1024),
            truncated = %keys,
            "Job data is too large to store, truncating long strings"
        );

        Some(reduced)
    }
}

fn truncate_strings(
    value: &mut Value,
    key: Option<&str>,
    max_len: usize,
    truncated: &mut Vec<(String, usize)>,
) {
    match value {
        Value::String(s) if s.len() > max_len => {
            let len = s.len();
            truncated.push((key.unwrap_or("").to_string(), len));
            *s = format!("[truncated - originally {} bytes]", len);
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let index = i.to_string();
                truncate_strings(item, Some(&index), max_len, truncated);
            }
        }
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                truncate_strings(v, Some(k), max_len, truncated);
            }
        }
        _ => {}
    }
}
