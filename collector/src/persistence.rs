//! Recording task outcomes: usage rows plus one pull log entry per task.
use crate::outcome::Outcome;
use crate::task::Task;
use crate::window::{format_timestamp, parse_timestamp};
use directory::errors::StoreResult;
use directory::store::UsageStore;
use directory::types::{PullRecord, PullStatus, UsageRow};
use serde_json::{Value as JsonValue, json};

/// Flattens a success payload into usage rows.
///
/// `result.items` yields one row per item, dated by the item's `period`.
/// `result.intents` yields undated rows. Any other shape is stored whole as a
/// single undated row.
pub fn build_usage_rows(task: &Task, payload: &JsonValue) -> Vec<UsageRow> {
    let result = payload.get("result").filter(|r| !r.is_null());
    let row = |period: Option<String>, data: &JsonValue| UsageRow {
        tenant_id: task.tenant.id.clone(),
        project_id: task.project_id.clone(),
        metric: task.metric.as_str().to_string(),
        period,
        data: normalize_data(data),
    };

    if let Some(items) = result.and_then(|r| r.get("items")).and_then(JsonValue::as_array) {
        return items
            .iter()
            .map(|item| row(normalize_period(item.get("period")), item))
            .collect();
    }

    if let Some(intents) = result.and_then(|r| r.get("intents")).and_then(JsonValue::as_array) {
        return intents.iter().map(|intent| row(None, intent)).collect();
    }

    vec![row(None, result.unwrap_or(payload))]
}

/// `result.cursor` of a success payload.
pub fn extract_cursor(payload: &JsonValue) -> Option<JsonValue> {
    payload
        .get("result")
        .and_then(|result| result.get("cursor"))
        .filter(|cursor| !cursor.is_null())
        .cloned()
}

fn normalize_period(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .and_then(parse_timestamp)
        .map(|period| format_timestamp(&period))
}

fn normalize_data(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(_) => value.clone(),
        other => json!({ "value": other }),
    }
}

fn pull_record(task: &Task, status: PullStatus) -> PullRecord {
    PullRecord {
        tenant_id: task.tenant.id.clone(),
        project_id: task.project_id.clone(),
        metric: task.metric.as_str().to_string(),
        window_start: task.window.start_time(),
        window_end: task.window.end_time(),
        cursor: None,
        status,
        error: None,
    }
}

/// Stores one outcome. Usage rows are upserted before the pull is logged, so
/// a logged success always has its rows.
pub async fn record_outcome(store: &dyn UsageStore, outcome: &Outcome) -> StoreResult<()> {
    match outcome {
        Outcome::Success { task, payload } => {
            let rows = build_usage_rows(task, payload);
            let inserted = store.upsert_usage(&rows).await?;
            tracing::debug!(
                tenant = %task.tenant.slug,
                project_id = %task.project_id,
                metric = %task.metric,
                rows = rows.len(),
                inserted,
                "Stored usage rows"
            );

            let record = PullRecord {
                cursor: extract_cursor(payload),
                ..pull_record(task, PullStatus::Succeeded)
            };
            store.append_pull(&record).await
        }
        Outcome::Failure { task, failure } => {
            let record = PullRecord {
                error: Some(failure.to_json()),
                ..pull_record(task, PullStatus::Failed)
            };
            store.append_pull(&record).await
        }
    }
}
