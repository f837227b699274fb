use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::models::ParentContext;

/// A flat row keyed by column name.
pub type Record = Map<String, Value>;

/// Merges the parent account context into a raw API object.
///
/// Only the top level is touched: nested objects and arrays are kept as-is.
/// Context keys overwrite any same-named keys in the object.
pub fn normalize(raw: Value, context: &ParentContext) -> Record {
    let mut record = match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    record.insert("account_id".to_string(), Value::String(context.account_id.clone()));
    record.insert("account_name".to_string(), Value::String(context.account_name.clone()));
    record.insert(
        "collected_at".to_string(),
        Value::String(context.collected_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );

    record
}

pub fn normalize_all(raw: Vec<Value>, context: &ParentContext) -> Vec<Record> {
    raw.into_iter().map(|value| normalize(value, context)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn context() -> ParentContext {
        ParentContext {
            account_id: "111".to_string(),
            account_name: "Acct1".to_string(),
            collected_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn context_columns_are_added() {
        let record = normalize(json!({"id": "c1", "name": "Spring"}), &context());

        assert_eq!(record["id"], "c1");
        assert_eq!(record["account_id"], "111");
        assert_eq!(record["account_name"], "Acct1");
        assert_eq!(record["collected_at"], "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn context_wins_on_collision() {
        let record = normalize(json!({"account_id": "999"}), &context());
        assert_eq!(record["account_id"], "111");
    }

    #[test]
    fn nested_values_pass_through() {
        let nested = json!([{"indicator": "actions:link_click", "values": [{"value": "12"}]}]);
        let record = normalize(json!({"results": nested.clone()}), &context());
        assert_eq!(record["results"], nested);
    }
}
