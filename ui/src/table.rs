use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::Value;

/// Renders a tool observation as a table when it is a list of todos.
///
/// Returns `None` for anything else, so callers can fall back to plain JSON.
pub fn render_todos(observation: &Value) -> Option<String> {
    let rows = observation.as_array()?;
    if rows.is_empty() || !rows.iter().all(is_todo) {
        return None;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["id", "todo", "created"]);

    for row in rows {
        table.add_row(vec![
            row["id"].to_string(),
            row["todo"].as_str().unwrap_or_default().to_string(),
            row.get("createdAt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ]);
    }

    Some(table.to_string())
}

fn is_todo(row: &Value) -> bool {
    row.get("id").is_some_and(Value::is_i64) && row.get("todo").is_some_and(Value::is_string)
}
