// Dot-notation key paths over JSON attribute maps.
//
// "address.city" descends through objects; numeric segments index arrays
// ("items.0.name"). Reads never fail, writes create missing intermediates.

use serde_json::{Map, Value};

/// Split a dotted key into its segments. Empty segments are dropped.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Resolve `path` against `root`, returning `None` if any segment is missing.
pub fn get_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let parts = segments(path);
    let (first, rest) = parts.split_first()?;

    let mut current = root.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// An intermediate segment holding a non-container value is replaced by a
/// fresh object. Array elements are written in place when the index is in
/// range; otherwise the array is replaced like any other scalar.
///
/// Returns the previous value at `path`, if there was one.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Option<Value> {
    let parts = segments(path);
    let (last, parents) = parts.split_last()?;

    if parents.is_empty() {
        return root.insert((*last).to_string(), value);
    }

    let (first, middle) = parents.split_first()?;
    let mut current = root
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(Map::new()));

    for segment in middle {
        current = child_container(current, segment);
    }

    match (current, last.parse::<usize>().ok()) {
        (Value::Array(items), Some(index)) if index < items.len() => {
            Some(std::mem::replace(&mut items[index], value))
        }
        (Value::Object(map), _) => map.insert((*last).to_string(), value),
        (other, _) => {
            let mut map = Map::new();
            map.insert((*last).to_string(), value);
            *other = Value::Object(map);
            None
        }
    }
}

/// Step into `segment` of `current`, coercing it into an object when it
/// cannot hold children.
fn child_container<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = segment
        .parse::<usize>()
        .ok()
        .filter(|i| matches!(&*current, Value::Array(items) if *i < items.len()));
    if index.is_none() && !current.is_object() {
        *current = Value::Object(Map::new());
    }

    // `index` is only set for an in-range array; anything else is now an object
    match (current, index) {
        (Value::Array(items), Some(i)) => &mut items[i],
        (Value::Object(map), _) => map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        (other, _) => other,
    }
}
