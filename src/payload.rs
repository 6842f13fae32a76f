//! Action payloads assembled from flat form fields
//!
//! Input forms name each leaf of the action input after its path in the schema: the field
//! `.color.red.value` holds the value of `{"color": {"red": ...}}`.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const VALUE_FIELD: &str = "value";

/// Builds the serialized payload described by `fields`.
///
/// A bare `value` field marks an action without input and yields an empty payload. Fields
/// whose name does not start with `.` are ignored.
pub fn fields_to_payload<'a, I>(fields: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    let mut output = Map::new();
    let mut any = false;

    for (name, value) in fields {
        if name == VALUE_FIELD {
            return Ok(String::new());
        }
        let Some(path) = name.strip_prefix('.') else {
            continue;
        };

        let mut keys: Vec<&str> = path.split('.').collect();
        if keys.last() == Some(&VALUE_FIELD) {
            keys.pop();
        }
        let Some((leaf, parents)) = keys.split_last() else {
            continue;
        };
        if keys.iter().any(|key| key.is_empty()) {
            return Err(Error::InvalidPayloadField(name.to_string()));
        }

        let mut current = &mut output;
        for key in parents {
            let node = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = node
                .as_object_mut()
                .ok_or_else(|| Error::InvalidPayloadField(name.to_string()))?;
        }

        if current.contains_key(*leaf) {
            return Err(Error::InvalidPayloadField(name.to_string()));
        }
        current.insert(leaf.to_string(), value);
        any = true;
    }

    if !any {
        return Ok(String::new());
    }
    Ok(Value::Object(output).to_string())
}
