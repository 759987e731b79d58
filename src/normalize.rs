use http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;

pub const VALUE_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

/// One pair per distinct name, values joined with `,`. A name with no values yields `""`.
pub fn normalize_multimap<I, N, V, S>(entries: I) -> Vec<NameValue>
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    let mut slots = HashMap::new();
    for (name, values) in entries {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            insert_slot(&mut out, &mut slots, name.as_ref(), "");
        }
        for value in values {
            push_value(&mut out, &mut slots, name.as_ref(), value.as_ref());
        }
    }
    out
}

pub fn normalize_pairs<I, N, V>(pairs: I) -> Vec<NameValue>
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = Vec::new();
    let mut slots = HashMap::new();
    for (name, value) in pairs {
        push_value(&mut out, &mut slots, name.as_ref(), value.as_ref());
    }
    out
}

pub fn normalize_headers(headers: &HeaderMap) -> Vec<NameValue> {
    normalize_multimap(headers.keys().map(|name| {
        let values = headers
            .get_all(name)
            .into_iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()));
        (name.as_str(), values)
    }))
}

pub fn normalize_query(query: Option<&str>) -> Vec<NameValue> {
    let Some(query) = query.filter(|query| !query.is_empty()) else {
        return Vec::new();
    };
    normalize_pairs(url::form_urlencoded::parse(query.as_bytes()))
}

fn push_value(
    out: &mut Vec<NameValue>,
    slots: &mut HashMap<String, usize>,
    name: &str,
    value: &str,
) {
    match slots.get(name) {
        Some(&slot) => {
            let joined = &mut out[slot].value;
            joined.push(VALUE_SEPARATOR);
            joined.push_str(value);
        }
        None => insert_slot(out, slots, name, value),
    }
}

fn insert_slot(
    out: &mut Vec<NameValue>,
    slots: &mut HashMap<String, usize>,
    name: &str,
    value: &str,
) {
    if slots.contains_key(name) {
        return;
    }
    slots.insert(name.to_string(), out.len());
    out.push(NameValue {
        name: name.to_string(),
        value: value.to_string(),
    });
}
