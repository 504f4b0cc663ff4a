//! MongoDB-style filter, projection and sort evaluation over JSON documents
//!
//! Supports field equality (with array containment), dotted paths, the
//! comparison operators `$eq $ne $gt $gte $lt $lte $in $nin $exists $regex
//! $size $all $not $elemMatch` and the logical operators `$and $or $nor`.
//! Extended-JSON binaries compare by content, and a binary identifier equals
//! its textual form.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use scenery_core::{Document, codec};
use serde_json::Value;

use crate::error::BackendError;

/// Keys that mark an extended-JSON literal rather than an operator document.
const LITERAL_KEYS: [&str; 6] = ["$binary", "$type", "$uuid", "$date", "$numberLong", "$oid"];

const FIELD_OPERATORS: [&str; 15] = [
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex", "$options",
    "$size", "$all", "$not", "$elemMatch",
];

fn invalid(reason: impl Into<String>) -> BackendError {
    BackendError::InvalidQuery(reason.into())
}

/// Check a filter for unknown operators and bad arguments without evaluating it.
pub fn validate(filter: &Document) -> Result<(), BackendError> {
    for (key, cond) in filter {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                for clause in clauses(cond)? {
                    validate(clause)?;
                }
            }
            k if k.starts_with('$') => return Err(invalid(format!("unknown operator {k}"))),
            _ => {
                if let Some(ops) = operator_doc(cond) {
                    validate_ops(ops)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_ops(ops: &Document) -> Result<(), BackendError> {
    for (op, arg) in ops {
        if !FIELD_OPERATORS.contains(&op.as_str()) {
            return Err(invalid(format!("unknown operator {op}")));
        }
        match op.as_str() {
            "$in" | "$nin" | "$all" if !arg.is_array() => {
                return Err(invalid(format!("{op} needs an array")));
            }
            "$regex" => {
                build_regex(arg, ops.get("$options"))?;
            }
            "$not" => match arg {
                Value::Object(inner) => validate_ops(inner)?,
                _ => return Err(invalid("$not needs an operator document")),
            },
            "$elemMatch" => match arg {
                Value::Object(inner) if operator_doc(arg).is_some() => validate_ops(inner)?,
                Value::Object(inner) => validate(inner)?,
                _ => return Err(invalid("$elemMatch needs a document")),
            },
            _ => {}
        }
    }
    Ok(())
}

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, BackendError> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(cond)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(cond)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(cond)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            k if k.starts_with('$') => return Err(invalid(format!("unknown operator {k}"))),
            path => {
                let candidates = lookup(doc, path);
                match operator_doc(cond) {
                    Some(ops) => ops_match(&candidates, ops)?,
                    None => equals_any(&candidates, cond),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(cond: &Value) -> Result<Vec<&Document>, BackendError> {
    let items = cond
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| invalid("logical operators need a non-empty array"))?;
    items
        .iter()
        .map(|c| c.as_object().ok_or_else(|| invalid("logical clauses must be documents")))
        .collect()
}

fn operator_doc(cond: &Value) -> Option<&Document> {
    let obj = cond.as_object()?;
    let first = obj.keys().next()?;
    (first.starts_with('$') && !LITERAL_KEYS.contains(&first.as_str())).then_some(obj)
}

/// Values found at a dotted path. Arrays along the path are traversed element-wise.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else {
        return Vec::new();
    };
    let mut current: Vec<&Value> = doc.get(first).into_iter().collect();
    for part in parts {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(obj) => next.extend(obj.get(part)),
                Value::Array(items) => match part.parse::<usize>() {
                    Ok(i) => next.extend(items.get(i)),
                    Err(_) => {
                        next.extend(items.iter().filter_map(|item| item.as_object()?.get(part)))
                    }
                },
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn ops_match(candidates: &[&Value], ops: &Document) -> Result<bool, BackendError> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_any(candidates, arg),
            "$ne" => !equals_any(candidates, arg),
            "$in" => in_list(candidates, arg)?,
            "$nin" => !in_list(candidates, arg)?,
            "$exists" => {
                let want = match arg {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64() != Some(0.0),
                    _ => return Err(invalid("$exists needs a boolean")),
                };
                candidates.is_empty() != want
            }
            "$gt" => compares(candidates, arg, |o| o == Ordering::Greater),
            "$gte" => compares(candidates, arg, |o| o != Ordering::Less),
            "$lt" => compares(candidates, arg, |o| o == Ordering::Less),
            "$lte" => compares(candidates, arg, |o| o != Ordering::Greater),
            "$regex" => {
                let re = build_regex(arg, ops.get("$options"))?;
                flatten(candidates)
                    .iter()
                    .any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
            }
            "$options" => true,
            "$size" => {
                let n = arg.as_u64().ok_or_else(|| invalid("$size needs a non-negative integer"))?;
                candidates
                    .iter()
                    .any(|v| v.as_array().is_some_and(|items| items.len() as u64 == n))
            }
            "$all" => {
                let wanted = arg.as_array().ok_or_else(|| invalid("$all needs an array"))?;
                candidates.iter().any(|v| match v {
                    Value::Array(items) => {
                        wanted.iter().all(|w| items.iter().any(|i| values_equal(i, w)))
                    }
                    single => wanted.iter().all(|w| values_equal(single, w)),
                })
            }
            "$not" => {
                let inner = arg
                    .as_object()
                    .ok_or_else(|| invalid("$not needs an operator document"))?;
                !ops_match(candidates, inner)?
            }
            "$elemMatch" => {
                let inner = arg.as_object().ok_or_else(|| invalid("$elemMatch needs a document"))?;
                let mut any = false;
                for item in candidates.iter().filter_map(|v| v.as_array()).flatten() {
                    let hit = match (operator_doc(arg), item) {
                        (Some(ops), _) => ops_match(&[item], ops)?,
                        (None, Value::Object(obj)) => matches(obj, inner)?,
                        (None, _) => false,
                    };
                    if hit {
                        any = true;
                        break;
                    }
                }
                any
            }
            other => return Err(invalid(format!("unknown operator {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(candidates: &[&Value], arg: &Value) -> Result<bool, BackendError> {
    let options = arg.as_array().ok_or_else(|| invalid("$in/$nin need an array"))?;
    Ok(options.iter().any(|option| equals_any(candidates, option)))
}

/// Candidates plus the elements of any array candidates.
fn flatten<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(candidates.len());
    for value in candidates {
        match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(*other),
        }
    }
    out
}

fn equals_any(candidates: &[&Value], target: &Value) -> bool {
    if target.is_null() && candidates.is_empty() {
        return true;
    }
    candidates.iter().any(|candidate| {
        values_equal(candidate, target)
            || (!target.is_array()
                && candidate
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| values_equal(item, target))))
    })
}

fn compares(candidates: &[&Value], arg: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    flatten(candidates)
        .iter()
        .any(|v| compare_values(v, arg).is_some_and(&accept))
}

fn build_regex(pattern: &Value, options: Option<&Value>) -> Result<Regex, BackendError> {
    let pattern = pattern.as_str().ok_or_else(|| invalid("$regex needs a string"))?;
    let options = options.and_then(Value::as_str).unwrap_or("");
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| invalid(format!("bad $regex: {e}")))
}

/// Structural equality that compares numbers by value, binaries by content
/// and binary identifiers against their textual form.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(i, j)| values_equal(i, j))
        }
        (Value::Object(_), Value::Object(_)) if codec::is_binary(a) && codec::is_binary(b) => {
            match (codec::decode_binary(a), codec::decode_binary(b)) {
                (Ok((_, x)), Ok((_, y))) => x == y,
                _ => false,
            }
        }
        (Value::Object(_), Value::String(text)) | (Value::String(text), Value::Object(_)) => {
            let binary = if a.is_object() { a } else { b };
            codec::is_binary(binary) && codec::id_text(binary).as_deref() == Some(text.as_str())
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Ordering between comparable values: numbers, strings, booleans and dates.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => date_millis(a)?.partial_cmp(&date_millis(b)?),
    }
}

fn date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Object(obj) => match obj.get("$date")? {
            Value::Number(n) => n.as_i64(),
            Value::Object(inner) => inner.get("$numberLong")?.as_str()?.parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

/// Sort documents in place by the given paths. Missing values sort first.
pub fn sort(docs: &mut [Document], keys: &[(String, crate::backend::SortOrder)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, order) in keys {
            let (x, y) = (lookup(a, path).first().copied(), lookup(b, path).first().copied());
            let ord = match (x, y) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            };
            let ord = match order {
                crate::backend::SortOrder::Ascending => ord,
                crate::backend::SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply a field projection (`{field: 1}` inclusion or `{field: 0}` exclusion).
///
/// `_id` is kept by inclusion projections unless excluded explicitly.
pub fn project(doc: Document, fields: &Document) -> Result<Document, BackendError> {
    if fields.is_empty() {
        return Ok(doc);
    }

    let mut include = Vec::new();
    let mut exclude = Vec::new();
    let mut id_flag = None;
    for (path, flag) in fields {
        let on = match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64() != Some(0.0),
            other => return Err(invalid(format!("unsupported projection for {path}: {other}"))),
        };
        if path == "_id" {
            id_flag = Some(on);
        } else if on {
            include.push(path.as_str());
        } else {
            exclude.push(path.as_str());
        }
    }
    if !include.is_empty() && !exclude.is_empty() {
        return Err(invalid("projection cannot mix inclusion and exclusion"));
    }

    if !include.is_empty() || (exclude.is_empty() && id_flag == Some(true)) {
        let mut out = Document::new();
        if id_flag != Some(false) {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for path in include {
            copy_path(&doc, &mut out, path);
        }
        Ok(out)
    } else {
        let mut doc = doc;
        if id_flag == Some(false) {
            doc.remove("_id");
        }
        for path in exclude {
            remove_path(&mut doc, path);
        }
        Ok(doc)
    }
}

fn copy_path(src: &Document, dst: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = src.get(path) {
                dst.insert(path.to_string(), value.clone());
            }
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = src.get(head) {
                let entry = dst
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Document::new()));
                if let Value::Object(out) = entry {
                    copy_path(inner, out, rest);
                }
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenery_core::{codec, generate_id};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(obj) => obj,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_equality_and_array_containment() {
        let d = doc(json!({"type": "mesh", "tags": ["a", "b"], "n": 3}));
        assert!(matches(&d, &doc(json!({"type": "mesh"}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": "b"}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": ["a", "b"]}))).unwrap());
        assert!(matches(&d, &doc(json!({"n": 3.0}))).unwrap());
        assert!(!matches(&d, &doc(json!({"type": "camera"}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": null}))).unwrap());
    }

    #[test]
    fn test_binary_ids_match_by_content_and_text() {
        let id = generate_id();
        let d = doc(json!({"_id": codec::encode_id(&id), "parents": [codec::encode_id(&id)]}));
        assert!(matches(&d, &doc(json!({"_id": codec::encode_id(&id)}))).unwrap());
        assert!(matches(&d, &doc(json!({"_id": id.to_string()}))).unwrap());
        assert!(matches(&d, &doc(json!({"parents": id.to_string()}))).unwrap());
        assert!(matches(&d, &doc(json!({"_id": {"$in": [codec::encode_id(&id)]}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"_id": codec::encode_id(&generate_id())}))).unwrap());
    }

    #[test]
    fn test_operators() {
        let d = doc(json!({"name": "Wall-01", "fov": 0.8, "meta": {"floor": 2}, "list": [1, 5]}));
        assert!(matches(&d, &doc(json!({"fov": {"$gt": 0.5, "$lte": 0.8}}))).unwrap());
        assert!(matches(&d, &doc(json!({"meta.floor": {"$in": [1, 2]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"meta.floor": {"$nin": [3]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"parents": {"$exists": false}}))).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$regex": "^wall", "$options": "i"}}))).unwrap());
        assert!(matches(&d, &doc(json!({"list": {"$size": 2}}))).unwrap());
        assert!(matches(&d, &doc(json!({"list": {"$all": [5, 1]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"list": {"$elemMatch": {"$gt": 4}}}))).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$not": {"$regex": "^Door"}}}))).unwrap());
        assert!(matches(&d, &doc(json!({"$or": [{"name": "x"}, {"fov": 0.8}]}))).unwrap());
        assert!(!matches(&d, &doc(json!({"$and": [{"name": "Wall-01"}, {"fov": 0.1}]}))).unwrap());
        assert!(matches(&d, &doc(json!({"$nor": [{"name": "x"}]}))).unwrap());
        assert!(matches(&d, &doc(json!({"fov": {"$ne": 1.0}}))).unwrap());
    }

    #[test]
    fn test_invalid_filters() {
        let d = doc(json!({"a": 1}));
        assert!(matches(&d, &doc(json!({"a": {"$near": 1}}))).is_err());
        assert!(matches(&d, &doc(json!({"$where": "1"}))).is_err());
        assert!(validate(&doc(json!({"a": {"$regex": "("}}))).is_err());
        assert!(validate(&doc(json!({"a": {"$in": 3}}))).is_err());
        assert!(validate(&doc(json!({"$or": []}))).is_err());
        assert!(validate(&doc(json!({"a": {"$in": [1]}, "b": {"$exists": true}}))).is_ok());
    }

    #[test]
    fn test_projection_modes() {
        let d = doc(json!({"_id": 1, "name": "n", "vertices": [1], "meta": {"a": 1, "b": 2}}));

        let excluded = project(d.clone(), &doc(json!({"vertices": 0, "meta.b": 0}))).unwrap();
        assert_eq!(Value::Object(excluded), json!({"_id": 1, "name": "n", "meta": {"a": 1}}));

        let included = project(d.clone(), &doc(json!({"name": 1, "meta.a": 1}))).unwrap();
        assert_eq!(Value::Object(included), json!({"_id": 1, "name": "n", "meta": {"a": 1}}));

        let no_id = project(d.clone(), &doc(json!({"name": 1, "_id": 0}))).unwrap();
        assert_eq!(Value::Object(no_id), json!({"name": "n"}));

        let only_id = project(d.clone(), &doc(json!({"_id": 1}))).unwrap();
        assert_eq!(Value::Object(only_id), json!({"_id": 1}));

        assert!(project(d, &doc(json!({"name": 1, "vertices": 0}))).is_err());
    }

    #[test]
    fn test_sort_missing_first() {
        use crate::backend::SortOrder;
        let mut docs = vec![doc(json!({"t": 2})), doc(json!({})), doc(json!({"t": 9}))];
        sort(&mut docs, &[("t".to_string(), SortOrder::Descending)]);
        assert_eq!(docs[0]["t"], json!(9));
        assert!(docs[2].get("t").is_none());
    }
}
