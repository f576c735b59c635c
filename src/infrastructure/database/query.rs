// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 文档查询引擎
//!
//! 在内存中的 JSON 文档上执行过滤、更新、排序与投影，供所有
//! [`DocumentStore`](super::store::DocumentStore) 实现共用。

use std::cmp::Ordering;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::store::{Document, FindOptions, IndexModel, StoreError};

/// 按点号路径取值，路径上的数组逐元素展开
fn lookup<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                lookup(child, rest, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    lookup(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            lookup(value, rest, &mut out);
        }
    }
    out
}

/// 路径上的第一个值，用于排序和唯一索引
fn first_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    values_at(doc, path).into_iter().next()
}

/// 数值按大小比较，不区分整数和浮点
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// 同类型之间的比较；类型不同返回 `None`
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// 排序用的全序比较
fn total_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_same_type(x, y).unwrap_or_else(|| {
            // object / array: compare serialized form
            x.to_string().cmp(&y.to_string())
        }),
        _ => Ordering::Equal,
    }
}

fn eq_matches(candidates: &[&Value], expected: &Value) -> bool {
    if candidates.is_empty() {
        return expected.is_null();
    }
    candidates.iter().any(|candidate| {
        values_equal(candidate, expected)
            || matches!(candidate, Value::Array(items) if items.iter().any(|item| values_equal(item, expected)))
    })
}

fn flatten<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for candidate in candidates.iter().copied() {
        match candidate {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
    }
    out
}

fn compare_matches(candidates: &[&Value], operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    flatten(candidates)
        .into_iter()
        .any(|candidate| compare_same_type(candidate, operand).is_some_and(accept))
}

fn in_matches(candidates: &[&Value], operand: &Value, op: &str) -> Result<bool, StoreError> {
    let Value::Array(options) = operand else {
        return Err(StoreError::InvalidQuery(format!("{} needs an array", op)));
    };
    Ok(options.iter().any(|option| eq_matches(candidates, option)))
}

fn is_operator_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn field_matches(doc: &Document, path: &str, condition: &Value) -> Result<bool, StoreError> {
    let candidates = values_at(doc, path);

    let Value::Object(ops) = condition else {
        return Ok(eq_matches(&candidates, condition));
    };
    if !is_operator_object(condition) {
        return Ok(eq_matches(&candidates, condition));
    }

    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_matches(&candidates, operand),
            "$ne" => !eq_matches(&candidates, operand),
            "$gt" => compare_matches(&candidates, operand, |o| o == Ordering::Greater),
            "$gte" => compare_matches(&candidates, operand, |o| o != Ordering::Less),
            "$lt" => compare_matches(&candidates, operand, |o| o == Ordering::Less),
            "$lte" => compare_matches(&candidates, operand, |o| o != Ordering::Greater),
            "$in" => in_matches(&candidates, operand, op)?,
            "$nin" => !in_matches(&candidates, operand, op)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    StoreError::InvalidQuery("$exists needs a boolean".to_string())
                })?;
                candidates.is_empty() != wanted
            }
            other => {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported operator `{}` on `{}`",
                    other, path
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, value: &'a Value) -> Result<Vec<&'a Document>, StoreError> {
    let Value::Array(items) = value else {
        return Err(StoreError::InvalidQuery(format!("{} needs an array", op)));
    };
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::InvalidQuery(format!("{} items must be objects", op)))
        })
        .collect()
}

/// 判断文档是否满足过滤条件
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            other if other.starts_with('$') => {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported top-level operator `{}`",
                    other
                )))
            }
            path => field_matches(doc, path, condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn sort_documents(docs: &mut [Document], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, direction) in sort {
            let ordering = total_cmp(first_value(a, path), first_value(b, path));
            let ordering = if *direction < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// 应用投影；除 `_id` 外只要有一个字段为真即为包含模式
pub fn project(doc: Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc;
    }

    let inclusion = projection
        .iter()
        .any(|(k, v)| k != "_id" && is_truthy(v));
    let keep_id = projection.get("_id").map_or(true, is_truthy);

    if inclusion {
        let mut out = Map::new();
        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (path, flag) in projection {
            if path == "_id" || !is_truthy(flag) {
                continue;
            }
            if let Some(value) = get_path(&doc, path) {
                // both sides are plain objects along the path
                let _ = set_path(&mut out, path, value.clone());
            }
        }
        out
    } else {
        let mut out = doc;
        for (path, flag) in projection {
            if !is_truthy(flag) {
                remove_path(&mut out, path);
            }
        }
        if !keep_id {
            out.remove("_id");
        }
        out
    }
}

/// 过滤、排序、跳过、限制、投影
pub fn find(
    docs: Vec<Document>,
    filter: &Document,
    options: &FindOptions,
) -> Result<Vec<Document>, StoreError> {
    let mut matched = Vec::new();
    for doc in docs {
        if matches(&doc, filter)? {
            matched.push(doc);
        }
    }

    sort_documents(&mut matched, &options.sort);

    let skip = options.skip.unwrap_or(0) as usize;
    let limit = match options.limit {
        Some(0) | None => usize::MAX,
        Some(n) => n.unsigned_abs() as usize,
    };

    Ok(matched
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|doc| match &options.projection {
            Some(projection) => project(doc, projection),
            None => doc,
        })
        .collect())
}

/// 字段的去重取值，数组字段展开
pub fn distinct(docs: &[Document], field: &str, filter: &Document) -> Result<Vec<Value>, StoreError> {
    let mut out: Vec<Value> = Vec::new();
    for doc in docs {
        if !matches(doc, filter)? {
            continue;
        }
        for value in flatten(&values_at(doc, field)) {
            if !out.iter().any(|seen| values_equal(seen, value)) {
                out.push(value.clone());
            }
        }
    }
    Ok(out)
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// 按点号路径写入，缺失的中间对象会被创建
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(StoreError::InvalidQuery("empty field path".to_string()));
    };

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().ok_or_else(|| {
            StoreError::InvalidQuery(format!("cannot create field `{}` inside a non-object", path))
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

pub fn remove_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(*last);
}

/// 更新文档是否使用操作符（否则为整文档替换）
pub fn is_operator_update(update: &Value) -> bool {
    matches!(update, Value::Object(map) if map.keys().any(|k| k.starts_with('$')))
}

pub fn validate_update(update: &Value) -> Result<(), StoreError> {
    let Value::Object(map) = update else {
        return Err(StoreError::InvalidQuery("update must be an object".to_string()));
    };
    if is_operator_update(update) {
        if let Some(key) = map.keys().find(|k| !k.starts_with('$')) {
            return Err(StoreError::InvalidQuery(format!(
                "update mixes operators with plain field `{}`",
                key
            )));
        }
        for (op, fields) in map {
            if !matches!(op.as_str(), "$set" | "$setOnInsert" | "$unset" | "$inc") {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported update operator `{}`",
                    op
                )));
            }
            if !fields.is_object() {
                return Err(StoreError::InvalidQuery(format!("{} needs an object", op)));
            }
        }
    }
    Ok(())
}

fn add_numbers(current: &Value, delta: &Value, path: &str) -> Result<Value, StoreError> {
    let not_numeric = || StoreError::InvalidQuery(format!("$inc on non-numeric field `{}`", path));
    let (Value::Number(a), Value::Number(b)) = (current, delta) else {
        return Err(not_numeric());
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }
    let sum = a.as_f64().ok_or_else(not_numeric)? + b.as_f64().ok_or_else(not_numeric)?;
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(not_numeric)
}

/// 对文档应用更新；`is_insert` 为真时 `$setOnInsert` 生效
pub fn apply_update(doc: &mut Document, update: &Value, is_insert: bool) -> Result<(), StoreError> {
    validate_update(update)?;
    let Value::Object(map) = update else {
        return Ok(());
    };

    if !is_operator_update(update) {
        let id = doc.get("_id").cloned();
        *doc = map.clone();
        if let Some(id) = id {
            doc.insert("_id".to_string(), id);
        }
        return Ok(());
    }

    for (op, fields) in map {
        let Value::Object(fields) = fields else {
            continue;
        };
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$setOnInsert" if is_insert => set_path(doc, path, value.clone())?,
                "$setOnInsert" => {}
                "$unset" => remove_path(doc, path),
                "$inc" => {
                    let next = match get_path(doc, path) {
                        None | Some(Value::Null) => {
                            if !value.is_number() {
                                return Err(StoreError::InvalidQuery(format!(
                                    "$inc on `{}` needs a number",
                                    path
                                )));
                            }
                            value.clone()
                        }
                        Some(current) => add_numbers(current, value, path)?,
                    };
                    set_path(doc, path, next)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// upsert 时由过滤条件中的等值字段生成初始文档
pub fn seed_from_filter(filter: &Document) -> Result<Document, StoreError> {
    let mut doc = Map::new();
    seed_into(&mut doc, filter)?;
    Ok(doc)
}

fn seed_into(doc: &mut Document, filter: &Document) -> Result<(), StoreError> {
    for (key, condition) in filter {
        if key == "$and" {
            for sub in sub_filters(key, condition)? {
                seed_into(doc, sub)?;
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        if is_operator_object(condition) {
            if let Some(value) = condition.get("$eq") {
                set_path(doc, key, value.clone())?;
            }
            continue;
        }
        set_path(doc, key, condition.clone())?;
    }
    Ok(())
}

/// 文档缺少 `_id` 时生成一个，返回 `_id`
pub fn ensure_id(doc: &mut Document) -> Value {
    match doc.get("_id") {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            let id = Value::String(Uuid::new_v4().simple().to_string());
            doc.insert("_id".to_string(), id.clone());
            id
        }
    }
}

pub fn id_of(doc: &Document) -> Value {
    doc.get("_id").cloned().unwrap_or(Value::Null)
}

/// 存储层使用的 `_id` 字符串形式
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn index_tuple(doc: &Document, index: &IndexModel) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|(path, _)| first_value(doc, path).cloned().unwrap_or(Value::Null))
        .collect()
}

/// 唯一索引检查；`exclude_id` 为被替换文档自身的 `_id`
pub fn check_unique(
    collection: &str,
    indexes: &[IndexModel],
    existing: &[Document],
    candidate: &Document,
    exclude_id: Option<&Value>,
) -> Result<(), StoreError> {
    for index in indexes.iter().filter(|index| index.unique) {
        let wanted = index_tuple(candidate, index);
        let conflict = existing.iter().any(|doc| {
            let same_doc = exclude_id.is_some_and(|id| values_equal(&id_of(doc), id));
            !same_doc
                && index_tuple(doc, index)
                    .iter()
                    .zip(&wanted)
                    .all(|(a, b)| values_equal(a, b))
        });
        if conflict {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index: index.resolved_name(),
            });
        }
    }
    Ok(())
}
