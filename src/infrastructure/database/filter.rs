// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::{Map, Value};
use thiserror::Error;

use super::store::{Document, FindOptions};

/// 过滤条件构造错误
///
/// 第一次出错后构造器进入错误状态，后续追加被忽略，执行时返回该错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unsupported filter value: {0}")]
    Unsupported(String),

    #[error("empty field name in {0}")]
    EmptyField(&'static str),

    #[error("invalid sort direction {direction} for `{field}`, expected 1 or -1")]
    InvalidSortDirection { field: String, direction: i32 },
}

/// 可追加到过滤条件的输入
#[derive(Debug, Clone)]
pub enum FilterInput {
    /// 单个键值对
    Pair(String, Value),
    /// 有序键值对
    Pairs(Vec<(String, Value)>),
    /// JSON 对象，其他 JSON 类型会使构造器出错
    Document(Value),
}

impl From<(&str, Value)> for FilterInput {
    fn from((key, value): (&str, Value)) -> Self {
        FilterInput::Pair(key.to_string(), value)
    }
}

impl From<(String, Value)> for FilterInput {
    fn from((key, value): (String, Value)) -> Self {
        FilterInput::Pair(key, value)
    }
}

impl From<Vec<(String, Value)>> for FilterInput {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        FilterInput::Pairs(pairs)
    }
}

impl From<Vec<(&str, Value)>> for FilterInput {
    fn from(pairs: Vec<(&str, Value)>) -> Self {
        FilterInput::Pairs(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

impl From<Value> for FilterInput {
    fn from(value: Value) -> Self {
        FilterInput::Document(value)
    }
}

impl From<Document> for FilterInput {
    fn from(doc: Document) -> Self {
        FilterInput::Document(Value::Object(doc))
    }
}

/// 单次调用的过滤状态
///
/// 保存有序的过滤条目、两套查询选项（多条 / 单条）、指标方法名，
/// 以及第一次出现的错误。不在调用之间共享。
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    entries: Vec<(String, Value)>,
    find: FindOptions,
    find_one: FindOptions,
    metric_method: Option<String>,
    error: Option<FilterError>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    fn poison(&mut self, err: FilterError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn push(&mut self, key: String, value: Value) {
        if key.is_empty() {
            self.poison(FilterError::EmptyField("filter"));
            return;
        }
        self.entries.push((key, value));
    }

    pub fn append(&mut self, input: impl Into<FilterInput>) {
        if self.error.is_some() {
            return;
        }
        match input.into() {
            FilterInput::Pair(key, value) => self.push(key, value),
            FilterInput::Pairs(pairs) => {
                for (key, value) in pairs {
                    self.push(key, value);
                }
            }
            FilterInput::Document(Value::Object(map)) => {
                for (key, value) in map {
                    self.push(key, value);
                }
            }
            FilterInput::Document(other) => {
                self.poison(FilterError::Unsupported(type_name(&other).to_string()))
            }
        }
    }

    fn checked_sort(&mut self, field: &str, direction: i32) -> Option<(String, i32)> {
        if field.is_empty() {
            self.poison(FilterError::EmptyField("sort"));
            return None;
        }
        if direction != 1 && direction != -1 {
            self.poison(FilterError::InvalidSortDirection {
                field: field.to_string(),
                direction,
            });
            return None;
        }
        Some((field.to_string(), direction))
    }

    pub fn append_sort(&mut self, field: &str, direction: i32) {
        if let Some(key) = self.checked_sort(field, direction) {
            self.find.sort.push(key);
        }
    }

    pub fn append_sort_one(&mut self, field: &str, direction: i32) {
        if let Some(key) = self.checked_sort(field, direction) {
            self.find_one.sort.push(key);
        }
    }

    pub fn set_limit(&mut self, limit: i64) {
        self.find.limit = Some(limit);
    }

    pub fn set_skip(&mut self, skip: u64) {
        self.find.skip = Some(skip);
    }

    pub fn set_skip_one(&mut self, skip: u64) {
        self.find_one.skip = Some(skip);
    }

    pub fn set_projection(&mut self, projection: Document) {
        self.find.projection = Some(projection);
    }

    pub fn set_projection_one(&mut self, projection: Document) {
        self.find_one.projection = Some(projection);
    }

    pub fn set_hint(&mut self, hint: Document) {
        self.find.hint = Some(hint);
    }

    pub fn set_hint_one(&mut self, hint: Document) {
        self.find_one.hint = Some(hint);
    }

    pub fn set_metric_method(&mut self, method: impl Into<String>) {
        self.metric_method = Some(method.into());
    }

    pub fn error(&self) -> Option<&FilterError> {
        self.error.as_ref()
    }

    pub fn check(&self) -> Result<(), FilterError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn metric_method(&self) -> Option<&str> {
        self.metric_method.as_deref()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [(String, Value)] {
        &mut self.entries
    }

    /// 过滤键的追加顺序，用于索引审计
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn find_options(&self) -> &FindOptions {
        &self.find
    }

    /// 单条查询的选项，固定 limit 为 1
    pub fn find_one_options(&self) -> FindOptions {
        FindOptions {
            limit: Some(1),
            ..self.find_one.clone()
        }
    }

    /// 转为过滤文档；重复的键合并到 `$and`
    pub fn to_document(&self) -> Document {
        let mut doc = Map::new();
        let mut extra: Vec<Value> = Vec::new();

        for (key, value) in &self.entries {
            if key == "$and" {
                if let Value::Array(items) = value {
                    extra.extend(items.iter().cloned());
                    continue;
                }
            }
            if doc.contains_key(key) {
                let mut single = Map::new();
                single.insert(key.clone(), value.clone());
                extra.push(Value::Object(single));
            } else {
                doc.insert(key.clone(), value.clone());
            }
        }

        if !extra.is_empty() {
            doc.insert("$and".to_string(), Value::Array(extra));
        }
        doc
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
