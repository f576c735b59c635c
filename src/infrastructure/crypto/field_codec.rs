// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::cipher::{self, CipherError};

/// 字段编解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("field `{path}`: {source}")]
    Field {
        path: String,
        #[source]
        source: CipherError,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// 敏感字段声明
///
/// 名称使用序列化后的字段名（即 serde rename 之后的名字）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTag {
    /// 字符串或可选字符串字段
    Leaf(&'static str),
    /// 嵌套对象字段，子声明相对于该字段
    Nested(&'static str, Vec<FieldTag>),
}

impl FieldTag {
    pub fn leaf(name: &'static str) -> Self {
        FieldTag::Leaf(name)
    }

    pub fn nested(name: &'static str, children: Vec<FieldTag>) -> Self {
        FieldTag::Nested(name, children)
    }

    /// 使用嵌套类型自身的声明
    pub fn nested_from<S: SensitiveFields>(name: &'static str) -> Self {
        FieldTag::Nested(name, S::sensitive_fields())
    }
}

/// 可被嵌套引用的结构体声明其敏感字段
pub trait SensitiveFields {
    fn sensitive_fields() -> Vec<FieldTag>;
}

/// 需要加密的字段路径集合（点号分隔）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    paths: BTreeSet<String>,
}

impl TagMap {
    pub fn from_tags(tags: &[FieldTag]) -> Self {
        let mut paths = BTreeSet::new();
        collect_paths(tags, "", &mut paths);
        Self { paths }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// 以 `prefix.` 开头的路径，返回去掉前缀后的剩余部分
    fn paths_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.paths.iter().filter_map(move |path| {
            path.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
        })
    }
}

fn collect_paths(tags: &[FieldTag], prefix: &str, out: &mut BTreeSet<String>) {
    for tag in tags {
        match tag {
            FieldTag::Leaf(name) => {
                out.insert(join_path(prefix, name));
            }
            FieldTag::Nested(name, children) => {
                collect_paths(children, &join_path(prefix, name), out);
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

static TAG_MAPS: Lazy<DashMap<TypeId, Arc<TagMap>>> = Lazy::new(DashMap::new);

/// 获取类型的标签映射，每个类型只计算一次
pub fn tag_map_for<T: 'static>(declare: fn() -> Vec<FieldTag>) -> Arc<TagMap> {
    TAG_MAPS
        .entry(TypeId::of::<T>())
        .or_insert_with(|| Arc::new(TagMap::from_tags(&declare())))
        .clone()
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    fn apply(self, input: &str, key: &str) -> Result<String, CipherError> {
        match self {
            Direction::Encrypt => cipher::encrypt(input, key),
            Direction::Decrypt => cipher::decrypt(input, key),
        }
    }
}

fn transform_path(
    value: &mut Value,
    segments: &[&str],
    path: &str,
    key: &str,
    direction: Direction,
) -> Result<(), CodecError> {
    match value {
        Value::Array(items) => {
            for item in items {
                transform_path(item, segments, path, key, direction)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            let Some((head, rest)) = segments.split_first() else {
                return Ok(());
            };
            let Some(child) = map.get_mut(*head) else {
                return Ok(());
            };
            if rest.is_empty() {
                transform_leaf(child, path, key, direction)
            } else {
                transform_path(child, rest, path, key, direction)
            }
        }
        _ => Ok(()),
    }
}

fn transform_leaf(
    value: &mut Value,
    path: &str,
    key: &str,
    direction: Direction,
) -> Result<(), CodecError> {
    let field_err = |source| CodecError::Field {
        path: path.to_string(),
        source,
    };
    match value {
        Value::String(s) => {
            *s = direction.apply(s, key).map_err(field_err)?;
        }
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    *s = direction.apply(s, key).map_err(field_err)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn transform_value(
    input: &Value,
    key: &str,
    tags: &TagMap,
    direction: Direction,
) -> Result<Value, CodecError> {
    let mut output = input.clone();
    if key.is_empty() || tags.is_empty() {
        return Ok(output);
    }

    for path in tags.paths() {
        let segments: Vec<&str> = path.split('.').collect();
        transform_path(&mut output, &segments, path, key, direction)?;
    }
    Ok(output)
}

/// 加密文档中所有标记的字段，返回新值；输入保持不变
pub fn encrypt_value(input: &Value, key: &str, tags: &TagMap) -> Result<Value, CodecError> {
    transform_value(input, key, tags, Direction::Encrypt)
}

/// [`encrypt_value`] 的逆操作
pub fn decrypt_value(input: &Value, key: &str, tags: &TagMap) -> Result<Value, CodecError> {
    transform_value(input, key, tags, Direction::Decrypt)
}

fn transform_struct<T>(
    input: &T,
    key: &str,
    tags: &TagMap,
    direction: Direction,
) -> Result<T, CodecError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    if key.is_empty() || tags.is_empty() {
        return Ok(input.clone());
    }
    let value =
        serde_json::to_value(input).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let output = transform_value(&value, key, tags, direction)?;
    serde_json::from_value(output).map_err(|e| CodecError::Serialization(e.to_string()))
}

pub fn encrypt_struct<T>(input: &T, key: &str, tags: &TagMap) -> Result<T, CodecError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    transform_struct(input, key, tags, Direction::Encrypt)
}

pub fn decrypt_struct<T>(input: &T, key: &str, tags: &TagMap) -> Result<T, CodecError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    transform_struct(input, key, tags, Direction::Decrypt)
}

/// 加密过滤条件中命中标签映射的值
///
/// 支持直接的字符串值，以及 `$eq`/`$ne`（字符串）与 `$in`/`$nin`（字符串数组）。
pub fn encrypt_filter(
    entries: &mut [(String, Value)],
    key: &str,
    tags: &TagMap,
) -> Result<(), CodecError> {
    if key.is_empty() || tags.is_empty() {
        return Ok(());
    }

    for (field, value) in entries.iter_mut() {
        if !tags.contains(field) {
            continue;
        }
        let field_err = |source| CodecError::Field {
            path: field.clone(),
            source,
        };
        match value {
            Value::String(s) => *s = cipher::encrypt(s, key).map_err(field_err)?,
            Value::Object(ops) => {
                for (op, operand) in ops.iter_mut() {
                    match (op.as_str(), operand) {
                        ("$eq" | "$ne", Value::String(s)) => {
                            *s = cipher::encrypt(s, key).map_err(field_err)?;
                        }
                        ("$in" | "$nin", Value::Array(items)) => {
                            for item in items {
                                if let Value::String(s) = item {
                                    *s = cipher::encrypt(s, key).map_err(field_err)?;
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// 加密更新文档中 `$set` 与 `$setOnInsert` 的敏感值；
/// 不含操作符的更新视为整文档替换，整体加密。
pub fn encrypt_update(update: &Value, key: &str, tags: &TagMap) -> Result<Value, CodecError> {
    if key.is_empty() || tags.is_empty() {
        return Ok(update.clone());
    }

    let Value::Object(map) = update else {
        return Ok(update.clone());
    };

    if !map.keys().any(|k| k.starts_with('$')) {
        return encrypt_value(update, key, tags);
    }

    let mut output = map.clone();
    for operator in ["$set", "$setOnInsert"] {
        let Some(Value::Object(fields)) = output.get_mut(operator) else {
            continue;
        };
        for (field, value) in fields.iter_mut() {
            if tags.contains(field) {
                transform_leaf(value, field, key, Direction::Encrypt)?;
                continue;
            }
            for rest in tags.paths_under(field) {
                let segments: Vec<&str> = rest.split('.').collect();
                let full_path = format!("{}.{}", field, rest);
                transform_path(value, &segments, &full_path, key, Direction::Encrypt)?;
            }
        }
    }
    Ok(Value::Object(output))
}
