// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 实体
///
/// 示例领域对象：状态加一组联系方式，联系方式中的字段落库时加密。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 存储分配的ID，新建时为空
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: EntityStatus,
    pub contact: Contact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 联系方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Entity {
    pub fn new(contact: Contact) -> Self {
        Self {
            id: None,
            status: EntityStatus::Pending,
            contact,
            created_at: None,
            updated_at: None,
        }
    }
}

/// 实体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Pending,
    Accepted,
    Blocked,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityStatus::Pending => "pending",
            EntityStatus::Accepted => "accepted",
            EntityStatus::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown entity status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for EntityStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EntityStatus::Pending),
            "accepted" => Ok(EntityStatus::Accepted),
            "blocked" => Ok(EntityStatus::Blocked),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}
