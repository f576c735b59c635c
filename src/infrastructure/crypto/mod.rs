// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 字段加密模块
///
/// 确定性的 AES-CBC 字符串加密，以及按模型声明的敏感字段路径
/// 对文档、过滤条件和更新文档进行加解密。
pub mod cipher;
pub mod field_codec;

pub use cipher::CipherError;
pub use field_codec::{CodecError, FieldTag, SensitiveFields, TagMap};
