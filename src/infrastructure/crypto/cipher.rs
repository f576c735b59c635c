// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;

/// 字段加密错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid hex key: {0}")]
    InvalidKeyEncoding(String),

    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid base64 ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("ciphertext padding is invalid")]
    InvalidPadding,

    #[error("decrypted value is not valid utf-8")]
    InvalidUtf8,
}

fn decode_key(secret_key_hex: &str) -> Result<Vec<u8>, CipherError> {
    let key = hex::decode(secret_key_hex)
        .map_err(|e| CipherError::InvalidKeyEncoding(e.to_string()))?;
    match key.len() {
        16 | 24 | 32 => Ok(key),
        n => Err(CipherError::InvalidKeyLength(n)),
    }
}

/// 加密字符串
///
/// AES-CBC，IV 取密钥前16字节，PKCS#7 填充，输出 base64。
/// 相同明文在同一密钥下得到相同密文，因此可以直接用明文条件查询密文字段。
///
/// 空字符串原样返回。
pub fn encrypt(plaintext: &str, secret_key_hex: &str) -> Result<String, CipherError> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }

    let key = decode_key(secret_key_hex)?;
    let iv = &key[..BLOCK_SIZE];
    let data = plaintext.as_bytes();

    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        24 => Aes192CbcEnc::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        _ => Aes256CbcEnc::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    };

    Ok(STANDARD.encode(ciphertext))
}

/// 解密 [`encrypt`] 生成的密文
pub fn decrypt(ciphertext_base64: &str, secret_key_hex: &str) -> Result<String, CipherError> {
    if ciphertext_base64.is_empty() {
        return Ok(String::new());
    }

    let key = decode_key(secret_key_hex)?;
    let iv = &key[..BLOCK_SIZE];
    let data = STANDARD
        .decode(ciphertext_base64)
        .map_err(|e| CipherError::InvalidCiphertext(e.to_string()))?;

    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidCiphertext(format!(
            "length {} is not a multiple of the block size",
            data.len()
        )));
    }

    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
        24 => Aes192CbcDec::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
        _ => Aes256CbcDec::new_from_slices(&key, iv)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
    }
    .map_err(|_| CipherError::InvalidPadding)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_256: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const KEY_128: &str = "2b7e151628aed2a6abf7158809cf4f3c";

    #[test]
    fn test_encrypt_is_deterministic() {
        let a = encrypt("0912345678", KEY_256).unwrap();
        let b = encrypt("0912345678", KEY_256).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, "0912345678");
        assert_eq!(decrypt(&a, KEY_256).unwrap(), "0912345678");
    }

    #[test]
    fn test_supports_aes128_keys() {
        let ct = encrypt("hello world", KEY_128).unwrap();
        assert_eq!(decrypt(&ct, KEY_128).unwrap(), "hello world");
    }

    #[test]
    fn test_empty_plaintext_passes_through() {
        assert_eq!(encrypt("", KEY_256).unwrap(), "");
        assert_eq!(decrypt("", KEY_256).unwrap(), "");
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        assert!(matches!(
            encrypt("x", "zz"),
            Err(CipherError::InvalidKeyEncoding(_))
        ));
        assert_eq!(encrypt("x", "0011"), Err(CipherError::InvalidKeyLength(2)));
    }

    #[test]
    fn test_decrypt_rejects_plaintext_input() {
        assert!(decrypt("not-base64!!", KEY_256).is_err());
        // valid base64, wrong length
        assert!(decrypt("YWJj", KEY_256).is_err());
    }
}
