// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use docvault::domain::models::entity::{Contact, Entity};
use docvault::infrastructure::crypto::field_codec::{
    decrypt_struct, encrypt_struct, encrypt_update, tag_map_for,
};
use docvault::infrastructure::database::repository::Model;
use serde_json::json;

const KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

fn entity() -> Entity {
    Entity::new(Contact {
        phone_number: "0901234567".to_string(),
        email: Some("owner@example.com".to_string()),
    })
}

#[test]
fn entity_contact_round_trips() {
    let tags = tag_map_for::<Entity>(Entity::encrypted_fields);
    assert!(tags.contains("contact.phone_number"));
    assert!(tags.contains("contact.email"));

    let original = entity();
    let encrypted = encrypt_struct(&original, KEY, &tags).unwrap();
    assert_ne!(encrypted.contact.phone_number, original.contact.phone_number);
    assert_ne!(encrypted.contact.email, original.contact.email);
    assert_eq!(encrypted.status, original.status);

    let decrypted = decrypt_struct(&encrypted, KEY, &tags).unwrap();
    assert_eq!(decrypted, original);
}

#[test]
fn empty_key_is_identity() {
    let tags = tag_map_for::<Entity>(Entity::encrypted_fields);
    let original = entity();
    assert_eq!(encrypt_struct(&original, "", &tags).unwrap(), original);
    assert_eq!(decrypt_struct(&original, "", &tags).unwrap(), original);

    let update = json!({ "$set": { "contact.phone_number": "0907654321" } });
    assert_eq!(encrypt_update(&update, "", &tags).unwrap(), update);
}

#[test]
fn update_encrypts_tagged_paths_only() {
    let tags = tag_map_for::<Entity>(Entity::encrypted_fields);
    let update = json!({ "$set": { "contact.phone_number": "0907654321", "status": "blocked" } });
    let encrypted = encrypt_update(&update, KEY, &tags).unwrap();
    assert_ne!(encrypted["$set"]["contact.phone_number"], "0907654321");
    assert_eq!(encrypted["$set"]["status"], "blocked");
}
