// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;

use docvault::config::settings::RegionSettings;
use docvault::infrastructure::database::region::RegionRouter;

fn router() -> RegionRouter {
    let mut collections = HashMap::new();
    collections.insert(
        "DEFAULT".to_string(),
        HashMap::from([(
            "entities".to_string(),
            vec!["VN::core".to_string(), "SEA::core".to_string()],
        )]),
    );
    collections.insert(
        "TEST".to_string(),
        HashMap::from([(
            "entities".to_string(),
            vec!["VN::core_test".to_string(), "SEA::core_test".to_string()],
        )]),
    );
    RegionRouter::with_overrides(&RegionSettings {
        collections,
        countries: HashMap::new(),
    })
}

#[test]
fn test_and_default_environments_do_not_mix() {
    let router = router();
    let default = router.resolve("entities", "DEFAULT");
    let test = router.resolve("entities", "test");

    assert_eq!(default, vec!["VN::core", "SEA::core"]);
    assert_eq!(test, vec!["VN::core_test", "SEA::core_test"]);
    assert!(test.iter().all(|name| name.ends_with("_test")));
}

#[test]
fn environment_without_table_falls_back_to_default() {
    assert_eq!(router().resolve("entities", "STAGING"), vec!["VN::core", "SEA::core"]);
    assert!(router().resolve("unknown_collection", "DEFAULT").is_empty());
}

#[test]
fn every_known_country_maps_to_a_region() {
    let router = router();
    for country in ["VN", "TW", "HK", "SG", "MY", "ID", "TH", "PH", "SEA"] {
        let region = router.country_to_region(country);
        assert!(matches!(region, Some("VN") | Some("SEA")), "{}", country);
    }
    assert_eq!(router.country_to_region("US"), None);
    // exact match only
    assert_eq!(router.country_to_region("vn"), None);
}
