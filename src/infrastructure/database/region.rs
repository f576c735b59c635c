// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;

use crate::config::settings::RegionSettings;

/// 默认映射表使用的环境名称
pub const DEFAULT_ENVIRONMENT: &str = "DEFAULT";

/// 连接名称分隔符，`REGION::db`
pub const CONN_NAME_SEPARATOR: &str = "::";

const VGR: &[&str] = &[
    "config_active_games",
    "config_active_code",
    "config_active_reward",
    "redeem_code_transaction",
    "config_vga_login",
];

const VGR_SHARED: &[&str] = &["code_management", "generation_request"];

const LOYALTY: &[&str] = &[
    "config_games",
    "config_currency",
    "lock_amount",
    "lock_amount_history",
    "order",
    "point",
    "point_transaction",
    "code_alias",
    "redeem_code_history",
    "privilege",
    "configs",
    "privilege_accumulation",
    "privilege_benefit",
    "privilege_condition",
    "privilege_transaction",
    "tier",
    "tier_version",
    "tier_history",
    "profile",
    "transaction_report",
    "schedule_report",
    "report",
];

const RECEIVER: &[&str] = &["supported_game_product", "raw_payment_order"];

const PROMOTION: &[&str] = &[
    "campaign",
    "language",
    "transaction_reward",
    "compensation_history",
    "redeem_history",
    "reward_detail",
    "reward",
    "stock",
    "query_template",
    "template_config",
    "template",
    "rule",
    "product_metadata",
    "product",
    "code",
    "placement",
    "promotion",
];

const COUNTRIES: &[(&str, &str)] = &[
    ("VN", "VN"),
    ("TW", "SEA"),
    ("HK", "SEA"),
    ("SG", "SEA"),
    ("MY", "SEA"),
    ("ID", "SEA"),
    ("TH", "SEA"),
    ("PH", "SEA"),
    ("SEA", "SEA"),
];

type CollectionTable = HashMap<String, Vec<String>>;

fn add(table: &mut CollectionTable, collections: &[&str], names: &[&str]) {
    for collection in collections {
        table.insert(
            collection.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }
}

fn builtin_tables() -> HashMap<String, CollectionTable> {
    let mut default = CollectionTable::new();
    add(&mut default, VGR, &["VN::vgr", "SEA::vgr"]);
    add(&mut default, VGR_SHARED, &["VN::vgr", "SEA::vgr"]);
    add(&mut default, LOYALTY, &["VN::loyalty"]);
    add(&mut default, RECEIVER, &["VN::receiver"]);
    add(&mut default, PROMOTION, &["VN::promotion"]);

    let mut test = CollectionTable::new();
    add(&mut test, VGR, &["VN::vgr_test", "SEA::vgr_test"]);
    // shared with the default deployment
    add(&mut test, VGR_SHARED, &["VN::vgr", "SEA::vgr"]);
    add(&mut test, LOYALTY, &["VN::loyalty_test"]);
    add(&mut test, RECEIVER, &["VN::receiver_test"]);
    add(&mut test, PROMOTION, &["VN::promotion_test"]);

    let mut tables = HashMap::new();
    tables.insert(DEFAULT_ENVIRONMENT.to_string(), default);
    tables.insert("TEST".to_string(), test);
    tables
}

/// 区域路由
///
/// 两张静态映射表：
/// - 环境 -> 集合 -> 有序连接名称列表
/// - 国家代码 -> 区域
///
/// 构造后只读。
#[derive(Debug, Clone)]
pub struct RegionRouter {
    collections: HashMap<String, CollectionTable>,
    countries: HashMap<String, String>,
}

impl Default for RegionRouter {
    fn default() -> Self {
        Self {
            collections: builtin_tables(),
            countries: COUNTRIES
                .iter()
                .map(|(c, r)| (c.to_string(), r.to_string()))
                .collect(),
        }
    }
}

impl RegionRouter {
    /// 内置映射表加上配置中的覆盖项
    pub fn with_overrides(settings: &RegionSettings) -> Self {
        let mut router = Self::default();
        for (env, table) in &settings.collections {
            let target = router.collections.entry(env.to_uppercase()).or_default();
            for (collection, names) in table {
                target.insert(collection.clone(), names.clone());
            }
        }
        for (country, region) in &settings.countries {
            router
                .countries
                .insert(country.to_uppercase(), region.to_uppercase());
        }
        router
    }

    /// 集合在指定环境下的连接名称
    ///
    /// 环境不区分大小写；环境表中没有该集合时回退到 `DEFAULT` 表。
    /// 两张表都没有时返回空列表。
    pub fn resolve(&self, collection: &str, environment: &str) -> Vec<String> {
        let env = environment.to_uppercase();
        self.collections
            .get(&env)
            .and_then(|table| table.get(collection))
            .or_else(|| {
                self.collections
                    .get(DEFAULT_ENVIRONMENT)
                    .and_then(|table| table.get(collection))
            })
            .cloned()
            .unwrap_or_default()
    }

    /// 国家代码对应的区域
    pub fn country_to_region(&self, country: &str) -> Option<&str> {
        self.countries.get(country).map(String::as_str)
    }
}

/// 拆分 `REGION::db`，必须恰好两部分
pub fn split_conn_name(conn_name: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = conn_name.split(CONN_NAME_SEPARATOR).collect();
    match parts.as_slice() {
        [region, db] if !region.is_empty() && !db.is_empty() => Some((*region, *db)),
        _ => None,
    }
}

pub fn conn_name(region: &str, db: &str) -> String {
    format!("{}{}{}", region, CONN_NAME_SEPARATOR, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_environment_is_not_mixed_with_default() {
        let router = RegionRouter::default();
        assert_eq!(
            router.resolve("config_active_games", "test"),
            vec!["VN::vgr_test", "SEA::vgr_test"]
        );
        assert_eq!(
            router.resolve("config_active_games", "DEFAULT"),
            vec!["VN::vgr", "SEA::vgr"]
        );
        assert_eq!(router.resolve("point", "TEST"), vec!["VN::loyalty_test"]);
        assert_eq!(router.resolve("point", "prod"), vec!["VN::loyalty"]);
    }

    #[test]
    fn test_shared_collections_in_test_environment() {
        let router = RegionRouter::default();
        assert_eq!(router.resolve("code_management", "TEST"), vec!["VN::vgr", "SEA::vgr"]);
    }

    #[test]
    fn test_unknown_collection_resolves_empty() {
        assert!(RegionRouter::default().resolve("nope", "TEST").is_empty());
    }

    #[test]
    fn test_country_map() {
        let router = RegionRouter::default();
        assert_eq!(router.country_to_region("VN"), Some("VN"));
        for country in ["TW", "HK", "SG", "MY", "ID", "TH", "PH", "SEA"] {
            assert_eq!(router.country_to_region(country), Some("SEA"));
        }
        assert_eq!(router.country_to_region("US"), None);
        assert_eq!(router.country_to_region("vn"), None);
    }

    #[test]
    fn test_overrides_extend_tables() {
        let mut settings = RegionSettings::default();
        settings
            .collections
            .entry("test".to_string())
            .or_default()
            .insert("entities".to_string(), vec!["SEA::core_test".to_string()]);
        settings.countries.insert("kr".to_string(), "sea".to_string());

        let router = RegionRouter::with_overrides(&settings);
        assert_eq!(router.resolve("entities", "TEST"), vec!["SEA::core_test"]);
        assert!(router.resolve("entities", "DEFAULT").is_empty());
        assert_eq!(router.country_to_region("KR"), Some("SEA"));
        // builtin entries survive
        assert_eq!(router.resolve("point", "TEST"), vec!["VN::loyalty_test"]);
    }

    #[test]
    fn test_split_conn_name() {
        assert_eq!(split_conn_name("VN::vgr"), Some(("VN", "vgr")));
        assert_eq!(split_conn_name("VN"), None);
        assert_eq!(split_conn_name("VN::a::b"), None);
        assert_eq!(split_conn_name("::a"), None);
        assert_eq!(conn_name("SEA", "vgr"), "SEA::vgr");
    }
}
