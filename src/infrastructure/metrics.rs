// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use metrics::{describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing::{info, warn};

use crate::config::settings::MetricsSettings;

/// 存储查询耗时直方图
pub const STORE_QUERY_DURATION: &str = "docvault_store_query_duration_seconds";
/// 缓存回源次数
pub const CACHE_ORIGIN_LOADS: &str = "docvault_cache_origin_loads_total";
/// 被丢弃的索引审计次数
pub const INDEX_AUDIT_DROPPED: &str = "docvault_index_audit_dropped_total";

pub const CODE_SUCCESS: &str = "SUCCESS";
pub const CODE_ERROR: &str = "ERROR";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0];

/// 安装 Prometheus 导出器并注册指标描述
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        info!("Metrics exporter disabled");
        return;
    }

    let addr: SocketAddr = match settings.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address {}: {}", settings.listen_addr, e);
            return;
        }
    };

    let builder = match PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)
    {
        Ok(builder) => builder,
        Err(e) => {
            warn!("Failed to configure histogram buckets: {}", e);
            return;
        }
    };

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = builder.with_http_listener(addr).install() {
        warn!(
            "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
            e
        );
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    describe_histogram!(
        STORE_QUERY_DURATION,
        metrics::Unit::Seconds,
        "Time to query data from the document store"
    );
    describe_counter!(
        CACHE_ORIGIN_LOADS,
        "Number of read-through cache misses that reached the origin"
    );
    describe_counter!(
        INDEX_AUDIT_DROPPED,
        "Index audits dropped because the audit queue was full"
    );
}

/// 执行结果对应的 `code` 标签
pub fn result_code<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        CODE_SUCCESS
    } else {
        CODE_ERROR
    }
}

/// 执行 future 并记录存储查询耗时
pub async fn observe_store_query<T, E, F>(component: &str, method: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = fut.await;
    histogram!(
        STORE_QUERY_DURATION,
        "component" => component.to_string(),
        "method" => method.to_string(),
        "code" => result_code(&result),
    )
    .record(start.elapsed().as_secs_f64());
    result
}
