// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod entity_api_test;
pub mod health_check;
pub mod helpers;
pub mod multi_region_test;
pub mod read_through_test;
pub mod sql_store_test;
