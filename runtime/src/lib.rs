// Copyright 2026 Rankharvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! rankharvest: short-video sales ranking harvester.
//!
//! Acquisition (throttled HTTP and browser network capture) stores raw
//! responses as source records; the ETL processors decode them into
//! dimension and fact tables.

pub mod acquisition;
pub mod cli;
pub mod codec;
pub mod config;
pub mod etl;
pub mod fetcher;
pub mod jobs;
pub mod period;
pub mod renderer;
pub mod scheduler;
pub mod store;
pub mod trust;
