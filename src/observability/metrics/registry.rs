//! # Metrics Registry
//!
//! Process-wide Prometheus registry every metric in this crate registers with.

use prometheus::Registry;
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
