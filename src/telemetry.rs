//! Optional `tracing` subscriber setup for embedders and tests.
//!
//! The library itself only emits events; nothing is printed unless a
//! subscriber is installed, either by the host or through [`init_tracing`].

#[cfg(feature = "telemetry")]
use std::sync::OnceLock;

#[cfg(feature = "telemetry")]
use tracing_subscriber::{EnvFilter, fmt};

/// Install a fmt subscriber once per process. `RUST_LOG` overrides the
/// default `ir_borrowck=info` filter. A subscriber installed by the host
/// wins; this is then a no-op.
#[cfg(feature = "telemetry")]
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ir_borrowck=info"));
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing() {}

/// Evaluate a block inside a named phase span and record how long it took.
#[macro_export]
macro_rules! instrument_block {
    ($name:expr, $block:block) => {{
        #[cfg(feature = "telemetry")]
        {
            let span = tracing::debug_span!("phase", name = $name);
            let _guard = span.enter();
            let started = std::time::Instant::now();
            let out = (|| $block)();
            tracing::trace!(elapsed_us = started.elapsed().as_micros() as u64, "phase done");
            out
        }
        #[cfg(not(feature = "telemetry"))]
        {
            (|| $block)()
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn instrumented_blocks_return_their_value() {
        let total = crate::instrument_block!("sum", { (1..=4).sum::<u32>() });
        assert_eq!(total, 10);
    }
}
