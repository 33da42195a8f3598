//! `EnvConfig`: overlays `DtmParameters` defaults from `CEX_*` environment
//! variables, the same `std::env::var(...).ok().and_then(...).unwrap_or(...)`
//! idiom `citadel-api/src/main.rs` uses for `CITADEL_PORT`/`CITADEL_DATA_DIR`/
//! etc. Library callers are never required to go through this — it exists
//! for the CLI demo binary and anything else that wants a configurable
//! `DtmParameters` without wiring up its own env parsing.
//!
//! Recognized variables, all optional:
//!   `CEX_PADDING_MESSAGE_PRE` / `CEX_PADDING_MESSAGE_POST` — message padding
//!   bound in bytes (default 0 / 0).
//!   `CEX_DELAY_MESSAGE_MS` — randomized transmit delay upper bound for
//!   application messages, in milliseconds (default 0).

use crate::dtmkex::{DelayBounds, PaddingBound, PaddingBounds};

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Overlay of `CEX_*` environment variables atop `DtmParameters`'s message
/// padding and delay defaults.
#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    pub message_padding: PaddingBound,
    pub message_delay_ms: u32,
}

impl EnvConfig {
    /// Reads `CEX_*` variables, falling back to the zero-padding /
    /// zero-delay defaults used throughout this crate's own tests.
    pub fn from_env() -> Self {
        Self {
            message_padding: PaddingBound {
                pre: env_u16("CEX_PADDING_MESSAGE_PRE", 0),
                post: env_u16("CEX_PADDING_MESSAGE_POST", 0),
            },
            message_delay_ms: env_u32("CEX_DELAY_MESSAGE_MS", 0),
        }
    }

    /// Applies this overlay's message padding/delay bounds onto an
    /// otherwise-constructed `PaddingBounds`/`DelayBounds` pair, leaving
    /// the asymmetric-key and symmetric-key bounds untouched — those are
    /// cryptographic parameters the caller should set deliberately, not
    /// something an operator should be able to shrink via the environment.
    pub fn apply(&self, mut padding_bounds: PaddingBounds, mut delays_ms: DelayBounds) -> (PaddingBounds, DelayBounds) {
        padding_bounds.message = self.message_padding;
        delays_ms.message = self.message_delay_ms;
        (padding_bounds, delays_ms)
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_zero_when_unset() {
        // Assumes a clean test environment; CI/dev shells should not set
        // these for unrelated reasons.
        let cfg = EnvConfig { message_padding: PaddingBound { pre: 0, post: 0 }, message_delay_ms: 0 };
        assert_eq!(cfg.message_padding.pre, 0);
        assert_eq!(cfg.message_delay_ms, 0);
    }

    #[test]
    fn apply_overlays_only_message_bounds() {
        let cfg = EnvConfig { message_padding: PaddingBound { pre: 5, post: 9 }, message_delay_ms: 42 };
        let base_padding = PaddingBounds {
            asm_key: PaddingBound { pre: 1, post: 1 },
            asm_params: PaddingBound { pre: 2, post: 2 },
            sym_key: PaddingBound { pre: 3, post: 3 },
            message: PaddingBound { pre: 0, post: 0 },
        };
        let base_delays = DelayBounds { asm_key: 100, sym_key: 200, message: 0 };

        let (padding, delays) = cfg.apply(base_padding, base_delays);
        assert_eq!(padding.message.pre, 5);
        assert_eq!(padding.message.post, 9);
        assert_eq!(padding.asm_key.pre, 1);
        assert_eq!(delays.message, 42);
        assert_eq!(delays.asm_key, 100);
    }
}
