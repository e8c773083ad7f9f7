//! Pool configuration.

/// Configuration for a [`crate::Pool`].
///
/// The defaults reproduce the plain allocator behaviour: freed bytes are
/// left as they are and new payloads are not cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Byte written over a payload when it is freed. Useful to make
    /// use-after-free bugs visible in a debugger.
    pub poison_on_free: Option<u8>,
    /// Whether payloads are zero filled before being handed out.
    pub zero_on_alloc: bool,
}

impl PoolConfig {
    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            poison_on_free: None,
            zero_on_alloc: false,
        }
    }

    /// Fills freed payloads with `byte`.
    pub const fn with_poison(mut self, byte: u8) -> Self {
        self.poison_on_free = Some(byte);
        self
    }

    /// Enables or disables zero filling of new payloads.
    pub const fn with_zeroed(mut self, enabled: bool) -> Self {
        self.zero_on_alloc = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config, PoolConfig::new());
        assert_eq!(config.poison_on_free, None);
        assert!(!config.zero_on_alloc);
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new().with_poison(0xDD).with_zeroed(true);
        assert_eq!(config.poison_on_free, Some(0xDD));
        assert!(config.zero_on_alloc);
    }
}
