//! Execution context shared by every pass

use usp_core::Config;
use usp_hw::Target;

/// Configuration plus the resolved target description
#[derive(Debug, Clone)]
pub struct UspContext {
    pub config: Config,
    pub target: Target,
}

impl UspContext {
    pub fn new(config: Config) -> Self {
        let mut target = Target::for_core(config.target.core);
        target.tag_conversion &= config.codegen.tag_conversion;
        target.hw_swizzle &= config.codegen.hw_swizzle;
        target.max_iterators = target.iterator_cap(config.limits.max_iterators);
        tracing::debug!(
            "target {}: {} iterators, {} PA regs, TAG conversion {}, HW swizzle {}",
            config.target.core.name(),
            target.max_iterators,
            target.pa_bank_size,
            target.tag_conversion,
            target.hw_swizzle
        );
        Self { config, target }
    }

    /// Primary attribute registers the scheduler may hand out
    pub fn pa_budget(&self) -> u32 {
        self.target
            .pa_bank_size
            .saturating_sub(self.config.limits.reserved_pa_regs)
    }
}

impl Default for UspContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usp_core::CoreKind;

    #[test]
    fn test_config_overrides() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx543;
        config.codegen.hw_swizzle = false;
        config.limits.max_iterators = Some(12);
        config.limits.reserved_pa_regs = 8;
        let ctx = UspContext::new(config);
        assert!(!ctx.target.hw_swizzle);
        assert!(ctx.target.tag_conversion);
        assert_eq!(ctx.target.max_iterators, 12);
        assert_eq!(ctx.pa_budget(), ctx.target.pa_bank_size - 8);
    }
}
