//! Compile-time name resolution.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::template::CompilableTemplate;

/// What a component manager needs from the calling convention.
///
/// Computed once per component definition. A component whose capabilities
/// report no `prepare_args` and whose layout has no eval symbols may be
/// invoked through the static path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentCapabilities {
    /// The layout is only known at runtime.
    pub dynamic_layout: bool,
    pub dynamic_tag: bool,
    /// The manager rewrites arguments before creation (forces the dynamic path).
    pub prepare_args: bool,
    /// The manager creates its own argument object.
    pub create_args: bool,
    pub attribute_hook: bool,
    pub element_hook: bool,
    pub dynamic_scope: bool,
}

impl ComponentCapabilities {
    const FLAGS: usize = 7;

    pub fn bits(&self) -> u32 {
        [
            self.dynamic_layout,
            self.dynamic_tag,
            self.prepare_args,
            self.create_args,
            self.attribute_hook,
            self.element_hook,
            self.dynamic_scope,
        ]
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &on)| acc | ((on as u32) << i))
    }

    pub fn from_bits(bits: u32) -> Self {
        let on = |i: usize| i < Self::FLAGS && bits & (1 << i) != 0;
        Self {
            dynamic_layout: on(0),
            dynamic_tag: on(1),
            prepare_args: on(2),
            create_args: on(3),
            attribute_hook: on(4),
            element_hook: on(5),
            dynamic_scope: on(6),
        }
    }
}

/// Resolution of names to integer handles, disambiguated by a referer.
///
/// Lookups only produce handles; the objects behind them are reified
/// through `capabilities` / `layout` / `partial`, which keeps this
/// interface small.
pub trait CompileTimeLookup {
    fn capabilities(&self, handle: u32) -> ComponentCapabilities;
    fn layout(&self, handle: u32) -> Option<Rc<CompilableTemplate>>;
    fn partial(&self, handle: u32) -> Option<Rc<CompilableTemplate>>;

    fn lookup_helper(&self, name: &str, referer: &str) -> Option<u32>;
    fn lookup_modifier(&self, name: &str, referer: &str) -> Option<u32>;
    fn lookup_component_spec(&self, name: &str, referer: &str) -> Option<u32>;
    fn lookup_partial(&self, name: &str, referer: &str) -> Option<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_bits_roundtrip() {
        let caps = ComponentCapabilities {
            create_args: true,
            element_hook: true,
            ..Default::default()
        };
        assert_eq!(ComponentCapabilities::from_bits(caps.bits()), caps);
        assert_eq!(ComponentCapabilities::default().bits(), 0);
    }
}
