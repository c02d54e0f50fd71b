//! Block and layout resolution strategies.
//!
//! The builder emits everything except references to nested blocks and
//! component layouts; those go through a [`BuilderStrategy`] chosen once per
//! pipeline.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::builder::OpcodeBuilder;
use super::error::Result;
use super::template::CompilableTemplate;
use crate::vm::{Op, Primitive};

pub trait BuilderStrategy {
    /// Push a block (or null) so that `resolve_block` can turn it into a handle.
    fn push_block(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        block: Option<&Rc<CompilableTemplate>>,
    ) -> Result<()>;
    fn resolve_block(&self, builder: &mut OpcodeBuilder<'_>);
    fn push_layout(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        layout: Option<&Rc<CompilableTemplate>>,
    ) -> Result<()>;
    fn resolve_layout(&self, builder: &mut OpcodeBuilder<'_>);
    /// Call `block` directly, leaving nothing on the stack.
    fn invoke_static(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        block: &Rc<CompilableTemplate>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Defer compilation of nested blocks to a runtime `CompileBlock`.
    #[default]
    Lazy,
    /// Compile nested blocks immediately and embed their handles.
    Eager,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Lazy => write!(f, "lazy"),
            Strategy::Eager => write!(f, "eager"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lazy" => Ok(Strategy::Lazy),
            "eager" => Ok(Strategy::Eager),
            other => Err(format!("unknown strategy `{}` (expected lazy or eager)", other)),
        }
    }
}

impl BuilderStrategy for Strategy {
    fn push_block(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        block: Option<&Rc<CompilableTemplate>>,
    ) -> Result<()> {
        match (self, block) {
            (_, None) => builder.primitive(&Primitive::Null),
            (Strategy::Lazy, Some(block)) => builder.push_other(block.clone()),
            (Strategy::Eager, Some(block)) => {
                let handle = builder.compile_nested(block)?;
                builder.primitive(&Primitive::Number(handle.0 as f64));
            }
        }
        Ok(())
    }

    fn resolve_block(&self, builder: &mut OpcodeBuilder<'_>) {
        if *self == Strategy::Lazy {
            builder.push(Op::CompileBlock, 0, 0, 0);
        }
    }

    fn push_layout(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        layout: Option<&Rc<CompilableTemplate>>,
    ) -> Result<()> {
        self.push_block(builder, layout)
    }

    fn resolve_layout(&self, builder: &mut OpcodeBuilder<'_>) {
        self.resolve_block(builder)
    }

    fn invoke_static(
        &self,
        builder: &mut OpcodeBuilder<'_>,
        block: &Rc<CompilableTemplate>,
    ) -> Result<()> {
        match self {
            Strategy::Lazy => {
                builder.push_other(block.clone());
                builder.push(Op::CompileBlock, 0, 0, 0);
                builder.push(Op::InvokeVirtual, 0, 0, 0);
            }
            Strategy::Eager => {
                let handle = builder.compile_nested(block)?;
                builder.push(Op::InvokeStatic, handle.0, 0, 0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("lazy".parse::<Strategy>(), Ok(Strategy::Lazy));
        assert_eq!("eager".parse::<Strategy>(), Ok(Strategy::Eager));
        assert!("greedy".parse::<Strategy>().is_err());
        assert_eq!(Strategy::default().to_string(), "lazy");
    }
}
