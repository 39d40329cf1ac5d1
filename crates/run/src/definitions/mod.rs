//! Built-in definition modules
//!
//! Each module builds one [`SimulationDef`]; `all()` is the registry the
//! `compile` and `run` subcommands discover definitions from.

pub mod drag_1d;
pub mod universal_gravitation;

use evolimo_dsl::SimulationDef;

pub fn all() -> Vec<SimulationDef> {
    vec![drag_1d::definition(), universal_gravitation::definition()]
}

pub fn by_name(name: &str) -> Option<SimulationDef> {
    all().into_iter().find(|def| def.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_definition_compiles() {
        for def in all() {
            let ir = evolimo_compiler::compile(&def)
                .unwrap_or_else(|e| panic!("{} failed to compile: {e}", def.name));
            assert!(!ir.operations.is_empty(), "{}", def.name);
        }
    }

    #[test]
    fn test_gravitation_shares_one_interaction_chain() {
        let ir = evolimo_compiler::compile(&universal_gravitation::definition()).unwrap();
        let scatters = ir
            .operations
            .iter()
            .filter(|op| op.op == evolimo_ir::OpKind::GridScatter)
            .count();
        let stencils = ir
            .operations
            .iter()
            .filter(|op| op.op == evolimo_ir::OpKind::Stencil)
            .count();
        assert_eq!(scatters, 1);
        assert_eq!(stencils, 1);
    }

    #[test]
    fn test_by_name() {
        assert!(by_name("drag_1d").is_some());
        assert!(by_name("missing").is_none());
    }
}
