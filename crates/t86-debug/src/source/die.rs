//! Debug information entries (DIEs): the tree describing a program's
//! functions, variables, and their types.
//!
//! Grounded in `t86/debugger/Source/Die.h`: a recursive tree, one node per
//! compilation unit, function, lexical block, or variable, with each
//! variable node owning a [`crate::source::loc_expr::LocExpr`] describing
//! where to find it at runtime.

use std::collections::HashMap;

use crate::source::loc_expr::LocExpr;
use crate::source::type_info::Type;

/// One node of the debug-info tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Die {
    /// The root compilation-unit node.
    CompilationUnit { children: Vec<Die> },
    /// A function definition.
    Function {
        name: String,
        /// Address of the function's first instruction.
        low_pc: u64,
        /// Address one past the function's last instruction.
        high_pc: u64,
        children: Vec<Die>,
    },
    /// A lexical block (e.g. the body of an `if`), scoping its children's
    /// visibility to a sub-range of the enclosing function.
    LexicalBlock { low_pc: u64, high_pc: u64, children: Vec<Die> },
    /// A variable or parameter.
    Variable { name: String, ty: Type, location: LocExpr },
}

impl Die {
    /// Finds the innermost [`Die::Function`] whose `[low_pc, high_pc)`
    /// range contains `pc`, searching the whole tree rooted at `self`.
    #[must_use]
    pub fn function_containing(&self, pc: u64) -> Option<&Die> {
        match self {
            Self::CompilationUnit { children } => children.iter().find_map(|c| c.function_containing(pc)),
            Self::Function { low_pc, high_pc, .. } if (*low_pc..*high_pc).contains(&pc) => Some(self),
            _ => None,
        }
    }

    /// Collects every variable visible at `pc` within this subtree: all
    /// variables of the innermost enclosing function and lexical blocks
    /// whose range contains `pc`, with inner scopes shadowing outer ones
    /// of the same name.
    #[must_use]
    pub fn variables_visible_at(&self, pc: u64) -> HashMap<String, (&Type, &LocExpr)> {
        let mut visible = HashMap::new();
        self.collect_visible(pc, &mut visible);
        visible
    }

    fn collect_visible<'a>(&'a self, pc: u64, out: &mut HashMap<String, (&'a Type, &'a LocExpr)>) {
        match self {
            Self::CompilationUnit { children } => {
                for child in children {
                    child.collect_visible(pc, out);
                }
            }
            Self::Function { low_pc, high_pc, children, .. } | Self::LexicalBlock { low_pc, high_pc, children } => {
                if (*low_pc..*high_pc).contains(&pc) {
                    for child in children {
                        child.collect_visible(pc, out);
                    }
                }
            }
            Self::Variable { name, ty, location } => {
                out.insert(name.clone(), (ty, location));
            }
        }
    }

    /// The function's name, if this is a [`Die::Function`].
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Function { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}
