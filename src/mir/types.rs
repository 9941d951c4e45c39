//! Entity index spaces and the analysis `Type` lattice for the MIR layer.

use crate::bytecode::ValueType;
use crate::declare_entity;

// Per-module index spaces. Deliberately distinct types from the bytecode
// layer's `FuncIdx`/`GlobalIdx`/etc: a function survives translation under
// a new identity, so a MIR index must never be confused for a bytecode one.
declare_entity!(MirFunc, "mfunc");
declare_entity!(MirGlobal, "mglobal");
declare_entity!(MirMemory, "mmemory");
declare_entity!(MirTable, "mtable");
declare_entity!(MirData, "mdata");
declare_entity!(MirElem, "melem");

// Per-function index spaces.
declare_entity!(Block, "block");
declare_entity!(Value, "v");
declare_entity!(Local, "local");

/// The type-inference pass's lattice, distinct from the bytecode
/// `ValueType`: a call or a `Pack` may produce more or fewer values than
/// a single primitive.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    Primitive(ValueType),
    Aggregate(Vec<ValueType>),
    Unit,
    #[default]
    Bottom,
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::Primitive(t) => write!(f, "{t}"),
            Type::Aggregate(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Type::Unit => write!(f, "unit"),
            Type::Bottom => write!(f, "bottom"),
        }
    }
}
