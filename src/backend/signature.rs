//! The function/global signature alphabet: `I,J,F,D` for
//! `I32,I64,F32,F64`. `call_indirect` sites compare this string against a
//! table slot's stored signature to reject a mismatched callee.

use crate::bytecode::ValueType;
use crate::error::{BackendError, BackendResult};

pub fn type_char(ty: ValueType) -> BackendResult<char> {
    match ty {
        ValueType::I32 => Ok('I'),
        ValueType::I64 => Ok('J'),
        ValueType::F32 => Ok('F'),
        ValueType::F64 => Ok('D'),
        ValueType::V128 => Err(BackendError::SignatureTypeUnrepresentable),
    }
}

/// `<param chars>:<result chars>`, e.g. `II:J` for `(i32, i32) -> i64`.
pub fn signature_string(params: &[ValueType], results: &[ValueType]) -> BackendResult<String> {
    let mut s = String::with_capacity(params.len() + results.len() + 1);
    for &p in params {
        s.push(type_char(p)?);
    }
    s.push(':');
    for &r in results {
        s.push(type_char(r)?);
    }
    Ok(s)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_params_then_results() {
        assert_eq!(signature_string(&[ValueType::I32, ValueType::I32], &[ValueType::I64]).unwrap(), "II:J");
        assert_eq!(signature_string(&[], &[]).unwrap(), ":");
    }

    #[test]
    fn v128_is_rejected() {
        assert!(matches!(type_char(ValueType::V128), Err(BackendError::SignatureTypeUnrepresentable)));
    }
}
