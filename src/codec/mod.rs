//! Parameter Codec
//!
//! Translates typed strategy parameter values into their on-chain integer
//! encodings and back, and lowers them to ABI values for setter calls.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{I256, U256};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale applied to `decimal` parameters at the ABI boundary.
pub const DECIMAL_SCALE: u32 = 6;

/// Parameter value kinds supported by strategy descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    Percent,
    FiatCurrency,
    Integer,
    Decimal,
    Boolean,
    Select,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Percent => write!(f, "percent"),
            ParamKind::FiatCurrency => write!(f, "fiat-currency"),
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Decimal => write!(f, "decimal"),
            ParamKind::Boolean => write!(f, "boolean"),
            ParamKind::Select => write!(f, "select"),
        }
    }
}

/// A typed parameter value as held by the desired-state model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ParamValue {
    Percent(Decimal),
    FiatCurrency(Decimal),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Select(i64),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Percent(_) => ParamKind::Percent,
            ParamValue::FiatCurrency(_) => ParamKind::FiatCurrency,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Decimal(_) => ParamKind::Decimal,
            ParamValue::Boolean(_) => ParamKind::Boolean,
            ParamValue::Select(_) => ParamKind::Select,
        }
    }
}

/// On-chain representation of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedParam {
    Int(i128),
    Bool(bool),
}

/// Codec failure modes
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("value for '{0}' does not fit the on-chain integer range")]
    OutOfRange(String),
    #[error("parameter '{param}' is a {expected}, got {got}")]
    KindMismatch {
        param: String,
        expected: ParamKind,
        got: ParamKind,
    },
    #[error("unknown select ordinal {0}")]
    UnknownOrdinal(i128),
}

/// Encode a typed value into its on-chain integer form.
///
/// Percent values become basis points, fiat amounts become cents, decimals
/// are scaled by 10^[`DECIMAL_SCALE`]. Rounding is half-up, matching the
/// round() the contracts were written against.
pub fn encode(param_id: &str, value: &ParamValue) -> Result<EncodedParam, CodecError> {
    let scaled = |d: &Decimal, scale: u32| -> Result<i128, CodecError> {
        let factor = Decimal::from(10i64.pow(scale));
        (*d * factor)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i128()
            .ok_or_else(|| CodecError::OutOfRange(param_id.to_string()))
    };

    Ok(match value {
        ParamValue::Percent(d) => EncodedParam::Int(scaled(d, 2)?),
        ParamValue::FiatCurrency(d) => EncodedParam::Int(scaled(d, 2)?),
        ParamValue::Integer(i) => EncodedParam::Int(*i as i128),
        ParamValue::Decimal(d) => EncodedParam::Int(scaled(d, DECIMAL_SCALE)?),
        ParamValue::Boolean(b) => EncodedParam::Bool(*b),
        ParamValue::Select(i) => EncodedParam::Int(*i as i128),
    })
}

/// Decode an on-chain integer back into the typed value for `kind`.
pub fn decode(param_id: &str, kind: ParamKind, raw: EncodedParam) -> Result<ParamValue, CodecError> {
    let int = |raw: EncodedParam| -> Result<i128, CodecError> {
        match raw {
            EncodedParam::Int(i) => Ok(i),
            EncodedParam::Bool(_) => Err(CodecError::KindMismatch {
                param: param_id.to_string(),
                expected: kind,
                got: ParamKind::Boolean,
            }),
        }
    };
    let unscaled = |raw: EncodedParam, scale: u32| -> Result<Decimal, CodecError> {
        let mut d = Decimal::from_i128(int(raw)?)
            .ok_or_else(|| CodecError::OutOfRange(param_id.to_string()))?;
        d.set_scale(scale)
            .map_err(|_| CodecError::OutOfRange(param_id.to_string()))?;
        Ok(d.normalize())
    };

    Ok(match kind {
        ParamKind::Percent => ParamValue::Percent(unscaled(raw, 2)?),
        ParamKind::FiatCurrency => ParamValue::FiatCurrency(unscaled(raw, 2)?),
        ParamKind::Integer => {
            let i = int(raw)?;
            ParamValue::Integer(
                i64::try_from(i).map_err(|_| CodecError::OutOfRange(param_id.to_string()))?,
            )
        }
        ParamKind::Decimal => ParamValue::Decimal(unscaled(raw, DECIMAL_SCALE)?),
        ParamKind::Boolean => match raw {
            EncodedParam::Bool(b) => ParamValue::Boolean(b),
            EncodedParam::Int(i) => ParamValue::Boolean(i != 0),
        },
        ParamKind::Select => {
            let i = int(raw)?;
            ParamValue::Select(
                i64::try_from(i).map_err(|_| CodecError::OutOfRange(param_id.to_string()))?,
            )
        }
    })
}

/// Lower an encoded parameter to the ABI value expected by a setter input.
///
/// `sol_type` is the canonical Solidity type string from the registry ABI
/// (e.g. "uint256", "int256", "bool").
pub fn lower(param_id: &str, encoded: EncodedParam, sol_type: &str) -> Result<DynSolValue, CodecError> {
    match (encoded, sol_type) {
        (EncodedParam::Bool(b), "bool") => Ok(DynSolValue::Bool(b)),
        (EncodedParam::Int(i), "bool") => Ok(DynSolValue::Bool(i != 0)),
        (EncodedParam::Bool(b), t) if t.starts_with("uint") => {
            Ok(DynSolValue::Uint(U256::from(b as u8), 256))
        }
        (EncodedParam::Int(i), t) if t.starts_with("uint") => {
            if i < 0 {
                return Err(CodecError::OutOfRange(param_id.to_string()));
            }
            Ok(DynSolValue::Uint(U256::from(i as u128), 256))
        }
        (EncodedParam::Int(i), t) if t.starts_with("int") => {
            Ok(DynSolValue::Int(I256::try_from(i).map_err(|_| {
                CodecError::OutOfRange(param_id.to_string())
            })?, 256))
        }
        _ => Err(CodecError::OutOfRange(param_id.to_string())),
    }
}

/// Raise an ABI return value back into an [`EncodedParam`].
pub fn raise(param_id: &str, value: &DynSolValue) -> Result<EncodedParam, CodecError> {
    match value {
        DynSolValue::Bool(b) => Ok(EncodedParam::Bool(*b)),
        DynSolValue::Uint(u, _) => {
            let i: i128 = (*u)
                .try_into()
                .map_err(|_| CodecError::OutOfRange(param_id.to_string()))?;
            Ok(EncodedParam::Int(i))
        }
        DynSolValue::Int(i, _) => {
            let i: i128 = (*i)
                .try_into()
                .map_err(|_| CodecError::OutOfRange(param_id.to_string()))?;
            Ok(EncodedParam::Int(i))
        }
        _ => Err(CodecError::OutOfRange(param_id.to_string())),
    }
}

/// Reverse-map an on-chain template enum through a descriptor's enum table.
///
/// Unmatched ordinals (including 0) read back as `None`, i.e. `custom`.
pub fn template_from_enum<'a>(
    table: &'a [(String, u8)],
    ordinal: u64,
) -> Option<&'a str> {
    table
        .iter()
        .find(|(_, e)| u64::from(*e) == ordinal)
        .map(|(id, _)| id.as_str())
}

/// Map a template selection to its on-chain enum. `None` (custom) is 0.
pub fn template_to_enum(table: &[(String, u8)], template: Option<&str>) -> u8 {
    match template {
        None => 0,
        Some(id) => table
            .iter()
            .find(|(t, _)| t == id)
            .map(|(_, e)| *e)
            .unwrap_or(0),
    }
}
