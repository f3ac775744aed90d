//! Validation gate
//!
//! Pre-flight checks run before a plan is built. Warnings are advisory:
//! the caller surfaces them and the user confirms or cancels. An empty
//! list means the save proceeds directly.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::model::ConfigState;
use crate::store::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    TokenBalanceMismatch,
    PositionTokenMismatch,
}

/// One human-readable warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub message: String,
    /// Token symbols the warning is about.
    pub symbols: Vec<String>,
    /// Position ids the warning is about (position mismatch only).
    pub positions: Vec<String>,
}

/// Inspect the desired configuration against the vault's holdings.
pub fn check(vault: &Vault, desired: &ConfigState) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    // Tokens held with non-zero balance but absent from the target set
    // get swapped into target tokens on first execution.
    let mut stray: Vec<String> = vault
        .balances
        .iter()
        .filter(|(symbol, balance)| {
            balance.raw > U256::ZERO && !desired.target_tokens.contains(*symbol)
        })
        .map(|(symbol, _)| symbol.clone())
        .collect();
    stray.sort();
    if !stray.is_empty() {
        warnings.push(ValidationWarning {
            kind: WarningKind::TokenBalanceMismatch,
            message: format!(
                "The vault holds {} which are not selected as target tokens. \
                 These balances will be swapped into the target tokens on first execution.",
                stray.join(", ")
            ),
            symbols: stray,
            positions: vec![],
        });
    }

    // Positions whose pool tokens are not all targeted get closed on
    // first execution.
    let mut mismatched_positions = Vec::new();
    let mut mismatched_symbols = Vec::new();
    for position in &vault.positions {
        let mut missing: Vec<&str> = Vec::new();
        if !desired.target_tokens.contains(&position.token0) {
            missing.push(&position.token0);
        }
        if !desired.target_tokens.contains(&position.token1) {
            missing.push(&position.token1);
        }
        if !missing.is_empty() {
            mismatched_positions.push(position.id.clone());
            for symbol in missing {
                if !mismatched_symbols.contains(&symbol.to_string()) {
                    mismatched_symbols.push(symbol.to_string());
                }
            }
        }
    }
    if !mismatched_positions.is_empty() {
        warnings.push(ValidationWarning {
            kind: WarningKind::PositionTokenMismatch,
            message: format!(
                "{} position(s) hold {} which are not selected as target tokens. \
                 Those positions will be closed on first execution.",
                mismatched_positions.len(),
                mismatched_symbols.join(", ")
            ),
            symbols: mismatched_symbols,
            positions: mismatched_positions,
        });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PositionRef, TokenBalance};
    use alloy_primitives::address;
    use rust_decimal::Decimal;

    fn vault() -> Vault {
        Vault::new(
            address!("0000000000000000000000000000000000000001"),
            address!("0000000000000000000000000000000000000002"),
            "v",
        )
    }

    fn desired(tokens: &[&str]) -> ConfigState {
        ConfigState {
            target_tokens: tokens.iter().map(|s| s.to_string()).collect(),
            ..ConfigState::default()
        }
    }

    #[test]
    fn no_warnings_when_holdings_match() {
        let mut v = vault();
        v.balances.insert(
            "USDC".into(),
            TokenBalance { raw: U256::from(100u64), decimals: 6, fiat_value: Decimal::ONE_HUNDRED },
        );
        assert!(check(&v, &desired(&["USDC"])).is_empty());
    }

    #[test]
    fn zero_balances_are_ignored() {
        let mut v = vault();
        v.balances.insert(
            "WETH".into(),
            TokenBalance { raw: U256::ZERO, decimals: 18, fiat_value: Decimal::ZERO },
        );
        assert!(check(&v, &desired(&["USDC"])).is_empty());
    }

    #[test]
    fn stray_balance_produces_single_warning() {
        let mut v = vault();
        for symbol in ["WETH", "WBTC"] {
            v.balances.insert(
                symbol.into(),
                TokenBalance { raw: U256::from(1u64), decimals: 18, fiat_value: Decimal::ONE },
            );
        }
        let warnings = check(&v, &desired(&["USDC"]));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::TokenBalanceMismatch);
        assert_eq!(warnings[0].symbols, vec!["WBTC".to_string(), "WETH".to_string()]);
        assert!(warnings[0].message.contains("swapped"));
    }

    #[test]
    fn position_with_unmatched_token_is_flagged() {
        let mut v = vault();
        v.positions.push(PositionRef { id: "12".into(), token0: "USDC".into(), token1: "WETH".into() });
        v.positions.push(PositionRef { id: "13".into(), token0: "USDC".into(), token1: "USDT".into() });

        let warnings = check(&v, &desired(&["USDC", "USDT"]));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::PositionTokenMismatch);
        assert_eq!(warnings[0].positions, vec!["12".to_string()]);
        assert_eq!(warnings[0].symbols, vec!["WETH".to_string()]);
        assert!(warnings[0].message.contains("closed"));
    }
}
