//! Bidirectional mapping between detector enum codes and client symbols.
//!
//! The mapping is checked for bijectivity when it is built, never at runtime:
//! a repeated symbol or a repeated code is a construction error.

use std::collections::HashMap;

use crate::error::{AppResult, DaqError};
use crate::value::{SymbolSet, ValueType};

/// Bijective symbol <-> hardware code table.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumTranslator {
    entries: Vec<(String, i64)>,
    by_symbol: HashMap<String, i64>,
    by_code: HashMap<i64, String>,
}

impl EnumTranslator {
    /// Build a translator from `(symbol, code)` pairs.
    ///
    /// Fails with [`DaqError::InvalidTranslation`] if the table is empty or if
    /// any symbol or code appears twice.
    pub fn new<I, S>(pairs: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut by_symbol = HashMap::new();
        let mut by_code = HashMap::new();

        for (symbol, code) in pairs {
            let symbol = symbol.into();
            if by_symbol.contains_key(&symbol) {
                return Err(DaqError::InvalidTranslation(format!(
                    "symbol '{}' mapped twice",
                    symbol
                )));
            }
            if let Some(existing) = by_code.get(&code) {
                return Err(DaqError::InvalidTranslation(format!(
                    "code {} mapped to both '{}' and '{}'",
                    code, existing, symbol
                )));
            }
            by_symbol.insert(symbol.clone(), code);
            by_code.insert(code, symbol.clone());
            entries.push((symbol, code));
        }

        if entries.is_empty() {
            return Err(DaqError::InvalidTranslation("empty mapping".into()));
        }

        Ok(Self {
            entries,
            by_symbol,
            by_code,
        })
    }

    /// Hardware code -> symbol.
    pub fn translate(&self, code: i64) -> Option<&str> {
        self.by_code.get(&code).map(String::as_str)
    }

    /// Symbol -> hardware code.
    pub fn translate_inverse(&self, symbol: &str) -> Option<i64> {
        self.by_symbol.get(symbol).copied()
    }

    /// The client-side symbol set, in declaration order.
    pub fn symbols(&self) -> SymbolSet {
        SymbolSet::new(self.entries.iter().map(|(s, _)| s.clone()))
    }

    /// Enum value type matching this translator.
    pub fn value_type(&self) -> ValueType {
        ValueType::Enum(self.symbols())
    }

    /// All `(symbol, code)` pairs in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(s, c)| (s.as_str(), *c))
    }

    /// Number of mapped values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a successfully constructed translator.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_modes() -> EnumTranslator {
        EnumTranslator::new([("Internal", 0), ("External", 1)]).unwrap()
    }

    #[test]
    fn test_round_trip_every_entry() {
        let t = EnumTranslator::new([
            ("Dynamic", 0),
            ("ForceSwitchG1", 1),
            ("ForceSwitchG2", 2),
            ("FixG1", 3),
            ("FixG2", 4),
            ("FixG0", 5),
        ])
        .unwrap();

        for (symbol, code) in t.entries() {
            assert_eq!(t.translate(t.translate_inverse(symbol).unwrap()), Some(symbol));
            assert_eq!(t.translate_inverse(t.translate(code).unwrap()), Some(code));
        }
    }

    #[test]
    fn test_lookup() {
        let t = trigger_modes();
        assert_eq!(t.translate(1), Some("External"));
        assert_eq!(t.translate_inverse("Internal"), Some(0));
        assert_eq!(t.translate(7), None);
        assert_eq!(t.translate_inverse("Unknown"), None);
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let err = EnumTranslator::new([("On", 1), ("On", 2)]).unwrap_err();
        assert!(matches!(err, DaqError::InvalidTranslation(_)));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let err = EnumTranslator::new([("Off", 0), ("Disabled", 0)]).unwrap_err();
        assert!(err.to_string().contains("code 0"));
    }

    #[test]
    fn test_empty_rejected() {
        let pairs: Vec<(&str, i64)> = Vec::new();
        assert!(EnumTranslator::new(pairs).is_err());
    }

    #[test]
    fn test_symbols_keep_order() {
        let symbols: Vec<_> = trigger_modes().symbols().iter().map(String::from).collect();
        assert_eq!(symbols, vec!["Internal", "External"]);
    }
}
