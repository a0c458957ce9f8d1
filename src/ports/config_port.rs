//! Configuration access port trait.

use crate::domain::error::TradeWindowError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// `get_string`, failing with `ConfigMissing` when absent or blank.
    fn require_string(&self, section: &str, key: &str) -> Result<String, TradeWindowError> {
        self.get_string(section, key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| TradeWindowError::ConfigMissing {
                section: section.into(),
                key: key.into(),
            })
    }
}
