use std::fmt;

use serde::{Deserialize, Serialize};

/// A proposed chemical identity attached to a feature table row.
///
/// Identification is often ambiguous, so several annotations may coexist on
/// one row. Annotations compare by value.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IonAnnotation {
    /// Human readable label, e.g. a lipid shorthand name
    pub description: String,
    /// Chemical formula of the proposed identity, when known
    pub formula: Option<String>,
    /// Database accession for the proposed identity, when known
    pub identifier: Option<String>,
}

impl IonAnnotation {
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            formula: None,
            identifier: None,
        }
    }

    pub fn with_formula<S: Into<String>>(mut self, formula: S) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_identifier<S: Into<String>>(mut self, identifier: S) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl fmt::Display for IonAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_equality() {
        let a = IonAnnotation::new("PE(17:0/17:0)").with_formula("C39H78NO8P");
        let b = IonAnnotation::new("PE(17:0/17:0)").with_formula("C39H78NO8P");
        let c = IonAnnotation::new("1. PE(17:0/17:0)");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "PE(17:0/17:0)");
    }
}
