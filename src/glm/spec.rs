//! Static GLM specification.
//!
//! Describes the model once per federation run: family, which columns enter
//! the design (formula or explicit lists), optional offset, intercept flag
//! and columns forced categorical.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::glm::dataset::Dataset;
use crate::glm::family::Family;

/// Characters that break formula parsing when present in a column name.
const INVALID_SIGNS: &[char] = &[
    '<', '>', '=', '+', '-', '*', '/', '%', '(', ')', ':', '~', '|', '^', ',', '.', '\'', '"', '@',
    '#', '$', '[', ']', '{', '}', '?', '!', ' ',
];

/// Static description of the model to fit.
///
/// Exactly one of `formula` or (`feature_columns` + `target_column`) must be
/// set. An offset is only valid for the Poisson family.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlmSpec {
    /// Distribution family (with its canonical link).
    pub family: Family,
    /// R-style formula, e.g. `"y ~ x1 + x2"`.
    pub formula: Option<String>,
    /// Explicit feature columns (alternative to `formula`).
    pub feature_columns: Option<Vec<String>>,
    /// Explicit target column (alternative to `formula`).
    pub target_column: Option<String>,
    /// Offset column; the design uses `ln(offset + 1e-10)`.
    pub offset_column: Option<String>,
    /// Whether to prepend an intercept column.
    pub add_intercept: bool,
    /// Columns to force categorical before building the design.
    pub cast_to_string: Vec<String>,
}

impl GlmSpec {
    /// Spec driven by a formula.
    pub fn with_formula(family: Family, formula: &str) -> Self {
        Self {
            family,
            formula: Some(formula.to_string()),
            feature_columns: None,
            target_column: None,
            offset_column: None,
            add_intercept: true,
            cast_to_string: Vec::new(),
        }
    }

    /// Spec driven by explicit feature and target columns.
    pub fn with_columns(family: Family, features: Vec<String>, target: &str) -> Self {
        Self {
            family,
            formula: None,
            feature_columns: Some(features),
            target_column: Some(target.to_string()),
            offset_column: None,
            add_intercept: true,
            cast_to_string: Vec::new(),
        }
    }

    /// Set the offset column.
    pub fn with_offset(mut self, column: &str) -> Self {
        self.offset_column = Some(column.to_string());
        self
    }

    /// Disable the intercept column.
    pub fn without_intercept(mut self) -> Self {
        self.add_intercept = false;
        self
    }

    /// Force the given columns categorical.
    pub fn with_cast_to_string(mut self, columns: Vec<String>) -> Self {
        self.cast_to_string = columns;
        self
    }

    /// Resolve the target and feature column names, parsing the formula if
    /// one was given.
    pub fn terms(&self) -> Result<(String, Vec<String>)> {
        match (&self.formula, &self.feature_columns, &self.target_column) {
            (Some(formula), None, None) => parse_formula(formula),
            (None, Some(features), Some(target)) => Ok((target.clone(), features.clone())),
            (None, _, _) => Err(Error::Configuration(
                "either formula or feature_columns and target_column must be provided".into(),
            )),
            (Some(_), _, _) => Err(Error::Configuration(
                "formula and explicit columns are mutually exclusive".into(),
            )),
        }
    }

    /// Validate the spec against a concrete dataset.
    ///
    /// Checks the formula/columns exclusivity, column presence, column-name
    /// characters and the offset/family pairing. Runs before any round.
    pub fn validate(&self, data: &Dataset) -> Result<()> {
        let (target, features) = self.terms()?;

        let mut referenced: Vec<&String> = features.iter().collect();
        referenced.push(&target);
        if let Some(offset) = &self.offset_column {
            referenced.push(offset);
        }

        for name in &referenced {
            if name.contains(INVALID_SIGNS) {
                return Err(Error::Configuration(format!(
                    "column name {name:?} contains characters that break formula parsing"
                )));
            }
        }

        let missing: Vec<&str> = referenced
            .iter()
            .filter(|name| !data.has_column(name))
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "referenced columns missing from the dataset: {missing:?}"
            )));
        }

        if self.offset_column.is_some() && self.family != Family::Poisson {
            return Err(Error::Configuration(
                "offset is only supported for the Poisson family".into(),
            ));
        }

        Ok(())
    }
}

/// Parse `"y ~ x1 + x2"` into a target and ordered feature names.
fn parse_formula(formula: &str) -> Result<(String, Vec<String>)> {
    let compact: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
    let (target, rhs) = compact.split_once('~').ok_or_else(|| {
        Error::Configuration(format!("formula {formula:?} is missing the '~' separator"))
    })?;
    if target.is_empty() {
        return Err(Error::Configuration(format!(
            "formula {formula:?} has an empty left-hand side"
        )));
    }
    let features: Vec<String> = rhs
        .split('+')
        .map(|term| term.to_string())
        .collect();
    if features.iter().any(|term| term.is_empty()) {
        return Err(Error::Configuration(format!(
            "formula {formula:?} has an empty term"
        )));
    }
    Ok((target.to_string(), features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::dataset::Column;

    fn sample_data() -> Dataset {
        Dataset::from_columns(vec![
            ("y".into(), Column::Float(vec![1.0, 0.0])),
            ("x1".into(), Column::Float(vec![0.1, 0.2])),
            ("x2".into(), Column::Float(vec![1.0, 2.0])),
            ("exposure".into(), Column::Float(vec![10.0, 20.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_formula_parsing() {
        let (target, features) = parse_formula("y ~ x1 + x2").unwrap();
        assert_eq!(target, "y");
        assert_eq!(features, vec!["x1", "x2"]);
    }

    #[test]
    fn test_formula_without_tilde_rejected() {
        assert!(parse_formula("y x1").is_err());
    }

    #[test]
    fn test_valid_formula_spec() {
        let spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x1 + x2");
        spec.validate(&sample_data()).unwrap();
    }

    #[test]
    fn test_both_formula_and_columns_rejected() {
        let mut spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x1");
        spec.feature_columns = Some(vec!["x1".into()]);
        spec.target_column = Some("y".into());
        assert!(matches!(
            spec.validate(&sample_data()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_neither_formula_nor_columns_rejected() {
        let spec = GlmSpec {
            family: Family::Gaussian,
            formula: None,
            feature_columns: None,
            target_column: None,
            offset_column: None,
            add_intercept: true,
            cast_to_string: Vec::new(),
        };
        assert!(matches!(
            spec.validate(&sample_data()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_column_rejected() {
        let spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x9");
        assert!(matches!(
            spec.validate(&sample_data()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_characters_rejected() {
        let spec = GlmSpec::with_columns(
            Family::Gaussian,
            vec!["x1".into(), "bad col".into()],
            "y",
        );
        assert!(matches!(
            spec.validate(&sample_data()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_offset_requires_poisson() {
        let spec =
            GlmSpec::with_formula(Family::Gaussian, "y ~ x1").with_offset("exposure");
        assert!(matches!(
            spec.validate(&sample_data()),
            Err(Error::Configuration(_))
        ));

        let spec = GlmSpec::with_formula(Family::Poisson, "y ~ x1").with_offset("exposure");
        spec.validate(&sample_data()).unwrap();
    }
}
