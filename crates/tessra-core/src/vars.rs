//! Variable lists for index-notation annotations
//!
//! A [`VariableList`] is the ordered sequence of axis labels attached to a
//! tensor in an expression, parsed from a comma-separated string such as
//! `"m,k"`. Lists drive contraction structure: the product of two lists is
//! their ordered symmetric difference (shared labels are contracted away),
//! and two permutation-equivalent lists induce the unique permutation that
//! maps one onto the other.
//!
//! # Examples
//!
//! ```
//! use tessra_core::vars::VariableList;
//!
//! let a = VariableList::parse("m,k").unwrap();
//! let b = VariableList::parse("k,n").unwrap();
//! let c = a.contract(&b);
//! assert_eq!(c.to_string(), "m,n");
//! ```

use crate::error::{Error, Result, VariableError};
use crate::perm::Permutation;
use std::fmt;

/// Ordered list of axis labels for a tensor expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VariableList {
    vars: Vec<String>,
}

impl VariableList {
    /// Parse a comma-separated list of index labels
    ///
    /// Labels must match `[A-Za-z_][A-Za-z0-9_]*`; whitespace around commas
    /// is ignored; empty and duplicate labels are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessra_core::vars::VariableList;
    ///
    /// let vars = VariableList::parse(" i , j ,k ").unwrap();
    /// assert_eq!(vars.len(), 3);
    /// assert_eq!(vars.get(1), Some("j"));
    /// assert!(VariableList::parse("i,i").is_err());
    /// ```
    pub fn parse(spec: &str) -> Result<Self> {
        let mut vars = Vec::new();
        for (position, raw) in spec.split(',').enumerate() {
            let label = raw.trim();
            if label.is_empty() {
                return Err(VariableError::EmptyLabel { position }.into());
            }
            if !Self::is_valid_label(label) {
                return Err(VariableError::InvalidLabel {
                    label: label.to_string(),
                }
                .into());
            }
            if vars.iter().any(|v| v == label) {
                return Err(VariableError::DuplicateLabel {
                    label: label.to_string(),
                }
                .into());
            }
            vars.push(label.to_string());
        }
        Ok(Self { vars })
    }

    fn is_valid_label(label: &str) -> bool {
        let mut chars = label.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when the list holds no labels
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Label at position `i`
    pub fn get(&self, i: usize) -> Option<&str> {
        self.vars.get(i).map(String::as_str)
    }

    /// Position of `label`, if present
    pub fn position(&self, label: &str) -> Option<usize> {
        self.vars.iter().position(|v| v == label)
    }

    /// True when `label` appears in this list
    pub fn contains(&self, label: &str) -> bool {
        self.position(label).is_some()
    }

    /// Iterate over labels in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(String::as_str)
    }

    /// Labels shared with `other`, in this list's order
    pub fn common(&self, other: &VariableList) -> Vec<String> {
        self.vars
            .iter()
            .filter(|v| other.contains(v))
            .cloned()
            .collect()
    }

    /// Contraction product: the ordered symmetric difference
    ///
    /// Shared labels are contracted away; the result holds this list's
    /// surviving labels followed by `other`'s surviving labels.
    pub fn contract(&self, other: &VariableList) -> VariableList {
        let mut vars: Vec<String> = self
            .vars
            .iter()
            .filter(|v| !other.contains(v))
            .cloned()
            .collect();
        vars.extend(other.vars.iter().filter(|v| !self.contains(v)).cloned());
        VariableList { vars }
    }

    /// True when `other` holds the same labels in any order
    pub fn is_permutation_of(&self, other: &VariableList) -> bool {
        self.len() == other.len() && self.vars.iter().all(|v| other.contains(v))
    }

    /// The permutation `P` with `P(self) == target`
    ///
    /// Requires the lists to be permutation-equivalent. The returned
    /// permutation satisfies `target[P[i]] == self[i]` for every position.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessra_core::vars::VariableList;
    ///
    /// let current = VariableList::parse("k,m").unwrap();
    /// let target = VariableList::parse("m,k").unwrap();
    /// let p = current.permutation_to(&target).unwrap();
    /// assert_eq!(p.image(), &[1, 0]);
    /// ```
    pub fn permutation_to(&self, target: &VariableList) -> Result<Permutation> {
        if !self.is_permutation_of(target) {
            return Err(VariableError::NotPermutationEquivalent {
                left: self.to_string(),
                right: target.to_string(),
            }
            .into());
        }
        if self == target {
            return Ok(Permutation::identity());
        }
        let image: Vec<usize> = self
            .vars
            .iter()
            .map(|v| {
                target.position(v).ok_or_else(|| {
                    Error::from(VariableError::NotPermutationEquivalent {
                        left: self.to_string(),
                        right: target.to_string(),
                    })
                })
            })
            .collect::<Result<_>>()?;
        Permutation::new(image)
    }

    /// Reorder this list by a permutation, producing `P(self)`
    pub fn permute(&self, perm: &Permutation) -> Result<VariableList> {
        if perm.is_identity() {
            return Ok(self.clone());
        }
        if perm.len() != self.len() {
            return Err(crate::error::PermutationError::RankMismatch {
                perm: perm.len(),
                arg: self.len(),
            }
            .into());
        }
        let mut vars = vec![String::new(); self.len()];
        for (i, v) in self.vars.iter().enumerate() {
            vars[perm.image()[i]] = v.clone();
        }
        Ok(VariableList { vars })
    }

    /// Validate that this list annotates a tensor of dimension `rank`
    pub fn check_rank(&self, rank: usize) -> Result<()> {
        if self.len() != rank {
            return Err(VariableError::RankMismatch {
                labels: self.len(),
                rank,
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Display for VariableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.vars.join(","))
    }
}
