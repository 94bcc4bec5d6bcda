//! Ordered literal storage used for argument lists, the value stack and script arrays.

use std::{fmt, slice};

use crate::literal::Literal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiteralArray {
    literals: Vec<Literal>,
}

impl LiteralArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a literal and returns the index it was stored at.
    pub fn push(&mut self, literal: Literal) -> usize {
        self.literals.push(literal);
        self.literals.len() - 1
    }

    /// Removes the last literal. An empty array yields `Null`.
    pub fn pop(&mut self) -> Literal {
        self.literals.pop().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Literal> {
        self.literals.get(index)
    }

    pub fn first(&self) -> Option<&Literal> {
        self.literals.first()
    }

    pub fn iter(&self) -> slice::Iter<'_, Literal> {
        self.literals.iter()
    }

    pub fn set(&mut self, index: usize, literal: Literal) -> bool {
        match self.literals.get_mut(index) {
            Some(slot) => {
                *slot = literal;
                true
            }
            None => false,
        }
    }

    /// Splits off the last `count` literals, keeping their original order.
    pub fn split_tail(&mut self, count: usize) -> Option<LiteralArray> {
        let at = self.literals.len().checked_sub(count)?;
        Some(Self {
            literals: self.literals.split_off(at),
        })
    }

    pub fn truncate(&mut self, len: usize) {
        self.literals.truncate(len);
    }

    pub fn clear(&mut self) {
        self.literals.clear();
    }

    pub fn into_vec(self) -> Vec<Literal> {
        self.literals
    }
}

impl From<Vec<Literal>> for LiteralArray {
    fn from(literals: Vec<Literal>) -> Self {
        Self { literals }
    }
}

impl FromIterator<Literal> for LiteralArray {
    fn from_iter<I: IntoIterator<Item = Literal>>(iter: I) -> Self {
        Self {
            literals: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a LiteralArray {
    type Item = &'a Literal;
    type IntoIter = slice::Iter<'a, Literal>;

    fn into_iter(self) -> Self::IntoIter {
        self.literals.iter()
    }
}

impl fmt::Display for LiteralArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, literal) in self.literals.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            literal.fmt_nested(f)?;
        }
        write!(f, "]")
    }
}
