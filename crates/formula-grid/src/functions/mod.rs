//! The function table: every name a formula may call, with its arity, native callable and
//! volatility.
//!
//! A [`FunctionTable`] is an ordinary value. Each [`crate::Formula`] owns one (seeded with
//! [`BUILTINS`]) so there is no process-wide registry to synchronize; hosts that want the same
//! extra functions everywhere build one table and hand clones to each formula.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::FunctionTableError;

mod builtins;
mod random;

pub use builtins::{BuiltinFn, BuiltinSpec, BUILTINS};

/// Maximum number of parameters a formula function can take.
pub const MAX_PARAMS: usize = 3;

/// Maximum number of entries (built-ins included) a [`FunctionTable`] can hold.
pub const MAX_FUNCTIONS: usize = 255;

/// Whether a function may return different results for identical arguments.
///
/// Volatile ("varying") functions are never constant-folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Volatility {
    NonVolatile,
    Volatile,
}

impl Volatility {
    #[inline]
    pub fn is_varying(self) -> bool {
        matches!(self, Volatility::Volatile)
    }
}

/// A native function callable from formulas, typed by arity.
#[derive(Clone)]
pub enum Callable {
    Nullary(Arc<dyn Fn() -> f64 + Send + Sync>),
    Unary(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
    Binary(Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>),
    Ternary(Arc<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>),
}

impl Callable {
    pub fn nullary(f: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Callable::Nullary(Arc::new(f))
    }

    pub fn unary(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Callable::Unary(Arc::new(f))
    }

    pub fn binary(f: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        Callable::Binary(Arc::new(f))
    }

    pub fn ternary(f: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        Callable::Ternary(Arc::new(f))
    }

    /// Wrap a slice-taking function for a dynamically chosen arity.
    ///
    /// Hosts that read function definitions at runtime (plugins, scripts) only know the
    /// parameter count as a number; anything above [`MAX_PARAMS`] is rejected.
    pub fn with_arity(
        arity: usize,
        f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, FunctionTableError> {
        Ok(match arity {
            0 => Callable::nullary(move || f(&[])),
            1 => Callable::unary(move |x| f(&[x])),
            2 => Callable::binary(move |x, y| f(&[x, y])),
            3 => Callable::ternary(move |x, y, z| f(&[x, y, z])),
            other => return Err(FunctionTableError::InvalidArity(other)),
        })
    }

    #[inline]
    pub fn arity(&self) -> usize {
        match self {
            Callable::Nullary(_) => 0,
            Callable::Unary(_) => 1,
            Callable::Binary(_) => 2,
            Callable::Ternary(_) => 3,
        }
    }
}

impl From<BuiltinFn> for Callable {
    fn from(f: BuiltinFn) -> Self {
        match f {
            BuiltinFn::Nullary(f) => Callable::Nullary(Arc::new(f)),
            BuiltinFn::Unary(f) => Callable::Unary(Arc::new(f)),
            BuiltinFn::Binary(f) => Callable::Binary(Arc::new(f)),
            BuiltinFn::Ternary(f) => Callable::Ternary(Arc::new(f)),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable/{}", self.arity())
    }
}

#[derive(Clone, Debug)]
pub struct FunctionEntry {
    name: Arc<str>,
    callable: Callable,
    volatility: Volatility,
}

impl FunctionEntry {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.callable.arity()
    }

    #[inline]
    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    #[inline]
    pub fn volatility(&self) -> Volatility {
        self.volatility
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }
}

/// Public description of a table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub arity: usize,
    pub varying: bool,
}

/// Ordered registry of formula functions.
///
/// The first [`FunctionTable::builtin_count`] entries are the protected built-ins; user
/// functions follow in registration order. Names are matched exactly (case-sensitive).
#[derive(Clone, Debug)]
pub struct FunctionTable {
    entries: Vec<FunctionEntry>,
    index: AHashMap<Arc<str>, usize>,
    builtin_count: usize,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionTable {
    /// A table seeded with [`BUILTINS`].
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        for spec in BUILTINS {
            table.push(Arc::from(spec.name), spec.implementation.into(), spec.volatility);
        }
        table.builtin_count = table.entries.len();
        table
    }

    /// A table without any functions (not even the built-ins).
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: AHashMap::new(),
            builtin_count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of protected entries at the start of the table.
    #[inline]
    pub fn builtin_count(&self) -> usize {
        self.builtin_count
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.entries.iter()
    }

    #[inline]
    pub(crate) fn entry(&self, index: usize) -> Option<&FunctionEntry> {
        self.entries.get(index)
    }

    /// Register `name`, superseding an existing entry of the same name in place.
    ///
    /// Returns the entry's index.
    pub fn register(
        &mut self,
        name: &str,
        callable: Callable,
        volatility: Volatility,
    ) -> Result<usize, FunctionTableError> {
        if let Some(&idx) = self.index.get(name) {
            let entry = &mut self.entries[idx];
            entry.callable = callable;
            entry.volatility = volatility;
            log::debug!("superseded formula function `{name}` at index {idx}");
            return Ok(idx);
        }

        if self.entries.len() >= MAX_FUNCTIONS {
            return Err(FunctionTableError::TableFull);
        }

        let idx = self.push(Arc::from(name), callable, volatility);
        log::debug!("registered formula function `{name}` at index {idx}");
        Ok(idx)
    }

    /// Remove a user function, compacting the table. Returns its former index.
    pub fn unregister(&mut self, name: &str) -> Result<usize, FunctionTableError> {
        let idx = self.lookup(name)?;
        if idx < self.builtin_count {
            return Err(FunctionTableError::Protected(name.to_string()));
        }

        self.entries.remove(idx);
        self.index.remove(name);
        for (i, entry) in self.entries.iter().enumerate().skip(idx) {
            self.index.insert(entry.name.clone(), i);
        }
        log::debug!("removed formula function `{name}` (was index {idx})");
        Ok(idx)
    }

    pub fn lookup(&self, name: &str) -> Result<usize, FunctionTableError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FunctionTableError::NotFound(name.to_string()))
    }

    pub fn describe(&self, index: usize) -> Result<FunctionInfo, FunctionTableError> {
        let entry = self
            .entries
            .get(index)
            .ok_or(FunctionTableError::IndexOutOfBounds(index))?;
        Ok(FunctionInfo {
            name: entry.name.to_string(),
            arity: entry.arity(),
            varying: entry.volatility.is_varying(),
        })
    }

    fn push(&mut self, name: Arc<str>, callable: Callable, volatility: Volatility) -> usize {
        let idx = self.entries.len();
        self.index.insert(name.clone(), idx);
        self.entries.push(FunctionEntry {
            name,
            callable,
            volatility,
        });
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn seeds_builtins_in_table_order() {
        let table = FunctionTable::with_builtins();
        assert_eq!(table.builtin_count(), BUILTINS.len());
        assert_eq!(table.lookup("exp"), Ok(0));
        assert_eq!(table.lookup("ln"), Ok(1));
        assert_eq!(
            table.describe(table.lookup("ifelse").unwrap()).unwrap(),
            FunctionInfo {
                name: "ifelse".to_string(),
                arity: 3,
                varying: false,
            }
        );
        assert!(table.describe(table.lookup("rand_u").unwrap()).unwrap().varying);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let table = FunctionTable::with_builtins();
        assert!(table.lookup("sin").is_ok());
        assert_eq!(
            table.lookup("SIN"),
            Err(FunctionTableError::NotFound("SIN".to_string()))
        );
    }

    #[test]
    fn register_appends_then_supersedes_in_place() {
        let mut table = FunctionTable::with_builtins();
        let idx = table
            .register("twice", Callable::unary(|x| 2.0 * x), Volatility::NonVolatile)
            .unwrap();
        assert_eq!(idx, BUILTINS.len());

        let again = table
            .register("twice", Callable::binary(|x, y| x + y), Volatility::Volatile)
            .unwrap();
        assert_eq!(again, idx);
        assert_eq!(table.len(), BUILTINS.len() + 1);
        assert_eq!(
            table.describe(idx).unwrap(),
            FunctionInfo {
                name: "twice".to_string(),
                arity: 2,
                varying: true,
            }
        );
    }

    #[test]
    fn builtins_can_be_superseded_but_not_deleted() {
        let mut table = FunctionTable::with_builtins();
        let idx = table
            .register("sqrt", Callable::unary(|x| x), Volatility::NonVolatile)
            .unwrap();
        assert_eq!(idx, table.lookup("sqrt").unwrap());
        assert_eq!(
            table.unregister("sqrt"),
            Err(FunctionTableError::Protected("sqrt".to_string()))
        );
    }

    #[test]
    fn unregister_compacts_and_reindexes() {
        let mut table = FunctionTable::with_builtins();
        let base = table.len();
        for name in ["f1", "f2", "f3"] {
            table
                .register(name, Callable::nullary(|| 1.0), Volatility::NonVolatile)
                .unwrap();
        }

        assert_eq!(table.unregister("f2"), Ok(base + 1));
        assert_eq!(table.len(), base + 2);
        assert_eq!(table.lookup("f3"), Ok(base + 1));
        assert!(table.lookup("f2").is_err());
        assert_eq!(
            table.unregister("f2"),
            Err(FunctionTableError::NotFound("f2".to_string()))
        );
    }

    #[test]
    fn rejects_registration_when_full() {
        let mut table = FunctionTable::with_builtins();
        for i in table.len()..MAX_FUNCTIONS {
            table
                .register(&format!("f{i}"), Callable::nullary(|| 0.0), Volatility::NonVolatile)
                .unwrap();
        }
        assert_eq!(
            table.register("one_more", Callable::nullary(|| 0.0), Volatility::NonVolatile),
            Err(FunctionTableError::TableFull)
        );
        // Superseding still works on a full table.
        assert!(table
            .register("f100", Callable::nullary(|| 1.0), Volatility::NonVolatile)
            .is_ok());
    }

    #[test]
    fn with_arity_rejects_out_of_range() {
        assert_eq!(
            Callable::with_arity(4, |_| 0.0).err(),
            Some(FunctionTableError::InvalidArity(4))
        );
        let callable = Callable::with_arity(3, |args| args.iter().sum()).unwrap();
        assert_eq!(callable.arity(), 3);
        match callable {
            Callable::Ternary(f) => assert_eq!(f(1.0, 2.0, 3.0), 6.0),
            other => panic!("expected ternary callable, got {other:?}"),
        }
    }

    #[test]
    fn describe_reports_out_of_bounds() {
        let table = FunctionTable::empty();
        assert_eq!(
            table.describe(0),
            Err(FunctionTableError::IndexOutOfBounds(0))
        );
    }
}
