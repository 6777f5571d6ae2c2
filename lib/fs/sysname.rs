use crate::fs::CacheError;
use crate::fs::name_hash;
use crate::sync::{self, RwLock};

const SYS_TOKEN: &str = "@sys";

/// Word size of the calling process, selecting a substitution list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysNameArch {
    /// 32-bit callers.
    Bits32,
    /// 64-bit callers.
    Bits64,
}

impl SysNameArch {
    /// The architecture of this build.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Bits32
        } else {
            Self::Bits64
        }
    }
}

/// Whether `component` contains `@sys`, case-insensitively.
#[must_use]
pub fn contains_sysname(component: &str) -> bool {
    component.to_ascii_lowercase().contains(SYS_TOKEN)
}

/// The `@sys` substitution lists.
#[derive(Debug, Default)]
pub struct SysNameTable {
    bits32: RwLock<Vec<String>>,
    bits64: RwLock<Vec<String>>,
}

impl SysNameTable {
    /// Creates a table with both lists empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with the given lists.
    #[must_use]
    pub fn with_lists(bits32: Vec<String>, bits64: Vec<String>) -> Self {
        Self {
            bits32: RwLock::new(bits32),
            bits64: RwLock::new(bits64),
        }
    }

    fn list(&self, arch: SysNameArch) -> &RwLock<Vec<String>> {
        match arch {
            SysNameArch::Bits32 => &self.bits32,
            SysNameArch::Bits64 => &self.bits64,
        }
    }

    /// Replaces one list.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the copy cannot be
    /// allocated; the list is left empty.
    pub fn set(&self, arch: SysNameArch, names: &[String]) -> Result<(), CacheError> {
        let mut list = sync::exclusive(self.list(arch));
        list.clear();
        let mut replacement = Vec::new();
        replacement.try_reserve_exact(names.len())?;
        for name in names {
            let mut owned = String::new();
            owned.try_reserve_exact(name.len())?;
            owned.push_str(name);
            replacement.push(owned);
        }
        *list = replacement;
        Ok(())
    }

    /// A copy of one list.
    #[must_use]
    pub fn names(&self, arch: SysNameArch) -> Vec<String> {
        sync::shared(self.list(arch)).clone()
    }

    /// Number of names in one list.
    #[must_use]
    pub fn len(&self, arch: SysNameArch) -> usize {
        sync::shared(self.list(arch)).len()
    }

    /// Substitutes the `index`th (1-based) sysname into `component`.
    ///
    /// A component equal to `@sys` is replaced whole; otherwise the text
    /// before the first `@` is kept and the sysname appended.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] when `index` is zero or past the end
    /// of the list.
    pub fn substitute(
        &self,
        component: &str,
        index: usize,
        arch: SysNameArch,
    ) -> Result<String, CacheError> {
        let list = sync::shared(self.list(arch));
        let sysname = index
            .checked_sub(1)
            .and_then(|slot| list.get(slot))
            .ok_or(CacheError::NotFound)?;

        if name_hash::eq_ignore_case(component, SYS_TOKEN) {
            return Ok(sysname.clone());
        }
        let prefix = component
            .find('@')
            .map_or(component, |at| &component[..at]);
        let mut substituted = String::new();
        substituted.try_reserve_exact(prefix.len() + sysname.len())?;
        substituted.push_str(prefix);
        substituted.push_str(sysname);
        Ok(substituted)
    }
}
