//! Defines a globally interned symbol type used for machine-part and
//! operation names.
use std::sync::{Mutex, OnceLock};
use string_interner::{
    StringInterner, backend::BucketBackend, symbol::SymbolU32,
};

/// A globally interned symbol.
///
/// Names of buses, sockets, function units and operations are interned once
/// and compared as integers afterwards. Resolution hands back a `&'static
/// str` because the bucket backend never moves interned strings.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Id(SymbolU32);

type Pool = StringInterner<BucketBackend>;

fn pool() -> &'static Mutex<Pool> {
    static SINGLETON: OnceLock<Mutex<Pool>> = OnceLock::new();
    SINGLETON.get_or_init(|| Mutex::new(Pool::new()))
}

impl Id {
    /// Intern a string into the global symbol table.
    pub fn new(s: impl AsRef<str>) -> Self {
        s.as_ref().into()
    }

    /// Resolve this symbol into the string in the global symbol table.
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id(pool().lock().unwrap().get_or_intern(s))
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id(pool().lock().unwrap().get_or_intern(&s))
    }
}

impl From<&String> for Id {
    fn from(s: &String) -> Self {
        Id(pool().lock().unwrap().get_or_intern(s))
    }
}

impl From<Id> for &'static str {
    fn from(sym: Id) -> Self {
        let pool = pool().lock().unwrap();
        // SAFETY: the pool lives in a static and is never dropped, and the
        // bucket backend keeps interned strings at stable addresses.
        unsafe {
            std::mem::transmute::<&str, &'static str>(
                pool.resolve(sym.0).unwrap(),
            )
        }
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::Id;

    #[test]
    fn interning_is_stable() {
        let a = Id::new("alu.add");
        let b = Id::new("alu.add");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "alu.add");
    }

    #[test]
    fn ordering_follows_strings() {
        let z = Id::new("zeta");
        let a = Id::new("alpha");
        assert!(a < z);
    }
}
