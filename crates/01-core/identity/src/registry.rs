use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::name::short_name;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TypeKey {
    Native(TypeId),
    Synthesized(String),
}

struct TypeRecord {
    id: u32,
    name: String,
    short: String,
    synthesized: bool,
}

struct Interner {
    by_key: HashMap<TypeKey, &'static TypeRecord>,
    next_id: u32,
}

fn interner() -> &'static RwLock<Interner> {
    static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        RwLock::new(Interner {
            by_key: HashMap::new(),
            next_id: 1,
        })
    })
}

// Records are leaked on purpose: identities are process-lifetime tokens.
fn intern(key: TypeKey, describe: impl FnOnce() -> (String, bool)) -> TypeIdentity {
    if let Some(record) = interner().read().by_key.get(&key) {
        return TypeIdentity(record);
    }

    let mut table = interner().write();
    if let Some(record) = table.by_key.get(&key) {
        return TypeIdentity(record);
    }

    let (name, synthesized) = describe();
    let id = table.next_id;
    table.next_id += 1;
    let record: &'static TypeRecord = Box::leak(Box::new(TypeRecord {
        id,
        short: short_name(&name),
        name,
        synthesized,
    }));
    table.by_key.insert(key, record);
    TypeIdentity(record)
}

/// Stable per-type identifier with a human-readable name.
///
/// Two identities compare equal iff they denote the same logical type. The
/// numeric id is assigned in first-use order and never reused within a run.
#[derive(Clone, Copy)]
pub struct TypeIdentity(&'static TypeRecord);

impl TypeIdentity {
    /// Returns the identity of `T`, interning it on first use.
    pub fn of<T: ?Sized + 'static>() -> Self {
        intern(TypeKey::Native(TypeId::of::<T>()), || {
            (type_name::<T>().to_owned(), false)
        })
    }

    /// Returns an identity for a type known only by label.
    ///
    /// Used where full reflection metadata is unavailable; the same label
    /// always yields the same identity, distinct from any native type.
    pub fn synthesized(label: &str) -> Self {
        intern(TypeKey::Synthesized(label.to_owned()), || {
            (label.to_owned(), true)
        })
    }

    /// Numeric id, unique within this process run.
    pub fn id(self) -> u32 {
        self.0.id
    }

    /// Fully qualified reflected name.
    pub fn name(self) -> &'static str {
        &self.0.name
    }

    /// Reflected name with module paths stripped.
    pub fn short_name(self) -> &'static str {
        &self.0.short
    }

    pub fn is_synthesized(self) -> bool {
        self.0.synthesized
    }

    /// True for anonymous closure types.
    pub fn is_closure(self) -> bool {
        self.0.name.contains("{{closure}}")
    }

    /// Short name, suffixed with ` [i]` when reflection was incomplete.
    pub fn display_name(self) -> String {
        if self.0.synthesized {
            format!("{} [i]", self.0.short)
        } else {
            self.0.short.clone()
        }
    }
}

impl PartialEq for TypeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeIdentity {}

impl Hash for TypeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for TypeIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentity(#{} {})", self.0.id, self.0.name)
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short)
    }
}
