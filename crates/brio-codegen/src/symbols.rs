//! Deduplicating symbol table for one generated unit.
//!
//! Every `add_*` operation has the same shape: return the previously issued
//! generated name if the key is already registered, otherwise synthesize a
//! fresh globally-unique name and record the entry for the coda. The table
//! is write-once-read-many per unit; entries are never renamed or removed
//! mid-generation, because generated statements embed the returned names as
//! forward references before the coda exists.
//!
//! Keying rules differ by table. String and pattern content dedups by value;
//! expressions dedup by node identity, because two textually identical
//! sub-expressions can have different evaluation order and must not merge.

use brio_core::program::NodeId;
use std::collections::{HashMap, HashSet};

const PREFIX_LEN: usize = 8;

/// Per-unit monotonic counter for unique-name synthesis.
///
/// Owned by the table, never process-global, so independent compilations
/// stay deterministic.
#[derive(Debug, Default)]
pub struct NameCounter {
    next: u32,
}

impl NameCounter {
    pub fn next(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }
}

/// What one registered entry declares, and how its initializer resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// Interned string constant, constructed from its literal source.
    StringValue { value: String },
    /// Interned character-array constant.
    CharArray { value: String },
    /// A constant sub-expression, pre-rendered to constructor source.
    ConstExpr { source: String },
    /// An array of constant sub-expressions (e.g. a default-argument list).
    ConstExprArray { sources: Vec<String> },
    /// Module singleton, resolved by type name at artifact init.
    Module { type_name: String },
    /// Pattern object, instantiated from its literal source at artifact init.
    Regex { pattern: String },
    /// Function id, resolved against the runtime registry at artifact init.
    FunctionId { runtime_name: String },
    /// Class id, resolved against the runtime registry at artifact init.
    ClassId { runtime_name: String },
    /// Constant id, resolved against the runtime registry at artifact init.
    ConstantId { runtime_name: String },
}

impl SymbolKind {
    /// Entries whose initializer must query the runtime at artifact init;
    /// the rest are constructed from their own literal source.
    pub fn is_id_bearing(&self) -> bool {
        matches!(
            self,
            SymbolKind::Module { .. }
                | SymbolKind::Regex { .. }
                | SymbolKind::FunctionId { .. }
                | SymbolKind::ClassId { .. }
                | SymbolKind::ConstantId { .. }
        )
    }
}

/// One coda entry: the generated name and what it declares.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
}

/// The dedup tables of one compilation unit.
#[derive(Debug)]
pub struct SymbolTable {
    case_sensitive: bool,
    counter: NameCounter,
    /// All names ever issued, for the global-uniqueness scan of the
    /// content-keyed tables.
    issued: HashSet<String>,
    strings: HashMap<String, String>,
    char_arrays: HashMap<String, String>,
    regexes: HashMap<String, String>,
    exprs: HashMap<NodeId, String>,
    expr_arrays: HashMap<Vec<Option<NodeId>>, String>,
    modules: HashMap<String, String>,
    function_ids: HashMap<String, String>,
    class_ids: HashMap<String, String>,
    constant_ids: HashMap<String, String>,
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            counter: NameCounter::default(),
            issued: HashSet::new(),
            strings: HashMap::new(),
            char_arrays: HashMap::new(),
            regexes: HashMap::new(),
            exprs: HashMap::new(),
            expr_arrays: HashMap::new(),
            modules: HashMap::new(),
            function_ids: HashMap::new(),
            class_ids: HashMap::new(),
            constant_ids: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Intern a string constant by value. The same value always yields the
    /// same name; different values never share one.
    pub fn add_string_value(&mut self, value: &str) -> String {
        if let Some(name) = self.strings.get(value) {
            return name.clone();
        }
        let name = self.content_name("s", value);
        self.strings.insert(value.to_string(), name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::StringValue {
                value: value.to_string(),
            },
        });
        name
    }

    /// Intern a character-array constant by value.
    pub fn add_char_array(&mut self, value: &str) -> String {
        if let Some(name) = self.char_arrays.get(value) {
            return name.clone();
        }
        let name = self.content_name("ca", value);
        self.char_arrays.insert(value.to_string(), name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::CharArray {
                value: value.to_string(),
            },
        });
        name
    }

    /// Register a pattern literal. Deduped by pattern text; the initializer
    /// instantiates a fresh matcher object from it.
    pub fn add_regex(&mut self, pattern: &str) -> String {
        debug_assert!(!pattern.is_empty(), "empty pattern registered");
        if let Some(name) = self.regexes.get(pattern) {
            return name.clone();
        }
        let name = self.counter_name("re", pattern);
        self.regexes.insert(pattern.to_string(), name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::Regex {
                pattern: pattern.to_string(),
            },
        });
        name
    }

    /// Register a constant sub-expression, keyed by node identity.
    /// `source` is the pre-rendered constructor text the declaration embeds.
    pub fn add_expr(&mut self, id: NodeId, source: &str) -> String {
        if let Some(name) = self.exprs.get(&id) {
            return name.clone();
        }
        let name = self.counter_name("ce", source);
        self.exprs.insert(id, name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::ConstExpr {
                source: source.to_string(),
            },
        });
        name
    }

    /// Register an array of constant sub-expressions, keyed by the identity
    /// of its element nodes. A `None` slot is a filler element (rendered as
    /// the default value) with no node of its own; two arrays sharing all
    /// node identities and filler positions share one declaration.
    pub fn add_expr_array(&mut self, ids: &[Option<NodeId>], sources: Vec<String>) -> String {
        debug_assert_eq!(ids.len(), sources.len(), "expr array key/source mismatch");
        if let Some(name) = self.expr_arrays.get(ids) {
            return name.clone();
        }
        let name = self.counter_name("cea", "args");
        self.expr_arrays.insert(ids.to_vec(), name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::ConstExprArray { sources },
        });
        name
    }

    /// Register a module singleton by type name.
    pub fn add_module(&mut self, type_name: &str) -> String {
        debug_assert!(!type_name.is_empty(), "empty module type registered");
        if let Some(name) = self.modules.get(type_name) {
            return name.clone();
        }
        let name = self.counter_name("m", type_name);
        self.modules.insert(type_name.to_string(), name.clone());
        self.entries.push(SymbolEntry {
            name: name.clone(),
            kind: SymbolKind::Module {
                type_name: type_name.to_string(),
            },
        });
        name
    }

    /// Register a function name for id wiring. The name is mangled the way
    /// the runtime tables expect (case-folded unless the language is
    /// configured case-sensitive, path separators escaped) because the
    /// initializer resolves it against the live registry, not merely as a
    /// local constant.
    pub fn add_function_id(&mut self, name: &str) -> String {
        let runtime_name = self.mangle(name);
        if let Some(field) = self.function_ids.get(&runtime_name) {
            return field.clone();
        }
        let field = self.counter_name("fid", &runtime_name);
        self.function_ids.insert(runtime_name.clone(), field.clone());
        self.entries.push(SymbolEntry {
            name: field.clone(),
            kind: SymbolKind::FunctionId { runtime_name },
        });
        field
    }

    /// Register a class name for id wiring. Same mangling as functions.
    pub fn add_class_id(&mut self, name: &str) -> String {
        let runtime_name = self.mangle(name);
        if let Some(field) = self.class_ids.get(&runtime_name) {
            return field.clone();
        }
        let field = self.counter_name("cid", &runtime_name);
        self.class_ids.insert(runtime_name.clone(), field.clone());
        self.entries.push(SymbolEntry {
            name: field.clone(),
            kind: SymbolKind::ClassId { runtime_name },
        });
        field
    }

    /// Register a constant name for id wiring. Constants keep their case;
    /// only separators are escaped.
    pub fn add_constant_id(&mut self, name: &str) -> String {
        let runtime_name = escape_separators(name);
        if let Some(field) = self.constant_ids.get(&runtime_name) {
            return field.clone();
        }
        let field = self.counter_name("kid", &runtime_name);
        self.constant_ids.insert(runtime_name.clone(), field.clone());
        self.entries.push(SymbolEntry {
            name: field.clone(),
            kind: SymbolKind::ConstantId { runtime_name },
        });
        field
    }

    /// The runtime-table key for a function or class name.
    pub fn mangle(&self, name: &str) -> String {
        let escaped = escape_separators(name);
        if self.case_sensitive {
            escaped
        } else {
            escaped.to_lowercase()
        }
    }

    /// Registered entries in registration order, for coda emission.
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prefix-plus-counter synthesis: unique even across prefix collisions
    /// because the per-unit counter participates in every name.
    fn counter_name(&mut self, tag: &str, key: &str) -> String {
        let name = format!("{}_{}_{}", tag, sanitize_prefix(key), self.counter.next());
        let fresh = self.issued.insert(name.clone());
        debug_assert!(fresh, "counter name collided: {}", name);
        name
    }

    /// Content-derived synthesis for the interning tables: the name comes
    /// from the value itself, so two different values that sanitize to the
    /// same prefix get a disambiguating numeric suffix found by scanning
    /// previously issued names.
    fn content_name(&mut self, tag: &str, content: &str) -> String {
        let base = format!("{}_{}", tag, sanitize_prefix(content));
        if self.issued.insert(base.clone()) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// First characters of the key, filtered to what is valid in a generated
/// identifier. Falls back to a stub for keys with no usable characters.
fn sanitize_prefix(key: &str) -> String {
    let filtered: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(PREFIX_LEN)
        .collect();
    if filtered.is_empty() {
        "x".to_string()
    } else if filtered.starts_with(|c: char| c.is_ascii_digit()) {
        format!("n{}", filtered)
    } else {
        filtered
    }
}

/// Replace namespace and path separators so the result is one identifier
/// segment.
fn escape_separators(name: &str) -> String {
    name.replace("::", "_").replace(['\\', '/', '.'], "_")
}
