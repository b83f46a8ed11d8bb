//! # Library bundles
//!
//! A library bundle is an externally supplied, named collection of source
//! fragments plus an optional one-time initializer, loaded in a single
//! STOREPKG batch. The resolver trait is the seam: the client only needs
//! name → bundle, and where bundles come from (static table, disk,
//! anything else) is the resolver's business.

#[derive(Debug)]
pub enum Error {
    /// No bundle matches the requested name.
    NotFound(String),
    /// A requested function is absent from the bundle.
    NoSuchFunction { library: String, name: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "no library named '{}'", name),
            Self::NoSuchFunction { library, name } => {
                write!(f, "library '{}' has no function '{}'", library, name)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A named collection of function sources plus an optional initializer.
///
/// The classname doubles as the remote namespace, so two loads of the same
/// classname share one initializer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryBundle {
    pub classname: String,
    pub init: Option<String>,
    /// Order is preserved: functions are stored in the order the bundle
    /// author listed them.
    pub functions: Vec<(String, String)>,
}

impl LibraryBundle {
    pub fn new(classname: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            init: None,
            functions: Vec::new(),
        }
    }

    pub fn with_init(mut self, init: impl Into<String>) -> Self {
        self.init = Some(init.into());
        self
    }

    pub fn function(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.functions.push((name.into(), source.into()));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|(name, _)| name.as_str())
    }
}

/// Restricts a bundle to the requested function names.
///
/// An empty request means the whole bundle, initializer included.
pub fn select(bundle: LibraryBundle, requested: &[&str]) -> Result<LibraryBundle> {
    if requested.is_empty() {
        return Ok(bundle);
    }
    let mut functions = Vec::with_capacity(requested.len());
    for &name in requested {
        let found = bundle
            .functions
            .iter()
            .find(|(n, _)| n == name)
            .cloned()
            .ok_or_else(|| Error::NoSuchFunction {
                library: bundle.classname.clone(),
                name: name.to_string(),
            })?;
        functions.push(found);
    }
    Ok(LibraryBundle { functions, ..bundle })
}

/// Maps a bundle name to its sources.
pub trait LibraryResolver {
    fn resolve(&self, name: &str) -> Result<LibraryBundle>;
}

/// An in-memory bundle set.
#[derive(Debug, Default)]
pub struct StaticResolver {
    bundles: Vec<LibraryBundle>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The packaged example libraries.
    pub fn builtin() -> Self {
        let mut resolver = Self::new();
        resolver.register(crate::libs::math());
        resolver.register(crate::libs::tally());
        resolver
    }

    pub fn register(&mut self, bundle: LibraryBundle) {
        self.bundles.push(bundle);
    }
}

impl LibraryResolver for StaticResolver {
    /// Matches the exact classname first, then the namespaced convention:
    /// a bundle registered as `far::math` resolves from the bare name
    /// `math`.
    fn resolve(&self, name: &str) -> Result<LibraryBundle> {
        let suffix = format!("::{}", name);
        self.bundles
            .iter()
            .find(|b| b.classname == name)
            .or_else(|| self.bundles.iter().find(|b| b.classname.ends_with(&suffix)))
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}
