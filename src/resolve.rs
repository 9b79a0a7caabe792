//! Best-effort symbol resolution through a chain of strategies.
//!
//! Allocator control structures are usually not exported and debug
//! information is frequently missing. The [`Resolver`] therefore tries
//! increasingly speculative [`Strategy`]s for every [`Request`] and
//! reports the first address found.

use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::log::debug;
use crate::log::info;
use crate::Addr;
use crate::Confirm;
use crate::Error;
use crate::Result;
use crate::Target;
use crate::ThreadId;


/// The strategies a [`Resolver`] employs, in order of preference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Lookup in the dynamic symbol tables of loaded objects.
    DynamicSymbol,
    /// Lookup among static linkage (non-exported) symbols.
    StaticSymbol,
    /// An allocator specific heuristic, such as scanning a data
    /// section for a plausible structure.
    Heuristic,
    /// A brute force scan of memory, performed only with operator
    /// consent.
    BruteForce,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            Self::DynamicSymbol => "dynamic symbol",
            Self::StaticSymbol => "static linkage symbol",
            Self::Heuristic => "heuristic",
            Self::BruteForce => "brute force",
        };
        f.write_str(s)
    }
}


/// A successfully resolved address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Resolved {
    /// The address found.
    pub addr: Addr,
    /// The strategy that produced it.
    pub strategy: Strategy,
}


/// The outcome of a resolution for which every strategy failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Unresolved {
    /// The name of the symbol that could not be resolved.
    pub symbol: String,
}

impl Display for Unresolved {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "failed to resolve symbol `{}`", self.symbol)
    }
}

impl From<Unresolved> for Error {
    fn from(other: Unresolved) -> Self {
        Error::symbol_unresolvable(other.symbol)
    }
}


type Probe<'req> = Box<dyn FnOnce() -> Result<Option<Addr>> + 'req>;


/// A request to resolve a single symbol.
pub struct Request<'req> {
    symbol: &'req str,
    thread: ThreadId,
    deref: bool,
    heuristic: Option<Probe<'req>>,
    brute_force: Option<(String, Probe<'req>)>,
}

impl<'req> Request<'req> {
    /// Create a request for `symbol`, as seen by `thread`.
    pub fn new(symbol: &'req str, thread: ThreadId) -> Self {
        Self {
            symbol,
            thread,
            deref: false,
            heuristic: None,
            brute_force: None,
        }
    }

    /// Mark the symbol as a pointer variable (e.g., a thread-local
    /// `tcache`), the value of which is the address of interest.
    ///
    /// Symbol strategies then read the variable, and a NULL value
    /// counts as failure. Heuristics and brute force scans are
    /// expected to produce the pointed-to address directly.
    pub fn deref(mut self, deref: bool) -> Self {
        self.deref = deref;
        self
    }

    /// Install the heuristic to try once symbol lookup failed.
    ///
    /// The closure reports `Ok(None)` if it found no candidate. Errors
    /// are logged and treated the same way.
    pub fn heuristic<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Result<Option<Addr>> + 'req,
    {
        self.heuristic = Some(Box::new(f));
        self
    }

    /// Install a brute force scan, to be run only if the operator
    /// answers `prompt` affirmatively.
    pub fn brute_force<F>(mut self, prompt: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<Option<Addr>> + 'req,
    {
        self.brute_force = Some((prompt.into(), Box::new(f)));
        self
    }
}

impl Debug for Request<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Request")
            .field("symbol", &self.symbol)
            .field("thread", &self.thread)
            .field("deref", &self.deref)
            .field("heuristic", &self.heuristic.is_some())
            .field("brute_force", &self.brute_force.as_ref().map(|(p, _)| p))
            .finish()
    }
}


/// Resolves symbols using the strategy chain.
pub struct Resolver<'t> {
    target: &'t dyn Target,
    confirm: &'t dyn Confirm,
    heuristics: bool,
}

impl<'t> Resolver<'t> {
    /// Create a resolver.
    ///
    /// With `heuristics` set to `false`, only the symbol strategies are
    /// used.
    pub fn new(target: &'t dyn Target, confirm: &'t dyn Confirm, heuristics: bool) -> Self {
        Self {
            target,
            confirm,
            heuristics,
        }
    }

    fn symbol_strategy(
        &self,
        strategy: Strategy,
        symbol: &str,
        thread: ThreadId,
        deref: bool,
    ) -> Option<Addr> {
        let addr = match strategy {
            Strategy::DynamicSymbol => self.target.dynamic_symbol_address(symbol, thread),
            Strategy::StaticSymbol => self.target.static_linkage_symbol_address(symbol, thread),
            Strategy::Heuristic | Strategy::BruteForce => None,
        }?;

        if !deref {
            return Some(addr)
        }

        match self.target.read_pointer(addr) {
            Ok(0) => {
                debug!("`{symbol}` at {addr:#x} is NULL");
                None
            }
            Ok(value) => Some(value),
            Err(err) => {
                debug!("failed to read `{symbol}` at {addr:#x}: {err:#}");
                None
            }
        }
    }

    fn probe(strategy: Strategy, symbol: &str, probe: Probe<'_>) -> Option<Addr> {
        match probe() {
            Ok(Some(addr)) => Some(addr),
            Ok(None) => {
                debug!("{strategy} found no candidate for `{symbol}`");
                None
            }
            Err(err) => {
                debug!("{strategy} failed for `{symbol}`: {err:#}");
                None
            }
        }
    }

    /// Resolve the symbol described by `request`.
    pub fn resolve(&self, request: Request<'_>) -> Result<Resolved, Unresolved> {
        let Request {
            symbol,
            thread,
            deref,
            heuristic,
            brute_force,
        } = request;

        for strategy in [Strategy::DynamicSymbol, Strategy::StaticSymbol] {
            if let Some(addr) = self.symbol_strategy(strategy, symbol, thread, deref) {
                debug!("resolved `{symbol}` to {addr:#x} via {strategy}");
                return Ok(Resolved { addr, strategy })
            }
        }

        if self.heuristics {
            if let Some(heuristic) = heuristic {
                if let Some(addr) = Self::probe(Strategy::Heuristic, symbol, heuristic) {
                    debug!("resolved `{symbol}` to {addr:#x} heuristically");
                    return Ok(Resolved {
                        addr,
                        strategy: Strategy::Heuristic,
                    })
                }
            }

            if let Some((prompt, scan)) = brute_force {
                if self.confirm.confirm(&prompt) {
                    info!("brute forcing `{symbol}` for thread {thread}");
                    if let Some(addr) = Self::probe(Strategy::BruteForce, symbol, scan) {
                        return Ok(Resolved {
                            addr,
                            strategy: Strategy::BruteForce,
                        })
                    }
                } else {
                    debug!("operator declined brute forcing `{symbol}`");
                }
            }
        }

        Err(Unresolved {
            symbol: symbol.to_string(),
        })
    }
}

impl Debug for Resolver<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Resolver")
            .field("heuristics", &self.heuristics)
            .finish()
    }
}
