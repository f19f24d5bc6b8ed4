//! Interception hook table.
//!
//! The host exposes an explicit "before this operation runs" hook at each
//! engine mutation site. Interceptors registered for the operation's key
//! get a chance to substitute a packet for the operation or suppress it
//! outright; otherwise the operation proceeds untouched.
//!
//! Interceptors for a key are consulted in registration order and the
//! first decision other than [`Intercept::Passthrough`] wins.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::packet::BoxedPacket;

/// An engine operation that can be intercepted.
pub trait Operation {
    /// The key interceptors are registered under (e.g. a method id).
    type Key: Hash + Eq + Clone + fmt::Debug;

    /// The registration key for this operation.
    fn key(&self) -> Self::Key;
}

/// An interceptor's decision for one operation.
pub enum Intercept<S> {
    /// Let the operation run as normal.
    Passthrough,
    /// Skip the operation and enqueue this packet instead.
    Substitute(BoxedPacket<S>),
    /// Skip the operation without replacement.
    Suppress,
}

impl<S> Intercept<S> {
    /// The outcome without the payload.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Passthrough => Disposition::Passthrough,
            Self::Substitute(_) => Disposition::Substituted,
            Self::Suppress => Disposition::Suppressed,
        }
    }
}

impl<S> fmt::Debug for Intercept<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passthrough => write!(f, "Passthrough"),
            Self::Substitute(p) => f.debug_tuple("Substitute").field(&p.label()).finish(),
            Self::Suppress => write!(f, "Suppress"),
        }
    }
}

/// What happened to an offered operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// No interceptor claimed it; the caller should run the operation.
    Passthrough,
    /// A packet was enqueued in its place.
    Substituted,
    /// It was dropped.
    Suppressed,
}

/// A registered handler consulted before an operation runs.
///
/// Implemented for any `Fn(&O) -> Intercept<S> + Send + Sync` closure.
pub trait Interceptor<O, S>: Send + Sync {
    /// Decide what to do with `op`.
    fn before(&self, op: &O) -> Intercept<S>;
}

impl<O, S, F> Interceptor<O, S> for F
where
    F: Fn(&O) -> Intercept<S> + Send + Sync,
{
    fn before(&self, op: &O) -> Intercept<S> {
        self(op)
    }
}

type Chain<O, S> = SmallVec<[Arc<dyn Interceptor<O, S>>; 2]>;

/// Maps operation keys to ordered interceptor chains.
pub struct HookTable<O: Operation, S> {
    chains: IndexMap<O::Key, Chain<O, S>>,
}

impl<O: Operation + 'static, S: 'static> HookTable<O, S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            chains: IndexMap::new(),
        }
    }

    /// Append `interceptor` to the chain for `key`.
    pub fn register<I>(&mut self, key: O::Key, interceptor: I)
    where
        I: Interceptor<O, S> + 'static,
    {
        self.register_shared(key, Arc::new(interceptor));
    }

    /// Append an already shared interceptor to the chain for `key`.
    pub fn register_shared(&mut self, key: O::Key, interceptor: Arc<dyn Interceptor<O, S>>) {
        self.chains.entry(key).or_default().push(interceptor);
    }

    /// Offer `op` to its chain and return the first non-passthrough
    /// decision, or [`Intercept::Passthrough`] if nobody claims it.
    pub fn offer(&self, op: &O) -> Intercept<S> {
        let Some(chain) = self.chains.get(&op.key()) else {
            return Intercept::Passthrough;
        };
        for interceptor in chain {
            match interceptor.before(op) {
                Intercept::Passthrough => continue,
                decision => return decision,
            }
        }
        Intercept::Passthrough
    }

    /// Remove every interceptor registered for `key`. Returns how many
    /// were removed.
    pub fn clear_key(&mut self, key: &O::Key) -> usize {
        self.chains
            .shift_remove(key)
            .map(|chain| chain.len())
            .unwrap_or(0)
    }

    /// Whether any interceptor is registered for `key`.
    pub fn is_hooked(&self, key: &O::Key) -> bool {
        self.chains.get(key).is_some_and(|c| !c.is_empty())
    }

    /// Total number of registered interceptors across all keys.
    pub fn len(&self) -> usize {
        self.chains.values().map(|c| c.len()).sum()
    }

    /// Whether the table has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: Operation + 'static, S: 'static> Default for HookTable<O, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Operation, S> fmt::Debug for HookTable<O, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.chains.iter().map(|(k, c)| (k, c.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplyError;
    use crate::packet::packet_fn;

    #[derive(Debug)]
    enum Op {
        SetColor { id: u64, rgb: u32 },
        Destroy { id: u64 },
    }

    impl Operation for Op {
        type Key = &'static str;
        fn key(&self) -> &'static str {
            match self {
                Op::SetColor { .. } => "set_color",
                Op::Destroy { .. } => "destroy",
            }
        }
    }

    type Colors = Vec<(u64, u32)>;

    fn substitute_color(op: &Op) -> Intercept<Colors> {
        match *op {
            Op::SetColor { id, rgb } => Intercept::Substitute(Box::new(packet_fn(
                "set_color",
                move |c: &mut Colors| {
                    c.push((id, rgb));
                    Ok::<(), ApplyError>(())
                },
            ))),
            _ => Intercept::Passthrough,
        }
    }

    #[test]
    fn unhooked_operation_passes_through() {
        let table: HookTable<Op, Colors> = HookTable::new();
        let decision = table.offer(&Op::Destroy { id: 1 });
        assert_eq!(decision.disposition(), Disposition::Passthrough);
        assert!(table.is_empty());
    }

    #[test]
    fn substitute_yields_applicable_packet() {
        let mut table: HookTable<Op, Colors> = HookTable::new();
        table.register("set_color", substitute_color);

        let Intercept::Substitute(packet) = table.offer(&Op::SetColor { id: 4, rgb: 0xff00ff })
        else {
            panic!("expected substitution");
        };
        let mut colors = Colors::new();
        packet.apply(&mut colors).unwrap();
        assert_eq!(colors, vec![(4, 0xff00ff)]);
    }

    #[test]
    fn first_non_passthrough_wins_in_registration_order() {
        let mut table: HookTable<Op, Colors> = HookTable::new();
        table.register("destroy", |_: &Op| Intercept::Passthrough);
        table.register("destroy", |_: &Op| Intercept::Suppress);
        table.register("destroy", |op: &Op| substitute_color(op));
        assert_eq!(table.len(), 3);

        let decision = table.offer(&Op::Destroy { id: 2 });
        assert_eq!(decision.disposition(), Disposition::Suppressed);
    }

    #[test]
    fn clear_key_removes_chain() {
        let mut table: HookTable<Op, Colors> = HookTable::new();
        table.register("destroy", |_: &Op| Intercept::Suppress);
        table.register("destroy", |_: &Op| Intercept::Suppress);
        table.register("set_color", substitute_color);

        assert_eq!(table.clear_key(&"destroy"), 2);
        assert!(!table.is_hooked(&"destroy"));
        assert!(table.is_hooked(&"set_color"));
        assert_eq!(
            table.offer(&Op::Destroy { id: 1 }).disposition(),
            Disposition::Passthrough
        );
    }
}
