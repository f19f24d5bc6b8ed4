//! The [`Packet`] contract: a deferred, self-contained mutation.
//!
//! A packet is created on the simulation thread when an observable change
//! occurs. It captures a snapshot of the source values it needs *by value*
//! at creation time, is moved into the open batch, and is later applied
//! exactly once on the render thread against the consumer-side state `S`.
//!
//! `apply` takes `self: Box<Self>`, so a packet is consumed by its single
//! application and can never be applied twice or touched by the producer
//! after hand-off.

use crate::error::ApplyError;
use crate::id::OwnerId;

/// A unit of deferred work applied on the consumer thread.
///
/// `S` is the consumer-side representation the packet mutates (scene
/// graph, GPU resource table, UI tree, ...). Concrete mutation kinds are
/// either separate types implementing this trait or variants of a single
/// host-defined enum that implements it once.
///
/// # Examples
///
/// ```
/// use tandem_core::{ApplyError, OwnerId, Packet};
///
/// struct SetPosition {
///     owner: OwnerId,
///     position: [f32; 3],
/// }
///
/// impl Packet<Vec<[f32; 3]>> for SetPosition {
///     fn apply(self: Box<Self>, positions: &mut Vec<[f32; 3]>) -> Result<(), ApplyError> {
///         let slot = positions
///             .get_mut(self.owner.0 as usize)
///             .ok_or(ApplyError::TargetGone { owner: self.owner })?;
///         *slot = self.position;
///         Ok(())
///     }
///
///     fn owner(&self) -> Option<OwnerId> {
///         Some(self.owner)
///     }
/// }
///
/// let mut positions = vec![[0.0; 3]; 2];
/// let packet: Box<dyn Packet<Vec<[f32; 3]>>> = Box::new(SetPosition {
///     owner: OwnerId(1),
///     position: [1.0, 2.0, 3.0],
/// });
/// packet.apply(&mut positions).unwrap();
/// assert_eq!(positions[1], [1.0, 2.0, 3.0]);
/// ```
pub trait Packet<S>: Send {
    /// Apply the captured mutation to the consumer-side state.
    ///
    /// Consumes the packet. Errors are contained by the drain loop and
    /// never abort the rest of the batch.
    fn apply(self: Box<Self>, target: &mut S) -> Result<(), ApplyError>;

    /// The engine-side object this packet was derived from, if any.
    fn owner(&self) -> Option<OwnerId> {
        None
    }

    /// Short static label used in logs and diagnostics.
    fn label(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A heap-allocated, type-erased packet as stored in a batch.
pub type BoxedPacket<S> = Box<dyn Packet<S>>;

/// A packet backed by a one-shot closure.
///
/// Convenient for mutation sites that do not warrant a named type. The
/// closure must own everything it captures (`move`), which is exactly the
/// snapshot hand-off the packet contract requires.
pub struct FnPacket<F> {
    label: &'static str,
    owner: Option<OwnerId>,
    apply: F,
}

impl<F> FnPacket<F> {
    /// Attribute this packet to an engine-side owner.
    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl<S, F> Packet<S> for FnPacket<F>
where
    F: FnOnce(&mut S) -> Result<(), ApplyError> + Send,
{
    fn apply(self: Box<Self>, target: &mut S) -> Result<(), ApplyError> {
        (self.apply)(target)
    }

    fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

impl<F> std::fmt::Debug for FnPacket<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPacket")
            .field("label", &self.label)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Build a [`FnPacket`] from a labelled closure.
///
/// ```
/// use tandem_core::{packet_fn, BoxedPacket};
///
/// let captured = 5u32;
/// let packet: BoxedPacket<Vec<u32>> = Box::new(packet_fn("push", move |v: &mut Vec<u32>| {
///     v.push(captured);
///     Ok(())
/// }));
/// let mut state = Vec::new();
/// packet.apply(&mut state).unwrap();
/// assert_eq!(state, vec![5]);
/// ```
pub fn packet_fn<F>(label: &'static str, apply: F) -> FnPacket<F> {
    FnPacket {
        label,
        owner: None,
        apply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Push(u32);

    impl Packet<Vec<u32>> for Push {
        fn apply(self: Box<Self>, target: &mut Vec<u32>) -> Result<(), ApplyError> {
            target.push(self.0);
            Ok(())
        }
    }

    #[test]
    fn default_label_is_type_name() {
        let p: BoxedPacket<Vec<u32>> = Box::new(Push(1));
        assert!(p.label().ends_with("Push"));
        assert_eq!(p.owner(), None);
    }

    #[test]
    fn fn_packet_carries_label_and_owner() {
        let p: BoxedPacket<Vec<u32>> = Box::new(
            packet_fn("grow", |v: &mut Vec<u32>| {
                v.push(7);
                Ok(())
            })
            .with_owner(OwnerId(3)),
        );
        assert_eq!(p.label(), "grow");
        assert_eq!(p.owner(), Some(OwnerId(3)));

        let mut state = Vec::new();
        p.apply(&mut state).unwrap();
        assert_eq!(state, vec![7]);
    }

    #[test]
    fn fn_packet_propagates_error() {
        let p: BoxedPacket<()> = Box::new(packet_fn("fail", |_: &mut ()| {
            Err(ApplyError::Failed {
                reason: "nope".into(),
            })
        }));
        assert!(matches!(p.apply(&mut ()), Err(ApplyError::Failed { .. })));
    }
}
