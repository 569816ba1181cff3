//! Registry of live debug contexts and the page slots bound to them.
//!
//! The registry is owned by the pilot and is only ever mutated on the pilot
//! thread. It enforces the exclusive pairing between contexts and pages: a
//! page slot is bound to at most one context and a context holds at most one
//! page.

use crate::error::{BridgeError, BridgeResult};
use crate::message::BreakInfo;
use crate::page::PageHandle;
use crate::queue::{BoundedQueue, OverflowPolicy};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::Sender;

/// Upper bound on simultaneously bound pages when not configured otherwise.
pub const K_MAX_PAGES: usize = 8;

/// Opaque identifier of one debuggable execution unit.
///
/// The bridge never interprets the value; it is only compared and echoed on
/// the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// The raw token.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ContextId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContextId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| BridgeError::invalid(format!("bad context id `{s}`")))
    }
}

/// Signal delivered to an engine thread parked in `ContextUpdated`.
#[derive(Debug)]
pub enum Release {
    /// A page is connected and ready to receive the pause.
    Page(PageHandle),
    /// The context was aborted or removed while waiting.
    Aborted,
}

/// State of one live context.
#[derive(Debug)]
pub struct ContextDescriptor {
    id: ContextId,
    page: Option<u32>,
    release: Option<Sender<Release>>,
    debug_info: Option<BreakInfo>,
    updated: bool,
    pause_requested: bool,
    trace: Arc<BoundedQueue<String>>,
}

impl ContextDescriptor {
    fn new(id: ContextId, trace_capacity: usize) -> Self {
        Self {
            id,
            page: None,
            release: None,
            debug_info: None,
            updated: false,
            pause_requested: false,
            trace: Arc::new(BoundedQueue::new(trace_capacity, OverflowPolicy::FailFast)),
        }
    }

    /// The context id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Number of the page bound to this context.
    #[must_use]
    pub fn page(&self) -> Option<u32> {
        self.page
    }

    /// Last pause location reported by the engine.
    #[must_use]
    pub fn debug_info(&self) -> Option<&BreakInfo> {
        self.debug_info.as_ref()
    }

    /// Records the last pause location.
    pub fn set_debug_info(&mut self, info: BreakInfo) {
        self.debug_info = Some(info);
    }

    /// Whether the browser still has to be told about this context.
    #[must_use]
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Sets the "browser must be told" flag.
    pub fn set_updated(&mut self, updated: bool) {
        self.updated = updated;
    }

    /// Whether an engine thread is parked waiting for a page.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.release.is_some()
    }

    /// Parks the release sender; any earlier sender is dropped, which wakes
    /// its receiver with a disconnect.
    pub fn arm(&mut self, release: Sender<Release>) {
        self.release = Some(release);
    }

    /// Wakes the parked engine thread, if any. Returns whether one was parked.
    pub fn release(&mut self, signal: Release) -> bool {
        match self.release.take() {
            // The receiver may already be gone if the engine thread gave up.
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

    /// Records a pending pause request.
    pub fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    /// Returns and clears the pending pause request.
    pub fn take_pause_request(&mut self) -> bool {
        std::mem::take(&mut self.pause_requested)
    }

    /// Fire-and-forget trace sink of this context.
    #[must_use]
    pub fn trace(&self) -> &Arc<BoundedQueue<String>> {
        &self.trace
    }
}

/// A page slot bound to a context.
#[derive(Debug)]
pub struct PageSlot {
    /// The context owning the page.
    pub owner: ContextId,
    /// The page's shared queues and state.
    pub handle: PageHandle,
}

/// The registry itself.
#[derive(Debug)]
pub struct ContextRegistry {
    contexts: BTreeMap<ContextId, ContextDescriptor>,
    pages: Vec<Option<PageSlot>>,
    next_id: u64,
    trace_capacity: usize,
}

impl ContextRegistry {
    /// Creates a registry with `max_pages` page slots.
    #[must_use]
    pub fn new(max_pages: usize, trace_capacity: usize) -> Self {
        Self {
            contexts: BTreeMap::new(),
            pages: (0..max_pages.max(1)).map(|_| None).collect(),
            next_id: 1,
            trace_capacity,
        }
    }

    /// Registers a fresh context and returns its id.
    pub fn insert(&mut self) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.contexts
            .insert(id, ContextDescriptor::new(id, self.trace_capacity));
        id
    }

    /// Looks up a context.
    #[must_use]
    pub fn get(&self, id: ContextId) -> Option<&ContextDescriptor> {
        self.contexts.get(&id)
    }

    /// Looks up a context mutably.
    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut ContextDescriptor> {
        self.contexts.get_mut(&id)
    }

    /// Looks up a context, failing with [`BridgeError::UnknownContext`].
    pub fn require(&mut self, id: ContextId) -> BridgeResult<&mut ContextDescriptor> {
        self.contexts
            .get_mut(&id)
            .ok_or(BridgeError::UnknownContext(id))
    }

    /// Removes a context and frees its page slot.
    ///
    /// The returned descriptor still holds any armed release sender so the
    /// caller can decide how to wake the engine thread.
    pub fn remove(&mut self, id: ContextId) -> Option<(ContextDescriptor, Option<PageHandle>)> {
        let descriptor = self.contexts.remove(&id)?;
        let page = descriptor
            .page
            .and_then(|number| self.take_slot(number))
            .map(|slot| slot.handle);
        Some((descriptor, page))
    }

    /// Binds a page to `id`, creating it with `make` if the context has none.
    ///
    /// Returns the page number and handle; an already bound page is returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Fails if the context is unknown or every slot is taken.
    pub fn assign_page(
        &mut self,
        id: ContextId,
        make: impl FnOnce(u32) -> PageHandle,
    ) -> BridgeResult<(u32, PageHandle)> {
        let descriptor = self
            .contexts
            .get_mut(&id)
            .ok_or(BridgeError::UnknownContext(id))?;

        if let Some(number) = descriptor.page {
            if let Some(slot) = slot_at(&self.pages, number) {
                return Ok((number, slot.handle.clone()));
            }
        }

        let index = self
            .pages
            .iter()
            .position(Option::is_none)
            .ok_or(BridgeError::NoFreePage)?;
        let number = u32::try_from(index + 1).map_err(|_| BridgeError::NoFreePage)?;
        let handle = make(number);
        self.pages[index] = Some(PageSlot {
            owner: id,
            handle: handle.clone(),
        });
        descriptor.page = Some(number);
        Ok((number, handle))
    }

    /// Unbinds page `number` from its owner. Returns the former owner.
    pub fn release_page(&mut self, number: u32) -> Option<(ContextId, PageHandle)> {
        let slot = self.take_slot(number)?;
        if let Some(descriptor) = self.contexts.get_mut(&slot.owner) {
            descriptor.page = None;
        }
        Some((slot.owner, slot.handle))
    }

    fn take_slot(&mut self, number: u32) -> Option<PageSlot> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.pages.get_mut(index)?.take()
    }

    /// The slot for page `number`.
    #[must_use]
    pub fn page(&self, number: u32) -> Option<&PageSlot> {
        slot_at(&self.pages, number)
    }

    /// The page bound to `id`.
    #[must_use]
    pub fn page_of(&self, id: ContextId) -> Option<&PageHandle> {
        let number = self.contexts.get(&id)?.page?;
        slot_at(&self.pages, number).map(|slot| &slot.handle)
    }

    /// All live contexts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ContextDescriptor> {
        self.contexts.values()
    }

    /// All live contexts in id order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ContextDescriptor> {
        self.contexts.values_mut()
    }

    /// Ids of all live contexts.
    #[must_use]
    pub fn ids(&self) -> Vec<ContextId> {
        self.contexts.keys().copied().collect()
    }

    /// Bound pages as `(number, owner, handle)`.
    pub fn bound_pages(&self) -> impl Iterator<Item = (u32, ContextId, &PageHandle)> {
        self.pages.iter().zip(1u32..).filter_map(|(slot, number)| {
            slot.as_ref()
                .map(|slot| (number, slot.owner, &slot.handle))
        })
    }

    /// Number of live contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no context is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Verifies the context/page pairing is a partial bijection.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn check_pairing(&self) -> Result<(), String> {
        for (number, owner, _) in self.bound_pages() {
            match self.contexts.get(&owner) {
                Some(descriptor) if descriptor.page == Some(number) => {}
                Some(descriptor) => {
                    return Err(format!(
                        "page {number} owned by {owner} but context points at {:?}",
                        descriptor.page
                    ));
                }
                None => return Err(format!("page {number} owned by dead context {owner}")),
            }
        }
        for descriptor in self.contexts.values() {
            if let Some(number) = descriptor.page {
                match slot_at(&self.pages, number) {
                    Some(slot) if slot.owner == descriptor.id => {}
                    _ => {
                        return Err(format!(
                            "context {} points at page {number} it does not own",
                            descriptor.id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn slot_at(pages: &[Option<PageSlot>], number: u32) -> Option<&PageSlot> {
    let index = usize::try_from(number).ok()?.checked_sub(1)?;
    pages.get(index)?.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageShared;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::mpsc;

    fn make_page(number: u32) -> PageHandle {
        PageShared::new(number, 4)
    }

    #[test]
    fn ids_are_unique_and_parse_back() {
        let mut registry = ContextRegistry::new(2, 4);
        let a = registry.insert();
        let b = registry.insert();
        assert_ne!(a, b);
        assert_eq!(b.to_string().parse::<ContextId>().unwrap(), b);
        assert!("nope".parse::<ContextId>().is_err());
    }

    #[test]
    fn assign_is_idempotent_and_bounded() {
        let mut registry = ContextRegistry::new(1, 4);
        let a = registry.insert();
        let b = registry.insert();

        let (first, _) = registry.assign_page(a, make_page).unwrap();
        let (again, _) = registry.assign_page(a, make_page).unwrap();
        assert_eq!(first, again);
        assert!(matches!(
            registry.assign_page(b, make_page),
            Err(BridgeError::NoFreePage)
        ));

        registry.remove(a).unwrap();
        let (reused, _) = registry.assign_page(b, make_page).unwrap();
        assert_eq!(reused, first);
        registry.check_pairing().unwrap();
    }

    #[test]
    fn release_page_unbinds_both_sides() {
        let mut registry = ContextRegistry::new(2, 4);
        let a = registry.insert();
        let (number, _) = registry.assign_page(a, make_page).unwrap();
        let (owner, _) = registry.release_page(number).unwrap();
        assert_eq!(owner, a);
        assert_eq!(registry.get(a).unwrap().page(), None);
        assert!(registry.page(number).is_none());
        assert!(registry.release_page(number).is_none());
    }

    #[test]
    fn release_wakes_parked_engine_once() {
        let mut registry = ContextRegistry::new(2, 4);
        let a = registry.insert();
        let (tx, rx) = mpsc::channel();
        registry.get_mut(a).unwrap().arm(tx);
        assert!(registry.get(a).unwrap().is_waiting());

        assert!(registry.get_mut(a).unwrap().release(Release::Aborted));
        assert!(matches!(rx.recv(), Ok(Release::Aborted)));
        assert!(!registry.get_mut(a).unwrap().release(Release::Aborted));
    }

    #[test]
    fn random_operation_sequences_keep_pairing_exclusive() {
        let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
        let mut registry = ContextRegistry::new(3, 4);
        let mut live = Vec::new();

        for _ in 0..2_000 {
            match rng.random_range(0..4) {
                0 => live.push(registry.insert()),
                1 if !live.is_empty() => {
                    let id = live.swap_remove(rng.random_range(0..live.len()));
                    registry.remove(id).unwrap();
                }
                2 if !live.is_empty() => {
                    let id = live[rng.random_range(0..live.len())];
                    match registry.assign_page(id, make_page) {
                        Ok(_) | Err(BridgeError::NoFreePage) => {}
                        Err(err) => panic!("unexpected {err}"),
                    }
                }
                3 => {
                    let number = rng.random_range(1..=3);
                    registry.release_page(number);
                }
                _ => {}
            }
            registry.check_pairing().unwrap();

            let mut owners: Vec<_> = registry.bound_pages().map(|(_, owner, _)| owner).collect();
            let bound = owners.len();
            owners.sort();
            owners.dedup();
            assert_eq!(owners.len(), bound, "a context owns two pages");
        }
    }
}
