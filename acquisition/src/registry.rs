/*!
Buffer registry.

Owns one fixed-size, type-tagged memory region per channel. Drivers learn a
channel's shape with `describe`, claim the region with `lock`, write into it
through the raw address and hand it back with `commit`. A successful commit
copies exactly the declared shape into an owned [`Snapshot`].

The registry is called from the control thread and from arbitrary driver
threads. All bookkeeping sits behind one short `parking_lot::Mutex`; the
buffer bytes themselves live in `UnsafeCell` storage so the driver can write
without holding the lock.
*/

use crate::callbacks::Lease;
use crate::geometry::Geometry;
use parking_lot::{Condvar, Mutex};
use shared::{AcqError, ChannelDescriptor, ChannelId, ChannelSet, Result, Snapshot};
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Word-aligned backing store of one channel
struct Slot {
    descriptor: ChannelDescriptor,
    storage: Box<[UnsafeCell<u64>]>,
    lent: bool,
}

impl Slot {
    fn new(descriptor: ChannelDescriptor) -> Self {
        let words = descriptor.byte_len().div_ceil(8);
        let storage = (0..words).map(|_| UnsafeCell::new(0u64)).collect();
        Self {
            descriptor,
            storage,
            lent: false,
        }
    }

    fn address(&self) -> NonNull<u8> {
        NonNull::from(&self.storage[..]).cast::<u8>()
    }

    fn snapshot(&self) -> Result<Snapshot> {
        // SAFETY: the storage holds at least `byte_len` initialised bytes and
        // the driver has released the buffer, so nothing writes concurrently.
        let bytes = unsafe { std::slice::from_raw_parts(self.address().as_ptr() as *const u8, self.storage.len() * 8) };
        Snapshot::copy_from(self.descriptor.clone(), bytes)
    }
}

#[derive(Default)]
struct RegistryState {
    slots: BTreeMap<ChannelId, Slot>,
    armed: ChannelSet,
    generation: u64,
}

impl RegistryState {
    fn lent(&self) -> usize {
        self.slots.values().filter(|slot| slot.lent).count()
    }

    fn armed_slot(&mut self, channel: ChannelId, call: &str) -> Result<&mut Slot> {
        if !self.armed.contains(channel) {
            return Err(AcqError::violation(channel, format!("{} on a channel that is not armed", call)));
        }
        self.slots
            .get_mut(&channel)
            .ok_or_else(|| AcqError::violation(channel, format!("{} on a channel without a buffer", call)))
    }
}

/// Per-channel buffers shared between the control thread and driver threads
#[derive(Default)]
pub struct BufferRegistry {
    state: Mutex<RegistryState>,
    idle: Condvar,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffers with the shapes of `geometry`.
    ///
    /// Buffers whose descriptor is unchanged keep their address. Rejected while
    /// any channel is armed.
    pub fn allocate(&self, geometry: &Geometry) -> Result<()> {
        let mut state = self.state.lock();
        if !state.armed.is_empty() {
            return Err(AcqError::transition("reallocate buffers", "armed"));
        }

        let mut slots = BTreeMap::new();
        for (channel, descriptor) in geometry.shapes() {
            let slot = match state.slots.remove(&channel) {
                Some(slot) if slot.descriptor == *descriptor => slot,
                _ => Slot::new(descriptor.clone()),
            };
            slots.insert(channel, slot);
        }
        state.slots = slots;
        state.generation += 1;

        info!(
            "📐 Allocated {} buffer(s) for {} ({:.1} KB, generation {})",
            state.slots.len(),
            geometry.mode,
            geometry.total_bytes() as f64 / 1024.0,
            state.generation
        );
        Ok(())
    }

    /// Open `channels` for driver callbacks
    pub fn arm(&self, channels: ChannelSet) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(channel) = channels.iter().find(|channel| !state.slots.contains_key(channel)) {
            return Err(AcqError::config(format!("no buffer allocated for the {}", channel)));
        }
        for slot in state.slots.values_mut() {
            slot.lent = false;
        }
        state.armed = channels;
        debug!(?channels, "registry armed");
        Ok(())
    }

    /// Close every channel; buffers still lent are returned by their late commit
    pub fn disarm(&self) -> ChannelSet {
        let mut state = self.state.lock();
        let previous = state.armed;
        state.armed.clear();
        previous
    }

    pub fn armed(&self) -> ChannelSet {
        self.state.lock().armed
    }

    /// Number of successful allocations so far
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Shape of an armed channel
    pub fn describe(&self, channel: ChannelId) -> Result<ChannelDescriptor> {
        let mut state = self.state.lock();
        Ok(state.armed_slot(channel, "describe")?.descriptor.clone())
    }

    /// Shape of an allocated channel, armed or not
    pub fn allocated(&self, channel: ChannelId) -> Option<ChannelDescriptor> {
        self.state.lock().slots.get(&channel).map(|slot| slot.descriptor.clone())
    }

    /// Address the driver writes into for an armed channel
    pub fn address(&self, channel: ChannelId) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        Ok(state.armed_slot(channel, "address")?.address())
    }

    /// Lend an armed buffer to the driver
    pub fn lock(&self, channel: ChannelId) -> Result<Lease> {
        let mut state = self.state.lock();
        let slot = state.armed_slot(channel, "lock")?;
        if slot.lent {
            return Err(AcqError::violation(channel, "locked twice without an unlock"));
        }
        slot.lent = true;
        Ok(Lease::new(channel, slot.descriptor.clone(), slot.address()))
    }

    /// Take a buffer back from the driver.
    ///
    /// With `success` the declared shape is copied out and returned. A commit
    /// for a channel disarmed while its buffer was lent is a late completion:
    /// the buffer is released and nothing is returned.
    pub fn commit(&self, channel: ChannelId, success: bool) -> Result<Option<Snapshot>> {
        let mut state = self.state.lock();
        let armed = state.armed.contains(channel);
        let result = match state.slots.get_mut(&channel) {
            Some(slot) if !armed && slot.lent => {
                slot.lent = false;
                debug!(%channel, "late commit after disarm");
                Ok(None)
            }
            Some(slot) if armed && !slot.lent => Err(AcqError::violation(channel, "unlock without a lock")),
            Some(slot) if armed => {
                slot.lent = false;
                if success {
                    slot.snapshot().map(Some)
                } else {
                    Ok(None)
                }
            }
            _ => Err(AcqError::violation(channel, "commit on a channel that is not armed")),
        };
        if state.lent() == 0 {
            self.idle.notify_all();
        }
        result
    }

    /// Buffers currently lent to the driver
    pub fn in_flight(&self) -> usize {
        self.state.lock().lent()
    }

    /// Wait until no buffer is lent; `false` if `timeout` expired first
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.lent() > 0 {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.lent() == 0;
            }
        }
        true
    }

    /// Mark every buffer returned; used when a stop gives up waiting
    pub fn force_release(&self) -> usize {
        let mut state = self.state.lock();
        let mut released = 0;
        for (channel, slot) in state.slots.iter_mut().filter(|(_, slot)| slot.lent) {
            warn!(%channel, "⚠️ Reclaiming buffer the driver never returned");
            slot.lent = false;
            released += 1;
        }
        released
    }
}

impl std::fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferRegistry")
            .field("channels", &state.slots.keys().collect::<Vec<_>>())
            .field("armed", &state.armed)
            .field("generation", &state.generation)
            .finish()
    }
}
