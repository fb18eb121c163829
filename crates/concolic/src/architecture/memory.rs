//! Memory contract machinery shared by backends whose memory is reached through the debug
//! session.

use tracing::debug;

use super::binding::live_session;
use super::{ArchitectureCore, Error, Result};
use crate::debugger::{self, DebugSession};
use crate::event::{EventAction, ExecutionEvent, MemoryDigest};
use crate::mem::{AddressInterval, MapOutcome, MemoryMap, Permissions};

fn read_interval(session: &mut dyn DebugSession, interval: AddressInterval) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; interval.len()?];
    debugger::read_exact(session, interval.least(), &mut bytes)?;
    Ok(bytes)
}

/// Maximal runs of bytes where `expected` and `actual` differ, as (offset, length) pairs.
fn differing_runs(expected: &[u8], actual: &[u8]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, (lhs, rhs)) in expected.iter().zip(actual).enumerate() {
        match (lhs != rhs, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - s));
                start = None;
            }
            _ => (),
        }
    }

    if let Some(s) = start {
        runs.push((s, expected.len().min(actual.len()) - s));
    }

    runs
}

impl ArchitectureCore {
    /// Add the interval to the memory view. See [crate::mem::RegionMap] for the conflict policy.
    pub fn map_region(&mut self, interval: AddressInterval, permissions: Permissions) -> Result<()> {
        let binding = self.require_loaded("map_memory");
        match binding.memory.map(interval, permissions)? {
            MapOutcome::Mapped => debug!("mapped {interval} {permissions}"),
            MapOutcome::AlreadyMapped => debug!("{interval} already mapped {permissions}"),
        }
        Ok(())
    }

    /// Remove the interval from the memory view.
    pub fn unmap_region(&mut self, interval: AddressInterval) -> Result<()> {
        let binding = self.require_loaded("unmap_memory");
        for removed in binding.memory.unmap(interval) {
            debug!("unmapped {removed}");
        }
        Ok(())
    }

    /// An unmap event clearing the whole address space, a map event for every region, then a
    /// write event carrying the current contents of every writable region. Memory is only read.
    pub fn memory_restore_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        let binding = self.require_loaded("create_memory_restore_events");
        let session = live_session(&mut binding.lifecycle, &mut binding.supervisor)?;

        // Regions mapped or re-permissioned after this point must not survive the restore
        let regions: Vec<_> = binding.memory.regions().collect();
        let mut events = vec![ExecutionEvent::unmap_memory(AddressInterval::new(0, u64::MAX))];
        events.extend(
            regions
                .iter()
                .map(|&(interval, permissions)| ExecutionEvent::map_memory(interval, permissions)),
        );

        for (interval, permissions) in regions {
            if permissions.is_writable() {
                let bytes = read_interval(session, interval)?;
                events.push(ExecutionEvent::write_memory(interval.least(), bytes));
            }
        }

        Ok(events)
    }

    /// A hash event for every readable region.
    pub fn memory_hash_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        let binding = self.require_loaded("create_memory_hash_events");
        let session = live_session(&mut binding.lifecycle, &mut binding.supervisor)?;

        let mut events = Vec::new();
        for (interval, permissions) in binding.memory.regions() {
            if permissions.is_readable() {
                let bytes = read_interval(session, interval)?;
                events.push(ExecutionEvent::hash_memory(interval, &bytes));
            }
        }

        Ok(events)
    }

    /// Write events, located at `insn_va`, replacing analysis-time bytes of `map` with the
    /// concrete bytes wherever they differ. Segments outside of the memory view are skipped.
    pub fn memory_adjust_events(
        &mut self,
        map: &MemoryMap,
        insn_va: u64,
    ) -> Result<Vec<ExecutionEvent>> {
        let binding = self.require_loaded("create_memory_adjust_events");
        let session = live_session(&mut binding.lifecycle, &mut binding.supervisor)?;

        let mut events = Vec::new();
        for (interval, segment) in map.segments() {
            if !binding.memory.is_mapped(&interval) {
                debug!("{interval} is not mapped; not adjusting");
                continue;
            }

            let concrete = read_interval(session, interval)?;
            for (offset, len) in differing_runs(&segment.content, &concrete) {
                let address = interval.least() + offset as u64;
                events.push(
                    ExecutionEvent::write_memory(address, concrete[offset..offset + len].to_vec())
                        .at(insn_va),
                );
            }
        }

        Ok(events)
    }

    /// Apply the event. The event location is not checked; scheduling events at the right
    /// instruction is the caller's responsibility.
    pub fn replay(&mut self, event: &ExecutionEvent) -> Result<()> {
        let binding = self.require_loaded("play_event");
        match &event.action {
            EventAction::MapMemory {
                interval,
                permissions,
            } => {
                binding.memory.map(*interval, *permissions)?;
            }
            EventAction::UnmapMemory { interval } => {
                binding.memory.unmap(*interval);
            }
            EventAction::WriteMemory { address, bytes } => {
                let session = live_session(&mut binding.lifecycle, &mut binding.supervisor)?;
                debugger::write_all(session, *address, bytes)?;
            }
            EventAction::HashMemory { interval, digest } => {
                let session = live_session(&mut binding.lifecycle, &mut binding.supervisor)?;
                let actual = MemoryDigest::of(&read_interval(session, *interval)?);
                if actual != *digest {
                    return Err(Error::MemoryDivergence {
                        interval: *interval,
                        expected: *digest,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }
}
