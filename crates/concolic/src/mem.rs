use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Memory result type
pub type Result<T> = std::result::Result<T, Error>;

/// Possible memory errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested mapping overlaps an existing region in a way that is not an exact remap.
    #[error("cannot map {requested} with {permissions}: overlaps {existing} mapped with {existing_permissions}")]
    MappingConflict {
        requested: AddressInterval,
        permissions: Permissions,
        existing: AddressInterval,
        existing_permissions: Permissions,
    },

    /// The arguments provided for a given request are invalid
    #[error("arguments provided are not valid: {0}")]
    InvalidArguments(String),
}

/// Order of bytes for multi-byte values stored in emulated memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Most significant byte at the lowest address
    BigEndian,

    /// Least significant byte at the lowest address
    LittleEndian,
}

/// A non-empty, inclusive range of addresses. Both ends are inclusive so that the entire 64-bit
/// address space can be described.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressInterval {
    least: u64,
    greatest: u64,
}

impl AddressInterval {
    /// Create the interval `[least, greatest]`.
    ///
    /// # Panics
    ///
    /// Panics if `least > greatest`.
    pub fn new(least: u64, greatest: u64) -> Self {
        assert!(
            least <= greatest,
            "interval least {least:#x} exceeds greatest {greatest:#x}"
        );
        Self { least, greatest }
    }

    /// Create the interval starting at `base` spanning `size` bytes. Returns `None` if the size is
    /// zero or the interval would wrap past the end of the address space.
    pub fn from_base_size(base: u64, size: u64) -> Option<Self> {
        let last = size.checked_sub(1)?;
        let greatest = base.checked_add(last)?;
        Some(Self::new(base, greatest))
    }

    /// Interval containing exactly one address
    pub fn single(address: u64) -> Self {
        Self::new(address, address)
    }

    pub fn least(&self) -> u64 {
        self.least
    }

    pub fn greatest(&self) -> u64 {
        self.greatest
    }

    /// Number of addresses in the interval. The full address space has 2^64 addresses, which is
    /// why this returns a `u128`.
    pub fn size(&self) -> u128 {
        u128::from(self.greatest - self.least) + 1
    }

    pub fn contains(&self, address: u64) -> bool {
        self.least <= address && address <= self.greatest
    }

    pub fn contains_interval(&self, other: &Self) -> bool {
        self.least <= other.least && other.greatest <= self.greatest
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.least <= other.greatest && other.least <= self.greatest
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if self.overlaps(other) {
            Some(Self::new(
                self.least.max(other.least),
                self.greatest.min(other.greatest),
            ))
        } else {
            None
        }
    }

    /// Number of bytes as a `usize`, if it fits.
    pub(crate) fn len(&self) -> Result<usize> {
        usize::try_from(self.size()).map_err(|_| {
            Error::InvalidArguments(format!("interval {self} is too large to transfer"))
        })
    }
}

impl fmt::Display for AddressInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}, {:#010x}]", self.least, self.greatest)
    }
}

/// Access rights of a memory region
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b001);
    pub const WRITE: Self = Self(0b010);
    pub const EXECUTE: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Permissions from raw bits. Bits outside of [Self::ALL] are discarded.
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_readable(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |perm, c| if self.contains(perm) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXECUTE, 'x')
        )
    }
}

/// The addressable-memory view of a backend: a set of disjoint intervals, each with permissions.
///
/// # Conflicts
///
/// Mapping an interval that is already mapped with the identical extent and permissions is a
/// no-op. Any other overlap with an existing region is rejected with [Error::MappingConflict]
/// and leaves the view unchanged. Regions are never merged, so mapping `R` and then unmapping `R`
/// always restores the view that existed before `R` was mapped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionMap {
    // Keyed on the least address of each region
    regions: BTreeMap<u64, (AddressInterval, Permissions)>,
}

/// Whether a [RegionMap::map] call changed the view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapOutcome {
    Mapped,
    AlreadyMapped,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Regions in address order
    pub fn regions(&self) -> impl Iterator<Item = (AddressInterval, Permissions)> + '_ {
        self.regions.values().copied()
    }

    /// Permissions of the region containing `address`, if it is mapped.
    pub fn permissions_at(&self, address: u64) -> Option<Permissions> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(_, (interval, _))| interval.contains(address))
            .map(|(_, (_, permissions))| *permissions)
    }

    /// Returns true if every address of `interval` is mapped.
    pub fn is_mapped(&self, interval: &AddressInterval) -> bool {
        let mut next = interval.least();
        for (region, _) in self.overlapping(interval) {
            if region.least() > next {
                return false;
            }
            if region.greatest() >= interval.greatest() {
                return true;
            }
            next = region.greatest() + 1;
        }

        false
    }

    fn overlapping<'a>(
        &'a self,
        interval: &'a AddressInterval,
    ) -> impl Iterator<Item = (AddressInterval, Permissions)> + 'a {
        // The region preceding the interval start may still extend into it
        let first = self
            .regions
            .range(..interval.least())
            .next_back()
            .map(|(&key, _)| key)
            .unwrap_or(interval.least());

        self.regions
            .range(first..=interval.greatest())
            .map(|(_, region)| *region)
            .filter(|(region, _)| region.overlaps(interval))
    }

    pub fn map(&mut self, interval: AddressInterval, permissions: Permissions) -> Result<MapOutcome> {
        if let Some((existing, existing_permissions)) = self.overlapping(&interval).next() {
            if existing == interval && existing_permissions == permissions {
                return Ok(MapOutcome::AlreadyMapped);
            }

            return Err(Error::MappingConflict {
                requested: interval,
                permissions,
                existing,
                existing_permissions,
            });
        }

        self.regions
            .insert(interval.least(), (interval, permissions));
        Ok(MapOutcome::Mapped)
    }

    /// Remove all mapped addresses within `interval`, splitting regions which extend beyond it.
    /// Returns the intervals that were actually removed.
    pub fn unmap(&mut self, interval: AddressInterval) -> Vec<AddressInterval> {
        let affected: Vec<_> = self.overlapping(&interval).collect();
        let mut removed = Vec::with_capacity(affected.len());
        for (region, permissions) in affected {
            self.regions.remove(&region.least());

            if region.least() < interval.least() {
                let head = AddressInterval::new(region.least(), interval.least() - 1);
                self.regions.insert(head.least(), (head, permissions));
            }

            if region.greatest() > interval.greatest() {
                let tail = AddressInterval::new(interval.greatest() + 1, region.greatest());
                self.regions.insert(tail.least(), (tail, permissions));
            }

            // Overlap is guaranteed by the filter above
            if let Some(gone) = region.intersection(&interval) {
                removed.push(gone);
            }
        }

        removed
    }
}

/// A segment of the analysis-time memory map along with the bytes the analysis assumes it holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub permissions: Permissions,
    pub content: Vec<u8>,
}

/// Memory as seen by the disassembler when the program model was built. Concrete execution may
/// diverge from this, see [crate::architecture::Architecture::create_memory_adjust_events].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryMap {
    segments: BTreeMap<u64, Segment>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a segment starting at `base`. Overlapping segments are rejected.
    pub fn insert(&mut self, base: u64, permissions: Permissions, content: Vec<u8>) -> Result<()> {
        let interval = u64::try_from(content.len())
            .ok()
            .and_then(|size| AddressInterval::from_base_size(base, size))
            .ok_or_else(|| {
                Error::InvalidArguments(format!(
                    "segment at {base:#x} with {len} byte(s) is empty or wraps",
                    len = content.len()
                ))
            })?;

        if let Some((existing, _)) = self.segments().find(|(other, _)| other.overlaps(&interval)) {
            return Err(Error::InvalidArguments(format!(
                "segment {interval} overlaps existing segment {existing}"
            )));
        }

        self.segments.insert(
            base,
            Segment {
                permissions,
                content,
            },
        );
        Ok(())
    }

    /// Segments in address order
    pub fn segments(&self) -> impl Iterator<Item = (AddressInterval, &Segment)> {
        self.segments.iter().map(|(&base, segment)| {
            // Non-empty and non-wrapping is checked on insert
            let greatest = base + (segment.content.len() as u64 - 1);
            (AddressInterval::new(base, greatest), segment)
        })
    }
}
