use super::{
    AccessClass, AssetDescriptor, AssetKind, ConfigurationError, EnablePolicy, IsolationError,
    IsolationLevel, MmioDescriptor, PartitionBoundaryHandle, PartitionDescriptor, PartitionFlags,
    Privilege, ProtectionController, ProtectionRegionSpec, RegionPrivilege, RegionSetId,
    SecurityGate, Shareability, StaticRegion, StaticRegionKind, MAX_PARTITIONS,
    MAX_PARTITION_REGIONS, MAX_REGIONS,
};

const EMPTY_SPEC: ProtectionRegionSpec = ProtectionRegionSpec {
    index: 0,
    base: 0,
    limit: 0,
    access: AccessClass::NoExec,
    privilege: RegionPrivilege::PrivilegedOnly,
    shareability: Shareability::NonShareable,
};

const EMPTY_STATIC: StaticRegion = StaticRegion {
    kind: StaticRegionKind::Code,
    base: 0,
    limit: 0,
};

/// The dynamic regions owned by one bound partition, and the memory windows that tell its
/// layout apart from other partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RegionSet {
    generation: u32,
    privilege: Privilege,
    regions: [ProtectionRegionSpec; MAX_PARTITION_REGIONS],
    count: usize,
    memory: [(u32, u32); MAX_PARTITION_REGIONS],
    memory_count: usize,
}

impl RegionSet {
    const fn new(privilege: Privilege) -> Self {
        Self {
            generation: 0,
            privilege,
            regions: [EMPTY_SPEC; MAX_PARTITION_REGIONS],
            count: 0,
            memory: [(0, 0); MAX_PARTITION_REGIONS],
            memory_count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0 && self.memory_count == 0
    }

    fn memory(&self) -> &[(u32, u32)] {
        &self.memory[..self.memory_count]
    }

    fn push_memory(&mut self, base: u32, limit: u32) -> Result<(), IsolationError> {
        let Some(slot) = self.memory.get_mut(self.memory_count) else {
            return Err(IsolationError::RegionCapacityExceeded {
                required: self.memory_count + 1,
                available: MAX_PARTITION_REGIONS,
            });
        };

        *slot = (base, limit);
        self.memory_count += 1;
        Ok(())
    }

    fn regions(&self) -> &[ProtectionRegionSpec] {
        &self.regions[..self.count]
    }

    fn push(&mut self, spec: ProtectionRegionSpec) -> Result<(), IsolationError> {
        let Some(slot) = self.regions.get_mut(self.count) else {
            return Err(IsolationError::RegionCapacityExceeded {
                required: self.count + 1,
                available: MAX_PARTITION_REGIONS,
            });
        };

        *slot = spec;
        self.count += 1;
        Ok(())
    }

    fn same_protection(&self, other: &RegionSet) -> bool {
        self.privilege == other.privilege
            && self.memory() == other.memory()
            && self.count == other.count
            && self
                .regions()
                .iter()
                .zip(other.regions())
                .all(|(a, b)| a.same_protection(b))
    }

    fn region_at(&self, index: u8) -> Option<&ProtectionRegionSpec> {
        self.regions().iter().find(|spec| spec.index == index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Unconfigured,
    Established,
}

/// Owner of the hardware protection region table.
///
/// The manager is the only writer of the region table; `&mut self` on every operation that
/// touches hardware guarantees a single writer.
pub struct IsolationManager<'allow, C, G> {
    controller: C,
    gate: G,
    allow_list: &'allow [MmioDescriptor],
    level: IsolationLevel,
    state: State,
    statics: [StaticRegion; MAX_REGIONS],
    static_count: usize,
    next_region: usize,
    sets: [RegionSet; MAX_PARTITIONS],
    set_count: usize,
    generation: u32,
    active: Option<PartitionBoundaryHandle>,
}

impl<'allow, C: ProtectionController, G: SecurityGate> IsolationManager<'allow, C, G> {
    /// Creates a new [`IsolationManager`] that owns `controller` and `gate`.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::ControllerCapacity`] if `controller` reports more than
    /// [`MAX_REGIONS`] regions.
    pub fn new(
        controller: C,
        gate: G,
        allow_list: &'allow [MmioDescriptor],
        level: IsolationLevel,
    ) -> Result<Self, IsolationError> {
        let reported = controller.region_count();
        if !(reported <= MAX_REGIONS) {
            return Err(ConfigurationError::ControllerCapacity { reported }.into());
        }

        Ok(Self {
            controller,
            gate,
            allow_list,
            level,
            state: State::Unconfigured,
            statics: [EMPTY_STATIC; MAX_REGIONS],
            static_count: 0,
            next_region: 0,
            sets: [RegionSet::new(Privilege::Privileged); MAX_PARTITIONS],
            set_count: 0,
            generation: 0,
            active: None,
        })
    }

    /// Returns the underlying [`ProtectionController`].
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Returns the underlying [`SecurityGate`].
    pub fn gate(&self) -> &G {
        &self.gate
    }

    /// The number of regions taken by static boundaries.
    pub fn static_region_count(&self) -> usize {
        self.static_count
    }

    /// The number of regions taken by static and dynamic boundaries together.
    pub fn configured_regions(&self) -> usize {
        self.next_region
    }

    /// The handle most recently passed to [`IsolationManager::update()`].
    pub fn active(&self) -> Option<PartitionBoundaryHandle> {
        self.active
    }

    /// Programs the static boundaries described by `layout` and enables the protection unit.
    ///
    /// Every region is validated before the first hardware write, so a failure leaves the
    /// hardware untouched.
    ///
    /// # Errors
    /// - [`IsolationError::AlreadyEstablished`] if called more than once.
    /// - [`IsolationError::RegionCapacityExceeded`] if `layout` needs more regions than exist.
    /// - [`IsolationError::ConfigurationError`] if a region is unaligned or inverted.
    /// - [`IsolationError::Attribution`] if security attribution cannot be configured.
    pub fn establish_static_boundaries(
        &mut self,
        layout: &[StaticRegion],
    ) -> Result<(), IsolationError> {
        if self.state != State::Unconfigured {
            return Err(IsolationError::AlreadyEstablished);
        }

        let available = self.controller.region_count();
        if !(layout.len() <= available) {
            return Err(IsolationError::RegionCapacityExceeded {
                required: layout.len(),
                available,
            });
        }

        for (index, region) in layout.iter().enumerate() {
            static_spec(index, region).validate()?;
        }

        self.gate
            .init_attribution()
            .map_err(IsolationError::Attribution)?;

        for index in 0..available {
            self.controller.clear(index as u8);
        }
        for (index, region) in layout.iter().enumerate() {
            let spec = static_spec(index, region);
            log::debug!(
                "static region {index}: {:?} {:#010X}..={:#010X}",
                region.kind,
                spec.base,
                spec.limit
            );
            self.controller.program(&spec);
            self.statics[index] = *region;
        }

        self.controller.enable(EnablePolicy {
            privileged_default_map: true,
            enforce_in_fault_handlers: true,
        });

        self.static_count = layout.len();
        self.next_region = layout.len();
        self.state = State::Established;
        log::info!("{} static protection regions established", layout.len());
        Ok(())
    }

    /// Validates the assets of `partition`, reserves its dynamic regions and returns the handle
    /// that reproduces its boundaries.
    ///
    /// Reserved regions are only programmed by [`IsolationManager::update()`], so the regions of
    /// a partition are never live while another partition is active. Every asset is validated
    /// before the peripheral protection controllers are written, so a failure leaves the
    /// hardware untouched.
    ///
    /// Memory assets must lie inside the static partition memory and get no region of their
    /// own, since overlapping enabled regions fault. They still take part in handle identity.
    ///
    /// # Errors
    /// - [`IsolationError::NotEstablished`] if static boundaries have not been established.
    /// - [`IsolationError::AssetNotAllowed`] if an asset is absent from the allow-list, or a
    ///   memory asset is inverted or lies outside partition memory.
    /// - [`IsolationError::ConfigurationError`] if a peripheral's window is unaligned or
    ///   inverted.
    /// - [`IsolationError::RegionCapacityExceeded`] if the regions do not fit.
    /// - [`IsolationError::PartitionTableFull`] if no more partitions can be bound.
    pub fn bind(
        &mut self,
        partition: &PartitionDescriptor<'_>,
    ) -> Result<PartitionBoundaryHandle, IsolationError> {
        if self.state != State::Established {
            return Err(IsolationError::NotEstablished);
        }

        let privilege = match self.level {
            IsolationLevel::One => Privilege::Privileged,
            IsolationLevel::Two if partition.flags.contains(PartitionFlags::PSA_ROT) => {
                Privilege::Privileged
            }
            IsolationLevel::Two => Privilege::Unprivileged,
        };

        let mut planned = RegionSet::new(privilege);
        for asset in partition.assets {
            let window = self.resolve_asset(partition.id, asset, &mut planned)?;
            let Some((base, limit, access)) = window else {
                continue;
            };
            let spec = ProtectionRegionSpec {
                index: 0,
                base,
                limit,
                access,
                privilege: privilege.region_privilege(),
                shareability: Shareability::NonShareable,
            };
            spec.validate()?;
            planned.push(spec)?;
        }

        let existing = self.sets[..self.set_count]
            .iter()
            .position(|set| set.same_protection(&planned));
        let handle = if planned.is_empty() {
            PartitionBoundaryHandle {
                privilege,
                generation: 0,
                region_set: RegionSetId::EMPTY,
            }
        } else if let Some(position) = existing {
            PartitionBoundaryHandle {
                privilege,
                generation: self.sets[position].generation,
                region_set: RegionSetId(position as u8),
            }
        } else {
            let required = self.next_region + planned.count;
            let available = self.controller.region_count();
            if !(required <= available) {
                return Err(IsolationError::RegionCapacityExceeded {
                    required,
                    available,
                });
            }
            if !(self.set_count < MAX_PARTITIONS) {
                return Err(IsolationError::PartitionTableFull);
            }

            self.generation += 1;
            planned.generation = self.generation;
            for spec in &mut planned.regions[..planned.count] {
                spec.index = self.next_region as u8;
                self.next_region += 1;
            }

            let region_set = RegionSetId(self.set_count as u8);
            self.sets[self.set_count] = planned;
            self.set_count += 1;

            PartitionBoundaryHandle {
                privilege,
                generation: planned.generation,
                region_set,
            }
        };

        for asset in partition.assets {
            if let Some(location) = self.mmio(asset).and_then(|mmio| mmio.ppc) {
                self.gate.secure_peripheral(location, privilege);
            }
        }

        log::debug!(
            "partition {:#X} bound: {privilege:?}, region set {}",
            partition.id,
            handle.region_set.0
        );
        Ok(handle)
    }

    /// Programs the boundaries of `handle`: exactly its regions in the dynamic range, every other
    /// dynamic region cleared, and thread mode set to its privilege.
    ///
    /// Must run with interrupts disabled. Performs no allocation and never blocks.
    ///
    /// # Errors
    /// - [`IsolationError::NotEstablished`] if static boundaries have not been established.
    /// - [`IsolationError::UnknownHandle`] if `handle` was not produced by
    ///   [`IsolationManager::bind()`].
    pub fn update(&mut self, handle: &PartitionBoundaryHandle) -> Result<(), IsolationError> {
        if self.state != State::Established {
            return Err(IsolationError::NotEstablished);
        }

        let set = self.resolve_handle(handle)?;
        for index in self.static_count..self.next_region {
            match set.as_ref().and_then(|set| set.region_at(index as u8)) {
                Some(spec) => self.controller.program(spec),
                None => self.controller.clear(index as u8),
            }
        }
        self.gate.set_thread_privilege(handle.privilege);

        self.active = Some(*handle);
        Ok(())
    }

    /// Switches to the boundaries of `handle`, skipping the update when `handle` is already
    /// active.
    ///
    /// Returns `true` if the hardware was reprogrammed.
    ///
    /// # Errors
    /// Returns any error [`IsolationManager::update()`] returns.
    pub fn switch_to(&mut self, handle: &PartitionBoundaryHandle) -> Result<bool, IsolationError> {
        if self.active.as_ref() == Some(handle) {
            return Ok(false);
        }

        self.update(handle)?;
        Ok(true)
    }

    fn resolve_handle(
        &self,
        handle: &PartitionBoundaryHandle,
    ) -> Result<Option<RegionSet>, IsolationError> {
        if handle.region_set == RegionSetId::EMPTY {
            return match handle.generation {
                0 => Ok(None),
                _ => Err(IsolationError::UnknownHandle),
            };
        }

        let set = self.sets[..self.set_count]
            .get(handle.region_set.0 as usize)
            .filter(|set| set.generation == handle.generation)
            .filter(|set| set.privilege == handle.privilege)
            .ok_or(IsolationError::UnknownHandle)?;

        Ok(Some(*set))
    }

    /// Returns the region window `asset` needs, or `None` for memory covered by the static
    /// partition regions. Memory windows are recorded in `planned`.
    fn resolve_asset(
        &self,
        partition: u32,
        asset: &AssetDescriptor,
        planned: &mut RegionSet,
    ) -> Result<Option<(u32, u32, AccessClass)>, IsolationError> {
        let not_allowed = IsolationError::AssetNotAllowed {
            partition,
            asset: *asset,
        };

        match asset.kind {
            AssetKind::NamedPeripheral(_) | AssetKind::NumberedPeripheral(_) => {
                let mmio = self.mmio(asset).ok_or(not_allowed)?;
                Ok(Some((mmio.base, mmio.limit, AccessClass::Device)))
            }
            AssetKind::Memory { base, limit } => {
                let in_partition_memory =
                    self.statics[..self.static_count].iter().any(|region| {
                        region.kind.is_partition_memory()
                            && region.base <= base
                            && limit <= region.limit
                    });
                if !(base <= limit) || !in_partition_memory {
                    return Err(not_allowed);
                }

                planned.push_memory(base, limit)?;
                Ok(None)
            }
        }
    }

    fn mmio(&self, asset: &AssetDescriptor) -> Option<&'allow MmioDescriptor> {
        let allow_list: &'allow [MmioDescriptor] = self.allow_list;
        match asset.kind {
            AssetKind::NamedPeripheral(id) => allow_list.iter().find(|mmio| mmio.name == id.0),
            AssetKind::NumberedPeripheral(number) => {
                allow_list.iter().find(|mmio| mmio.number == number)
            }
            AssetKind::Memory { .. } => None,
        }
    }
}

fn static_spec(index: usize, region: &StaticRegion) -> ProtectionRegionSpec {
    ProtectionRegionSpec {
        index: index as u8,
        base: region.base,
        limit: region.limit,
        access: region.kind.access(),
        privilege: region.kind.privilege(),
        shareability: Shareability::NonShareable,
    }
}
