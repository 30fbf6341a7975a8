//! Fakes shared by the scenario tests.

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use image::{
    encode_header, header_size, FlashMode, FlashSize, Segment, SegmentKind, DEFAULT_HEADER_OFFSET,
    FLASH_HEADER_SIZE,
};
use secure_boot::{
    isolation::{
        EnablePolicy, HardwareStatus, PpcLocation, Privilege, ProtectionController,
        ProtectionRegionSpec, SecurityGate,
    },
    loader::{AddressRange, Handoff, ImageDescriptor, MemoryLayout, TargetMemory, Verdict, Verifier},
    region::{AreaId, FlashArea, Region, RegionProvider},
    sequencer::{Platform, ResetCause, StepFailure, TraceRecord},
};

/// The size of every image slot in the fake flash.
pub const SLOT_SIZE: u32 = 0x1000;

/// The flash area table of the fake flash.
pub static FLASH_AREAS: [FlashArea; 3] = [
    FlashArea {
        id: AreaId::BOOTLOADER,
        offset: 0,
        length: SLOT_SIZE,
    },
    FlashArea {
        id: AreaId::IMAGE_PRIMARY,
        offset: SLOT_SIZE,
        length: SLOT_SIZE,
    },
    FlashArea {
        id: AreaId::IMAGE_SECONDARY,
        offset: 2 * SLOT_SIZE,
        length: SLOT_SIZE,
    },
];

/// The memory layout the fakes load into.
pub const LAYOUT: MemoryLayout<'static> = MemoryLayout {
    executable: &[AddressRange::new(0x1000_0000, 0x10_0000)],
    data: &[AddressRange::new(0x3800_0000, 0x10_0000)],
    reserved: &[
        AddressRange::new(0x1000_0000, 0x1_0000),
        AddressRange::new(0x3800_0000, 0x1000),
    ],
};

/// The first code address images may be loaded at.
pub const CODE_BASE: u32 = 0x1001_0000;
/// The first data address images may be loaded at.
pub const DATA_BASE: u32 = 0x3800_1000;

/// Returns `length` bytes of a recognizable pattern starting with `DEADBEEF`.
pub fn pattern(length: usize) -> Vec<u8> {
    [0xDE, 0xAD, 0xBE, 0xEF]
        .into_iter()
        .chain((0..).map(|byte: u32| byte as u8))
        .take(length)
        .collect()
}

/// Builds a slot holding a header at [`DEFAULT_HEADER_OFFSET`] and each `(segment, payload)`
/// written at its source offset.
pub fn slot_image(entry: u32, segments: &[(Segment, Vec<u8>)]) -> Vec<u8> {
    let mut slot = vec![0xFF; SLOT_SIZE as usize];

    let table: Vec<Segment> = segments.iter().map(|(segment, _)| *segment).collect();
    let header_start = DEFAULT_HEADER_OFFSET as usize;
    let header_end = header_start + header_size(table.len());
    encode_header(entry, &table, &mut slot[header_start..header_end]).unwrap();

    for (segment, payload) in segments {
        let start = segment.source_offset as usize;
        slot[start..start + payload.len()].copy_from_slice(payload);
    }
    slot
}

/// Builds a flash holding `primary` and `secondary` in their slots.
pub fn flash(primary: Option<&[u8]>, secondary: Option<&[u8]>) -> Vec<u8> {
    let mut flash = vec![0xFF; 3 * SLOT_SIZE as usize];
    for (slot, image) in [(1, primary), (2, secondary)] {
        if let Some(image) = image {
            let start = slot * SLOT_SIZE as usize;
            flash[start..start + image.len()].copy_from_slice(image);
        }
    }
    flash
}

/// A code segment of `length` bytes at `source_offset`, loaded at `destination`.
pub fn code(source_offset: u32, length: u32, destination: u32) -> Segment {
    Segment {
        source_offset,
        length,
        destination,
        kind: SegmentKind::Code,
    }
}

/// A data segment of `length` bytes at `source_offset`, loaded at `destination`.
pub fn data(source_offset: u32, length: u32, destination: u32) -> Segment {
    Segment {
        source_offset,
        length,
        destination,
        kind: SegmentKind::Data,
    }
}

/// Everything the fakes observe, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A bring-up platform call.
    Platform(&'static str),
    /// A segment copy.
    Copy {
        /// The destination of the copy.
        destination: u32,
        /// The number of bytes copied.
        length: usize,
    },
    /// A protection region was programmed.
    Program(ProtectionRegionSpec),
    /// A protection region was cleared.
    Clear(u8),
    /// The protection unit was enabled.
    Enable(EnablePolicy),
    /// Security attribution was configured.
    Attribution,
    /// A peripheral was secured.
    SecurePeripheral(PpcLocation, Privilege),
    /// The thread privilege was set.
    ThreadPrivilege(Privilege),
    /// The platform was quiesced for handoff.
    Prepare,
    /// Control was transferred.
    Transfer(u32),
}

/// A shared, ordered record of [`Event`]s.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    /// Appends `event`.
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    /// Returns the number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|event| predicate(event)).count()
    }

    /// Returns the position of the first event equal to `event`.
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.0.borrow().iter().position(|recorded| recorded == event)
    }
}

/// A byte-addressable memory that records every copy.
#[derive(Debug, Default)]
pub struct RecordingMemory {
    /// The log copies are recorded in.
    pub log: EventLog,
    /// The bytes written, by destination.
    pub writes: Vec<(u32, Vec<u8>)>,
}

impl RecordingMemory {
    /// Returns the bytes most recently written at `destination`.
    pub fn read(&self, destination: u32) -> Option<&[u8]> {
        self.writes
            .iter()
            .rev()
            .find(|(address, _)| *address == destination)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

impl TargetMemory for RecordingMemory {
    fn copy_to(&mut self, destination: u32, bytes: &[u8]) {
        self.log.push(Event::Copy {
            destination,
            length: bytes.len(),
        });
        self.writes.push((destination, bytes.to_vec()));
    }
}

/// A [`Handoff`] whose transfer records the entry address and returns.
#[derive(Debug, Default)]
pub struct RecordingHandoff {
    /// The log the handoff is recorded in.
    pub log: EventLog,
    /// Entry addresses control was transferred to.
    pub transfers: Vec<u32>,
}

impl Handoff for RecordingHandoff {
    fn prepare(&mut self) {
        self.log.push(Event::Prepare);
    }

    unsafe fn transfer(&mut self, entry: u32) {
        self.log.push(Event::Transfer(entry));
        self.transfers.push(entry);
    }
}

/// A [`Verifier`] with a fixed verdict that counts its invocations.
#[derive(Debug)]
pub struct FixedVerifier {
    /// The verdict returned for every image.
    pub verdict: Verdict,
    /// The number of images verified.
    pub calls: usize,
}

impl FixedVerifier {
    /// Creates a new [`FixedVerifier`] returning `verdict`.
    pub fn new(verdict: Verdict) -> Self {
        Self { verdict, calls: 0 }
    }
}

impl Verifier for FixedVerifier {
    fn verify<P: RegionProvider + ?Sized>(
        &mut self,
        provider: &P,
        region: &Region,
        descriptor: &ImageDescriptor,
    ) -> Verdict {
        // The verifier reads the image through the same provider as the loader.
        let view = provider.map(region, 0, region.length).unwrap();
        assert_eq!(view.len(), region.length as usize);
        provider.unmap(view);
        assert!(!descriptor.segments().is_empty());

        self.calls += 1;
        self.verdict
    }
}

/// A bring-up [`Platform`] that records every call and can fail one of them.
#[derive(Debug)]
pub struct FakePlatform {
    /// The log calls are recorded in.
    pub log: EventLog,
    /// The call that fails, and how.
    pub fail: Option<(&'static str, StepFailure)>,
    /// The bytes returned as the flash header.
    pub flash_header: [u8; FLASH_HEADER_SIZE],
    /// The reported reset cause.
    pub reset_cause: ResetCause,
    /// The reported trace record.
    pub trace: Option<TraceRecord>,
    /// The baud rate the console was brought up with.
    pub baud_rate: Option<u32>,
    /// The watchdog timeout that was configured.
    pub watchdog_timeout_ms: Option<u32>,
    /// Every auto-feed setting, in order.
    pub auto_feed: Vec<bool>,
}

impl FakePlatform {
    /// Creates a new [`FakePlatform`] recording into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail: None,
            flash_header: image::encode_flash_header(FlashSize::MIB_4, FlashMode::DIO, 0xF, 0),
            reset_cause: ResetCause::PowerOn,
            trace: None,
            baud_rate: None,
            watchdog_timeout_ms: None,
            auto_feed: Vec::new(),
        }
    }

    /// Makes the call named `name` fail with `failure`.
    pub fn failing_at(mut self, name: &'static str, failure: StepFailure) -> Self {
        self.fail = Some((name, failure));
        self
    }

    /// The names of the recorded platform calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.log
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Platform(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn call(&mut self, name: &'static str) -> Result<(), StepFailure> {
        self.log.push(Event::Platform(name));
        match self.fail {
            Some((failing, failure)) if failing == name => Err(failure),
            _ => Ok(()),
        }
    }
}

impl Platform for FakePlatform {
    fn configure_reset_sources(&mut self) -> Result<(), StepFailure> {
        self.call("configure_reset_sources")
    }

    fn set_watchdog_auto_feed(&mut self, enabled: bool) -> Result<(), StepFailure> {
        self.auto_feed.push(enabled);
        self.call("set_watchdog_auto_feed")
    }

    fn init_memory_protection(&mut self) -> Result<(), StepFailure> {
        self.call("init_memory_protection")
    }

    fn zero_memory(&mut self) -> Result<(), StepFailure> {
        self.call("zero_memory")
    }

    fn reset_cache(&mut self) -> Result<(), StepFailure> {
        self.call("reset_cache")
    }

    fn configure_clocks(&mut self) -> Result<(), StepFailure> {
        self.call("configure_clocks")
    }

    fn init_console(&mut self, baud_rate: u32) -> Result<(), StepFailure> {
        self.baud_rate = Some(baud_rate);
        self.call("init_console")
    }

    fn start_flash(&mut self) -> Result<(), StepFailure> {
        self.call("start_flash")
    }

    fn read_flash_header(
        &mut self,
        buffer: &mut [u8; FLASH_HEADER_SIZE],
    ) -> Result<(), StepFailure> {
        *buffer = self.flash_header;
        self.call("read_flash_header")
    }

    fn unlock_flash(&mut self) -> Result<(), StepFailure> {
        self.call("unlock_flash")
    }

    fn configure_flash(&mut self, _geometry: &image::FlashGeometry) -> Result<(), StepFailure> {
        self.call("configure_flash")
    }

    fn enable_write_protection(&mut self) -> Result<(), StepFailure> {
        self.call("enable_write_protection")
    }

    fn reset_cause(&mut self) -> ResetCause {
        self.log.push(Event::Platform("reset_cause"));
        self.reset_cause
    }

    fn trace_record(&mut self) -> Option<TraceRecord> {
        self.log.push(Event::Platform("trace_record"));
        self.trace
    }

    fn enable_trace_recording(&mut self) {
        self.log.push(Event::Platform("enable_trace_recording"));
    }

    fn configure_watchdog(&mut self, timeout_ms: u32) -> Result<(), StepFailure> {
        self.watchdog_timeout_ms = Some(timeout_ms);
        self.call("configure_watchdog")
    }
}

/// A [`ProtectionController`] that mirrors the hardware region table.
#[derive(Debug)]
pub struct FakeController {
    /// The log hardware writes are recorded in.
    pub log: EventLog,
    /// The number of regions reported.
    pub region_count: usize,
    /// The live region table.
    pub regions: Vec<Option<ProtectionRegionSpec>>,
    /// The policy the unit was enabled with.
    pub enabled: Option<EnablePolicy>,
}

impl FakeController {
    /// Creates a new [`FakeController`] with `region_count` regions.
    pub fn new(log: EventLog, region_count: usize) -> Self {
        Self {
            log,
            region_count,
            regions: vec![None; region_count],
            enabled: None,
        }
    }

    /// The number of programmed regions.
    pub fn live_regions(&self) -> usize {
        self.regions.iter().flatten().count()
    }

    /// Index pairs of programmed regions whose address ranges intersect.
    pub fn overlapping_regions(&self) -> Vec<(u8, u8)> {
        let live: Vec<_> = self.regions.iter().flatten().collect();
        let mut overlaps = Vec::new();
        for (position, a) in live.iter().enumerate() {
            for b in &live[position + 1..] {
                if a.base <= b.limit && b.base <= a.limit {
                    overlaps.push((a.index, b.index));
                }
            }
        }
        overlaps
    }

    /// The number of hardware writes.
    pub fn writes(&self) -> usize {
        self.log.count(|event| {
            matches!(
                event,
                Event::Program(_) | Event::Clear(_) | Event::Enable(_)
            )
        })
    }
}

impl ProtectionController for FakeController {
    fn region_count(&self) -> usize {
        self.region_count
    }

    fn program(&mut self, spec: &ProtectionRegionSpec) {
        self.log.push(Event::Program(*spec));
        self.regions[spec.index as usize] = Some(*spec);
    }

    fn clear(&mut self, index: u8) {
        self.log.push(Event::Clear(index));
        self.regions[index as usize] = None;
    }

    fn enable(&mut self, policy: EnablePolicy) {
        self.log.push(Event::Enable(policy));
        self.enabled = Some(policy);
    }
}

/// A [`SecurityGate`] that records every call.
#[derive(Debug)]
pub struct FakeGate {
    /// The log calls are recorded in.
    pub log: EventLog,
    /// The result of attribution.
    pub attribution: Result<(), HardwareStatus>,
    /// The current thread privilege.
    pub thread_privilege: Option<Privilege>,
}

impl FakeGate {
    /// Creates a new [`FakeGate`] recording into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            attribution: Ok(()),
            thread_privilege: None,
        }
    }
}

impl SecurityGate for FakeGate {
    fn init_attribution(&mut self) -> Result<(), HardwareStatus> {
        self.log.push(Event::Attribution);
        self.attribution
    }

    fn secure_peripheral(&mut self, location: PpcLocation, privilege: Privilege) {
        self.log.push(Event::SecurePeripheral(location, privilege));
    }

    fn set_thread_privilege(&mut self, privilege: Privilege) {
        self.log.push(Event::ThreadPrivilege(privilege));
        self.thread_privilege = Some(privilege);
    }
}
